// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Per-tunnel-vport composition state.
//!
//! Each tunnel vport carries a [`TnlOffloadAux`]: the set of ingress
//! flows (flows whose actions pop this tunnel) and the set of tnl-pop
//! flows (flows matching on the vport, post-decap), behind one
//! read/write lock. Every (ingress, tnl-pop) pair that is programmed
//! contributes exactly one hardware entry keyed by the XOR of the two
//! ufids, and each tnl-pop entry's `refs` counts its live pairs.

use super::flow::FlowHandle;
use super::netdev::DriverError;
use super::netdev::FlowDriver;
use super::netdev::FlowStats;
use super::netdev::Netdev;
use super::netdev::OffloadInfo;
use super::netdev::PutResult;
use crate::api::OffloadStatus;
use crate::api::Ufid;
use crate::ddi::sync::KRwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A flow whose action list pops this tunnel. Composed entries are
/// programmed on its ingress netdev.
pub(crate) struct IngressFlow {
    pub flow: Arc<FlowHandle>,
    pub ingress_netdev: Arc<Netdev>,
    pub action_flags: u32,
    /// Transient status used inside a program/rollback batch. Guarded
    /// by the Aux lock.
    pub status: OffloadStatus,
}

impl IngressFlow {
    pub fn new(
        flow: Arc<FlowHandle>,
        ingress_netdev: Arc<Netdev>,
        action_flags: u32,
    ) -> Self {
        Self {
            flow,
            ingress_netdev,
            action_flags,
            status: OffloadStatus::None,
        }
    }
}

/// A flow matching on the tunnel vport (post-decap).
pub(crate) struct TnlPopFlow {
    pub flow: Arc<FlowHandle>,
    pub action_flags: u32,
    /// Number of composed entries currently programmed for this flow.
    pub refs: u32,
    /// Transient status used inside a program/rollback batch. Guarded
    /// by the Aux lock.
    pub status: OffloadStatus,
}

impl TnlPopFlow {
    pub fn new(flow: Arc<FlowHandle>, action_flags: u32) -> Self {
        Self { flow, action_flags, refs: 0, status: OffloadStatus::None }
    }
}

/// The ufid of the hardware entry representing an (ingress, tnl-pop)
/// pair. Commutative in its inputs.
pub(crate) fn merged_ufid(inflow: &IngressFlow, tnlflow: &TnlPopFlow) -> Ufid {
    inflow.flow.ufid() ^ tnlflow.flow.ufid()
}

/// Program the composed entry for one (ingress, tnl-pop) pair.
///
/// The match is the tnl-pop flow's (inner) match; the outer header
/// constraints -- destination IP, MAC, and transport port -- come from
/// the ingress flow and travel in `info`.
pub(crate) fn pair_put(
    driver: &dyn FlowDriver,
    inflow: &IngressFlow,
    tnlflow: &TnlPopFlow,
    acts: &super::flow::ActionList,
    info: &mut OffloadInfo,
) -> Result<PutResult, DriverError> {
    let tnl_m = tnlflow.flow.fmatch().clone();
    info.set_outer(inflow.flow.fmatch());
    info.action_flags |= tnlflow.action_flags;
    info.action_flags |= inflow.action_flags;

    driver.flow_put(
        &inflow.ingress_netdev,
        &tnl_m,
        acts,
        merged_ufid(inflow, tnlflow),
        info,
    )
}

/// Remove the composed entry for one pair.
pub(crate) fn pair_del(
    driver: &dyn FlowDriver,
    inflow: &IngressFlow,
    tnlflow: &TnlPopFlow,
) -> Result<(), DriverError> {
    driver.flow_del(&inflow.ingress_netdev, merged_ufid(inflow, tnlflow))
}

/// Query the stats of the composed entry for one pair.
pub(crate) fn pair_stats(
    driver: &dyn FlowDriver,
    inflow: &IngressFlow,
    tnlflow: &TnlPopFlow,
) -> Result<FlowStats, DriverError> {
    driver.flow_get(&inflow.ingress_netdev, merged_ufid(inflow, tnlflow))
}

/// The two composition tables, keyed by ufid.
#[derive(Default)]
pub(crate) struct AuxTables {
    pub ingress: BTreeMap<Ufid, IngressFlow>,
    pub tnl_pop: BTreeMap<Ufid, TnlPopFlow>,
}

/// Composition state of one tunnel vport. Allocated with the port,
/// destroyed with it; dropping the Aux drops both tables, releasing
/// every entry's flow and netdev references.
pub struct TnlOffloadAux {
    pub(crate) tables: KRwLock<AuxTables>,
}

impl TnlOffloadAux {
    pub fn new() -> Self {
        Self { tables: KRwLock::new(AuxTables::default()) }
    }

    /// Drop every entry from both tables.
    pub fn flush(&self) {
        let mut tables = self.tables.write();
        tables.ingress.clear();
        tables.tnl_pop.clear();
    }

    /// Number of (ingress, tnl-pop) entries.
    pub fn len(&self) -> (usize, usize) {
        let tables = self.tables.read();
        (tables.ingress.len(), tables.tnl_pop.len())
    }

    /// The `refs` count of the tnl-pop entry for `ufid`, if present.
    pub fn tnl_pop_refs(&self, ufid: Ufid) -> Option<u32> {
        self.tables.read().tnl_pop.get(&ufid).map(|t| t.refs)
    }
}

impl Default for TnlOffloadAux {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::flow::ActionList;
    use crate::engine::flow::FlowMatch;
    use crate::engine::flow::PortId;
    use crate::engine::netdev::NetdevKind;

    fn flow(ufid: u128) -> Arc<FlowHandle> {
        FlowHandle::new(
            Ufid(ufid),
            PortId(1),
            FlowMatch::default(),
            ActionList::default(),
        )
    }

    #[test]
    fn merged_ufid_commutes() {
        let nic = Netdev::new("dpdk0", NetdevKind::Dpdk, PortId(1));
        let i = IngressFlow::new(flow(0xaaaa), nic, 0);
        let t = TnlPopFlow::new(flow(0x5555), 0);
        assert_eq!(merged_ufid(&i, &t), Ufid(0xaaaa ^ 0x5555));
    }

    #[test]
    fn flush_drops_refs() {
        let aux = TnlOffloadAux::new();
        let nic = Netdev::new("dpdk0", NetdevKind::Dpdk, PortId(1));
        let f = flow(0x1);
        {
            let mut tables = aux.tables.write();
            tables
                .ingress
                .insert(f.ufid(), IngressFlow::new(f.clone(), nic, 0));
        }
        assert_eq!(Arc::strong_count(&f), 2);
        aux.flush();
        assert_eq!(Arc::strong_count(&f), 1);
        assert_eq!(aux.len(), (0, 0));
    }
}
