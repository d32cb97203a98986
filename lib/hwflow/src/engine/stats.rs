// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Statistics: engine counters and per-flow usage aggregation.
//!
//! A composed flow has no hardware entry of its own; its usage is the
//! sum over the composed entries it participates in. The aggregation
//! runs on a single reader (the dataplane's revalidation pass), so
//! the flow's usage counters accumulate with relaxed ordering.

use super::aux::pair_stats;
use super::flow::FlowHandle;
use super::netdev::DriverClass;
use super::netdev::FlowStats;
use super::netdev::Netdev;
use super::offload::is_tnl_pop_flow;
use super::offload::try_ingress;
use super::queue::OffloadQueue;
use crate::ddi::kstat::KStatU64;
use crate::ddi::time::Moment;
use std::sync::Arc;

/// Counters kept by the engine for observability.
#[derive(Default)]
pub struct OffloadCounters {
    /// Put requests the worker completed.
    pub puts: KStatU64,
    /// Put requests that ended FAILED.
    pub put_errors: KStatU64,
    /// Delete requests the worker completed.
    pub dels: KStatU64,
    /// Items disposed of by a drain on exit.
    pub drained: KStatU64,
    /// Rollbacks that found a tnl-pop entry FAILED with refs != 0.
    pub merge_anomalies: KStatU64,
}

/// Sum the composed entries of the ingress flow `flow`, if it is one.
fn try_ingress_stats(
    q: &OffloadQueue,
    flow: &FlowHandle,
    class: DriverClass,
    stats: &mut FlowStats,
) -> bool {
    let acts = flow.actions();
    let Some(tnl_dev) = try_ingress(&acts, class, &q.ports) else {
        return false;
    };

    let Some(aux) = tnl_dev.offload_aux() else {
        return false;
    };

    let tables = aux.tables.read();
    let Some(inflow) = tables.ingress.get(&flow.ufid()) else {
        return false;
    };

    for tnlflow in tables.tnl_pop.values() {
        if let Ok(s) = pair_stats(&*q.driver, inflow, tnlflow) {
            stats.n_packets += s.n_packets;
            stats.n_bytes += s.n_bytes;
        }
    }
    true
}

/// Sum the composed entries of the tnl-pop flow `flow`, if it is one.
fn try_tnlflow_stats(
    q: &OffloadQueue,
    flow: &FlowHandle,
    inport: &Netdev,
    stats: &mut FlowStats,
) -> bool {
    if !is_tnl_pop_flow(flow, inport) {
        return false;
    }

    let Some(aux) = inport.offload_aux() else {
        return false;
    };

    let tables = aux.tables.read();
    let Some(tnlflow) = tables.tnl_pop.get(&flow.ufid()) else {
        return false;
    };

    for inflow in tables.ingress.values() {
        if let Ok(s) = pair_stats(&*q.driver, inflow, tnlflow) {
            stats.n_packets += s.n_packets;
            stats.n_bytes += s.n_bytes;
        }
    }
    true
}

impl OffloadQueue {
    /// Pull hardware stats for `flow` and fold them into its usage
    /// counters, advancing its `used` timestamp when traffic was
    /// seen. Fails when the flow's input port is gone or no hardware
    /// entry answers for it.
    pub fn stats_for(
        &self,
        flow: &Arc<FlowHandle>,
        class: DriverClass,
        now: Moment,
    ) -> Result<(), ()> {
        let Some(port) = self.ports.get(flow.in_port(), class) else {
            return Err(());
        };

        let mut stats = FlowStats::default();
        let found = if try_ingress_stats(self, flow, class, &mut stats) {
            true
        } else if try_tnlflow_stats(self, flow, &port, &mut stats) {
            true
        } else {
            match self.driver.flow_get(&port, flow.ufid()) {
                Ok(s) => {
                    stats = s;
                    true
                }
                Err(_) => false,
            }
        };

        if !found {
            return Err(());
        }

        if stats.n_packets > 0 {
            flow.usage().touch(now.raw_millis());
            flow.usage().add(stats.n_packets, stats.n_bytes);
        }
        Ok(())
    }
}
