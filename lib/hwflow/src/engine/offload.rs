// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Worker-side offload dispatch: the tunnel cross-product composition
//! engine, the normal (single-entry) path, and the delete cascade.
//!
//! All functions here run on the offload worker thread only. The
//! hardware driver is never called with the queue mutex held; the
//! composition batches run under the owning Aux's write lock so that
//! a rollback leaves the programmed set exactly as it was.

use super::aux::pair_del;
use super::aux::pair_put;
use super::aux::IngressFlow;
use super::aux::TnlPopFlow;
use super::classify;
use super::flow::ActionList;
use super::flow::FlowHandle;
use super::netdev::DriverClass;
use super::netdev::DriverError;
use super::netdev::Netdev;
use super::netdev::OffloadInfo;
use super::netdev::PortMap;
use super::netdev::PutResult;
use super::queue::OffloadItem;
use super::queue::OffloadOp;
use super::queue::OffloadQueue;
use crate::api::OffloadStatus;
use crate::LogLevel;
use std::sync::Arc;

/// Resolve the tunnel vport targeted by a `TunnelPop` action, if the
/// list carries one and the vport still exists.
pub(crate) fn try_ingress(
    acts: &ActionList,
    class: DriverClass,
    ports: &PortMap,
) -> Option<Arc<Netdev>> {
    let portno = acts.first_tunnel_pop()?;
    ports.get(portno, class)
}

/// Is this a post-decap flow: matching on a tunnel, arriving on a
/// tunnel vport that carries composition state?
pub(crate) fn is_tnl_pop_flow(flow: &FlowHandle, inport: &Netdev) -> bool {
    if !flow.fmatch().tunnel_dst_is_set() {
        return false;
    }

    let Some(vport) = inport.vport() else {
        return false;
    };

    vport.tunnel.is_some() && vport.offload_aux.is_some()
}

/// Program the match-only form of a new ingress flow with a mark,
/// then immediately remove it again. Rejection here avoids a
/// partially succeeded cross-product later.
fn ingress_validate(
    q: &OffloadQueue,
    inflow: &IngressFlow,
    info: &OffloadInfo,
) -> bool {
    let m = inflow.flow.fmatch().clone();
    let ufid = inflow.flow.ufid();

    let mut vinfo = info.clone();
    vinfo.mark_set = true;
    let ret = q.driver.flow_put(
        &inflow.ingress_netdev,
        &m,
        &ActionList::default(),
        ufid,
        &vinfo,
    );
    if ret.is_err() {
        return false;
    }

    let _ = q.driver.flow_del(&inflow.ingress_netdev, ufid);
    true
}

/// Program the composed entry of `inflow` against every tnl-pop flow
/// in the Aux, rolling back on any refusal.
fn compose_all(
    q: &OffloadQueue,
    inflow: &IngressFlow,
    aux: &super::aux::TnlOffloadAux,
    info: &OffloadInfo,
) -> Result<(), ()> {
    let mut tables = aux.tables.write();

    for tnlflow in tables.tnl_pop.values_mut() {
        tnlflow.status = OffloadStatus::None;
    }

    let mut need_rollback = false;
    for tnlflow in tables.tnl_pop.values_mut() {
        let t_acts = tnlflow.flow.actions();
        let mut pinfo = info.clone();
        match pair_put(&*q.driver, inflow, tnlflow, &t_acts, &mut pinfo) {
            Ok(_) => {
                tnlflow.refs += 1;
                tnlflow.status = OffloadStatus::Full;
            }
            Err(_) => {
                need_rollback = true;
                tnlflow.status = OffloadStatus::Failed;
            }
        }
    }

    if !need_rollback {
        return Ok(());
    }

    tables.tnl_pop.retain(|_, tnlflow| match tnlflow.status {
        OffloadStatus::Failed if tnlflow.refs == 0 => {
            // Newly failed and orphaned.
            tnlflow.flow.state().set(OffloadStatus::Failed);
            false
        }
        OffloadStatus::Failed => {
            // This entry refused the new ingress flow yet is
            // composed with a prior one, which must have been
            // programmed successfully before.
            q.ctx.log.log(
                LogLevel::Error,
                &format!(
                    "merge of {} with {} failed, but refs != 0",
                    inflow.flow.ufid(),
                    tnlflow.flow.ufid()
                ),
            );
            q.counters.merge_anomalies.incr(1);
            true
        }
        _ => {
            let _ = pair_del(&*q.driver, inflow, tnlflow);
            tnlflow.refs -= 1;
            true
        }
    });

    Err(())
}

/// Ingress ADD: validate the match, then compose against the Aux.
fn ingress_add(
    q: &OffloadQueue,
    flow: &Arc<FlowHandle>,
    inport: &Arc<Netdev>,
    class: DriverClass,
    acts: &ActionList,
    info: &OffloadInfo,
) -> OffloadStatus {
    let Some(tnl_dev) = try_ingress(acts, class, &q.ports) else {
        return OffloadStatus::None;
    };

    let Some(aux) = tnl_dev.offload_aux() else {
        return OffloadStatus::None;
    };

    // Multiple dataplane threads may install the same flow; the
    // second arrival just fails.
    if aux.tables.read().ingress.contains_key(&flow.ufid()) {
        return OffloadStatus::Failed;
    }

    let inflow =
        IngressFlow::new(Arc::clone(flow), Arc::clone(inport), info.action_flags);

    if !ingress_validate(q, &inflow, info) {
        return OffloadStatus::Failed;
    }

    if compose_all(q, &inflow, aux, info).is_err() {
        return OffloadStatus::Failed;
    }

    aux.tables.write().ingress.insert(flow.ufid(), inflow);
    OffloadStatus::Full
}

/// Remove an ingress flow and every composed entry derived from it.
fn del_ingress(
    q: &OffloadQueue,
    flow: &Arc<FlowHandle>,
    tnl_dev: &Netdev,
) -> bool {
    let Some(aux) = tnl_dev.offload_aux() else {
        return false;
    };

    let mut tables = aux.tables.write();
    let Some(inflow) = tables.ingress.remove(&flow.ufid()) else {
        return false;
    };

    // The same ufid may live in several dataplane threads; only the
    // owning handle may tear the entry down.
    if !Arc::ptr_eq(&inflow.flow, flow) {
        tables.ingress.insert(flow.ufid(), inflow);
        return false;
    }

    for tnlflow in tables.tnl_pop.values_mut() {
        let _ = pair_del(&*q.driver, &inflow, tnlflow);
        tnlflow.refs = tnlflow.refs.saturating_sub(1);
    }

    inflow.flow.state().set(OffloadStatus::None);
    true
}

fn try_del_ingress(
    q: &OffloadQueue,
    flow: &Arc<FlowHandle>,
    acts: &ActionList,
    class: DriverClass,
) -> bool {
    let Some(tnl_dev) = try_ingress(acts, class, &q.ports) else {
        return false;
    };
    del_ingress(q, flow, &tnl_dev)
}

/// Remove a tnl-pop flow and every composed entry derived from it.
fn try_del_tnlflow(
    q: &OffloadQueue,
    flow: &Arc<FlowHandle>,
    inport: &Netdev,
) -> bool {
    if !is_tnl_pop_flow(flow, inport) {
        return false;
    }

    let Some(aux) = inport.offload_aux() else {
        return false;
    };

    let mut tables = aux.tables.write();
    let Some(tnlflow) = tables.tnl_pop.remove(&flow.ufid()) else {
        return false;
    };

    if !Arc::ptr_eq(&tnlflow.flow, flow) {
        tables.tnl_pop.insert(flow.ufid(), tnlflow);
        return false;
    }

    for inflow in tables.ingress.values() {
        let _ = pair_del(&*q.driver, inflow, &tnlflow);
    }

    tnlflow.flow.state().set(OffloadStatus::None);
    true
}

/// TnlPop ADD/MOD: compose the flow against every ingress entry.
///
/// An ADD never finds an existing entry; a MOD may not either, when
/// the previous insertion failed. Either way the entry is built (or
/// rebuilt) from scratch: re-composition overwrites the same composed
/// ufids, so `refs` restarts from zero.
fn try_offload_tnl_pop(
    q: &OffloadQueue,
    flow: &Arc<FlowHandle>,
    inport: &Netdev,
    acts: &ActionList,
    info: &OffloadInfo,
) -> OffloadStatus {
    if !is_tnl_pop_flow(flow, inport) {
        return OffloadStatus::None;
    }

    let Some(aux) = inport.offload_aux() else {
        return OffloadStatus::None;
    };

    let mut tables = aux.tables.write();
    let mut tnlflow = match tables.tnl_pop.remove(&flow.ufid()) {
        Some(existing) => {
            if !Arc::ptr_eq(&existing.flow, flow) {
                // The same flow arriving from a different dataplane
                // thread.
                tables.tnl_pop.insert(flow.ufid(), existing);
                return OffloadStatus::Failed;
            }
            let mut existing = existing;
            existing.refs = 0;
            existing
        }
        None => TnlPopFlow::new(Arc::clone(flow), info.action_flags),
    };

    for inflow in tables.ingress.values_mut() {
        inflow.status = OffloadStatus::None;
    }

    let mut need_rollback = false;
    for inflow in tables.ingress.values_mut() {
        let mut pinfo = info.clone();
        match pair_put(&*q.driver, inflow, &tnlflow, acts, &mut pinfo) {
            Ok(_) => {
                tnlflow.refs += 1;
                inflow.status = OffloadStatus::Full;
            }
            Err(_) => {
                need_rollback = true;
                break;
            }
        }
    }

    if need_rollback {
        for inflow in tables.ingress.values() {
            if inflow.status == OffloadStatus::Full {
                tnlflow.refs -= 1;
                let _ = pair_del(&*q.driver, inflow, &tnlflow);
            }
        }
        // A new entry is simply dropped; a pre-existing one stays
        // removed from the Aux.
        return OffloadStatus::Failed;
    }

    tables.tnl_pop.insert(flow.ufid(), tnlflow);
    OffloadStatus::Full
}

/// The ingress side of the dispatch. A MOD whose prior actions popped
/// a tunnel tears the old composition down and reports `None` so the
/// caller re-evaluates the new actions as a fresh request.
fn try_offload_ingress(
    q: &OffloadQueue,
    item: &OffloadItem,
    inport: &Arc<Netdev>,
    acts: &ActionList,
    info: &OffloadInfo,
) -> OffloadStatus {
    match item.op {
        OffloadOp::Add => {
            ingress_add(q, &item.flow, inport, item.class, acts, info)
        }
        OffloadOp::Mod => {
            let Some(old_acts) = item.old_acts.as_ref() else {
                return OffloadStatus::None;
            };
            let Some(tnl_dev) = try_ingress(old_acts, item.class, &q.ports)
            else {
                return OffloadStatus::None;
            };
            q.ctx.log.log(
                LogLevel::Note,
                &format!(
                    "MOD an ingress flow on port {}",
                    item.flow.in_port()
                ),
            );
            q.ctx.log.log(LogLevel::Note, &format!("mod actions to:{acts}"));
            let _ = del_ingress(q, &item.flow, &tnl_dev);
            OffloadStatus::None
        }
        OffloadOp::Del => OffloadStatus::None,
    }
}

/// Program a non-composed flow directly, keyed by its own ufid.
fn normal_offload(
    q: &OffloadQueue,
    flow: &FlowHandle,
    netdev: &Netdev,
    acts: &ActionList,
    info: &OffloadInfo,
) -> Result<PutResult, DriverError> {
    let m = flow.fmatch().clone();
    let mut info = info.clone();
    info.version = flow.version();
    q.driver.flow_put(netdev, &m, acts, flow.ufid(), &info)
}

/// Handle an ADD or MOD request.
pub(crate) fn offload_put(
    q: &OffloadQueue,
    item: &OffloadItem,
    acts: &ActionList,
) -> Result<(), ()> {
    let flow = &item.flow;
    let old_status = flow.state().status();

    if flow.is_dead() {
        return Err(());
    }

    let Some(netdev) = q.ports.get(flow.in_port(), item.class) else {
        return Err(());
    };

    let mut info = OffloadInfo::new(item.class);
    if !classify::check_actions(&netdev, acts, &mut info, &q.ports) {
        if item.op == OffloadOp::Add || !old_status.is_offloaded() {
            flow.state().set(OffloadStatus::Failed);
            return Err(());
        }
        // A MOD to something the hardware will not accept: the
        // programmed entry has to come out.
        let _ = offload_del(q, item, acts);
        flow.state().set(OffloadStatus::Failed);
        return Err(());
    }

    let mut ret = Ok(());
    let mut status = try_offload_ingress(q, item, &netdev, acts, &info);
    if status == OffloadStatus::None {
        status = try_offload_tnl_pop(q, flow, &netdev, acts, &info);
    }
    if status == OffloadStatus::None {
        status = match normal_offload(q, flow, &netdev, acts, &info) {
            Ok(put) if put.actions_offloaded => OffloadStatus::Full,
            Ok(_) => OffloadStatus::Mask,
            Err(_) => {
                ret = Err(());
                OffloadStatus::Failed
            }
        };
    }

    flow.state().set(status);

    // The programmed hardware state keeps the flow alive until DEL.
    if !old_status.is_offloaded() && status.is_offloaded() {
        q.pin_offloaded(flow);
    }

    ret
}

/// Handle a DEL request: ingress cascade, then tnl-pop cascade, then
/// the plain driver entry.
pub(crate) fn offload_del(
    q: &OffloadQueue,
    item: &OffloadItem,
    acts: &ActionList,
) -> Result<(), ()> {
    let flow = &item.flow;

    let Some(netdev) = q.ports.get(flow.in_port(), item.class) else {
        // When a netdev is removed all of its hardware flows are
        // removed first, so the only way here is a flow that was
        // never offloaded.
        q.ctx.log.log(
            LogLevel::Error,
            &format!("del of {} without a valid inport", flow.ufid()),
        );
        flow.state().set(OffloadStatus::None);
        return Err(());
    };

    let ok = if try_del_ingress(q, flow, acts, item.class) {
        true
    } else if try_del_tnlflow(q, flow, &netdev) {
        true
    } else {
        let ret = q.driver.flow_del(&netdev, flow.ufid());
        flow.state().set(OffloadStatus::None);
        ret.is_ok()
    };

    if ok {
        q.unpin(flow.ufid());
        Ok(())
    } else {
        Err(())
    }
}
