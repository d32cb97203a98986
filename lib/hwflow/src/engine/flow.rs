// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The flow handle and its offload-relevant attributes.
//!
//! The flow itself is owned by the dataplane classifier; the engine
//! consumes a stable ufid, the input port, the expanded match, the
//! live action list, and the atomic offload-status word.

use crate::api::MacAddr;
use crate::api::OffloadStatus;
use crate::api::Ufid;
use crate::ddi::sync::KRwLock;
use core::fmt;
use core::fmt::Display;
use core::net::Ipv4Addr;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;

/// A datapath port number.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct PortId(pub u32);

impl Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The outer tunnel key carried by a post-decapsulation match.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TunnelKey {
    /// Outer destination address of the tunnel.
    pub dst: Ipv4Addr,
}

/// The expanded match descriptor of a flow.
///
/// Only the attributes the offload path consumes are represented; the
/// rest of the match travels through to the driver opaquely.
#[derive(Clone, Debug)]
pub struct FlowMatch {
    /// Destination MAC.
    pub dl_dst: MacAddr,
    /// Destination IP.
    pub nw_dst: Ipv4Addr,
    /// Destination transport port.
    pub tp_dst: u16,
    /// Set when the match sits on a tunnel vport (post-decap).
    pub tunnel: Option<TunnelKey>,
}

impl FlowMatch {
    pub fn tunnel_dst_is_set(&self) -> bool {
        self.tunnel.is_some()
    }
}

impl Default for FlowMatch {
    fn default() -> Self {
        Self {
            dl_dst: MacAddr::ZERO,
            nw_dst: Ipv4Addr::UNSPECIFIED,
            tp_dst: 0,
            tunnel: None,
        }
    }
}

/// A single datapath action, discriminated only as far as the offload
/// path requires.
#[derive(Clone, Debug)]
pub enum Action {
    /// Forward out of a port.
    Output(PortId),
    /// Decapsulate a tunnel header and continue on the named vport.
    TunnelPop(PortId),
    /// Push an 802.1Q header.
    PushVlan { tpid: u16, tci: u16 },
    /// Run a nested action block on a copy of the packet. `None` when
    /// the nested attribute block could not be decoded.
    Clone(Option<ActionList>),
    /// Recirculate with the given id. Opaque to the offload path.
    Recirc(u32),
}

/// An ordered list of actions.
#[derive(Clone, Debug, Default)]
pub struct ActionList {
    acts: Vec<Action>,
}

impl ActionList {
    pub fn new(acts: Vec<Action>) -> Self {
        Self { acts }
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Action> {
        self.acts.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.acts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.acts.len()
    }

    /// The target vport of the first `TunnelPop` action, if any.
    pub fn first_tunnel_pop(&self) -> Option<PortId> {
        self.acts.iter().find_map(|a| match a {
            Action::TunnelPop(port) => Some(*port),
            _ => None,
        })
    }
}

impl From<Vec<Action>> for ActionList {
    fn from(acts: Vec<Action>) -> Self {
        Self { acts }
    }
}

impl Display for ActionList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for a in &self.acts {
            if !first {
                write!(f, ",")?;
            }
            first = false;
            match a {
                Action::Output(p) => write!(f, "output:{p}")?,
                Action::TunnelPop(p) => write!(f, "tnl_pop:{p}")?,
                Action::PushVlan { tci, .. } => write!(f, "push_vlan:{tci}")?,
                Action::Clone(_) => write!(f, "clone(...)")?,
                Action::Recirc(id) => write!(f, "recirc:{id}")?,
            }
        }
        Ok(())
    }
}

const IN_PROGRESS_BIT: u32 = OffloadStatus::InProgress as u32;

/// The atomic offload-status word of a flow.
///
/// Producers OR in the in-progress bit under the queue mutex; the
/// worker overwrites the whole word with release ordering when a
/// request completes. Readers use acquire.
#[derive(Default)]
pub struct FlowOffloadState {
    word: AtomicU32,
}

impl FlowOffloadState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current status, in-progress bit excluded.
    pub fn status(&self) -> OffloadStatus {
        match self.word.load(Ordering::Acquire) & !IN_PROGRESS_BIT {
            x if x == OffloadStatus::Mask as u32 => OffloadStatus::Mask,
            x if x == OffloadStatus::Full as u32 => OffloadStatus::Full,
            x if x == OffloadStatus::Failed as u32 => OffloadStatus::Failed,
            _ => OffloadStatus::None,
        }
    }

    pub fn in_progress(&self) -> bool {
        self.word.load(Ordering::Acquire) & IN_PROGRESS_BIT != 0
    }

    /// Overwrite the status word, clearing the in-progress bit.
    pub fn set(&self, status: OffloadStatus) {
        self.word.store(status as u32, Ordering::Release);
    }

    pub fn mark_in_progress(&self) {
        self.word.fetch_or(IN_PROGRESS_BIT, Ordering::Release);
    }
}

/// Usage totals fed back from hardware by the stats path. The stats
/// reader is single-threaded; relaxed ordering suffices.
#[derive(Default)]
pub struct FlowUsage {
    used_millis: AtomicU64,
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl FlowUsage {
    pub fn touch(&self, now_millis: u64) {
        self.used_millis.store(now_millis, Ordering::Relaxed);
    }

    pub fn add(&self, packets: u64, bytes: u64) {
        self.packets.fetch_add(packets, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn used_millis(&self) -> u64 {
        self.used_millis.load(Ordering::Relaxed)
    }

    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// A handle to a software flow, as seen by the offload engine.
pub struct FlowHandle {
    ufid: Ufid,
    in_port: PortId,
    fmatch: FlowMatch,
    acts: KRwLock<Arc<ActionList>>,
    version: AtomicU64,
    state: FlowOffloadState,
    dead: AtomicBool,
    usage: FlowUsage,
}

impl FlowHandle {
    pub fn new(
        ufid: Ufid,
        in_port: PortId,
        fmatch: FlowMatch,
        acts: ActionList,
    ) -> Arc<Self> {
        Arc::new(Self {
            ufid,
            in_port,
            fmatch,
            acts: KRwLock::new(Arc::new(acts)),
            version: AtomicU64::new(1),
            state: FlowOffloadState::new(),
            dead: AtomicBool::new(false),
            usage: FlowUsage::default(),
        })
    }

    pub fn ufid(&self) -> Ufid {
        self.ufid
    }

    pub fn in_port(&self) -> PortId {
        self.in_port
    }

    pub fn fmatch(&self) -> &FlowMatch {
        &self.fmatch
    }

    /// The live action list. The list may be swapped by the dataplane
    /// at any time; holders keep the snapshot they fetched.
    pub fn actions(&self) -> Arc<ActionList> {
        self.acts.read().clone()
    }

    /// Swap in a new action list, bumping the version.
    pub fn set_actions(&self, acts: ActionList) {
        *self.acts.write() = Arc::new(acts);
        self.version.fetch_add(1, Ordering::Relaxed);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> &FlowOffloadState {
        &self.state
    }

    pub fn usage(&self) -> &FlowUsage {
        &self.usage
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Mark the flow as dying. Further `try_ref` calls fail.
    pub fn kill(&self) {
        self.dead.store(true, Ordering::Release);
    }

    /// Acquire a reference for offload bookkeeping. Fails once the
    /// flow is dying.
    pub fn try_ref(self: &Arc<Self>) -> Option<Arc<Self>> {
        if self.is_dead() {
            return None;
        }
        Some(Arc::clone(self))
    }
}

impl fmt::Debug for FlowHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FlowHandle")
            .field("ufid", &self.ufid)
            .field("in_port", &self.in_port)
            .field("status", &self.state.status())
            .finish()
    }
}
