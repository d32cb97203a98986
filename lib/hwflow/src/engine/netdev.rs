// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Netdevs, the port table, and the NIC driver seam.
//!
//! The engine never talks to vendor hardware directly; it resolves a
//! port number to a [`Netdev`] through the [`PortMap`] and programs
//! entries through the [`FlowDriver`] trait. Both are provided by the
//! embedding dataplane.

use super::aux::TnlOffloadAux;
use super::flow::ActionList;
use super::flow::FlowMatch;
use super::flow::PortId;
use crate::api::MacAddr;
use crate::api::Ufid;
use crate::ddi::sync::KRwLock;
use core::fmt;
use core::fmt::Display;
use core::net::Ipv4Addr;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Identifies which datapath implementation owns a port.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct DriverClass(pub &'static str);

impl DriverClass {
    pub const NETDEV: Self = Self("netdev");
}

/// The flavor of a netdev, as far as offload cares.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetdevKind {
    /// A physical NIC port.
    Dpdk,
    /// A VXLAN tunnel vport.
    Vxlan,
    /// A Geneve tunnel vport.
    Geneve,
}

impl NetdevKind {
    pub fn is_vxlan(self) -> bool {
        self == Self::Vxlan
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dpdk => "dpdk",
            Self::Vxlan => "vxlan",
            Self::Geneve => "geneve",
        }
    }
}

/// Tunnel parameters attached to a vport.
#[derive(Clone, Copy, Debug)]
pub struct TunnelConfig {
    /// Outer destination transport port (e.g. 4789 for VXLAN).
    pub dst_port: u16,
}

/// The vport half of a tunnel netdev.
pub struct Vport {
    pub tunnel: Option<TunnelConfig>,
    pub offload_aux: Option<Arc<TnlOffloadAux>>,
}

/// A network device known to the datapath.
pub struct Netdev {
    name: String,
    kind: NetdevKind,
    port: PortId,
    vport: Option<Vport>,
}

impl Netdev {
    /// A plain (non-vport) device.
    pub fn new(name: &str, kind: NetdevKind, port: PortId) -> Arc<Self> {
        Arc::new(Self { name: name.to_string(), kind, port, vport: None })
    }

    /// A tunnel vport. The composition tables are allocated with the
    /// port and destroyed with it.
    pub fn new_vport(
        name: &str,
        kind: NetdevKind,
        port: PortId,
        tunnel: TunnelConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            kind,
            port,
            vport: Some(Vport {
                tunnel: Some(tunnel),
                offload_aux: Some(Arc::new(TnlOffloadAux::new())),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NetdevKind {
        self.kind
    }

    pub fn port(&self) -> PortId {
        self.port
    }

    /// The vport data, if this netdev is a vport.
    pub fn vport(&self) -> Option<&Vport> {
        self.vport.as_ref()
    }

    pub fn tunnel_config(&self) -> Option<&TunnelConfig> {
        self.vport.as_ref().and_then(|v| v.tunnel.as_ref())
    }

    pub fn offload_aux(&self) -> Option<&Arc<TnlOffloadAux>> {
        self.vport.as_ref().and_then(|v| v.offload_aux.as_ref())
    }
}

impl fmt::Debug for Netdev {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Netdev")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("port", &self.port)
            .finish()
    }
}

/// The port table: `(class, port)` to netdev. A port with no entry is
/// a tap for classification purposes.
pub struct PortMap {
    ports: KRwLock<BTreeMap<(DriverClass, PortId), Arc<Netdev>>>,
}

impl PortMap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { ports: KRwLock::new(BTreeMap::new()) })
    }

    pub fn insert(&self, class: DriverClass, netdev: Arc<Netdev>) {
        self.ports.write().insert((class, netdev.port()), netdev);
    }

    pub fn remove(&self, class: DriverClass, port: PortId) {
        self.ports.write().remove(&(class, port));
    }

    pub fn get(&self, port: PortId, class: DriverClass) -> Option<Arc<Netdev>> {
        self.ports.read().get(&(class, port)).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Netdev>> {
        self.ports.read().values().find(|n| n.name() == name).cloned()
    }
}

/// Per-request context handed to the driver alongside the match and
/// actions. Feature flags come from the action classifier; the outer
/// header constraints are filled in when programming a composed pair.
#[derive(Clone, Debug)]
pub struct OffloadInfo {
    pub class: DriverClass,
    /// Classifier-derived flags (`ACTION_OUTPUT`, ...).
    pub action_flags: u32,
    pub vxlan_decap: bool,
    pub vlan_push: bool,
    pub drop: bool,
    /// Program the match only, with a mark; used to validate a match
    /// before committing to a cross-product.
    pub mark_set: bool,
    pub version: u64,
    /// Outer destination IP supplementing a composed match.
    pub tun_dst: Option<Ipv4Addr>,
    /// Outer destination MAC supplementing a composed match.
    pub tun_dl_dst: Option<MacAddr>,
    /// Outer destination transport port supplementing a composed match.
    pub tp_dst_port: Option<u16>,
}

impl OffloadInfo {
    pub fn new(class: DriverClass) -> Self {
        Self {
            class,
            action_flags: 0,
            vxlan_decap: false,
            vlan_push: false,
            drop: false,
            mark_set: false,
            version: 0,
            tun_dst: None,
            tun_dl_dst: None,
            tp_dst_port: None,
        }
    }

    /// Fill in the outer-header constraints from an ingress match.
    pub fn set_outer(&mut self, m: &FlowMatch) {
        self.tun_dst = Some(m.nw_dst);
        self.tun_dl_dst = Some(m.dl_dst);
        self.tp_dst_port = Some(m.tp_dst);
    }
}

/// The driver's answer to a successful `flow_put`.
#[derive(Clone, Copy, Debug)]
pub struct PutResult {
    /// Whether the actions were offloaded along with the match.
    pub actions_offloaded: bool,
}

/// Stats reported by the driver for one hardware entry.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlowStats {
    pub n_packets: u64,
    pub n_bytes: u64,
}

/// A driver-side failure. Never escapes to producers; the observable
/// outcome is the flow's status word.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DriverError {
    /// The hardware refused the match or actions.
    Rejected,
    /// No entry with the given ufid.
    NotFound,
}

impl Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Rejected => write!(f, "hardware rejected the flow"),
            Self::NotFound => write!(f, "no such hardware entry"),
        }
    }
}

/// The NIC driver contract.
///
/// A single worker thread performs all calls; implementations need
/// not be reentrant. Calls may block but are expected to be bounded.
pub trait FlowDriver: Send + Sync {
    /// Program (or overwrite) the entry keyed by `ufid`.
    fn flow_put(
        &self,
        netdev: &Netdev,
        fmatch: &FlowMatch,
        actions: &ActionList,
        ufid: Ufid,
        info: &OffloadInfo,
    ) -> Result<PutResult, DriverError>;

    /// Remove the entry keyed by `ufid`.
    fn flow_del(&self, netdev: &Netdev, ufid: Ufid)
        -> Result<(), DriverError>;

    /// Query stats for the entry keyed by `ufid`.
    fn flow_get(
        &self,
        netdev: &Netdev,
        ufid: Ufid,
    ) -> Result<FlowStats, DriverError>;
}
