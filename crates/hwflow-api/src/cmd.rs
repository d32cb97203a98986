// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The admin command types.
//!
//! The engine serves exactly one command over its admin socket: a dump
//! of a tunnel vport's composition tables. Requests and responses are
//! serialized with postcard by the consumers of these types.

use super::API_VERSION;
use super::Ufid;
use core::fmt::Debug;
use serde::Deserialize;
use serde::Serialize;

/// The name of the composition-table dump command.
pub const CMD_DUMP_VTP: &str = "offload/dump-vtp";

/// The envelope carried on the admin socket.
///
/// A generic structure used to carry the commands; the command's
/// request data is the already-serialized `body`. The version lets the
/// engine reject a client compiled against a different command set.
#[derive(Debug, Deserialize, Serialize)]
pub struct CmdReq {
    pub api_version: u64,
    pub cmd: String,
    pub body: Vec<u8>,
}

impl CmdReq {
    /// Is this the expected API version?
    pub fn check_version(&self) -> bool {
        self.api_version == API_VERSION
    }
}

/// A marker trait indicating a success response type that is returned
/// from a command and may be passed across the admin boundary.
pub trait CmdOk: Debug + Serialize {}

impl CmdOk for () {}

/// Dump the composition tables of a tunnel vport, for use in debugging
/// or administrative purposes.
#[derive(Debug, Deserialize, Serialize)]
pub struct DumpVtpReq {
    /// The name of the netdev whose tables you want to dump.
    pub name: String,
}

/// An ingress-flow entry: a software flow whose actions pop a tunnel.
#[derive(Debug, Deserialize, Serialize)]
pub struct IngressFlowDump {
    pub ufid: Ufid,
    /// Name of the netdev the composed entries are programmed on.
    pub netdev: String,
}

/// A tnl-pop entry: a flow matching on the tunnel vport, post-decap.
#[derive(Debug, Deserialize, Serialize)]
pub struct TnlPopFlowDump {
    pub ufid: Ufid,
    /// Number of composed entries currently programmed for this flow.
    pub refs: u32,
}

/// The response to a [`DumpVtpReq`].
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DumpVtpResp {
    /// The ingress flows bound to this vport.
    pub ingress: Vec<IngressFlowDump>,
    /// The tnl-pop flows bound to this vport.
    pub tnl_pop: Vec<TnlPopFlowDump>,
    /// The composed ufid of every (ingress, tnl-pop) pair.
    pub merged: Vec<Ufid>,
}

impl CmdOk for DumpVtpResp {}

/// An admin command error.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum OffloadError {
    BadApiVersion { client: u64, engine: u64 },
    CommandUnknown(String),
    DeserCmdReq(String),
    NetdevNotFound(String),
    NotAVport(String),
    SerCmdResp(String),
}

impl core::fmt::Display for OffloadError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::BadApiVersion { client, engine } => write!(
                f,
                "API version mismatch: client {client}, engine {engine}"
            ),
            Self::CommandUnknown(cmd) => write!(f, "unknown command: {cmd}"),
            Self::DeserCmdReq(msg) => {
                write!(f, "failed to deserialize request: {msg}")
            }
            Self::NetdevNotFound(name) => write!(f, "netdev not found: {name}"),
            Self::NotAVport(name) => write!(f, "netdev not a vport: {name}"),
            Self::SerCmdResp(msg) => {
                write!(f, "failed to serialize response: {msg}")
            }
        }
    }
}
