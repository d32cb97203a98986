// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Offload engine administration library

use hwflow::admin::read_frame;
use hwflow::admin::write_frame;
use hwflow_api::cmd::CMD_DUMP_VTP;
use hwflow_api::CmdReq;
use hwflow_api::DumpVtpReq;
use hwflow_api::DumpVtpResp;
pub use hwflow_api::OffloadError;
use hwflow_api::API_VERSION;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;

/// Errors related to administering the offload engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("error interacting with the admin socket: {0}")]
    Io(#[from] std::io::Error),

    /// Something in the engine's command handler failed.
    #[error("command {0} failed: {1}")]
    CommandFailed(String, OffloadError),

    #[error("request serialization failed for command {0}: {1}")]
    ReqSer(String, postcard::Error),

    #[error("response deserialization failed for command {0}: {1}")]
    RespDeser(String, postcard::Error),
}

/// The handle used to send administration commands to the offload
/// engine.
#[derive(Debug)]
pub struct HwflowAdm {
    sock: PathBuf,
}

impl HwflowAdm {
    /// The default admin socket path.
    pub const ADMIN_SOCK: &'static str = "/var/run/hwflow.sock";

    pub fn new(sock: Option<&Path>) -> Self {
        Self {
            sock: sock
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(Self::ADMIN_SOCK)),
        }
    }

    /// Dump the composition tables of the named tunnel vport.
    pub fn dump_vtp(&self, name: &str) -> Result<DumpVtpResp, Error> {
        let body = postcard::to_allocvec(&DumpVtpReq { name: name.into() })
            .map_err(|e| Error::ReqSer(CMD_DUMP_VTP.to_string(), e))?;
        let req = CmdReq {
            api_version: API_VERSION,
            cmd: CMD_DUMP_VTP.to_string(),
            body,
        };
        let frame = postcard::to_allocvec(&req)
            .map_err(|e| Error::ReqSer(CMD_DUMP_VTP.to_string(), e))?;

        let mut stream = UnixStream::connect(&self.sock)?;
        write_frame(&mut stream, &frame)?;
        let resp = read_frame(&mut stream)?;

        let resp: Result<DumpVtpResp, OffloadError> =
            postcard::from_bytes(&resp)
                .map_err(|e| Error::RespDeser(CMD_DUMP_VTP.to_string(), e))?;
        resp.map_err(|e| Error::CommandFailed(CMD_DUMP_VTP.to_string(), e))
    }
}
