// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The admin socket.
//!
//! A unix stream socket serving the one introspection command,
//! `offload/dump-vtp`. One postcard-encoded [`CmdReq`] frame in, one
//! `Result<DumpVtpResp, OffloadError>` frame out, each frame prefixed
//! with a little-endian u32 length.

use crate::api::cmd::CMD_DUMP_VTP;
use crate::api::CmdReq;
use crate::api::DumpVtpReq;
use crate::api::DumpVtpResp;
use crate::api::OffloadError;
use crate::api::API_VERSION;
use crate::engine::ioctl;
use crate::engine::netdev::PortMap;
use core::sync::atomic::AtomicBool;
use core::sync::atomic::Ordering;
use std::fs;
use std::io;
use std::io::Read;
use std::io::Write;
use std::os::unix::net::UnixListener;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

/// Cap on a request frame; a dump request is a netdev name.
const MAX_FRAME: u32 = 1 << 16;

pub fn read_frame(stream: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len);
    if len > MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame too large",
        ));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_frame(stream: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    stream.write_all(&(bytes.len() as u32).to_le_bytes())?;
    stream.write_all(bytes)
}

fn handle_req(
    frame: &[u8],
    ports: &PortMap,
) -> Result<DumpVtpResp, OffloadError> {
    let req: CmdReq = postcard::from_bytes(frame)
        .map_err(|e| OffloadError::DeserCmdReq(e.to_string()))?;

    if !req.check_version() {
        return Err(OffloadError::BadApiVersion {
            client: req.api_version,
            engine: API_VERSION,
        });
    }

    match req.cmd.as_str() {
        CMD_DUMP_VTP => {
            let dump_req: DumpVtpReq = postcard::from_bytes(&req.body)
                .map_err(|e| OffloadError::DeserCmdReq(e.to_string()))?;
            ioctl::dump_vtp(ports, &dump_req)
        }
        other => Err(OffloadError::CommandUnknown(other.to_string())),
    }
}

fn serve_conn(stream: &mut UnixStream, ports: &PortMap) -> io::Result<()> {
    let frame = read_frame(stream)?;
    let resp = handle_req(&frame, ports);
    let bytes = match postcard::to_allocvec(&resp) {
        Ok(bytes) => bytes,
        Err(e) => {
            let err: Result<DumpVtpResp, OffloadError> =
                Err(OffloadError::SerCmdResp(e.to_string()));
            postcard::to_allocvec(&err)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        }
    };
    write_frame(stream, &bytes)
}

/// The admin command server. Dropping it shuts the listener down and
/// removes the socket file.
pub struct AdminServer {
    path: PathBuf,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AdminServer {
    pub fn spawn(path: &Path, ports: Arc<PortMap>) -> io::Result<Self> {
        // A stale socket from an unclean shutdown would fail the bind.
        let _ = fs::remove_file(path);
        let listener = UnixListener::bind(path)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let sd = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name("hw-offload-admin".to_string())
            .spawn(move || {
                for conn in listener.incoming() {
                    if sd.load(Ordering::Acquire) {
                        break;
                    }
                    let Ok(mut stream) = conn else {
                        continue;
                    };
                    let _ = serve_conn(&mut stream, &ports);
                }
            })?;

        Ok(Self { path: path.to_path_buf(), shutdown, thread: Some(thread) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AdminServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        // Wake the accept loop so it observes the shutdown flag.
        let _ = UnixStream::connect(&self.path);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let _ = fs::remove_file(&self.path);
    }
}
