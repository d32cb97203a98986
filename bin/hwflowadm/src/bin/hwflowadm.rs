// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use clap::Parser;
use hwflow::print::print_vtp;
use hwflowadm::HwflowAdm;
use std::path::PathBuf;

/// Administer the hardware flow-offload engine
#[derive(Debug, Parser)]
#[command(version)]
enum Command {
    /// Dump the composition tables of a tunnel vport.
    DumpVtp {
        /// Path to the engine's admin socket.
        #[arg(short, long)]
        socket: Option<PathBuf>,

        /// The netdev name of the vport.
        name: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cmd = Command::parse();

    match cmd {
        Command::DumpVtp { socket, name } => {
            let adm = HwflowAdm::new(socket.as_deref());
            let resp = adm.dump_vtp(&name)?;
            print_vtp(&resp)?;
        }
    }

    Ok(())
}
