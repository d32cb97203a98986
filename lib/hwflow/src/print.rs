// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print command responses in human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both hwflowadm and integration tests.

use crate::api::DumpVtpResp;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a [`DumpVtpResp`].
pub fn print_vtp(resp: &DumpVtpResp) -> std::io::Result<()> {
    print_vtp_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpVtpResp`] into a given writer.
pub fn print_vtp_into(
    writer: &mut impl Write,
    resp: &DumpVtpResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "INGRESS flow:")?;
    for entry in &resp.ingress {
        writeln!(t, "{}\tnetdev:{}", entry.ufid, entry.netdev)?;
    }

    writeln!(t, "TNL_POP flow:")?;
    for entry in &resp.tnl_pop {
        writeln!(t, "{}\tref:{}", entry.ufid, entry.refs)?;
    }

    writeln!(t, "MERGED flow:")?;
    for ufid in &resp.merged {
        writeln!(t, "{}", ufid)?;
    }

    t.flush()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::IngressFlowDump;
    use crate::api::TnlPopFlowDump;
    use crate::api::Ufid;

    #[test]
    fn three_sections() {
        let resp = DumpVtpResp {
            ingress: vec![IngressFlowDump {
                ufid: Ufid(0xa0),
                netdev: "dpdk0".into(),
            }],
            tnl_pop: vec![TnlPopFlowDump { ufid: Ufid(0x0b), refs: 2 }],
            merged: vec![Ufid(0xab)],
        };

        let mut out = Vec::new();
        print_vtp_into(&mut out, &resp).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("INGRESS flow:"));
        assert!(text.contains("TNL_POP flow:"));
        assert!(text.contains("MERGED flow:"));
        assert!(text.contains("netdev:dpdk0"));
        assert!(text.contains("ref:2"));
    }
}
