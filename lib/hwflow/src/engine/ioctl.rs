// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Handlers for the admin commands.

use super::aux::merged_ufid;
use super::netdev::PortMap;
use crate::api::DumpVtpReq;
use crate::api::DumpVtpResp;
use crate::api::IngressFlowDump;
use crate::api::OffloadError;
use crate::api::TnlPopFlowDump;

/// Dump the composition tables of the named vport. The whole dump
/// runs under the Aux read lock, so the three sections are one
/// consistent snapshot.
pub fn dump_vtp(
    ports: &PortMap,
    req: &DumpVtpReq,
) -> Result<DumpVtpResp, OffloadError> {
    let Some(netdev) = ports.get_by_name(&req.name) else {
        return Err(OffloadError::NetdevNotFound(req.name.clone()));
    };

    if netdev.vport().is_none() {
        return Err(OffloadError::NotAVport(req.name.clone()));
    }

    let Some(aux) = netdev.offload_aux() else {
        return Ok(DumpVtpResp::default());
    };

    let tables = aux.tables.read();

    let ingress = tables
        .ingress
        .values()
        .map(|i| IngressFlowDump {
            ufid: i.flow.ufid(),
            netdev: i.ingress_netdev.name().to_string(),
        })
        .collect();

    let tnl_pop = tables
        .tnl_pop
        .values()
        .map(|t| TnlPopFlowDump { ufid: t.flow.ufid(), refs: t.refs })
        .collect();

    let mut merged = Vec::new();
    for inflow in tables.ingress.values() {
        for tnlflow in tables.tnl_pop.values() {
            merged.push(merged_ufid(inflow, tnlflow));
        }
    }

    Ok(DumpVtpResp { ingress, tnl_pop, merged })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::Ufid;
    use crate::engine::netdev::PortMap;
    use crate::engine::aux::IngressFlow;
    use crate::engine::aux::TnlPopFlow;
    use crate::engine::flow::ActionList;
    use crate::engine::flow::FlowHandle;
    use crate::engine::flow::FlowMatch;
    use crate::engine::flow::PortId;
    use crate::engine::netdev::DriverClass;
    use crate::engine::netdev::Netdev;
    use crate::engine::netdev::NetdevKind;
    use crate::engine::netdev::TunnelConfig;

    #[test]
    fn dump_sections() {
        let ports = PortMap::new();
        let nic = Netdev::new("dpdk0", NetdevKind::Dpdk, PortId(1));
        let vtp = Netdev::new_vport(
            "vxlan0",
            NetdevKind::Vxlan,
            PortId(7),
            TunnelConfig { dst_port: 4789 },
        );
        ports.insert(DriverClass::NETDEV, nic.clone());
        ports.insert(DriverClass::NETDEV, vtp.clone());

        let f1 = FlowHandle::new(
            Ufid(0xa0),
            PortId(1),
            FlowMatch::default(),
            ActionList::default(),
        );
        let f2 = FlowHandle::new(
            Ufid(0x0b),
            PortId(7),
            FlowMatch::default(),
            ActionList::default(),
        );

        let aux = vtp.offload_aux().unwrap();
        {
            let mut tables = aux.tables.write();
            tables
                .ingress
                .insert(f1.ufid(), IngressFlow::new(f1.clone(), nic, 0));
            let mut t = TnlPopFlow::new(f2.clone(), 0);
            t.refs = 1;
            tables.tnl_pop.insert(f2.ufid(), t);
        }

        let resp = dump_vtp(&ports, &DumpVtpReq { name: "vxlan0".into() })
            .unwrap();
        assert_eq!(resp.ingress.len(), 1);
        assert_eq!(resp.ingress[0].netdev, "dpdk0");
        assert_eq!(resp.tnl_pop.len(), 1);
        assert_eq!(resp.tnl_pop[0].refs, 1);
        assert_eq!(resp.merged, vec![Ufid(0xab)]);

        let err = dump_vtp(&ports, &DumpVtpReq { name: "nope".into() });
        assert!(matches!(err, Err(OffloadError::NetdevNotFound(_))));

        let err = dump_vtp(&ports, &DumpVtpReq { name: "dpdk0".into() });
        assert!(matches!(err, Err(OffloadError::NotAVport(_))));
    }
}
