// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The action classifier.
//!
//! Walks a flow's action list to decide whether the flow is
//! offloadable at all and to derive the feature flags the driver
//! needs. Outputs to a tap (a port with no netdev) disable offload;
//! a list with no fate action at all is a valid drop flow.

use super::flow::Action;
use super::flow::ActionList;
use super::flow::PortId;
use super::netdev::DriverClass;
use super::netdev::Netdev;
use super::netdev::OffloadInfo;
use super::netdev::PortMap;

/// The action list contains a fate (output-like) action.
pub const ACTION_OUTPUT: u32 = 1 << 0;

fn is_port_tap(ports: &PortMap, port: PortId, class: DriverClass) -> bool {
    ports.get(port, class).is_none()
}

/// Walk a nested clone block, applying the output rules. Returns the
/// derived flags and whether the block carries a real fate action, or
/// `None` when an output targets a tap.
fn check_clone_actions(
    acts: &ActionList,
    class: DriverClass,
    ports: &PortMap,
) -> Option<(u32, bool)> {
    let mut flag = 0;
    let mut has_fate = false;

    for a in acts.iter() {
        if let Action::Output(port) = a {
            if is_port_tap(ports, *port, class) {
                return None;
            }
            has_fate = true;
            flag |= ACTION_OUTPUT;
        }
    }

    Some((flag, has_fate))
}

/// Decide offloadability of `acts` arriving on `inport`, deriving the
/// feature flags into `info`.
pub fn check_actions(
    inport: &Netdev,
    acts: &ActionList,
    info: &mut OffloadInfo,
    ports: &PortMap,
) -> bool {
    let mut offloadable = false;
    let mut flag = 0;

    if inport.kind().is_vxlan() {
        info.vxlan_decap = true;
    }

    for a in acts.iter() {
        match a {
            Action::Output(port) => {
                flag |= ACTION_OUTPUT;
                // Tap dev, not offload.
                if is_port_tap(ports, *port, info.class) {
                    return false;
                }
                offloadable = true;
            }
            Action::Clone(None) => return false,
            Action::Clone(Some(nested)) => {
                match check_clone_actions(nested, info.class, ports) {
                    None => return false,
                    Some((f, has_fate)) => {
                        flag |= f;
                        if has_fate {
                            offloadable = true;
                        }
                    }
                }
            }
            Action::TunnelPop(port) => {
                flag |= ACTION_OUTPUT;
                if let Some(tnl_dev) = ports.get(*port, info.class) {
                    if tnl_dev.kind().is_vxlan() {
                        info.vxlan_decap = true;
                    }
                }
                offloadable = true;
            }
            Action::PushVlan { .. } => {
                info.vlan_push = true;
                offloadable = true;
            }
            Action::Recirc(_) => {}
        }
    }

    if acts.is_empty() || flag & ACTION_OUTPUT == 0 {
        // Drop action.
        info.drop = true;
        offloadable = true;
    }

    info.action_flags |= flag;
    offloadable
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::netdev::NetdevKind;
    use crate::engine::netdev::TunnelConfig;

    const CLASS: DriverClass = DriverClass::NETDEV;

    fn ports_with_nic() -> std::sync::Arc<PortMap> {
        let ports = PortMap::new();
        ports.insert(CLASS, Netdev::new("dpdk0", NetdevKind::Dpdk, PortId(3)));
        ports.insert(
            CLASS,
            Netdev::new_vport(
                "vxlan0",
                NetdevKind::Vxlan,
                PortId(7),
                TunnelConfig { dst_port: 4789 },
            ),
        );
        ports
    }

    fn nic(ports: &PortMap) -> std::sync::Arc<Netdev> {
        ports.get(PortId(3), CLASS).unwrap()
    }

    #[test]
    fn output_to_nic_is_offloadable() {
        let ports = ports_with_nic();
        let mut info = OffloadInfo::new(CLASS);
        let acts = ActionList::new(vec![Action::Output(PortId(3))]);
        assert!(check_actions(&nic(&ports), &acts, &mut info, &ports));
        assert_eq!(info.action_flags & ACTION_OUTPUT, ACTION_OUTPUT);
        assert!(!info.drop);
    }

    #[test]
    fn output_to_tap_is_not() {
        let ports = ports_with_nic();
        let mut info = OffloadInfo::new(CLASS);
        let acts = ActionList::new(vec![Action::Output(PortId(99))]);
        assert!(!check_actions(&nic(&ports), &acts, &mut info, &ports));
    }

    #[test]
    fn empty_list_is_a_drop() {
        let ports = ports_with_nic();
        let mut info = OffloadInfo::new(CLASS);
        let acts = ActionList::default();
        assert!(check_actions(&nic(&ports), &acts, &mut info, &ports));
        assert!(info.drop);
    }

    #[test]
    fn no_fate_action_is_a_drop() {
        let ports = ports_with_nic();
        let mut info = OffloadInfo::new(CLASS);
        let acts = ActionList::new(vec![Action::Recirc(1)]);
        assert!(check_actions(&nic(&ports), &acts, &mut info, &ports));
        assert!(info.drop);
    }

    #[test]
    fn tunnel_pop_to_vxlan_sets_decap() {
        let ports = ports_with_nic();
        let mut info = OffloadInfo::new(CLASS);
        let acts = ActionList::new(vec![Action::TunnelPop(PortId(7))]);
        assert!(check_actions(&nic(&ports), &acts, &mut info, &ports));
        assert!(info.vxlan_decap);
    }

    #[test]
    fn vxlan_inport_sets_decap() {
        let ports = ports_with_nic();
        let vxlan = ports.get(PortId(7), CLASS).unwrap();
        let mut info = OffloadInfo::new(CLASS);
        let acts = ActionList::new(vec![Action::Output(PortId(3))]);
        assert!(check_actions(&vxlan, &acts, &mut info, &ports));
        assert!(info.vxlan_decap);
    }

    #[test]
    fn push_vlan_sets_flag() {
        let ports = ports_with_nic();
        let mut info = OffloadInfo::new(CLASS);
        let acts = ActionList::new(vec![
            Action::PushVlan { tpid: 0x8100, tci: 10 },
            Action::Output(PortId(3)),
        ]);
        assert!(check_actions(&nic(&ports), &acts, &mut info, &ports));
        assert!(info.vlan_push);
    }

    #[test]
    fn malformed_clone_disables_offload() {
        let ports = ports_with_nic();
        let mut info = OffloadInfo::new(CLASS);
        let acts = ActionList::new(vec![
            Action::Output(PortId(3)),
            Action::Clone(None),
        ]);
        assert!(!check_actions(&nic(&ports), &acts, &mut info, &ports));
    }

    #[test]
    fn clone_rules() {
        let ports = ports_with_nic();

        // Clone with a real output: offloadable.
        let mut info = OffloadInfo::new(CLASS);
        let acts = ActionList::new(vec![Action::Clone(Some(
            ActionList::new(vec![Action::Output(PortId(3))]),
        ))]);
        assert!(check_actions(&nic(&ports), &acts, &mut info, &ports));

        // Clone outputting to a tap: not offloadable.
        let mut info = OffloadInfo::new(CLASS);
        let acts = ActionList::new(vec![Action::Clone(Some(
            ActionList::new(vec![Action::Output(PortId(99))]),
        ))]);
        assert!(!check_actions(&nic(&ports), &acts, &mut info, &ports));
    }
}
