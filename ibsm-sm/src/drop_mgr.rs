//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_utils::ib::Gid;

use crate::collections::{NodeIndex, PortIndex, SwitchIndex};
use crate::debug::Debug;
use crate::instance::SmUpView;
use crate::inform;
use crate::packet::smp::TRAP_GID_OUT_OF_SERVICE;

// Removes entities whose discovery counter stayed at zero through the
// last sweep, preserving referential integrity: links into a removed node
// are cleared first, then dependent ports, switch records and group
// memberships go with it.
pub(crate) fn process(sm: &mut SmUpView<'_>) {
    // Only a heavy sweep visits everything; dropping on a light sweep
    // would remove entities that simply were not re-read.
    if !sm.sweep.heavy {
        return;
    }

    drop_stale_links(sm);
    let dropped_ports = drop_stale_ports(sm);
    drop_stale_switches(sm);
    drop_stale_nodes(sm);
    drop_stale_remote_sms(sm);

    // Out-of-service traps for the ports that disappeared.
    for gid in dropped_ports {
        inform::report_port_change(sm, gid, TRAP_GID_OUT_OF_SERVICE);
    }
}

// Clears remote links whose far end vanished; if both ends survived but
// disagree, forces a delayed heavy sweep.
fn drop_stale_links(sm: &mut SmUpView<'_>) {
    let mut to_unlink: Vec<(NodeIndex, u8)> = Vec::new();
    for node_idx in sm.subnet.nodes.indexes().collect::<Vec<_>>() {
        let node = &sm.subnet.nodes[node_idx];
        for physp in node.physps() {
            let Some(remote) = physp.remote else {
                continue;
            };
            let remote_gone = sm.subnet.nodes[remote.node_idx]
                .physp(remote.port_num)
                .is_none_or(|rem| rem.discovery_count == 0);
            if physp.discovery_count == 0 || remote_gone {
                to_unlink.push((node_idx, physp.port_num));
                continue;
            }
            // Surviving but asymmetric links mean the fabric moved under
            // us mid-sweep.
            let symmetric = sm.subnet.nodes[remote.node_idx]
                .physp(remote.port_num)
                .and_then(|rem| rem.remote)
                .is_some_and(|back| {
                    back.node_idx == node_idx
                        && back.port_num == physp.port_num
                });
            if !symmetric {
                sm.subnet.force_heavy_sweep = true;
            }
        }
    }
    for (node_idx, port_num) in to_unlink {
        sm.subnet.unlink(node_idx, port_num);
    }
}

fn drop_stale_ports(sm: &mut SmUpView<'_>) -> Vec<Gid> {
    let stale: Vec<PortIndex> = sm
        .subnet
        .ports
        .indexes()
        .filter(|port_idx| sm.subnet.ports[*port_idx].discovery_count == 0)
        .collect();

    let mut dropped = Vec::new();
    let prefix = sm.subnet.subnet_prefix;
    for port_idx in stale {
        let port = &sm.subnet.ports[port_idx];
        let guid = port.guid;
        let gid = port.gid(prefix);
        Debug::EntityDropped(guid).log();

        // Remove the port from every multicast group it joined.
        let mlids: Vec<_> =
            sm.subnet.groups.iter().map(|group| group.mlid).collect();
        for mlid in mlids {
            if let Some(group) = sm.subnet.groups.get_mut_by_mlid(mlid) {
                group.members.remove(&gid);
                if group.members.is_empty() && !group.well_known {
                    sm.subnet.groups.delete(mlid);
                }
            }
        }

        sm.subnet.ports.delete(port_idx);
        dropped.push(gid);
    }
    dropped
}

fn drop_stale_switches(sm: &mut SmUpView<'_>) {
    let stale: Vec<SwitchIndex> = sm
        .subnet
        .switches
        .indexes()
        .filter(|sw_idx| sm.subnet.switches[*sw_idx].discovery_count == 0)
        .collect();
    for sw_idx in stale {
        let node_idx = sm.subnet.switches[sw_idx].node_idx;
        Debug::EntityDropped(sm.subnet.switches[sw_idx].guid).log();
        sm.subnet.nodes[node_idx].switch_idx = None;
        sm.subnet.switches.delete(sw_idx);
    }
}

fn drop_stale_nodes(sm: &mut SmUpView<'_>) {
    let stale: Vec<NodeIndex> = sm
        .subnet
        .nodes
        .indexes()
        .filter(|node_idx| sm.subnet.nodes[*node_idx].discovery_count == 0)
        .collect();
    for node_idx in stale {
        let node = &sm.subnet.nodes[node_idx];
        Debug::EntityDropped(node.guid).log();

        // A switch record cannot outlive its node.
        if let Some(sw_idx) = node.switch_idx {
            sm.subnet.switches.delete(sw_idx);
        }
        // Nor can logical ports keyed under it.
        let orphans: Vec<PortIndex> = sm
            .subnet
            .ports
            .indexes()
            .filter(|port_idx| {
                sm.subnet.ports[*port_idx].node_idx == node_idx
            })
            .collect();
        for port_idx in orphans {
            sm.subnet.ports.delete(port_idx);
        }

        sm.subnet.nodes.delete(node_idx);
    }
}

fn drop_stale_remote_sms(sm: &mut SmUpView<'_>) {
    let stale: Vec<_> = sm
        .subnet
        .remote_sms
        .iter()
        .filter(|(_, remote)| remote.discovery_count == 0)
        .map(|(guid, _)| *guid)
        .collect();
    for guid in stale {
        // Never drop the master we are actively polling; its liveness is
        // tracked by the polling retry counter instead.
        if sm.election.polling_sm == Some(guid) {
            continue;
        }
        Debug::EntityDropped(guid).log();
        sm.subnet.remote_sms.remove(&guid);
    }
}
