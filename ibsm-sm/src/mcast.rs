//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeSet, HashMap, VecDeque};

use ibsm_utils::ib::Lid;

use crate::collections::SwitchIndex;
use crate::debug::Debug;
use crate::instance::SmUpView;
use crate::packet::sa::JoinState;
use crate::packet::smp::SmpAttr;
use crate::pacer::MadContext;
use crate::routing;
use crate::subnet::Subnet;
use crate::discovery;

// Multicast routing pass: per-group spanning tree computation and MFT
// emission.
pub(crate) fn run(sm: &mut SmUpView<'_>) {
    for sw in sm.subnet.switches.iter_mut() {
        sw.clear_mft();
    }

    let mlids: Vec<Lid> =
        sm.subnet.groups.iter().map(|group| group.mlid).collect();
    for mlid in mlids {
        build_group_tree(sm.subnet, mlid);
    }

    emit_mfts(sm);
}

// Builds the spanning tree for one group and sets the MFT bits along it.
//
// The tree root is the switch with the most members, ties broken by the
// lowest GUID; tree edges follow the shortest paths from the root to
// every member switch.
pub(crate) fn build_group_tree(subnet: &mut Subnet, mlid: Lid) {
    let Some(group) = subnet.groups.get_by_mlid(mlid) else {
        return;
    };

    // Member attach points: (switch, port on switch toward the member).
    let mut member_ports: Vec<(SwitchIndex, u8)> = Vec::new();
    let mut member_count: HashMap<SwitchIndex, u32> = HashMap::new();
    for member in group.members.values() {
        // Senders-only members still need the MFT to reach them? No:
        // send-only members only inject, but their entry port must exist
        // in the tree for reverse traffic, so they are treated alike.
        let Some((_, port)) =
            subnet.ports.get_by_guid(member.port_gid.guid())
        else {
            continue;
        };
        let node = &subnet.nodes[port.node_idx];
        if let Some(sw_idx) = node.switch_idx {
            // A switch endport member receives through port 0.
            member_ports.push((sw_idx, 0));
            *member_count.entry(sw_idx).or_insert(0) += 1;
        } else if let Some(remote) =
            node.physp(port.port_num).and_then(|physp| physp.remote)
            && let Some(sw_idx) = subnet.nodes[remote.node_idx].switch_idx
        {
            member_ports.push((sw_idx, remote.port_num));
            *member_count.entry(sw_idx).or_insert(0) += 1;
        }
    }
    if member_ports.is_empty() {
        return;
    }

    // Root selection: most members, then lowest GUID.
    let root = *member_count
        .iter()
        .max_by(|(a_idx, a_cnt), (b_idx, b_cnt)| {
            a_cnt.cmp(b_cnt).then_with(|| {
                // Lower GUID wins, so compare inverted.
                subnet.switches[**b_idx]
                    .guid
                    .cmp(&subnet.switches[**a_idx].guid)
            })
        })
        .map(|(sw_idx, _)| sw_idx)
        .unwrap();

    // BFS tree from the root across the switch graph.
    let adj = routing::switch_adjacency(subnet);
    let mut parent: HashMap<SwitchIndex, (SwitchIndex, u8, u8)> =
        HashMap::new();
    let mut visited: BTreeSet<usize> = BTreeSet::new();
    let mut order: Vec<SwitchIndex> = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back(root);
    visited.insert(root.into_raw_parts().0);
    while let Some(sw_idx) = queue.pop_front() {
        order.push(sw_idx);
        for (nbr_idx, nbr_port) in adj.get(&sw_idx).into_iter().flatten() {
            if visited.insert(nbr_idx.into_raw_parts().0) {
                // Record both edge endpoints' ports: the port on the
                // neighbor toward us, and ours toward the neighbor.
                let our_port = port_toward(subnet, sw_idx, *nbr_idx);
                parent.insert(*nbr_idx, (sw_idx, *nbr_port, our_port));
                queue.push_back(*nbr_idx);
            }
        }
    }

    // Member switches and every switch on the path from the root to a
    // member switch belong to the tree.
    let mut on_tree: BTreeSet<usize> = BTreeSet::new();
    for (sw_idx, _) in &member_ports {
        let mut cursor = *sw_idx;
        while on_tree.insert(cursor.into_raw_parts().0) {
            let Some((up, _, _)) = parent.get(&cursor) else {
                break;
            };
            cursor = *up;
        }
    }

    // Local member ports.
    for (sw_idx, port_num) in &member_ports {
        subnet.switches[*sw_idx].set_mft_bit(mlid, *port_num);
    }
    // Tree edges, both directions.
    for sw_idx in &order {
        if !on_tree.contains(&sw_idx.into_raw_parts().0) {
            continue;
        }
        if let Some((up_idx, our_port, up_port)) = parent.get(sw_idx) {
            subnet.switches[*sw_idx].set_mft_bit(mlid, *our_port);
            subnet.switches[*up_idx].set_mft_bit(mlid, *up_port);
        }
    }
}

// The port on `from` whose cable leads to `to`.
fn port_toward(
    subnet: &Subnet,
    from: SwitchIndex,
    to: SwitchIndex,
) -> u8 {
    let from_node_idx = subnet.switches[from].node_idx;
    let to_node_idx = subnet.switches[to].node_idx;
    subnet.nodes[from_node_idx]
        .physps()
        .find(|physp| {
            physp
                .remote
                .is_some_and(|remote| remote.node_idx == to_node_idx)
        })
        .map(|physp| physp.port_num)
        .unwrap_or(0)
}

// Pushes every switch's populated MFT blocks through the pacer.
fn emit_mfts(sm: &mut SmUpView<'_>) {
    let sw_indexes: Vec<SwitchIndex> = sm.subnet.switches.indexes().collect();
    for sw_idx in sw_indexes {
        let sw = &sm.subnet.switches[sw_idx];
        let guid = sw.guid;
        let node_idx = sw.node_idx;
        let blocks = sw.dirty_mft_blocks();
        let Some(path) = sm
            .subnet
            .nodes[node_idx]
            .physp(0)
            .map(|physp| physp.dr_path.clone())
        else {
            continue;
        };
        for (position, block) in blocks {
            Debug::MftEmit(guid, block).log();
            let mft_block =
                sm.subnet.switches[sw_idx].mft_block(position, block);
            let attr_mod = ((position as u32) << 28) | block as u32;
            discovery::send_dr_set(
                sm,
                SmpAttr::MulticastFt(mft_block),
                attr_mod,
                &path,
                MadContext::Mft {
                    switch_idx: sw_idx,
                    position,
                    block,
                },
            );
        }
    }
}

// Emits the MFT blocks covering a single group's MLID after a membership
// change, without waiting for the next full multicast pass.
pub(crate) fn emit_group(sm: &mut SmUpView<'_>, mlid: Lid) {
    let block = (mlid - ibsm_utils::ib::LID_MCAST_START)
        / crate::packet::smp::MFT_BLOCK_SIZE as u16;
    let sw_indexes: Vec<SwitchIndex> = sm.subnet.switches.indexes().collect();
    for sw_idx in sw_indexes {
        let sw = &sm.subnet.switches[sw_idx];
        let Some(words) = sw.mft_mask(mlid) else {
            continue;
        };
        let guid = sw.guid;
        let node_idx = sw.node_idx;
        let positions: Vec<u8> = words
            .iter()
            .enumerate()
            .filter(|(_, word)| **word != 0)
            .map(|(position, _)| position as u8)
            .collect();
        let Some(path) = sm
            .subnet
            .nodes[node_idx]
            .physp(0)
            .map(|physp| physp.dr_path.clone())
        else {
            continue;
        };
        for position in positions {
            Debug::MftEmit(guid, block).log();
            let mft_block =
                sm.subnet.switches[sw_idx].mft_block(position, block);
            let attr_mod = ((position as u32) << 28) | block as u32;
            discovery::send_dr_set(
                sm,
                SmpAttr::MulticastFt(mft_block),
                attr_mod,
                &path,
                MadContext::Mft {
                    switch_idx: sw_idx,
                    position,
                    block,
                },
            );
        }
    }
}

// Removes a member; deletes the group when the last full member leaves
// and the group is not well known.
pub(crate) fn leave_group(
    subnet: &mut Subnet,
    mlid: Lid,
    port_gid: &ibsm_utils::ib::Gid,
    leave_state: JoinState,
) -> bool {
    let Some(group) = subnet.groups.get_mut_by_mlid(mlid) else {
        return false;
    };
    let Some(member) = group.members.get_mut(port_gid) else {
        return false;
    };

    member.join_state &= !leave_state;
    if member.join_state.is_empty() {
        group.members.remove(port_gid);
    }

    if group.members.is_empty() && !group.well_known {
        Debug::GroupDelete(mlid).log();
        subnet.groups.delete(mlid);
    }
    true
}
