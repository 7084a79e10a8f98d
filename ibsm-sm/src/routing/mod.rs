//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod dor;
pub mod file;
pub mod minhop;
pub mod updn;

use std::collections::{HashMap, VecDeque};

use ibsm_utils::ib::{Guid, Lid, PortNum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::collections::{NodeIndex, SwitchIndex};
use crate::config::SmConfig;
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::SmUpView;
use crate::packet::smp::SmpAttr;
use crate::pacer::MadContext;
use crate::subnet::Subnet;
use crate::{discovery, dump};

/// A unicast routing engine: fills every switch's min-hop matrix and
/// computed LFT. Engines are tried in the configured order; the first one
/// that succeeds wins.
pub(crate) trait UcastEngine {
    fn name(&self) -> &'static str;

    fn build(
        &mut self,
        config: &SmConfig,
        subnet: &mut Subnet,
    ) -> Result<(), Error>;
}

// LFT output port selection discipline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum SelectMode {
    // Load-balanced among minimal ports, optionally scattered.
    Balanced,
    // Deterministic lowest port number (dimension-ordered style).
    FirstPort,
}

// ===== engine dispatch =====

fn engine_by_name(name: &str) -> Option<Box<dyn UcastEngine>> {
    match name {
        "minhop" => Some(Box::new(minhop::MinHop)),
        "updn" => Some(Box::new(updn::UpDown)),
        "dor" => Some(Box::new(dor::Dor)),
        "file" => Some(Box::new(file::FileEngine)),
        // Accepted names that are not built into this distribution; they
        // fail over to the next engine in the list.
        "ftree" | "lash" | "torus-2QoS" => None,
        _ => None,
    }
}

// Runs the configured engine list and emits the winning LFTs.
pub(crate) fn run(sm: &mut SmUpView<'_>) -> Result<&'static str, Error> {
    let mut winner = None;
    for name in sm.config.routing_engines() {
        let Some(mut engine) = engine_by_name(name) else {
            warn!(%name, "routing engine unavailable");
            if sm.config.no_fallback {
                return Err(Error::RoutingFailed("engine unavailable"));
            }
            continue;
        };
        Debug::RoutingEngineStart(engine.name()).log();
        match engine.build(sm.config, sm.subnet) {
            Ok(()) => {
                Debug::RoutingEngineDone(engine.name()).log();
                winner = Some(engine.name());
                break;
            }
            Err(error) => {
                error.log();
                if sm.config.no_fallback {
                    return Err(Error::RoutingFailed("engine failed"));
                }
            }
        }
    }

    let Some(winner) = winner else {
        return Err(Error::RoutingFailed("no engine produced a valid LFT"));
    };

    emit_lfts(sm);
    Ok(winner)
}

// Pushes dirty LFT blocks through the pacer.
fn emit_lfts(sm: &mut SmUpView<'_>) {
    let sw_indexes: Vec<SwitchIndex> = sm.subnet.switches.indexes().collect();
    for sw_idx in sw_indexes {
        if !sm.config.use_ucast_cache {
            // Without the cache the previous image is not trusted and
            // every block is rewritten.
            sm.subnet.switches[sw_idx].lft.clear();
        }
        let sw = &sm.subnet.switches[sw_idx];
        let guid = sw.guid;
        let node_idx = sw.node_idx;
        let blocks = sw.dirty_lft_blocks();
        let Some(path) = sm
            .subnet
            .nodes[node_idx]
            .physp(0)
            .map(|physp| physp.dr_path.clone())
        else {
            continue;
        };
        for block in blocks {
            Debug::LftEmit(guid, block).log();
            let lft_block = sm.subnet.switches[sw_idx].lft_block(block);
            discovery::send_dr_set(
                sm,
                SmpAttr::LinearFt(lft_block),
                block as u32,
                &path,
                MadContext::Lft {
                    switch_idx: sw_idx,
                    block,
                },
            );
        }
    }
}

// Commits the computed tables once the write pass has drained.
pub(crate) fn commit(sm: &mut SmUpView<'_>) {
    for sw in sm.subnet.switches.iter_mut() {
        sw.commit_lft();
    }
}

// ===== min-hop computation =====

// Switch-graph adjacency: for every switch, the neighbor switches with
// the port on the neighbor that leads back.
pub(crate) fn switch_adjacency(
    subnet: &Subnet,
) -> HashMap<SwitchIndex, Vec<(SwitchIndex, PortNum)>> {
    let mut adj: HashMap<SwitchIndex, Vec<(SwitchIndex, PortNum)>> =
        HashMap::new();
    for sw_idx in subnet.switches.indexes() {
        let sw = &subnet.switches[sw_idx];
        let node = &subnet.nodes[sw.node_idx];
        let mut neighbors = Vec::new();
        for physp in node.physps() {
            if physp.port_num == 0 || !physp.is_link_up() {
                continue;
            }
            let Some(remote) = physp.remote else {
                continue;
            };
            let remote_node = &subnet.nodes[remote.node_idx];
            if let Some(remote_sw_idx) = remote_node.switch_idx {
                neighbors.push((remote_sw_idx, remote.port_num));
            }
        }
        adj.insert(sw_idx, neighbors);
    }
    adj
}

// Destination endports with their LID ranges and attach points.
struct Destination {
    begin: Lid,
    end: Lid,
    // The switch the endport hangs off, the port on that switch facing
    // it, and the initial hop count (0 for the switch itself).
    attach: SwitchIndex,
    entry_port: PortNum,
    base_hops: u8,
}

fn destinations(subnet: &Subnet) -> Vec<Destination> {
    let mut dests = Vec::new();
    for port in subnet.ports.iter() {
        if port.base_lid == 0 {
            continue;
        }
        let (begin, end) = port.lid_range();
        let node = &subnet.nodes[port.node_idx];
        if let Some(sw_idx) = node.switch_idx {
            dests.push(Destination {
                begin,
                end,
                attach: sw_idx,
                entry_port: 0,
                base_hops: 0,
            });
            continue;
        }
        // CAs and routers attach through their physical port's remote.
        let Some(physp) = node.physp(port.port_num) else {
            continue;
        };
        let Some(remote) = physp.remote else {
            continue;
        };
        let Some(attach) = subnet.nodes[remote.node_idx].switch_idx else {
            continue;
        };
        dests.push(Destination {
            begin,
            end,
            attach,
            entry_port: remote.port_num,
            base_hops: 1,
        });
    }
    dests
}

// Fills every switch's min-hop matrix by BFS from each destination's
// LID range across the undirected switch graph.
pub(crate) fn compute_min_hops(config: &SmConfig, subnet: &mut Subnet) {
    for sw in subnet.switches.iter_mut() {
        sw.clear_hops();
    }
    let adj = switch_adjacency(subnet);

    for dest in destinations(subnet) {
        let mut dist: HashMap<SwitchIndex, u8> = HashMap::new();
        let mut queue = VecDeque::new();

        for lid in dest.begin..=dest.end {
            subnet.switches[dest.attach].set_hops(
                lid,
                dest.entry_port,
                dest.base_hops,
            );
        }
        dist.insert(dest.attach, dest.base_hops);
        queue.push_back(dest.attach);

        while let Some(sw_idx) = queue.pop_front() {
            let hops = dist[&sw_idx];
            if hops >= config.max_hops_in_fabric {
                continue;
            }
            for (nbr_idx, nbr_port) in adj.get(&sw_idx).into_iter().flatten()
            {
                let cand = hops + 1;
                for lid in dest.begin..=dest.end {
                    subnet.switches[*nbr_idx].set_hops(lid, *nbr_port, cand);
                }
                if dist.get(nbr_idx).is_none_or(|cur| cand < *cur) {
                    dist.insert(*nbr_idx, cand);
                    queue.push_back(*nbr_idx);
                }
            }
        }
    }
}

// ===== LFT selection =====

// Per-port hop weights loaded from the optional weighting file.
fn load_hop_weights(
    config: &SmConfig,
) -> HashMap<(Guid, PortNum), u32> {
    let mut weights = HashMap::new();
    let Some(path) = &config.hop_weights_file else {
        return weights;
    };
    let Ok(content) = std::fs::read_to_string(path) else {
        warn!(path = %path.display(), "failed to read hop weights file");
        return weights;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        if let (Some(guid), Some(port), Some(weight)) =
            (fields.next(), fields.next(), fields.next())
            && let (Ok(guid), Ok(port), Ok(weight)) =
                (guid.parse::<Guid>(), port.parse(), weight.parse())
        {
            weights.insert((guid, port), weight);
        }
    }
    weights
}

// Builds every switch's LFT from its min-hop matrix.
pub(crate) fn build_lfts(
    config: &SmConfig,
    subnet: &mut Subnet,
    mode: SelectMode,
) -> Result<(), Error> {
    let max_lid = subnet.max_ucast_lid;
    if max_lid == 0 {
        return Err(Error::RoutingFailed("no LIDs assigned"));
    }
    let weights = load_hop_weights(config);

    // Destination LIDs in ascending order keeps response ordering and
    // balancing deterministic.
    let mut dest_lids: Vec<(Lid, Lid)> = subnet
        .ports
        .iter()
        .filter(|port| port.base_lid != 0)
        .map(|port| port.lid_range())
        .collect();
    dest_lids.sort_unstable();

    // Honor an explicit destination ordering when configured.
    if let Some(path) = &config.guid_routing_order_file
        && let Ok(order) = dump::read_guid_list(path)
    {
        let mut ordered = Vec::new();
        for guid in order {
            if let Some((_, port)) = subnet.ports.get_by_guid(guid)
                && port.base_lid != 0
            {
                ordered.push(port.lid_range());
            }
        }
        for range in &dest_lids {
            if !ordered.contains(range) {
                ordered.push(*range);
            }
        }
        dest_lids = ordered;
    }

    let sw_indexes: Vec<SwitchIndex> = subnet.switches.indexes().collect();
    for sw_idx in sw_indexes {
        let guid = subnet.switches[sw_idx].guid;
        let num_ports = subnet.switches[sw_idx].num_ports;
        let mut load = vec![0u32; num_ports as usize + 1];
        for (port_num, entry) in load.iter_mut().enumerate() {
            *entry +=
                weights.get(&(guid, port_num as PortNum)).copied().unwrap_or(0);
        }

        subnet.switches[sw_idx].prepare_new_lft(max_lid);
        for (begin, end) in &dest_lids {
            for lid in *begin..=*end {
                let ports = subnet.switches[sw_idx].min_hop_ports(lid);
                if ports.is_empty() {
                    continue;
                }
                let port = select_port(config, mode, &ports, &load, guid, lid);
                subnet.switches[sw_idx].set_new_lft(lid, port);
                load[port as usize] += 1;
            }
        }
    }
    Ok(())
}

fn select_port(
    config: &SmConfig,
    mode: SelectMode,
    ports: &[PortNum],
    load: &[u32],
    sw_guid: Guid,
    lid: Lid,
) -> PortNum {
    match mode {
        SelectMode::FirstPort => *ports.iter().min().unwrap(),
        SelectMode::Balanced => {
            let min_load = ports
                .iter()
                .map(|port| load[*port as usize])
                .min()
                .unwrap();
            let candidates: Vec<PortNum> = ports
                .iter()
                .copied()
                .filter(|port| load[*port as usize] == min_load)
                .collect();
            if config.scatter_ports != 0 && candidates.len() > 1 {
                // Deterministic per (seed, switch, lid) scattering.
                let seed = config
                    .scatter_ports
                    .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                    ^ u64::from(sw_guid)
                    ^ lid as u64;
                let mut rng = StdRng::seed_from_u64(seed);
                candidates[rng.random_range(0..candidates.len())]
            } else {
                candidates[0]
            }
        }
    }
}

// The switch hanging a node (itself for switches, the uplink for CAs).
pub(crate) fn node_attach_switch(
    subnet: &Subnet,
    node_idx: NodeIndex,
) -> Option<SwitchIndex> {
    let node = &subnet.nodes[node_idx];
    if let Some(sw_idx) = node.switch_idx {
        return Some(sw_idx);
    }
    node.physps()
        .filter_map(|physp| physp.remote)
        .find_map(|remote| subnet.nodes[remote.node_idx].switch_idx)
}
