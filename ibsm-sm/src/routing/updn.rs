//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{HashMap, VecDeque};

use ibsm_utils::ib::Guid;
use itertools::Itertools;
use tracing::{debug, warn};

use crate::collections::SwitchIndex;
use crate::config::SmConfig;
use crate::error::Error;
use crate::routing::{
    SelectMode, UcastEngine, build_lfts, compute_min_hops, switch_adjacency,
};
use crate::subnet::Subnet;
use crate::dump;

// Up/Down deadlock-free routing.
//
// The subnet is ranked by BFS from a set of root switches; every link gets
// a direction from the ranks (larger GUID wins ties), and a path is legal
// iff it never transitions from DOWN back to UP. The min-hop matrix is
// recomputed under this constraint before LFT selection.
pub(crate) struct UpDown;

// Traversal direction over one link.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Direction {
    Up,
    Down,
}

impl UcastEngine for UpDown {
    fn name(&self) -> &'static str {
        "updn"
    }

    fn build(
        &mut self,
        config: &SmConfig,
        subnet: &mut Subnet,
    ) -> Result<(), Error> {
        // Roots come from the configured file or are auto-detected from
        // the unconstrained min-hop histogram.
        let roots = match &config.root_guid_file {
            Some(path) => dump::read_guid_list(path)?,
            None => {
                compute_min_hops(config, subnet);
                auto_detect_roots(config, subnet)
            }
        };
        if roots.is_empty() {
            return Err(Error::RoutingFailed("no root switches found"));
        }

        let ranks = rank_switches(subnet, &roots);
        compute_constrained_min_hops(config, subnet, &ranks);
        build_lfts(config, subnet, SelectMode::Balanced)
    }
}

// ===== subnet ranking =====

// BFS ranking from the root switches: roots get rank 0, every other
// switch the minimal distance from any root.
fn rank_switches(
    subnet: &Subnet,
    roots: &[Guid],
) -> HashMap<SwitchIndex, u32> {
    let adj = switch_adjacency(subnet);
    let mut ranks: HashMap<SwitchIndex, u32> = HashMap::new();
    let mut queue = VecDeque::new();

    for guid in roots {
        match subnet.switches.get_by_guid(*guid) {
            Some((sw_idx, _)) => {
                ranks.insert(sw_idx, 0);
                queue.push_back(sw_idx);
            }
            None => {
                warn!(%guid, "root switch GUID not found, skipping");
            }
        }
    }

    let mut max_rank = 0;
    while let Some(sw_idx) = queue.pop_front() {
        let rank = ranks[&sw_idx];
        for (nbr_idx, _) in adj.get(&sw_idx).into_iter().flatten() {
            if ranks.get(nbr_idx).is_none_or(|cur| rank + 1 < *cur) {
                ranks.insert(*nbr_idx, rank + 1);
                max_rank = max_rank.max(rank + 1);
                queue.push_back(*nbr_idx);
            }
        }
    }
    debug!(%max_rank, "subnet ranking completed");
    ranks
}

// Direction of traversing a link from `from` to `to`.
fn direction(
    subnet: &Subnet,
    ranks: &HashMap<SwitchIndex, u32>,
    from: SwitchIndex,
    to: SwitchIndex,
) -> Direction {
    let rank_from = ranks.get(&from).copied().unwrap_or(u32::MAX);
    let rank_to = ranks.get(&to).copied().unwrap_or(u32::MAX);
    if rank_from < rank_to {
        Direction::Down
    } else if rank_from > rank_to {
        Direction::Up
    } else {
        // Equal ranks: the larger GUID is the up end.
        if subnet.switches[to].guid > subnet.switches[from].guid {
            Direction::Up
        } else {
            Direction::Down
        }
    }
}

// ===== constrained min-hop computation =====

// Recomputes the min-hop matrix admitting only UP*DOWN* paths.
//
// The BFS runs from each destination over (switch, all-down) states: a
// switch relaxed through a DOWN first hop is only usable if the rest of
// the path is all DOWN, so both state distances are tracked separately.
fn compute_constrained_min_hops(
    config: &SmConfig,
    subnet: &mut Subnet,
    ranks: &HashMap<SwitchIndex, u32>,
) {
    for sw in subnet.switches.iter_mut() {
        sw.clear_hops();
    }
    let adj = switch_adjacency(subnet);

    struct Dest {
        begin: u16,
        end: u16,
        attach: SwitchIndex,
        entry_port: u8,
        base_hops: u8,
    }
    let mut dests = Vec::new();
    for port in subnet.ports.iter() {
        if port.base_lid == 0 {
            continue;
        }
        let (begin, end) = port.lid_range();
        let node = &subnet.nodes[port.node_idx];
        if let Some(sw_idx) = node.switch_idx {
            dests.push(Dest {
                begin,
                end,
                attach: sw_idx,
                entry_port: 0,
                base_hops: 0,
            });
        } else if let Some(remote) =
            node.physp(port.port_num).and_then(|physp| physp.remote)
            && let Some(attach) = subnet.nodes[remote.node_idx].switch_idx
        {
            dests.push(Dest {
                begin,
                end,
                attach,
                entry_port: remote.port_num,
                base_hops: 1,
            });
        }
    }

    for dest in dests {
        // dist[(switch, all_down)] in hops.
        let mut dist: HashMap<(SwitchIndex, bool), u8> = HashMap::new();
        let mut queue = VecDeque::new();

        for lid in dest.begin..=dest.end {
            subnet.switches[dest.attach].set_hops(
                lid,
                dest.entry_port,
                dest.base_hops,
            );
        }
        // The empty switch-path is trivially all-down.
        dist.insert((dest.attach, true), dest.base_hops);
        queue.push_back((dest.attach, true));

        while let Some((sw_idx, all_down)) = queue.pop_front() {
            let hops = dist[&(sw_idx, all_down)];
            if hops >= config.max_hops_in_fabric {
                continue;
            }
            for (nbr_idx, nbr_port) in adj.get(&sw_idx).into_iter().flatten()
            {
                // The packet's first hop would be neighbor -> current.
                let dir = direction(subnet, ranks, *nbr_idx, sw_idx);
                let nbr_state = match dir {
                    // DOWN first hops require the rest of the path to be
                    // all DOWN.
                    Direction::Down => {
                        if !all_down {
                            continue;
                        }
                        true
                    }
                    Direction::Up => false,
                };
                let cand = hops + 1;
                for lid in dest.begin..=dest.end {
                    subnet.switches[*nbr_idx].set_hops(lid, *nbr_port, cand);
                }
                if dist
                    .get(&(*nbr_idx, nbr_state))
                    .is_none_or(|cur| cand < *cur)
                {
                    dist.insert((*nbr_idx, nbr_state), cand);
                    queue.push_back((*nbr_idx, nbr_state));
                }
            }
        }
    }
}

// ===== root auto-detection =====

// A switch is a root when its histogram of min-hop distances to all CA
// and router LIDs has exactly one bar above the 90% threshold and exactly
// one above the 5% threshold.
fn auto_detect_roots(config: &SmConfig, subnet: &Subnet) -> Vec<Guid> {
    // CA/router LIDs only.
    let ca_lids: Vec<u16> = subnet
        .ports
        .iter()
        .filter(|port| port.base_lid != 0)
        .filter(|port| !subnet.nodes[port.node_idx].is_switch())
        .map(|port| port.base_lid)
        .collect();
    if ca_lids.is_empty() {
        return Vec::new();
    }

    let thd1 = ca_lids.len() as f64 * config.updn_thd_fraction_root;
    let thd2 = ca_lids.len() as f64 * config.updn_thd_fraction_minor;

    let mut roots = Vec::new();
    for sw in subnet.switches.iter() {
        let histogram = ca_lids
            .iter()
            .filter_map(|lid| sw.least_hops(*lid))
            .counts();
        let bars_over_thd1 = histogram
            .values()
            .filter(|bar| **bar as f64 > thd1)
            .count();
        let bars_over_thd2 = histogram
            .values()
            .filter(|bar| **bar as f64 > thd2)
            .count();
        if bars_over_thd1 == 1 && bars_over_thd2 == 1 {
            debug!(guid = %sw.guid, "auto-detected root switch");
            roots.push(sw.guid);
        }
    }
    roots
}
