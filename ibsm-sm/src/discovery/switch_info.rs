//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use crate::collections::NodeIndex;
use crate::error::Error;
use crate::instance::SmUpView;
use crate::packet::smp::SwitchInfo;
use crate::state_mgr::SweepPhase;
use crate::discovery;

// SwitchInfo receiver: materializes the switch record and schedules the
// per-port PortInfo reads that drive link discovery.
pub(crate) fn process(
    sm: &mut SmUpView<'_>,
    node_idx: NodeIndex,
    set: bool,
    si: SwitchInfo,
) -> Result<(), Error> {
    let node = &sm.subnet.nodes[node_idx];
    if !node.is_switch() {
        return Err(Error::InternalError("SwitchInfo from a non-switch node"));
    }
    let guid = node.guid;
    let num_ports = node.num_ports;

    let sw_idx = match node.switch_idx {
        Some(sw_idx) => {
            let sw = &mut sm.subnet.switches[sw_idx];
            if !set {
                sw.info = si;
            }
            sw.discovery_count += 1;
            sw_idx
        }
        None => {
            let (sw_idx, sw) =
                sm.subnet.switches.insert(node_idx, guid, num_ports, &si);
            sw.discovery_count += 1;
            sm.subnet.nodes[node_idx].switch_idx = Some(sw_idx);
            sw_idx
        }
    };
    let _ = sw_idx;

    if set || sm.sweep.phase != SweepPhase::Discovering {
        return Ok(());
    }

    // Walk every switch port, management port included.
    let path = sm.subnet.nodes[node_idx]
        .physp(0)
        .map(|physp| physp.dr_path.clone())
        .unwrap_or_default();
    for port_num in 0..=num_ports {
        // Seed the physp with the switch route so follow-ups can extend it.
        let node = &mut sm.subnet.nodes[node_idx];
        let physp = node.ensure_physp(port_num, guid);
        physp.dr_path = path.clone();
        discovery::read_port_info(sm, node_idx, port_num, &path);
    }

    Ok(())
}
