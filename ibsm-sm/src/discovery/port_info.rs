//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_utils::ib::PortNum;

use crate::collections::NodeIndex;
use crate::error::Error;
use crate::instance::SmUpView;
use crate::packet::smp::{
    ATTR_PKEY_TABLE, ATTR_SL_TO_VL_TABLE, ATTR_VL_ARB_TABLE,
    PortCapabilityMask, PortInfo,
};
use crate::pacer::MadContext;
use crate::state_mgr::SweepPhase;
use crate::{discovery, election};

// PortInfo receiver: stores port state and fans discovery out through
// switch ports with live links.
pub(crate) fn process(
    sm: &mut SmUpView<'_>,
    node_idx: NodeIndex,
    port_num: PortNum,
    set: bool,
    pi: PortInfo,
) -> Result<(), Error> {
    let node = &mut sm.subnet.nodes[node_idx];
    let node_guid = node.guid;
    let is_switch = node.is_switch();
    if port_num > node.num_ports {
        return Err(Error::PortNumNotFound(node_guid, port_num));
    }

    let physp = node.ensure_physp(port_num, node_guid);
    let had_pkeys = !physp.pkeys.is_empty();
    physp.info = pi.clone();
    physp.discovery_count += 1;
    let path = physp.dr_path.clone();

    // Track the discovered LMC/LID on the logical endport so the LID
    // manager can evaluate its preservation policy.
    let endport = !is_switch || port_num == 0;
    if endport {
        let port_guid = sm.subnet.nodes[node_idx]
            .physp(port_num)
            .map(|physp| physp.port_guid)
            .unwrap_or(node_guid);
        if let Some((_, port)) = sm.subnet.ports.get_mut_by_guid(port_guid) {
            port.lmc = pi.lmc;
        }
    }

    // Writes only refresh the stored image.
    if set {
        return Ok(());
    }

    // A device guarding a foreign M_Key will refuse our writes later;
    // surface it now.
    if sm.config.m_key != 0 && pi.m_key != 0 && pi.m_key != sm.config.m_key {
        tracing::warn!(
            guid = %node_guid,
            port_num,
            "port guards a different M_Key"
        );
    }

    let discovering = sm.sweep.phase == SweepPhase::Discovering;

    // Fan out to the neighbor behind a live port: every external switch
    // port, plus the local CA port the sweep was seeded from.
    let local_ca_port = !is_switch && path.is_local();
    if discovering
        && ((is_switch && port_num != 0) || local_ca_port)
        && pi.port_state >= ibsm_utils::ib::PortState::Init
    {
        discovery::probe_neighbor(sm, node_idx, port_num);
    }

    // Endport follow-up reads.
    if discovering && endport {
        if !had_pkeys || sm.sweep.heavy {
            discovery::send_dr_get(
                sm,
                ATTR_PKEY_TABLE,
                (port_num as u32) << 16,
                &path,
                MadContext::PkeyTable {
                    node_idx,
                    port_num,
                    block: 0,
                    set: false,
                },
            );
        }
        if sm.config.qos {
            discovery::send_dr_get(
                sm,
                ATTR_SL_TO_VL_TABLE,
                ((port_num as u32) << 8) | port_num as u32,
                &path,
                MadContext::SlToVl {
                    node_idx,
                    in_port: port_num,
                    out_port: port_num,
                    set: false,
                },
            );
            discovery::send_dr_get(
                sm,
                ATTR_VL_ARB_TABLE,
                (1 << 16) | port_num as u32,
                &path,
                MadContext::VlArb {
                    node_idx,
                    port_num,
                    block: 1,
                    set: false,
                },
            );
        }
    }

    // A port advertising an SM joins the election bookkeeping.
    if discovering
        && endport
        && pi.capability_mask.contains(PortCapabilityMask::IS_SM)
    {
        let port_guid = sm.subnet.nodes[node_idx]
            .physp(port_num)
            .map(|physp| physp.port_guid)
            .unwrap_or(node_guid);
        if port_guid != sm.subnet.sm_port_guid {
            election::query_remote_sm(sm, node_idx, port_num, port_guid);
        }
    }

    Ok(())
}
