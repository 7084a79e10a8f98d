//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_utils::ib::{DrPath, PortNum};
use tracing::warn;

use crate::collections::NodeIndex;
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::SmUpView;
use crate::node::RemoteLink;
use crate::packet::smp::{
    ATTR_NODE_DESCRIPTION, ATTR_SWITCH_INFO, NodeInfo, SmState,
};
use crate::discovery;
use crate::pacer::MadContext;
use crate::state_mgr::DUP_GUID_MAX_RETRIES;

// NodeInfo receiver: materializes nodes and links from directed-route
// probes and schedules the follow-up reads that flesh the entity out.
pub(crate) fn process(
    sm: &mut SmUpView<'_>,
    path: DrPath,
    via: Option<(NodeIndex, PortNum)>,
    ni: NodeInfo,
) -> Result<(), Error> {
    // Sanity before anything is created.
    if ni.node_guid.is_zero() || ni.port_guid.is_zero() {
        return Err(Error::SaRecordInvalid("zero GUID in NodeInfo"));
    }
    if ni.num_ports == 0 || ni.local_port_num > ni.num_ports {
        return Err(Error::PortNumNotFound(ni.node_guid, ni.local_port_num));
    }

    let (node_idx, known) = match sm.subnet.nodes.get_by_guid(ni.node_guid) {
        Some((node_idx, _)) => (node_idx, true),
        None => {
            Debug::NodeCreate(ni.node_guid, ni.node_type).log();
            let (node_idx, _) = sm.subnet.nodes.insert(&ni);
            (node_idx, false)
        }
    };

    // The port that answered. Switch management responses come back
    // through the probed external port but identify port 0 semantics via
    // the node GUID.
    let resp_port = ni.local_port_num;
    let node = &mut sm.subnet.nodes[node_idx];
    let first_visit_this_sweep = node.discovery_count == 0;
    node.discovery_count += 1;
    let physp = node.ensure_physp(resp_port, ni.port_guid);
    physp.discovery_count += 1;
    // Refresh the directed route so future reads survive link changes.
    physp.dr_path = path.clone();
    let is_switch = node.is_switch();
    if is_switch {
        // All switch ports are reached over the same route.
        let physp0 = node.ensure_physp(0, ni.port_guid);
        physp0.dr_path = path.clone();
        physp0.discovery_count += 1;
    }

    // Link inference: both cable ends are now known.
    if let Some((via_node_idx, via_port)) = via
        && let Err(error) =
            link_endpoints(sm, via_node_idx, via_port, node_idx, resp_port, &ni)
    {
        return Err(error);
    }

    // Logical endport, keyed by port GUID (port 0 for switches).
    let endport_num = if is_switch { 0 } else { resp_port };
    if sm.subnet.ports.get_by_guid(ni.port_guid).is_none() {
        Debug::PortCreate(ni.port_guid).log();
        let is_master = sm.subnet.sm_state == SmState::Master;
        let (_, port) =
            sm.subnet.ports.insert(ni.port_guid, node_idx, endport_num);
        port.is_new = is_master;
    }
    if let Some((_, port)) = sm.subnet.ports.get_mut_by_guid(ni.port_guid) {
        port.discovery_count += 1;
    }

    // Schedule follow-up reads the first time the node shows up in this
    // sweep; re-visits through other ports only confirm liveness.
    if !first_visit_this_sweep {
        return Ok(());
    }
    if !known || sm.sweep.heavy || node_description_missing(sm, node_idx) {
        discovery::send_dr_get(
            sm,
            ATTR_NODE_DESCRIPTION,
            0,
            &path,
            MadContext::NodeDescription { node_idx },
        );
    }
    if is_switch {
        discovery::send_dr_get(
            sm,
            ATTR_SWITCH_INFO,
            0,
            &path,
            MadContext::SwitchInfo {
                node_idx,
                set: false,
            },
        );
    } else {
        discovery::read_port_info(sm, node_idx, resp_port, &path);
    }

    Ok(())
}

fn node_description_missing(sm: &SmUpView<'_>, node_idx: NodeIndex) -> bool {
    sm.subnet.nodes[node_idx].description.is_empty()
}

// Sets the symmetric link between the probing switch port and the
// responder, handling cable moves and duplicated GUIDs.
fn link_endpoints(
    sm: &mut SmUpView<'_>,
    via_node_idx: NodeIndex,
    via_port: PortNum,
    node_idx: NodeIndex,
    resp_port: PortNum,
    ni: &NodeInfo,
) -> Result<(), Error> {
    match sm.subnet.link(via_node_idx, via_port, node_idx, resp_port) {
        Ok(()) => {
            let via_guid = sm.subnet.nodes[via_node_idx].guid;
            Debug::LinkCreate(via_guid, via_port, ni.node_guid, resp_port)
                .log();
            Ok(())
        }
        Err(Error::LinkInconsistent(guid, port_num)) => {
            // A remembered remote pointing at the same neighbor node is a
            // cable move between two ports of the same device: accept it.
            let existing = sm.subnet.nodes[via_node_idx]
                .physp(via_port)
                .and_then(|physp| physp.remote);
            if let Some(RemoteLink {
                node_idx: old_idx, ..
            }) = existing
                && sm.subnet.nodes[old_idx].guid == ni.node_guid
            {
                sm.subnet.unlink(via_node_idx, via_port);
                sm.subnet
                    .link(via_node_idx, via_port, node_idx, resp_port)?;
                warn!(
                    guid = %ni.node_guid,
                    "cable moved between ports of the same node"
                );
                return Ok(());
            }

            // Otherwise suspect a duplicated GUID: re-query a bounded
            // number of times, then report.
            let retries = sm
                .sweep
                .dup_guid_retries
                .entry(ni.node_guid)
                .or_insert(0);
            *retries += 1;
            if *retries < DUP_GUID_MAX_RETRIES {
                discovery::probe_neighbor(sm, via_node_idx, via_port);
                return Ok(());
            }

            Error::DuplicateGuid(ni.node_guid).log();
            if sm.config.exit_on_fatal {
                sm.sweep.fatal_dup_guid = true;
            } else {
                sm.subnet.force_heavy_sweep = true;
            }
            let _ = (guid, port_num);
            Err(Error::DuplicateGuid(ni.node_guid))
        }
        Err(error) => Err(error),
    }
}
