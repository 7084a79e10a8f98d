//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_utils::ib::{DrPath, Guid, NodeType, Pkey, PortNum, PortState};

use crate::collections::{NodeId, NodeIndex, SwitchIndex};
use crate::packet::smp::{NodeInfo, PortInfo, SlToVlTable, VlArbTableBlock};

// A discovered device: channel adapter, switch or router. Owns its physical
// ports.
#[derive(Debug)]
pub struct Node {
    pub id: NodeId,
    pub guid: Guid,
    pub system_image_guid: Guid,
    pub node_type: NodeType,
    pub num_ports: u8,
    pub description: String,
    // Physical ports indexed by port number. Entry 0 is only populated for
    // switches (the management port).
    pub physps: Vec<Option<PhysPort>>,
    // Back-link to the switch record for switch nodes.
    pub switch_idx: Option<SwitchIndex>,
    // Per-sweep discovery counter.
    pub discovery_count: u32,
}

// One physical port of a node.
#[derive(Debug)]
pub struct PhysPort {
    pub port_num: PortNum,
    pub port_guid: Guid,
    pub info: PortInfo,
    pub pkeys: Vec<Pkey>,
    pub sl2vl: Option<SlToVlTable>,
    pub vl_arb: Option<VlArbTableBlock>,
    // Directed route used by the SM to reach this port. Refreshed on every
    // response so reads survive link changes.
    pub dr_path: DrPath,
    // Remote end of the cable, when both sides have been discovered.
    pub remote: Option<RemoteLink>,
    // Per-sweep discovery counter.
    pub discovery_count: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RemoteLink {
    pub node_idx: NodeIndex,
    pub port_num: PortNum,
}

// ===== impl Node =====

impl Node {
    pub(crate) fn new(id: NodeId, node_info: &NodeInfo) -> Node {
        let mut physps = Vec::new();
        physps.resize_with(node_info.num_ports as usize + 1, || None);
        Node {
            id,
            guid: node_info.node_guid,
            system_image_guid: node_info.system_image_guid,
            node_type: node_info.node_type,
            num_ports: node_info.num_ports,
            description: String::new(),
            physps,
            switch_idx: None,
            discovery_count: 0,
        }
    }

    pub fn is_switch(&self) -> bool {
        self.node_type == NodeType::Switch
    }

    // Port numbers carrying endport semantics: switches expose the
    // management port 0, CAs and routers start at port 1.
    pub fn port_numbers(&self) -> std::ops::RangeInclusive<PortNum> {
        if self.is_switch() {
            0..=self.num_ports
        } else {
            1..=self.num_ports
        }
    }

    pub fn physp(&self, port_num: PortNum) -> Option<&PhysPort> {
        self.physps.get(port_num as usize).and_then(|p| p.as_ref())
    }

    pub fn physp_mut(&mut self, port_num: PortNum) -> Option<&mut PhysPort> {
        self.physps
            .get_mut(port_num as usize)
            .and_then(|p| p.as_mut())
    }

    // Returns the physical port, creating it if it does not exist yet.
    pub(crate) fn ensure_physp(
        &mut self,
        port_num: PortNum,
        port_guid: Guid,
    ) -> &mut PhysPort {
        let slot = &mut self.physps[port_num as usize];
        if slot.is_none() {
            *slot = Some(PhysPort::new(port_num, port_guid));
        }
        slot.as_mut().unwrap()
    }

    // Returns an iterator over the existing physical ports.
    pub fn physps(&self) -> impl Iterator<Item = &PhysPort> {
        self.physps.iter().filter_map(|p| p.as_ref())
    }

    pub fn physps_mut(&mut self) -> impl Iterator<Item = &mut PhysPort> {
        self.physps.iter_mut().filter_map(|p| p.as_mut())
    }
}

// ===== impl PhysPort =====

impl PhysPort {
    pub(crate) fn new(port_num: PortNum, port_guid: Guid) -> PhysPort {
        PhysPort {
            port_num,
            port_guid,
            info: PortInfo::default(),
            pkeys: Vec::new(),
            sl2vl: None,
            vl_arb: None,
            dr_path: DrPath::local(),
            remote: None,
            discovery_count: 0,
        }
    }

    // Whether the link behind this port can carry SMPs.
    pub fn is_link_up(&self) -> bool {
        self.info.port_state >= PortState::Init
    }

    // Whether the port carries the given P_Key.
    pub fn has_pkey(&self, pkey: Pkey) -> bool {
        self.pkeys.iter().any(|entry| entry.matches(pkey))
    }

    // Whether the port shares at least one P_Key with another port.
    pub fn shares_pkey_with(&self, other: &PhysPort) -> bool {
        self.pkeys
            .iter()
            .any(|pkey| other.pkeys.iter().any(|entry| entry.matches(*pkey)))
    }
}
