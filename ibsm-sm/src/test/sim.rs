//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ibsm_utils::ib::{
    Gid, Guid, Lid, Mtu, NodeType, PortNum, PortPhysState, PortState,
};
use ibsm_utils::task::Task;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;

use crate::packet::smp::{
    ATTR_LINEAR_FWD_TABLE, ATTR_MCAST_FWD_TABLE, ATTR_NODE_DESCRIPTION,
    ATTR_NODE_INFO, ATTR_PKEY_TABLE, ATTR_PORT_INFO, ATTR_SL_TO_VL_TABLE,
    ATTR_SM_INFO, ATTR_SWITCH_INFO, ATTR_VL_ARB_TABLE, LftBlock, MftBlock,
    NodeDescription, NodeInfo, PkeyTableBlock, PortInfo, SlToVlTable, Smp,
    SmpAttr, SwitchInfo, VlArbTableBlock,
};
use crate::packet::{
    MAD_STATUS_OK, MAD_STATUS_UNSUP_METHOD_ATTR, Mad, MadBody, Method,
    MgmtClass,
};
use crate::transport::{
    MadAddr, MadTransport, RxMad, TransportError, TxMad,
};

/// An in-process fabric emulation behind the transport seam: a set of
/// described nodes answering directed-route SMPs, recording every table
/// the SM writes so scenario tests can assert on the programmed state.
#[derive(Debug)]
pub struct SimFabric {
    pub state: Arc<Mutex<SimState>>,
    task: Option<Task<()>>,
}

#[derive(Debug, Default)]
pub struct SimState {
    // Nodes keyed by their real (unique) GUID.
    pub nodes: HashMap<Guid, SimNode>,
    // The CA port the SM is bound to.
    pub sm_node: Guid,
    // LID-addressed datagrams (SA reports and the like), recorded rather
    // than routed.
    pub lid_mads: Vec<(Lid, Mad)>,
}

#[derive(Debug)]
pub struct SimNode {
    pub guid: Guid,
    // What NodeInfo advertises; differs from `guid` only in
    // duplicated-GUID scenarios.
    pub advertised_guid: Guid,
    pub node_type: NodeType,
    pub num_ports: u8,
    pub description: String,
    pub ports: Vec<SimPort>,
    pub switch_info: SwitchInfo,
    // Forwarding state written by the SM.
    pub lft_blocks: HashMap<u16, LftBlock>,
    pub mft_blocks: HashMap<(u8, u16), MftBlock>,
}

#[derive(Debug)]
pub struct SimPort {
    pub port_guid: Guid,
    pub info: PortInfo,
    pub pkeys: Vec<u16>,
    // (real GUID, port) of the far cable end.
    pub remote: Option<(Guid, PortNum)>,
}

// ===== impl SimFabric =====

impl SimFabric {
    pub fn new() -> SimFabric {
        SimFabric {
            state: Arc::new(Mutex::new(SimState::default())),
            task: None,
        }
    }

    pub fn add_ca(&self, guid: u64) {
        let guid = Guid(guid);
        let mut state = self.state.lock().unwrap();
        state
            .nodes
            .insert(guid, SimNode::new(guid, NodeType::ChannelAdapter, 1));
    }

    pub fn add_switch(&self, guid: u64, num_ports: u8) {
        let guid = Guid(guid);
        let mut state = self.state.lock().unwrap();
        state
            .nodes
            .insert(guid, SimNode::new(guid, NodeType::Switch, num_ports));
    }

    // Makes a node advertise a foreign GUID in NodeInfo.
    pub fn advertise_guid(&self, guid: u64, advertised: u64) {
        let mut state = self.state.lock().unwrap();
        let node = state.nodes.get_mut(&Guid(guid)).unwrap();
        node.advertised_guid = Guid(advertised);
        for port in node.ports.iter_mut() {
            if !port.port_guid.is_zero() {
                port.port_guid = Guid(advertised);
            }
        }
    }

    pub fn connect(&self, a: u64, a_port: PortNum, b: u64, b_port: PortNum) {
        let mut state = self.state.lock().unwrap();
        for (guid, port_num, remote, remote_port) in
            [(a, a_port, b, b_port), (b, b_port, a, a_port)]
        {
            let port = &mut state.nodes.get_mut(&Guid(guid)).unwrap().ports
                [port_num as usize];
            port.remote = Some((Guid(remote), remote_port));
            port.info.port_state = PortState::Init;
            port.info.phys_state = PortPhysState::LinkUp;
        }
    }

    // Advertise an SM on the given CA with the given SMInfo parameters.
    pub fn add_remote_sm(&self, guid: u64, priority: u8) {
        use crate::packet::smp::PortCapabilityMask;
        let mut state = self.state.lock().unwrap();
        let node = state.nodes.get_mut(&Guid(guid)).unwrap();
        node.ports[1].info.capability_mask |= PortCapabilityMask::IS_SM;
        // The priority rides in the VL high limit; see respond_sm_info.
        node.ports[1].info.vl_high_limit = priority;
    }
}

impl Default for SimFabric {
    fn default() -> SimFabric {
        SimFabric::new()
    }
}

impl MadTransport for SimFabric {
    fn bind(
        &mut self,
        port_guid: Guid,
        rx: UnboundedSender<RxMad>,
    ) -> Result<UnboundedSender<TxMad>, TransportError> {
        let sm_node = {
            let mut state = self.state.lock().unwrap();
            let Some(node) = state
                .nodes
                .values()
                .find(|node| {
                    node.node_type == NodeType::ChannelAdapter
                        && (port_guid.is_zero() || node.guid == port_guid)
                })
                .map(|node| node.guid)
            else {
                return Err(TransportError::BindFailed(format!(
                    "no CA with port GUID {}",
                    port_guid
                )));
            };
            state.sm_node = node;
            node
        };

        let state = self.state.clone();
        let (tx, mut tx_rx) = mpsc::unbounded_channel::<TxMad>();
        self.task = Some(Task::spawn(async move {
            while let Some(tx_mad) = tx_rx.recv().await {
                // Emulate the wire with an encode/decode round trip.
                let bytes = tx_mad.mad.encode();
                let Ok(mad) = Mad::decode(bytes) else {
                    continue;
                };
                let response = {
                    let mut state = state.lock().unwrap();
                    state.process(sm_node, &tx_mad.dest, mad)
                };
                if let Some(response) = response
                    && tx_mad.expect_response
                    && rx
                        .send(RxMad {
                            src_lid: 0,
                            src_gid: Gid::ZERO,
                            mad: Ok(response),
                        })
                        .is_err()
                {
                    break;
                }
            }
        }));
        Ok(tx)
    }

    fn unbind(&mut self) {
        self.task = None;
    }

    fn default_port_guid(&self) -> Guid {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .values()
            .filter(|node| node.node_type == NodeType::ChannelAdapter)
            .map(|node| node.guid)
            .min()
            .unwrap_or(Guid::ZERO)
    }
}

// ===== impl SimState =====

impl SimState {
    fn process(
        &mut self,
        sm_node: Guid,
        dest: &MadAddr,
        mad: Mad,
    ) -> Option<Mad> {
        let path = match dest {
            MadAddr::Dr(path) => path.clone(),
            MadAddr::Lid(lid) => {
                self.lid_mads.push((*lid, mad));
                return None;
            }
        };

        // Walk the directed route from the SM port.
        let mut cur = sm_node;
        let mut entry_port: PortNum =
            self.nodes[&sm_node].first_port_num();
        for hop in path.hops() {
            let node = self.nodes.get(&cur)?;
            let port = node.ports.get(*hop as usize)?;
            let (next, next_port) = port.remote?;
            cur = next;
            entry_port = next_port;
        }

        self.respond(cur, entry_port, mad)
    }

    fn respond(
        &mut self,
        node_guid: Guid,
        entry_port: PortNum,
        mad: Mad,
    ) -> Option<Mad> {
        let MadBody::Smp(smp) = &mad.body else {
            return None;
        };
        let node = self.nodes.get_mut(&node_guid)?;

        let (status, attr) = match (mad.hdr.method, mad.hdr.attr_id) {
            (Method::Get, ATTR_NODE_INFO) => (
                MAD_STATUS_OK,
                Some(SmpAttr::NodeInfo(node.node_info(entry_port))),
            ),
            (Method::Get, ATTR_NODE_DESCRIPTION) => (
                MAD_STATUS_OK,
                Some(SmpAttr::NodeDescription(NodeDescription {
                    description: node.description.clone(),
                })),
            ),
            (Method::Get, ATTR_SWITCH_INFO) => (
                MAD_STATUS_OK,
                Some(SmpAttr::SwitchInfo(node.switch_info.clone())),
            ),
            (Method::Get, ATTR_PORT_INFO) => {
                let port_num = mad.hdr.attr_mod as usize;
                let port = node.ports.get(port_num)?;
                (MAD_STATUS_OK, Some(SmpAttr::PortInfo(port.info.clone())))
            }
            (Method::Set, ATTR_PORT_INFO) => {
                let port_num = mad.hdr.attr_mod as usize;
                let port = node.ports.get_mut(port_num)?;
                if let Some(SmpAttr::PortInfo(info)) = &smp.attr {
                    port.info = info.clone();
                }
                (MAD_STATUS_OK, Some(SmpAttr::PortInfo(port.info.clone())))
            }
            (Method::Get, ATTR_PKEY_TABLE) => {
                let port_num = (mad.hdr.attr_mod >> 16) as usize;
                let port = node.ports.get(port_num)?;
                let mut block = PkeyTableBlock::default();
                for (i, pkey) in
                    port.pkeys.iter().take(32).enumerate()
                {
                    block.pkeys[i] = *pkey;
                }
                (MAD_STATUS_OK, Some(SmpAttr::PkeyTable(block)))
            }
            (Method::Set, ATTR_PKEY_TABLE) => {
                let port_num = (mad.hdr.attr_mod >> 16) as usize;
                let port = node.ports.get_mut(port_num)?;
                if let Some(SmpAttr::PkeyTable(block)) = &smp.attr {
                    port.pkeys = block
                        .pkeys
                        .iter()
                        .copied()
                        .filter(|pkey| *pkey != 0)
                        .collect();
                }
                (MAD_STATUS_OK, smp.attr.clone())
            }
            (Method::Set, ATTR_LINEAR_FWD_TABLE) => {
                if let Some(SmpAttr::LinearFt(block)) = &smp.attr {
                    node.lft_blocks
                        .insert(mad.hdr.attr_mod as u16, block.clone());
                }
                (MAD_STATUS_OK, smp.attr.clone())
            }
            (Method::Set, ATTR_MCAST_FWD_TABLE) => {
                if let Some(SmpAttr::MulticastFt(block)) = &smp.attr {
                    let position = (mad.hdr.attr_mod >> 28) as u8;
                    let block_id = (mad.hdr.attr_mod & 0x1FF) as u16;
                    node.mft_blocks
                        .insert((position, block_id), block.clone());
                }
                (MAD_STATUS_OK, smp.attr.clone())
            }
            (Method::Get, ATTR_SL_TO_VL_TABLE) => (
                MAD_STATUS_OK,
                Some(SmpAttr::SlToVlTable(SlToVlTable::default())),
            ),
            (Method::Get, ATTR_VL_ARB_TABLE) => (
                MAD_STATUS_OK,
                Some(SmpAttr::VlArbTable(VlArbTableBlock::default())),
            ),
            (Method::Get, ATTR_SM_INFO) => {
                use crate::packet::smp::{SmInfo, SmState};
                let port = node.ports.get(1)?;
                (
                    MAD_STATUS_OK,
                    Some(SmpAttr::SmInfo(SmInfo {
                        guid: port.port_guid,
                        sm_key: 0,
                        act_count: 0,
                        priority: port.info.vl_high_limit,
                        state: SmState::Standby,
                    })),
                )
            }
            _ => (MAD_STATUS_UNSUP_METHOD_ATTR, smp.attr.clone()),
        };

        let mut hdr = mad.hdr.response(status);
        hdr.mgmt_class = MgmtClass::SubnDirectedRoute;
        Some(Mad {
            hdr,
            body: MadBody::Smp(Smp {
                m_key: smp.m_key,
                dr: smp.dr.clone(),
                attr,
            }),
        })
    }

    // The LFT entry a switch has been programmed with.
    pub fn lft_entry(&self, sw_guid: u64, lid: Lid) -> u8 {
        let node = &self.nodes[&Guid(sw_guid)];
        let block = (lid as usize / 64) as u16;
        node.lft_blocks
            .get(&block)
            .map(|entries| entries.ports[lid as usize % 64])
            .unwrap_or(ibsm_utils::ib::LFT_NO_PATH)
    }

    // The MFT mask programmed for an MLID at position 0.
    pub fn mft_mask(&self, sw_guid: u64, mlid: Lid) -> u16 {
        let node = &self.nodes[&Guid(sw_guid)];
        let block =
            ((mlid - ibsm_utils::ib::LID_MCAST_START) / 32) as u16;
        node.mft_blocks
            .get(&(0, block))
            .map(|masks| {
                masks.masks[(mlid - ibsm_utils::ib::LID_MCAST_START)
                    as usize
                    % 32]
            })
            .unwrap_or(0)
    }

    // The LID the SM assigned to a port.
    pub fn port_lid(&self, guid: u64, port_num: PortNum) -> Lid {
        self.nodes[&Guid(guid)].ports[port_num as usize].info.base_lid
    }

    pub fn port_state(&self, guid: u64, port_num: PortNum) -> PortState {
        self.nodes[&Guid(guid)].ports[port_num as usize].info.port_state
    }
}

// ===== impl SimNode =====

impl SimNode {
    fn new(guid: Guid, node_type: NodeType, num_ports: u8) -> SimNode {
        let mut ports = Vec::new();
        for port_num in 0..=num_ports {
            let is_endport = match node_type {
                NodeType::Switch => port_num == 0,
                _ => port_num > 0,
            };
            ports.push(SimPort {
                port_guid: if is_endport { guid } else { Guid::ZERO },
                info: PortInfo {
                    local_port_num: port_num,
                    port_state: PortState::Down,
                    phys_state: PortPhysState::Polling,
                    link_width_enabled: 1,
                    link_width_supported: 1,
                    link_width_active: 1,
                    mtu_cap: Mtu::Mtu2048,
                    neighbor_mtu: Mtu::Mtu2048,
                    vl_cap: 4,
                    guid_cap: 32,
                    ..Default::default()
                },
                pkeys: vec![0xFFFF],
                remote: None,
            });
        }
        SimNode {
            guid,
            advertised_guid: guid,
            node_type,
            num_ports,
            description: format!("sim node {}", guid),
            ports,
            switch_info: SwitchInfo {
                lin_fdb_cap: 0xBFFF,
                mcast_fdb_cap: 1024,
                ..Default::default()
            },
            lft_blocks: HashMap::new(),
            mft_blocks: HashMap::new(),
        }
    }

    fn first_port_num(&self) -> PortNum {
        match self.node_type {
            NodeType::Switch => 0,
            _ => 1,
        }
    }

    fn node_info(&self, entry_port: PortNum) -> NodeInfo {
        NodeInfo {
            node_type: self.node_type,
            num_ports: self.num_ports,
            system_image_guid: self.advertised_guid,
            node_guid: self.advertised_guid,
            port_guid: match self.node_type {
                NodeType::Switch => self.advertised_guid,
                _ => self
                    .ports
                    .get(entry_port as usize)
                    .map(|port| port.port_guid)
                    .unwrap_or(self.advertised_guid),
            },
            partition_cap: 1,
            device_id: 0,
            revision: 0,
            local_port_num: entry_port,
            vendor_id: 0,
        }
    }
}
