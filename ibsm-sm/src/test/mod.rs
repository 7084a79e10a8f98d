//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod sim;

use ibsm_utils::ib::{
    Gid, Guid, Lid, Mtu, NodeType, PKEY_DEFAULT, Pkey, PortNum,
    PortPhysState, PortState,
};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::SmConfig;
use crate::election::ElectionState;
use crate::error::Error;
use crate::instance::{
    ProtocolInputChannelsRx, ProtocolInputChannelsTx, SmUpView,
    SubnetManager,
};
use crate::packet::Mad;
use crate::packet::smp::{NodeInfo, SwitchInfo};
use crate::pacer::Pacer;
use crate::state_mgr::SweepState;
use crate::subnet::Subnet;
use crate::transport::{RxMad, TxMad};
use crate::{drop_mgr, election, lid_mgr, mcast, routing, sa, state_mgr};

/// A self-contained subnet manager harness for unit and scenario tests:
/// the full instance state without the transport and timer tasks, plus
/// builder methods to assemble fabrics directly in the subnet model.
pub struct TestSm {
    pub config: SmConfig,
    pub subnet: Subnet,
    pub pacer: Pacer,
    pub sweep: SweepState,
    pub election: ElectionState,
    pub tx: ProtocolInputChannelsTx,
    _channels_rx: ProtocolInputChannelsRx,
    mad_tx_rx: UnboundedReceiver<TxMad>,
}

// ===== impl TestSm =====

impl TestSm {
    pub fn new(config: SmConfig) -> TestSm {
        let (mad_tx, mad_tx_rx) = tokio::sync::mpsc::unbounded_channel();
        let (tx, channels_rx) = SubnetManager::protocol_input_channels();
        let subnet = Subnet::new(&config);
        let pacer = Pacer::new(&config, mad_tx);
        TestSm {
            config,
            subnet,
            pacer,
            sweep: SweepState::default(),
            election: ElectionState::default(),
            tx,
            _channels_rx: channels_rx,
            mad_tx_rx,
        }
    }

    // The borrowed receiver view over this harness.
    pub fn view(&mut self) -> SmUpView<'_> {
        SmUpView {
            config: &self.config,
            subnet: &mut self.subnet,
            pacer: &mut self.pacer,
            sweep: &mut self.sweep,
            election: &mut self.election,
            tx: &self.tx,
        }
    }

    // Everything queued toward the transport since the last call.
    pub fn drain_tx(&mut self) -> Vec<TxMad> {
        let mut mads = Vec::new();
        while let Ok(tx_mad) = self.mad_tx_rx.try_recv() {
            mads.push(tx_mad);
        }
        mads
    }

    // ===== fabric building =====

    pub fn add_switch(&mut self, guid: u64, num_ports: u8) {
        let guid = Guid(guid);
        let ni = NodeInfo {
            node_type: NodeType::Switch,
            num_ports,
            system_image_guid: guid,
            node_guid: guid,
            port_guid: guid,
            partition_cap: 1,
            device_id: 0,
            revision: 0,
            local_port_num: 0,
            vendor_id: 0,
        };
        let (node_idx, node) = self.subnet.nodes.insert(&ni);
        node.discovery_count = 1;
        let physp = node.ensure_physp(0, guid);
        physp.pkeys = vec![PKEY_DEFAULT];
        physp.info.port_state = PortState::Active;
        physp.info.phys_state = PortPhysState::LinkUp;
        physp.info.mtu_cap = Mtu::Mtu2048;
        physp.discovery_count = 1;

        let si = SwitchInfo {
            lin_fdb_cap: 0xBFFF,
            mcast_fdb_cap: 1024,
            ..Default::default()
        };
        let (sw_idx, sw) =
            self.subnet.switches.insert(node_idx, guid, num_ports, &si);
        sw.discovery_count = 1;
        self.subnet.nodes[node_idx].switch_idx = Some(sw_idx);

        let (_, port) = self.subnet.ports.insert(guid, node_idx, 0);
        port.discovery_count = 1;
    }

    pub fn add_ca(&mut self, guid: u64, sw_guid: u64, sw_port: PortNum) {
        let guid = Guid(guid);
        let ni = NodeInfo {
            node_type: NodeType::ChannelAdapter,
            num_ports: 1,
            system_image_guid: guid,
            node_guid: guid,
            port_guid: guid,
            partition_cap: 1,
            device_id: 0,
            revision: 0,
            local_port_num: 1,
            vendor_id: 0,
        };
        let (node_idx, node) = self.subnet.nodes.insert(&ni);
        node.discovery_count = 1;
        let physp = node.ensure_physp(1, guid);
        physp.pkeys = vec![PKEY_DEFAULT];
        physp.info.port_state = PortState::Active;
        physp.info.phys_state = PortPhysState::LinkUp;
        physp.info.mtu_cap = Mtu::Mtu2048;
        physp.discovery_count = 1;
        let (_, port) = self.subnet.ports.insert(guid, node_idx, 1);
        port.discovery_count = 1;

        self.connect(Guid(sw_guid), sw_port, guid, 1);
    }

    pub fn link_switches(
        &mut self,
        a_guid: u64,
        a_port: PortNum,
        b_guid: u64,
        b_port: PortNum,
    ) {
        self.connect(Guid(a_guid), a_port, Guid(b_guid), b_port);
    }

    fn connect(
        &mut self,
        a_guid: Guid,
        a_port: PortNum,
        b_guid: Guid,
        b_port: PortNum,
    ) {
        let (a_idx, _) = self.subnet.nodes.get_by_guid(a_guid).unwrap();
        let (b_idx, _) = self.subnet.nodes.get_by_guid(b_guid).unwrap();
        for (node_idx, port_num, guid) in
            [(a_idx, a_port, a_guid), (b_idx, b_port, b_guid)]
        {
            let node = &mut self.subnet.nodes[node_idx];
            let physp = node.ensure_physp(port_num, guid);
            if physp.pkeys.is_empty() {
                physp.pkeys = vec![PKEY_DEFAULT];
            }
            physp.info.port_state = PortState::Active;
            physp.info.phys_state = PortPhysState::LinkUp;
            physp.info.mtu_cap = Mtu::Mtu2048;
            physp.info.link_width_active = 1;
            physp.info.link_speed_active = 2;
            physp.discovery_count = 1;
        }
        self.subnet.link(a_idx, a_port, b_idx, b_port).unwrap();
    }

    pub fn set_pkeys(&mut self, port_guid: u64, pkeys: &[u16]) {
        let (_, port) =
            self.subnet.ports.get_by_guid(Guid(port_guid)).unwrap();
        let node_idx = port.node_idx;
        let port_num = port.port_num;
        let physp = self.subnet.nodes[node_idx]
            .physp_mut(port_num)
            .unwrap();
        physp.pkeys = pkeys.iter().map(|pkey| Pkey(*pkey)).collect();
    }

    pub fn port_gid(&self, port_guid: u64) -> Gid {
        Gid::from_parts(self.subnet.subnet_prefix, Guid(port_guid))
    }

    pub fn port_lid(&self, port_guid: u64) -> Lid {
        self.subnet
            .ports
            .get_by_guid(Guid(port_guid))
            .map(|(_, port)| port.base_lid)
            .unwrap_or(0)
    }

    // ===== pass execution =====

    pub fn assign_lids(&mut self) -> Result<(), Error> {
        let mut view = self.view();
        lid_mgr::assign_lids(&mut view)
    }

    pub fn run_unicast(&mut self) -> Result<&'static str, Error> {
        let mut view = self.view();
        routing::run(&mut view)
    }

    pub fn commit_unicast(&mut self) {
        let mut view = self.view();
        routing::commit(&mut view);
    }

    pub fn run_mcast(&mut self) {
        let mut view = self.view();
        mcast::run(&mut view);
    }

    pub fn request_sweep(&mut self, heavy: bool) {
        let mut view = self.view();
        state_mgr::request_sweep(&mut view, heavy);
    }

    pub fn process_idle(&mut self) {
        let mut view = self.view();
        state_mgr::process_idle(&mut view);
    }

    pub fn run_drop(&mut self) {
        let mut view = self.view();
        drop_mgr::process(&mut view);
    }

    pub fn expire_services(&mut self) {
        let mut view = self.view();
        sa::service::expire_leases(&mut view);
    }

    // ===== election shortcuts =====

    // Feeds an SMInfo response as if a peer SM had answered.
    pub fn sminfo_response(
        &mut self,
        remote_guid: u64,
        control: Option<crate::packet::smp::SmInfoControl>,
        info: crate::packet::smp::SmInfo,
    ) {
        use crate::packet::smp::{ATTR_SM_INFO, Smp, SmpAttr};
        use crate::packet::{MadBody, MadHeader, Method, MgmtClass};

        let mad = Mad {
            hdr: MadHeader::request(
                MgmtClass::SubnDirectedRoute,
                Method::GetResp,
                ATTR_SM_INFO,
                0,
                0,
            ),
            body: MadBody::Smp(Smp {
                m_key: 0,
                dr: None,
                attr: Some(SmpAttr::SmInfo(info)),
            }),
        };
        let mut view = self.view();
        if let Err(error) = election::process_sminfo_response(
            &mut view,
            Guid(remote_guid),
            control,
            mad,
        ) {
            error.log();
        }
    }

    pub fn decide_election(&mut self) {
        let mut view = self.view();
        election::decide(&mut view);
    }

    pub fn poll_timeout(&mut self, remote_guid: u64) {
        let mut view = self.view();
        election::process_poll_timeout(&mut view, Guid(remote_guid));
    }

    // ===== message injection =====

    // Delivers a datagram as if the transport had received it.
    pub fn deliver(&mut self, rx: RxMad) {
        let mut view = self.view();
        crate::instance::process_mad_rx(&mut view, rx);
    }

    // Delivers an SA request from the given source.
    pub fn sa_request(&mut self, src_lid: Lid, src_gid: Gid, mad: &Mad) {
        let mut view = self.view();
        sa::process_request(&mut view, src_lid, src_gid, mad);
    }

    // Advances pacer deadlines far enough to expire everything in
    // flight, returning the resulting completions into the receivers.
    pub fn expire_transactions(&mut self) {
        let mut deadline = std::time::Instant::now();
        // One round per retry, plus the round that fails the transaction.
        for _ in 0..=self.config.transaction_retries {
            deadline += std::time::Duration::from_secs(7200);
            let completions = self.pacer.tick(deadline);
            let mut view = self.view();
            for completion in completions {
                crate::discovery::process_completion(&mut view, completion);
            }
        }
    }
}
