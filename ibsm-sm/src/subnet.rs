//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::time::Instant;

use ibsm_utils::ib::{
    DrPath, Gid, Guid, LID_MCAST_END, Lid, Pkey, PortNum,
};

use crate::collections::{NodeIndex, Nodes, PortIndex, Ports, Switches};
use crate::config::SmConfig;
use crate::error::Error;
use crate::group::McGroups;
use crate::node::{PhysPort, RemoteLink};
use crate::packet::sa::{InformInfoRecord, ServiceRecord};
use crate::packet::smp::{SmInfo, SmState};
use crate::partition::Partition;
use crate::port::Port;

// Record identifier of a service record (RID components).
pub type ServiceRid = (u64, Gid, u16);
// Record identifier of an inform record: subscriber GID and enum.
pub type InformRid = (Gid, u16);

// A stored service record with its optional lease deadline.
#[derive(Debug)]
pub struct ServiceEntry {
    pub record: ServiceRecord,
    pub expires: Option<Instant>,
}

// A stored event subscription with the saved return address.
#[derive(Debug)]
pub struct InformEntry {
    pub record: InformInfoRecord,
    pub report_lid: Lid,
}

// A peer subnet manager discovered on the fabric.
#[derive(Debug)]
pub struct RemoteSm {
    pub port_guid: Guid,
    pub lid: Lid,
    pub dr_path: DrPath,
    pub sm_info: SmInfo,
    pub failed_polls: u32,
    pub discovery_count: u32,
}

// The subnet model: topology graph, addressing state and the SA database.
//
// Mutated only under the exclusive writer lock held by the discovery
// receivers and the sweep passes; SA queries read it under the shared lock.
#[derive(Debug)]
pub struct Subnet {
    // Identity of the local SM port.
    pub sm_port_guid: Guid,
    pub sm_base_lid: Lid,
    pub subnet_prefix: u64,
    pub sm_state: SmState,
    pub act_count: u32,

    // Topology.
    pub nodes: Nodes,
    pub switches: Switches,
    pub ports: Ports,

    // Partitions keyed by P_Key base.
    pub partitions: BTreeMap<u16, Partition>,
    // Multicast groups.
    pub groups: McGroups,

    // SA database.
    pub services: BTreeMap<ServiceRid, ServiceEntry>,
    pub informs: BTreeMap<InformRid, InformEntry>,

    // Peer SMs keyed by port GUID.
    pub remote_sms: BTreeMap<Guid, RemoteSm>,

    // Addressing limits.
    pub max_ucast_lid: Lid,
    pub max_mcast_lid: Lid,

    // Sweep control flags.
    pub force_heavy_sweep: bool,
    pub force_light_sweep: bool,
    pub first_time_master_sweep: bool,
    pub initialization_error: bool,
}

// ===== impl Subnet =====

impl Subnet {
    pub fn new(config: &SmConfig) -> Subnet {
        let mut partitions = BTreeMap::new();
        let default_pkey = Partition::default_partition();
        partitions.insert(default_pkey.pkey.base(), default_pkey);

        Subnet {
            sm_port_guid: config.port_guid,
            sm_base_lid: 0,
            subnet_prefix: config.subnet_prefix,
            sm_state: SmState::Discovering,
            act_count: 0,
            nodes: Default::default(),
            switches: Default::default(),
            ports: Default::default(),
            partitions,
            groups: Default::default(),
            services: BTreeMap::new(),
            informs: BTreeMap::new(),
            remote_sms: BTreeMap::new(),
            max_ucast_lid: 0,
            max_mcast_lid: config.max_multicast_lid.min(LID_MCAST_END),
            force_heavy_sweep: false,
            force_light_sweep: false,
            first_time_master_sweep: true,
            initialization_error: false,
        }
    }

    // ===== physical port helpers =====

    pub fn physp(
        &self,
        node_idx: NodeIndex,
        port_num: PortNum,
    ) -> Option<&PhysPort> {
        self.nodes[node_idx].physp(port_num)
    }

    // The default physical port behind a logical port.
    pub fn port_physp(&self, port: &Port) -> Option<&PhysPort> {
        self.nodes[port.node_idx].physp(port.port_num)
    }

    // ===== link maintenance =====

    // Establishes a symmetric link between two physical ports.
    //
    // Both sides must either be unlinked or already linked to each other;
    // anything else indicates a duplicated GUID or a cable move and is
    // reported to the caller.
    pub fn link(
        &mut self,
        a_idx: NodeIndex,
        a_port: PortNum,
        b_idx: NodeIndex,
        b_port: PortNum,
    ) -> Result<(), Error> {
        let a_remote = RemoteLink {
            node_idx: b_idx,
            port_num: b_port,
        };
        let b_remote = RemoteLink {
            node_idx: a_idx,
            port_num: a_port,
        };

        if a_idx == b_idx {
            // Loopback cable on a single node.
            let node = &mut self.nodes[a_idx];
            let guid = node.guid;
            for (port_num, remote) in
                [(a_port, a_remote), (b_port, b_remote)]
            {
                let physp = node
                    .physp_mut(port_num)
                    .ok_or(Error::PortNumNotFound(guid, port_num))?;
                if physp.remote.is_some_and(|cur| cur != remote) {
                    return Err(Error::LinkInconsistent(guid, port_num));
                }
                physp.remote = Some(remote);
            }
            return Ok(());
        }

        let (Some(node_a), Some(node_b)) = self.nodes.get2_mut(a_idx, b_idx)
        else {
            return Err(Error::InternalError("link endpoints not found"));
        };
        let guid_a = node_a.guid;
        let guid_b = node_b.guid;

        let physp_a = node_a
            .physp_mut(a_port)
            .ok_or(Error::PortNumNotFound(guid_a, a_port))?;
        if physp_a.remote.is_some_and(|cur| cur != a_remote) {
            return Err(Error::LinkInconsistent(guid_a, a_port));
        }
        let physp_b = node_b
            .physp_mut(b_port)
            .ok_or(Error::PortNumNotFound(guid_b, b_port))?;
        if physp_b.remote.is_some_and(|cur| cur != b_remote) {
            return Err(Error::LinkInconsistent(guid_b, b_port));
        }

        physp_a.remote = Some(a_remote);
        physp_b.remote = Some(b_remote);
        Ok(())
    }

    // Clears the link on one physical port (and its remote, if consistent).
    pub fn unlink(&mut self, node_idx: NodeIndex, port_num: PortNum) {
        let Some(physp) = self.nodes[node_idx].physp(port_num) else {
            return;
        };
        let Some(remote) = physp.remote else {
            return;
        };

        if let Some(physp) =
            self.nodes[node_idx].physp_mut(port_num)
        {
            physp.remote = None;
        }
        if remote.node_idx != node_idx
            && let Some(rem_physp) =
                self.nodes[remote.node_idx].physp_mut(remote.port_num)
            && rem_physp.remote
                == Some(RemoteLink {
                    node_idx,
                    port_num,
                })
        {
            rem_physp.remote = None;
        }
    }

    // ===== partition helpers =====

    // Whether two endports share at least one partition key.
    pub fn ports_share_pkey(
        &self,
        port_a: &Port,
        port_b: &Port,
    ) -> Result<bool, Error> {
        let physp_a = self
            .port_physp(port_a)
            .ok_or(Error::PortNumNotFound(port_a.guid, port_a.port_num))?;
        let physp_b = self
            .port_physp(port_b)
            .ok_or(Error::PortNumNotFound(port_b.guid, port_b.port_num))?;
        Ok(physp_a.shares_pkey_with(physp_b))
    }

    // Whether an endport carries the given P_Key.
    pub fn port_has_pkey(&self, port: &Port, pkey: Pkey) -> bool {
        self.port_physp(port)
            .is_some_and(|physp| physp.has_pkey(pkey))
    }

    // Resolves the endport for a GID on the local subnet.
    pub fn port_by_gid(&self, gid: &Gid) -> Option<(PortIndex, &Port)> {
        if gid.prefix() != self.subnet_prefix {
            return None;
        }
        self.ports.get_by_guid(gid.guid())
    }

    // ===== sweep bookkeeping =====

    // Resets every per-sweep discovery counter ahead of a sweep.
    pub fn clear_discovery_counters(&mut self) {
        for node in self.nodes.iter_mut() {
            node.discovery_count = 0;
            for physp in node.physps_mut() {
                physp.discovery_count = 0;
            }
        }
        for sw in self.switches.iter_mut() {
            sw.discovery_count = 0;
        }
        for port in self.ports.iter_mut() {
            port.discovery_count = 0;
        }
        for sm in self.remote_sms.values_mut() {
            sm.discovery_count = 0;
        }
    }

    // The highest LID any assigned port range reaches.
    pub fn highest_assigned_lid(&self) -> Lid {
        self.ports
            .iter()
            .filter(|port| port.base_lid != 0)
            .map(|port| port.lid_range().1)
            .max()
            .unwrap_or(0)
    }
}
