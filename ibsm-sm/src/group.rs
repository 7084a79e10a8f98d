//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use ibsm_utils::ib::{
    Gid, LID_MCAST_START, Lid, Mtu, Pkey, Rate,
};

use crate::packet::sa::{JoinState, McMemberRecord};

// A multicast group and its membership database.
#[derive(Debug)]
pub struct McGroup {
    pub mgid: Gid,
    pub mlid: Lid,
    pub qkey: u32,
    pub pkey: Pkey,
    pub mtu: Mtu,
    pub rate: Rate,
    pub pkt_life: u8,
    pub sl: u8,
    pub flow_label: u32,
    pub hop_limit: u8,
    pub tclass: u8,
    pub scope: u8,
    // Created from the partition/group configuration rather than a join.
    pub well_known: bool,
    // Members keyed by port GID.
    pub members: BTreeMap<Gid, McGroupMember>,
    // Per-sweep discovery counter.
    pub discovery_count: u32,
}

// One group member.
#[derive(Clone, Debug)]
pub struct McGroupMember {
    pub port_gid: Gid,
    pub join_state: JoinState,
    pub proxy_join: bool,
}

// Multicast groups keyed both by MGID and MLID.
#[derive(Debug, Default)]
pub struct McGroups {
    groups: BTreeMap<Lid, McGroup>,
    mgid_tree: BTreeMap<Gid, Lid>,
}

// ===== impl McGroup =====

impl McGroup {
    // Builds a group from the realized parameters of a creating join.
    pub fn new(mgid: Gid, mlid: Lid, record: &McMemberRecord) -> McGroup {
        McGroup {
            mgid,
            mlid,
            qkey: record.qkey,
            pkey: record.pkey,
            mtu: record.mtu,
            rate: record.rate,
            pkt_life: record.pkt_life,
            sl: record.sl,
            flow_label: record.flow_label,
            hop_limit: record.hop_limit,
            tclass: record.tclass,
            scope: record.scope,
            well_known: false,
            members: BTreeMap::new(),
            discovery_count: 0,
        }
    }

    // Whether the group has at least one full member (receivers exist).
    pub fn has_full_members(&self) -> bool {
        self.members
            .values()
            .any(|member| member.join_state.contains(JoinState::FULL))
    }

    // Renders the group parameters as an MCMemberRecord for SA responses.
    pub fn to_record(&self, member: Option<&McGroupMember>) -> McMemberRecord {
        McMemberRecord {
            mgid: self.mgid,
            port_gid: member.map(|m| m.port_gid).unwrap_or_default(),
            qkey: self.qkey,
            mlid: self.mlid,
            mtu: self.mtu,
            tclass: self.tclass,
            pkey: self.pkey,
            rate: self.rate,
            pkt_life: self.pkt_life,
            sl: self.sl,
            flow_label: self.flow_label,
            hop_limit: self.hop_limit,
            scope: self.scope,
            join_state: member.map(|m| m.join_state).unwrap_or_default(),
            proxy_join: member.map(|m| m.proxy_join).unwrap_or(false),
            ..Default::default()
        }
    }
}

// ===== impl McGroups =====

impl McGroups {
    pub fn insert(&mut self, group: McGroup) -> &mut McGroup {
        let mlid = group.mlid;
        self.mgid_tree.insert(group.mgid, mlid);
        self.groups.insert(mlid, group);
        self.groups.get_mut(&mlid).unwrap()
    }

    pub(crate) fn delete(&mut self, mlid: Lid) -> Option<McGroup> {
        let group = self.groups.remove(&mlid)?;
        self.mgid_tree.remove(&group.mgid);
        Some(group)
    }

    pub fn get_by_mlid(&self, mlid: Lid) -> Option<&McGroup> {
        self.groups.get(&mlid)
    }

    pub fn get_mut_by_mlid(&mut self, mlid: Lid) -> Option<&mut McGroup> {
        self.groups.get_mut(&mlid)
    }

    pub fn get_by_mgid(&self, mgid: &Gid) -> Option<&McGroup> {
        self.mgid_tree
            .get(mgid)
            .and_then(|mlid| self.groups.get(mlid))
    }

    pub fn get_mut_by_mgid(&mut self, mgid: &Gid) -> Option<&mut McGroup> {
        self.mgid_tree
            .get(mgid)
            .and_then(|mlid| self.groups.get_mut(mlid))
    }

    // Returns an iterator visiting all groups.
    //
    // Groups are ordered by their MLIDs.
    pub fn iter(&self) -> impl Iterator<Item = &McGroup> {
        self.groups.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut McGroup> {
        self.groups.values_mut()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    // Allocates the lowest free MLID, honoring a specific request when
    // possible.
    pub fn new_mlid(&self, requested: Lid, max_mcast_lid: Lid) -> Option<Lid> {
        if requested >= LID_MCAST_START
            && requested <= max_mcast_lid
            && !self.groups.contains_key(&requested)
        {
            return Some(requested);
        }
        (LID_MCAST_START..=max_mcast_lid)
            .find(|mlid| !self.groups.contains_key(mlid))
    }
}
