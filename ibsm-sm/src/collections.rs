//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};

use generational_arena::Index;
use ibsm_utils::ib::{Guid, Lid};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::node::Node;
use crate::packet::smp::{NodeInfo, SwitchInfo};
use crate::port::Port;
use crate::switch::Switch;

pub type ObjectId = u32;

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum ObjectKey<T> {
    Id(ObjectId),
    Value(T),
}

pub type NodeId = ObjectId;
pub type NodeIndex = Index;
pub type NodeKey = ObjectKey<Guid>;
pub type PortId = ObjectId;
pub type PortIndex = Index;
pub type PortKey = ObjectKey<Guid>;
pub type SwitchId = ObjectId;
pub type SwitchIndex = Index;
pub type SwitchKey = ObjectKey<Guid>;

#[derive(Debug)]
pub struct Arena<T>(generational_arena::Arena<T>);

#[derive(Debug, Default)]
pub struct Nodes {
    arena: Arena<Node>,
    id_tree: HashMap<NodeId, NodeIndex>,
    guid_tree: BTreeMap<Guid, NodeIndex>,
    next_id: NodeId,
}

#[derive(Debug, Default)]
pub struct Switches {
    arena: Arena<Switch>,
    id_tree: HashMap<SwitchId, SwitchIndex>,
    guid_tree: BTreeMap<Guid, SwitchIndex>,
    next_id: SwitchId,
}

#[derive(Debug, Default)]
pub struct Ports {
    arena: Arena<Port>,
    id_tree: HashMap<PortId, PortIndex>,
    guid_tree: BTreeMap<Guid, PortIndex>,
    lid_tree: BTreeMap<Lid, PortIndex>,
    next_id: PortId,
}

// ===== impl ObjectKey =====

impl<T> From<ObjectId> for ObjectKey<T> {
    fn from(id: ObjectId) -> ObjectKey<T> {
        ObjectKey::Id(id)
    }
}

// ===== impl Arena =====

impl<T> Default for Arena<T> {
    fn default() -> Arena<T> {
        Arena(Default::default())
    }
}

impl<T> std::ops::Index<Index> for Arena<T> {
    type Output = T;

    fn index(&self, index: Index) -> &Self::Output {
        &self.0[index]
    }
}

impl<T> std::ops::IndexMut<Index> for Arena<T> {
    fn index_mut(&mut self, index: Index) -> &mut Self::Output {
        &mut self.0[index]
    }
}

// ===== impl Nodes =====

impl Nodes {
    pub(crate) fn insert(
        &mut self,
        node_info: &NodeInfo,
    ) -> (NodeIndex, &mut Node) {
        // Create and insert node into the arena.
        self.next_id += 1;
        let node = Node::new(self.next_id, node_info);
        let node_idx = self.arena.0.insert(node);

        // Link node to different collections.
        let node = &mut self.arena[node_idx];
        self.id_tree.insert(node.id, node_idx);
        if self.guid_tree.insert(node.guid, node_idx).is_some() {
            panic!("node GUID {} already exists", node.guid);
        }

        (node_idx, node)
    }

    pub(crate) fn delete(&mut self, node_idx: NodeIndex) {
        let node = &mut self.arena[node_idx];

        // Unlink node from different collections.
        self.id_tree.remove(&node.id);
        self.guid_tree.remove(&node.guid);

        // Remove node from the arena.
        self.arena.0.remove(node_idx);
    }

    // Returns a reference to the node corresponding to the given ID.
    pub(crate) fn get_by_id(&self, id: NodeId) -> Result<&Node, Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|node_idx| &self.arena[node_idx])
            .filter(|node| node.id == id)
            .ok_or(Error::NodeIdNotFound(id))
    }

    // Returns a reference to the node corresponding to the given GUID.
    pub fn get_by_guid(&self, guid: Guid) -> Option<(NodeIndex, &Node)> {
        self.guid_tree
            .get(&guid)
            .copied()
            .map(|node_idx| (node_idx, &self.arena[node_idx]))
    }

    // Returns a mutable reference to the node corresponding to the given
    // GUID.
    pub fn get_mut_by_guid(
        &mut self,
        guid: Guid,
    ) -> Option<(NodeIndex, &mut Node)> {
        self.guid_tree
            .get(&guid)
            .copied()
            .map(move |node_idx| (node_idx, &mut self.arena[node_idx]))
    }

    // Returns a reference to the node corresponding to the given object key.
    #[expect(unused)]
    pub(crate) fn get_by_key(&self, key: &NodeKey) -> Result<&Node, Error> {
        match key {
            NodeKey::Id(id) => self.get_by_id(*id),
            NodeKey::Value(guid) => self
                .get_by_guid(*guid)
                .map(|(_, node)| node)
                .ok_or(Error::NodeGuidNotFound(*guid)),
        }
    }

    // Returns mutable references to two distinct nodes at once.
    pub(crate) fn get2_mut(
        &mut self,
        idx_a: NodeIndex,
        idx_b: NodeIndex,
    ) -> (Option<&mut Node>, Option<&mut Node>) {
        self.arena.0.get2_mut(idx_a, idx_b)
    }

    // Returns an iterator visiting all nodes.
    //
    // Nodes are ordered by their GUIDs.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.guid_tree.values().map(|node_idx| &self.arena[*node_idx])
    }

    // Returns an iterator visiting all nodes with mutable references.
    //
    // Order of iteration is not defined.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &'_ mut Node> {
        self.arena.0.iter_mut().map(|(_, node)| node)
    }

    // Returns an iterator over all node indexes.
    //
    // Nodes are ordered by their GUIDs.
    pub fn indexes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.guid_tree.values().copied()
    }
}

impl std::ops::Index<NodeIndex> for Nodes {
    type Output = Node;

    fn index(&self, index: NodeIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<NodeIndex> for Nodes {
    fn index_mut(&mut self, index: NodeIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}

// ===== impl Switches =====

impl Switches {
    pub(crate) fn insert(
        &mut self,
        node_idx: NodeIndex,
        guid: Guid,
        num_ports: u8,
        info: &SwitchInfo,
    ) -> (SwitchIndex, &mut Switch) {
        // Create and insert switch into the arena.
        self.next_id += 1;
        let sw = Switch::new(self.next_id, node_idx, guid, num_ports, info);
        let sw_idx = self.arena.0.insert(sw);

        // Link switch to different collections.
        let sw = &mut self.arena[sw_idx];
        self.id_tree.insert(sw.id, sw_idx);
        self.guid_tree.insert(sw.guid, sw_idx);

        (sw_idx, sw)
    }

    pub(crate) fn delete(&mut self, sw_idx: SwitchIndex) {
        let sw = &mut self.arena[sw_idx];

        // Unlink switch from different collections.
        self.id_tree.remove(&sw.id);
        self.guid_tree.remove(&sw.guid);

        // Remove switch from the arena.
        self.arena.0.remove(sw_idx);
    }

    // Returns a reference to the switch corresponding to the given GUID.
    pub fn get_by_guid(&self, guid: Guid) -> Option<(SwitchIndex, &Switch)> {
        self.guid_tree
            .get(&guid)
            .copied()
            .map(|sw_idx| (sw_idx, &self.arena[sw_idx]))
    }

    // Returns a mutable reference to the switch corresponding to the given
    // GUID.
    pub fn get_mut_by_guid(
        &mut self,
        guid: Guid,
    ) -> Option<(SwitchIndex, &mut Switch)> {
        self.guid_tree
            .get(&guid)
            .copied()
            .map(move |sw_idx| (sw_idx, &mut self.arena[sw_idx]))
    }

    // Returns an iterator visiting all switches.
    //
    // Switches are ordered by their GUIDs.
    pub fn iter(&self) -> impl Iterator<Item = &Switch> {
        self.guid_tree.values().map(|sw_idx| &self.arena[*sw_idx])
    }

    // Returns an iterator visiting all switches with mutable references.
    //
    // Order of iteration is not defined.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &'_ mut Switch> {
        self.arena.0.iter_mut().map(|(_, sw)| sw)
    }

    // Returns an iterator over all switch indexes.
    //
    // Switches are ordered by their GUIDs.
    pub fn indexes(&self) -> impl Iterator<Item = SwitchIndex> + '_ {
        self.guid_tree.values().copied()
    }

    pub fn len(&self) -> usize {
        self.guid_tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guid_tree.is_empty()
    }
}

impl std::ops::Index<SwitchIndex> for Switches {
    type Output = Switch;

    fn index(&self, index: SwitchIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<SwitchIndex> for Switches {
    fn index_mut(&mut self, index: SwitchIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}

// ===== impl Ports =====

impl Ports {
    pub(crate) fn insert(
        &mut self,
        guid: Guid,
        node_idx: NodeIndex,
        port_num: u8,
    ) -> (PortIndex, &mut Port) {
        // Create and insert port into the arena.
        self.next_id += 1;
        let port = Port::new(self.next_id, guid, node_idx, port_num);
        let port_idx = self.arena.0.insert(port);

        // Link port to different collections.
        let port = &mut self.arena[port_idx];
        self.id_tree.insert(port.id, port_idx);
        self.guid_tree.insert(port.guid, port_idx);

        (port_idx, port)
    }

    pub(crate) fn delete(&mut self, port_idx: PortIndex) {
        let port = &mut self.arena[port_idx];

        // Unlink port from different collections.
        self.id_tree.remove(&port.id);
        self.guid_tree.remove(&port.guid);
        if port.base_lid != 0 {
            self.lid_tree.remove(&port.base_lid);
        }

        // Remove port from the arena.
        self.arena.0.remove(port_idx);
    }

    // Update the port's base LID, keeping the LID tree consistent.
    pub(crate) fn update_lid(&mut self, port_idx: PortIndex, base_lid: Lid) {
        let port = &mut self.arena[port_idx];
        if port.base_lid != 0 {
            self.lid_tree.remove(&port.base_lid);
        }
        port.base_lid = base_lid;
        if base_lid != 0 {
            self.lid_tree.insert(base_lid, port_idx);
        }
    }

    // Returns a reference to the port corresponding to the given GUID.
    pub fn get_by_guid(&self, guid: Guid) -> Option<(PortIndex, &Port)> {
        self.guid_tree
            .get(&guid)
            .copied()
            .map(|port_idx| (port_idx, &self.arena[port_idx]))
    }

    // Returns a mutable reference to the port corresponding to the given
    // GUID.
    pub fn get_mut_by_guid(
        &mut self,
        guid: Guid,
    ) -> Option<(PortIndex, &mut Port)> {
        self.guid_tree
            .get(&guid)
            .copied()
            .map(move |port_idx| (port_idx, &mut self.arena[port_idx]))
    }

    // Returns a reference to the port whose LMC-expanded LID range covers
    // the given LID.
    pub fn get_by_lid(&self, lid: Lid) -> Option<(PortIndex, &Port)> {
        self.lid_tree
            .range(..=lid)
            .next_back()
            .map(|(_, port_idx)| (*port_idx, &self.arena[*port_idx]))
            .filter(|(_, port)| port.covers_lid(lid))
    }

    // Returns an iterator visiting all ports.
    //
    // Ports are ordered by their GUIDs.
    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.guid_tree.values().map(|port_idx| &self.arena[*port_idx])
    }

    // Returns an iterator visiting all ports with mutable references.
    //
    // Order of iteration is not defined.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &'_ mut Port> {
        self.arena.0.iter_mut().map(|(_, port)| port)
    }

    // Returns an iterator over all port indexes.
    //
    // Ports are ordered by their GUIDs.
    pub fn indexes(&self) -> impl Iterator<Item = PortIndex> + '_ {
        self.guid_tree.values().copied()
    }

    // Returns an iterator visiting all ports ordered by their base LIDs.
    pub fn iter_by_lid(&self) -> impl Iterator<Item = &Port> {
        self.lid_tree.values().map(|port_idx| &self.arena[*port_idx])
    }

    pub fn len(&self) -> usize {
        self.guid_tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guid_tree.is_empty()
    }
}

impl std::ops::Index<PortIndex> for Ports {
    type Output = Port;

    fn index(&self, index: PortIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<PortIndex> for Ports {
    fn index_mut(&mut self, index: PortIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}
