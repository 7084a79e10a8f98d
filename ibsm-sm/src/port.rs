//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_utils::ib::{Gid, Guid, Lid, PortNum};

use crate::collections::{NodeIndex, PortId};

// A logical endport, keyed by port GUID. References (does not own) the
// default physical port on its node; switches are represented by their
// management port 0.
#[derive(Debug)]
pub struct Port {
    pub id: PortId,
    pub guid: Guid,
    pub node_idx: NodeIndex,
    pub port_num: PortNum,
    pub base_lid: Lid,
    pub lmc: u8,
    // Set when the port was first seen while this SM is master; cleared
    // once the "port up" trap has been delivered.
    pub is_new: bool,
    // Per-sweep discovery counter.
    pub discovery_count: u32,
}

// ===== impl Port =====

impl Port {
    pub(crate) fn new(
        id: PortId,
        guid: Guid,
        node_idx: NodeIndex,
        port_num: PortNum,
    ) -> Port {
        Port {
            id,
            guid,
            node_idx,
            port_num,
            base_lid: 0,
            lmc: 0,
            is_new: false,
            discovery_count: 0,
        }
    }

    // The LMC-expanded LID range [base, base + 2^lmc - 1].
    pub fn lid_range(&self) -> (Lid, Lid) {
        let count = 1u16 << self.lmc;
        (self.base_lid, self.base_lid + count - 1)
    }

    pub fn covers_lid(&self, lid: Lid) -> bool {
        if self.base_lid == 0 {
            return false;
        }
        let (begin, end) = self.lid_range();
        lid >= begin && lid <= end
    }

    pub fn gid(&self, subnet_prefix: u64) -> Gid {
        Gid::from_parts(subnet_prefix, self.guid)
    }
}
