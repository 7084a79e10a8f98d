//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use ibsm_utils::ib::{Guid, HOPS_UNREACHABLE, LFT_NO_PATH, Lid, PortNum};

use crate::collections::{NodeIndex, SwitchId};
use crate::packet::smp::{
    LFT_BLOCK_SIZE, LftBlock, MFT_BLOCK_SIZE, MFT_POSITION_PORTS, MftBlock,
    SwitchInfo,
};

// Per-switch forwarding state: switch info, linear and multicast forwarding
// tables and the min-hop matrix.
#[derive(Debug)]
pub struct Switch {
    pub id: SwitchId,
    pub guid: Guid,
    pub node_idx: NodeIndex,
    pub num_ports: u8,
    pub info: SwitchInfo,
    // LFT as committed to the device.
    pub lft: Vec<u8>,
    // LFT computed by the current routing pass.
    pub new_lft: Vec<u8>,
    // MFT: per-MLID output port masks, one word per 16-port position.
    pub mft: BTreeMap<Lid, Vec<u16>>,
    // Min-hop matrix: hops[lid][port].
    hops: Vec<Option<Box<[u8]>>>,
    // Per-sweep discovery counter.
    pub discovery_count: u32,
}

// ===== impl Switch =====

impl Switch {
    pub(crate) fn new(
        id: SwitchId,
        node_idx: NodeIndex,
        guid: Guid,
        num_ports: u8,
        info: &SwitchInfo,
    ) -> Switch {
        Switch {
            id,
            guid,
            node_idx,
            num_ports,
            info: info.clone(),
            lft: Vec::new(),
            new_lft: Vec::new(),
            mft: BTreeMap::new(),
            hops: Vec::new(),
            discovery_count: 0,
        }
    }

    // ===== min-hop matrix =====

    pub fn clear_hops(&mut self) {
        self.hops.clear();
    }

    // Records the hop count to `lid` through the given local port, keeping
    // the smaller of the existing and new values.
    pub fn set_hops(&mut self, lid: Lid, port_num: PortNum, hops: u8) {
        if self.hops.len() <= lid as usize {
            self.hops.resize(lid as usize + 1, None);
        }
        let row = self.hops[lid as usize].get_or_insert_with(|| {
            vec![HOPS_UNREACHABLE; self.num_ports as usize + 1]
                .into_boxed_slice()
        });
        if hops < row[port_num as usize] {
            row[port_num as usize] = hops;
        }
    }

    pub fn hops_via(&self, lid: Lid, port_num: PortNum) -> u8 {
        self.hops
            .get(lid as usize)
            .and_then(|row| row.as_ref())
            .map(|row| row[port_num as usize])
            .unwrap_or(HOPS_UNREACHABLE)
    }

    // The smallest hop count to `lid` over any local port.
    pub fn least_hops(&self, lid: Lid) -> Option<u8> {
        self.hops
            .get(lid as usize)
            .and_then(|row| row.as_ref())
            .and_then(|row| {
                row.iter().copied().min().filter(|h| *h != HOPS_UNREACHABLE)
            })
    }

    // All local ports reaching `lid` with the minimal hop count.
    pub fn min_hop_ports(&self, lid: Lid) -> Vec<PortNum> {
        let Some(least) = self.least_hops(lid) else {
            return Vec::new();
        };
        let row = self.hops[lid as usize].as_ref().unwrap();
        row.iter()
            .enumerate()
            .filter(|(_, hops)| **hops == least)
            .map(|(port_num, _)| port_num as PortNum)
            .collect()
    }

    // ===== linear forwarding table =====

    // Prepares a fresh LFT for the routing pass.
    pub fn prepare_new_lft(&mut self, max_lid: Lid) {
        self.new_lft = vec![LFT_NO_PATH; max_lid as usize + 1];
    }

    pub fn set_new_lft(&mut self, lid: Lid, port_num: PortNum) {
        if self.new_lft.len() <= lid as usize {
            self.new_lft.resize(lid as usize + 1, LFT_NO_PATH);
        }
        self.new_lft[lid as usize] = port_num;
    }

    pub fn new_lft_entry(&self, lid: Lid) -> u8 {
        self.new_lft
            .get(lid as usize)
            .copied()
            .unwrap_or(LFT_NO_PATH)
    }

    pub fn lft_entry(&self, lid: Lid) -> u8 {
        self.lft.get(lid as usize).copied().unwrap_or(LFT_NO_PATH)
    }

    // Block ids whose computed content differs from the committed LFT.
    pub fn dirty_lft_blocks(&self) -> Vec<u16> {
        let num_blocks = self.new_lft.len().div_ceil(LFT_BLOCK_SIZE);
        (0..num_blocks as u16)
            .filter(|block| {
                let start = *block as usize * LFT_BLOCK_SIZE;
                let end = (start + LFT_BLOCK_SIZE).min(self.new_lft.len());
                let new = &self.new_lft[start..end];
                if self.lft.len() < end {
                    return true;
                }
                new != &self.lft[start..end]
            })
            .collect()
    }

    pub fn lft_block(&self, block: u16) -> LftBlock {
        let start = block as usize * LFT_BLOCK_SIZE;
        let mut ports = [LFT_NO_PATH; LFT_BLOCK_SIZE];
        for (i, entry) in ports.iter_mut().enumerate() {
            if let Some(port) = self.new_lft.get(start + i) {
                *entry = *port;
            }
        }
        LftBlock { ports }
    }

    // Commits the computed LFT after it has been written out.
    pub fn commit_lft(&mut self) {
        self.lft = self.new_lft.clone();
        self.info.lin_fdb_top = self.new_lft.len().saturating_sub(1) as u16;
    }

    // ===== multicast forwarding table =====

    pub fn clear_mft(&mut self) {
        self.mft.clear();
    }

    fn mft_positions(&self) -> usize {
        self.num_ports as usize / MFT_POSITION_PORTS + 1
    }

    pub fn set_mft_bit(&mut self, mlid: Lid, port_num: PortNum) {
        let positions = self.mft_positions();
        let masks = self
            .mft
            .entry(mlid)
            .or_insert_with(|| vec![0; positions]);
        let position = port_num as usize / MFT_POSITION_PORTS;
        masks[position] |= 1 << (port_num as usize % MFT_POSITION_PORTS);
    }

    pub fn mft_mask(&self, mlid: Lid) -> Option<&[u16]> {
        self.mft.get(&mlid).map(|masks| masks.as_slice())
    }

    // Builds the MFT block covering the given position and MLID block.
    pub fn mft_block(&self, position: u8, block: u16) -> MftBlock {
        let mut masks = [0; MFT_BLOCK_SIZE];
        let base = ibsm_utils::ib::LID_MCAST_START
            + block * MFT_BLOCK_SIZE as u16;
        for (i, mask) in masks.iter_mut().enumerate() {
            let mlid = base + i as u16;
            if let Some(words) = self.mft.get(&mlid) {
                *mask = words.get(position as usize).copied().unwrap_or(0);
            }
        }
        MftBlock { masks }
    }

    // (position, block) pairs with at least one bit set.
    pub fn dirty_mft_blocks(&self) -> Vec<(u8, u16)> {
        let mut blocks = Vec::new();
        for position in 0..self.mft_positions() as u8 {
            let mut block_ids: Vec<u16> = self
                .mft
                .iter()
                .filter(|(_, words)| {
                    words.get(position as usize).copied().unwrap_or(0) != 0
                })
                .map(|(mlid, _)| {
                    (mlid - ibsm_utils::ib::LID_MCAST_START)
                        / MFT_BLOCK_SIZE as u16
                })
                .collect();
            block_ids.dedup();
            for block in block_ids {
                blocks.push((position, block));
            }
        }
        blocks
    }
}
