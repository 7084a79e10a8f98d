//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::path::Path;

use ibsm_utils::ib::{Guid, Pkey, PortNum};
use tracing::warn;

use crate::discovery;
use crate::error::Error;
use crate::instance::SmUpView;
use crate::packet::smp::{PKEY_BLOCK_SIZE, PkeyTableBlock, SmpAttr};
use crate::pacer::MadContext;

// A partition: a P_Key, its QoS defaults and the member port set.
#[derive(Debug)]
pub struct Partition {
    pub name: String,
    pub pkey: Pkey,
    pub sl: u8,
    // Member port GUIDs with their membership bit. A port absent from the
    // map is not part of the partition.
    pub members: BTreeMap<Guid, bool>,
    // The default partition contains every endport and is never removed.
    pub well_known: bool,
}

// ===== impl Partition =====

impl Partition {
    pub fn new(name: &str, pkey: Pkey, sl: u8) -> Partition {
        Partition {
            name: name.to_owned(),
            pkey,
            sl,
            members: BTreeMap::new(),
            well_known: false,
        }
    }

    // The default partition 0x7FFF with full membership for everyone.
    pub fn default_partition() -> Partition {
        Partition {
            name: "Default".to_owned(),
            pkey: Pkey(0x7FFF),
            sl: 0,
            members: BTreeMap::new(),
            well_known: true,
        }
    }

    pub fn add_member(&mut self, port_guid: Guid, full: bool) {
        self.members.insert(port_guid, full);
    }

    // The P_Key as it must appear in a member port's table.
    pub fn member_pkey(&self, port_guid: Guid) -> Option<Pkey> {
        self.members.get(&port_guid).map(|full| {
            if *full {
                Pkey(self.pkey.base() | 0x8000)
            } else {
                Pkey(self.pkey.base())
            }
        })
    }
}

// ===== global functions =====

// Parses the partition configuration file. Blocks have the form:
//
//   PartitionName = { PKey=0x8001, sl=3, members=0x10,0x20 }
//
// Unknown keys inside a block are ignored with a warning; the syntax
// belongs to the file, the semantics to the SM.
pub fn load_partitions(path: &Path) -> Result<Vec<Partition>, Error> {
    let content = std::fs::read_to_string(path)
        .map_err(|error| Error::FileIo(path.to_owned(), error))?;

    let mut partitions = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name, body)) = line.split_once('=') else {
            return Err(Error::FileParse(path.to_owned(), line.to_owned()));
        };
        let name = name.trim();
        let body = body
            .trim()
            .trim_start_matches('{')
            .trim_end_matches('}')
            .trim();

        let mut pkey = None;
        let mut sl = 0;
        let mut members: Vec<(Guid, bool)> = Vec::new();
        for field in body.split(',').map(str::trim) {
            let Some((key, value)) = field
                .split_once('=')
                .map(|(k, v)| (k.trim(), v.trim()))
            else {
                // Continuation of the member list.
                if let Ok(guid) = field.parse::<Guid>() {
                    members.push((guid, true));
                }
                continue;
            };
            match key {
                "PKey" => {
                    let value = value.trim_start_matches("0x");
                    let raw = u16::from_str_radix(value, 16).map_err(|_| {
                        Error::FileParse(path.to_owned(), value.to_owned())
                    })?;
                    pkey = Some(Pkey(raw));
                }
                "sl" => {
                    sl = value.parse().map_err(|_| {
                        Error::FileParse(path.to_owned(), value.to_owned())
                    })?;
                }
                "members" => {
                    if let Ok(guid) = value.parse::<Guid>() {
                        members.push((guid, true));
                    }
                }
                _ => {
                    warn!(%key, "ignoring unknown partition option");
                }
            }
        }

        let Some(pkey) = pkey else {
            return Err(Error::FileParse(
                path.to_owned(),
                format!("partition {} without PKey", name),
            ));
        };
        let mut partition = Partition::new(name, pkey, sl);
        for (guid, full) in members {
            partition.add_member(guid, full);
        }
        partitions.push(partition);
    }
    Ok(partitions)
}

// Writes P_Key tables so every endport carries the default partition plus
// its configured memberships. Skipped under `no_partition_enforcement`;
// query-time scoping still applies either way.
pub(crate) fn apply(sm: &mut SmUpView<'_>) {
    if sm.config.no_partition_enforcement {
        return;
    }

    let mut writes: Vec<(crate::collections::NodeIndex, PortNum, Vec<u16>)> =
        Vec::new();
    for port in sm.subnet.ports.iter() {
        let mut pkeys: Vec<u16> = vec![0xFFFF];
        for partition in sm.subnet.partitions.values() {
            if partition.well_known {
                continue;
            }
            if let Some(pkey) = partition.member_pkey(port.guid) {
                pkeys.push(pkey.0);
            }
        }
        let current: Vec<u16> = sm
            .subnet
            .port_physp(port)
            .map(|physp| physp.pkeys.iter().map(|pkey| pkey.0).collect())
            .unwrap_or_default();
        if current != pkeys {
            writes.push((port.node_idx, port.port_num, pkeys));
        }
    }

    for (node_idx, port_num, pkeys) in writes {
        let Some(physp) = sm.subnet.nodes[node_idx].physp(port_num) else {
            continue;
        };
        let path = physp.dr_path.clone();
        let mut block = PkeyTableBlock::default();
        for (i, pkey) in pkeys.iter().take(PKEY_BLOCK_SIZE).enumerate() {
            block.pkeys[i] = *pkey;
        }
        discovery::send_dr_set(
            sm,
            SmpAttr::PkeyTable(block),
            (port_num as u32) << 16,
            &path,
            MadContext::PkeyTable {
                node_idx,
                port_num,
                block: 0,
                set: true,
            },
        );
    }
}
