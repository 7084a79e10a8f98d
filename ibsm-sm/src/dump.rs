//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;

use chrono::Utc;
use ibsm_utils::ib::{Guid, LFT_NO_PATH, Lid};

use crate::config::SmConfig;
use crate::error::Error;
use crate::subnet::Subnet;

// ===== GUID-to-LID map =====

// Reads the persistent GUID-to-LID map: one `<guid-hex> <lid> <lmc>`
// record per line.
pub(crate) fn read_guid2lid(
    config: &SmConfig,
) -> Result<BTreeMap<Guid, (Lid, u8)>, Error> {
    let path = config.guid2lid_file();
    let content = fs::read_to_string(&path)
        .map_err(|error| Error::FileIo(path.clone(), error))?;

    let mut map = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(guid), Some(lid), Some(lmc)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(Error::FileParse(path, format!("short line: {line}")));
        };
        let guid: Guid = guid
            .parse()
            .map_err(|_| Error::FileParse(path.clone(), guid.to_owned()))?;
        let lid: Lid = lid
            .parse()
            .map_err(|_| Error::FileParse(path.clone(), lid.to_owned()))?;
        let lmc: u8 = lmc
            .parse()
            .map_err(|_| Error::FileParse(path.clone(), lmc.to_owned()))?;
        map.insert(guid, (lid, lmc));
    }
    Ok(map)
}

// Persists the current GUID-to-LID assignments.
pub(crate) fn write_guid2lid(
    config: &SmConfig,
    subnet: &Subnet,
) -> Result<(), Error> {
    let path = config.guid2lid_file();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|error| Error::FileIo(path.clone(), error))?;
    }

    let mut out = String::new();
    for port in subnet.ports.iter() {
        if port.base_lid == 0 {
            continue;
        }
        out.push_str(&format!(
            "{} {} {}\n",
            port.guid, port.base_lid, port.lmc
        ));
    }
    fs::write(&path, out).map_err(|error| Error::FileIo(path, error))
}

// ===== LFT dump =====

// Writes a human-readable dump of every switch's committed LFT.
pub(crate) fn write_lft(
    config: &SmConfig,
    subnet: &Subnet,
) -> Result<(), Error> {
    let path = config.dump_files_dir.join("lfts.dump");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|error| Error::FileIo(path.clone(), error))?;
    }
    let mut file = fs::File::create(&path)
        .map_err(|error| Error::FileIo(path.clone(), error))?;

    let mut write = || -> std::io::Result<()> {
        writeln!(file, "# LFT dump {}", Utc::now().to_rfc3339())?;
        for sw in subnet.switches.iter() {
            writeln!(
                file,
                "Switch {} top {}",
                sw.guid, sw.info.lin_fdb_top
            )?;
            for (lid, port) in sw.lft.iter().enumerate() {
                if *port == LFT_NO_PATH {
                    continue;
                }
                writeln!(file, "0x{:04x} {}", lid, port)?;
            }
        }
        Ok(())
    };
    write().map_err(|error| Error::FileIo(path, error))
}

// ===== SA database dump =====

// Textual dump of service and inform records.
pub(crate) fn write_sa_db(
    config: &SmConfig,
    subnet: &Subnet,
) -> Result<(), Error> {
    let path = config.dump_files_dir.join("sa_db.dump");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|error| Error::FileIo(path.clone(), error))?;
    }
    let mut file = fs::File::create(&path)
        .map_err(|error| Error::FileIo(path.clone(), error))?;

    let mut write = || -> std::io::Result<()> {
        writeln!(file, "# SA DB dump {}", Utc::now().to_rfc3339())?;
        for entry in subnet.services.values() {
            let record = &entry.record;
            writeln!(
                file,
                "ServiceRecord id 0x{:016x} gid {} pkey {} lease {} name {:?}",
                record.service_id,
                record.service_gid,
                record.service_pkey,
                record.service_lease,
                record.service_name,
            )?;
        }
        for entry in subnet.informs.values() {
            let record = &entry.record;
            writeln!(
                file,
                "InformRecord subscriber {} enum {} trap {} lids {}-{}",
                record.subscriber_gid,
                record.subscriber_enum,
                record.inform.trap_num,
                record.inform.lid_range_begin,
                record.inform.lid_range_end,
            )?;
        }
        Ok(())
    };
    write().map_err(|error| Error::FileIo(path, error))
}

// ===== routing support files =====

// Reads a list of GUIDs, one per line, `#` comments allowed.
pub(crate) fn read_guid_list(
    path: &std::path::Path,
) -> Result<Vec<Guid>, Error> {
    let content = fs::read_to_string(path)
        .map_err(|error| Error::FileIo(path.to_owned(), error))?;
    let mut guids = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let guid: Guid = line.parse().map_err(|_| {
            Error::FileParse(path.to_owned(), line.to_owned())
        })?;
        guids.push(guid);
    }
    Ok(guids)
}
