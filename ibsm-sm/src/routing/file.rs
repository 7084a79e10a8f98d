//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_utils::ib::{Guid, Lid, PortNum};
use tracing::warn;

use crate::config::SmConfig;
use crate::error::Error;
use crate::routing::{UcastEngine, compute_min_hops};
use crate::subnet::Subnet;

// Routing from a previously dumped LFT file. The min-hop matrix is still
// computed so path queries and multicast keep working; the forwarding
// entries themselves come from the file.
pub(crate) struct FileEngine;

impl UcastEngine for FileEngine {
    fn name(&self) -> &'static str {
        "file"
    }

    fn build(
        &mut self,
        config: &SmConfig,
        subnet: &mut Subnet,
    ) -> Result<(), Error> {
        let Some(path) = &config.lft_file else {
            return Err(Error::RoutingFailed("lft_file not configured"));
        };
        let content = std::fs::read_to_string(path)
            .map_err(|error| Error::FileIo(path.clone(), error))?;

        compute_min_hops(config, subnet);
        let max_lid = subnet.max_ucast_lid;
        for sw in subnet.switches.iter_mut() {
            sw.prepare_new_lft(max_lid);
        }

        let mut current: Option<Guid> = None;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("Switch") => {
                    let Some(guid) = fields.next() else {
                        return Err(Error::FileParse(
                            path.clone(),
                            line.to_owned(),
                        ));
                    };
                    let guid: Guid = guid.parse().map_err(|_| {
                        Error::FileParse(path.clone(), guid.to_owned())
                    })?;
                    if subnet.switches.get_by_guid(guid).is_none() {
                        warn!(%guid, "LFT file names an unknown switch");
                        current = None;
                    } else {
                        current = Some(guid);
                    }
                }
                Some(lid) => {
                    let Some(guid) = current else {
                        continue;
                    };
                    let Some(port) = fields.next() else {
                        return Err(Error::FileParse(
                            path.clone(),
                            line.to_owned(),
                        ));
                    };
                    let lid = lid.strip_prefix("0x").unwrap_or(lid);
                    let lid = Lid::from_str_radix(lid, 16).map_err(|_| {
                        Error::FileParse(path.clone(), line.to_owned())
                    })?;
                    let port: PortNum = port.parse().map_err(|_| {
                        Error::FileParse(path.clone(), line.to_owned())
                    })?;
                    let (sw_idx, _) =
                        subnet.switches.get_by_guid(guid).unwrap();
                    subnet.switches[sw_idx].set_new_lft(lid, port);
                }
                None => (),
            }
        }
        Ok(())
    }
}
