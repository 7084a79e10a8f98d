//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::path::PathBuf;

use ibsm_utils::ib::{Guid, LID_MCAST_END, Lid};
use serde::Deserialize;

// The subnet manager option set.
//
// Every option has a documented default; the subset applied by `reload`
// may be changed at runtime without restarting the SM.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SmConfig {
    // Local port to bind. Zero selects the first port the transport offers.
    pub port_guid: Guid,
    // Seconds between periodic sweeps; 0 disables periodic sweeping.
    pub sweep_interval: u32,

    // Transaction pacer thresholds.
    pub max_wire_smps: u32,
    pub max_wire_smps2: u32,
    // Extended timeout (ms) applied beyond the primary window.
    pub max_smps_timeout: u32,
    // Per-datagram timeout (ms) and retry count.
    pub transaction_timeout: u32,
    pub transaction_retries: u32,
    // Timeouts within one sweep that abort it and force a heavy re-sweep.
    pub max_sweep_timeouts: u32,

    // SM identity and election.
    pub sm_priority: u8,
    pub sm_key: u64,
    pub sm_sl: u8,
    pub subnet_prefix: u64,
    pub sminfo_polling_timeout: u32,
    pub polling_retry_number: u32,

    // Port configuration.
    pub m_key: u64,
    pub m_key_lease_period: u16,
    pub lmc: u8,
    pub lmc_esp0: bool,
    pub max_op_vls: u8,
    pub subnet_timeout: u8,
    pub packet_life_time: u8,
    pub force_link_speed: u8,

    // Unicast routing.
    pub routing_engine: String,
    pub no_fallback: bool,
    pub lids_per_port_hint: u8,
    pub max_hops_in_fabric: u8,
    pub root_guid_file: Option<PathBuf>,
    pub cn_guid_file: Option<PathBuf>,
    pub io_guid_file: Option<PathBuf>,
    pub ids_guid_file: Option<PathBuf>,
    pub guid_routing_order_file: Option<PathBuf>,
    pub hop_weights_file: Option<PathBuf>,
    pub port_search_ordering_file: Option<PathBuf>,
    pub lft_file: Option<PathBuf>,
    pub use_ucast_cache: bool,
    pub port_shifting: bool,
    // Nonzero enables scattering with the value as RNG seed.
    pub scatter_ports: u64,
    // Up/Down root auto-detection thresholds.
    pub updn_thd_fraction_root: f64,
    pub updn_thd_fraction_minor: f64,

    // Multicast.
    pub max_multicast_lid: Lid,

    // Partitions.
    pub partition_config_file: Option<PathBuf>,
    pub no_partition_enforcement: bool,

    // QoS.
    pub qos: bool,
    pub qos_max_vls: u8,
    pub qos_high_limit: u8,
    pub qos_vlarb_high: String,
    pub qos_vlarb_low: String,
    pub qos_sl2vl: String,

    // LID assignment.
    pub honor_guid2lid_file: bool,
    pub reassign_lids: bool,

    // Console (handled by an external collaborator; the mode is carried
    // so the lifecycle can refuse unsupported configurations).
    pub console: ConsoleMode,
    pub console_port: u16,

    // Persistent state and dumps.
    pub dump_files_dir: PathBuf,
    pub dump_lft: bool,
    pub dump_sa_db: bool,

    // Error policy.
    pub exit_on_fatal: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleMode {
    #[default]
    Off,
    Local,
    Loopback,
    Socket,
}

// ===== impl SmConfig =====

impl Default for SmConfig {
    fn default() -> SmConfig {
        SmConfig {
            port_guid: Guid::ZERO,
            sweep_interval: 10,
            max_wire_smps: 4,
            max_wire_smps2: 4,
            max_smps_timeout: 600,
            transaction_timeout: 200,
            transaction_retries: 3,
            max_sweep_timeouts: 100,
            sm_priority: 1,
            sm_key: 1,
            sm_sl: 0,
            subnet_prefix: 0xFE80_0000_0000_0000,
            sminfo_polling_timeout: 10_000,
            polling_retry_number: 4,
            m_key: 0,
            m_key_lease_period: 0,
            lmc: 0,
            lmc_esp0: false,
            max_op_vls: 5,
            subnet_timeout: 18,
            packet_life_time: 18,
            force_link_speed: 0,
            routing_engine: "minhop".to_owned(),
            no_fallback: false,
            lids_per_port_hint: 0,
            max_hops_in_fabric: 64,
            root_guid_file: None,
            cn_guid_file: None,
            io_guid_file: None,
            ids_guid_file: None,
            guid_routing_order_file: None,
            hop_weights_file: None,
            port_search_ordering_file: None,
            lft_file: None,
            use_ucast_cache: false,
            port_shifting: false,
            scatter_ports: 0,
            updn_thd_fraction_root: 0.90,
            updn_thd_fraction_minor: 0.05,
            max_multicast_lid: LID_MCAST_END,
            partition_config_file: None,
            no_partition_enforcement: false,
            qos: false,
            qos_max_vls: 15,
            qos_high_limit: 0,
            qos_vlarb_high: "0:4,1:0,2:0,3:0,4:0,5:0,6:0,7:0".to_owned(),
            qos_vlarb_low: "0:0,1:4,2:4,3:4,4:4,5:4,6:4,7:4".to_owned(),
            qos_sl2vl: "0,1,2,3,4,5,6,7,0,1,2,3,4,5,6,7".to_owned(),
            honor_guid2lid_file: false,
            reassign_lids: false,
            console: ConsoleMode::Off,
            console_port: 10000,
            dump_files_dir: PathBuf::from("/var/log/ibsm"),
            dump_lft: false,
            dump_sa_db: false,
            exit_on_fatal: true,
        }
    }
}

impl SmConfig {
    // The ordered routing engine list.
    pub fn routing_engines(&self) -> Vec<&str> {
        self.routing_engine
            .split(',')
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .collect()
    }

    // Path of the persistent GUID-to-LID map.
    pub fn guid2lid_file(&self) -> PathBuf {
        self.dump_files_dir.join("guid2lid")
    }

    // Applies the live re-readable option subset from a freshly parsed
    // configuration. Everything else requires a restart.
    pub fn reload(&mut self, fresh: &SmConfig) {
        self.sweep_interval = fresh.sweep_interval;
        self.sm_priority = fresh.sm_priority;
        self.sminfo_polling_timeout = fresh.sminfo_polling_timeout;
        self.polling_retry_number = fresh.polling_retry_number;
        self.transaction_timeout = fresh.transaction_timeout;
        self.transaction_retries = fresh.transaction_retries;
        self.max_sweep_timeouts = fresh.max_sweep_timeouts;
        self.reassign_lids = fresh.reassign_lids;
        self.dump_lft = fresh.dump_lft;
        self.dump_sa_db = fresh.dump_sa_db;
        self.exit_on_fatal = fresh.exit_on_fatal;
    }
}

impl SmConfig {
    // The configured SL-to-VL mapping, sixteen comma-separated VLs.
    pub fn qos_sl2vl_table(&self) -> crate::packet::smp::SlToVlTable {
        let mut table = crate::packet::smp::SlToVlTable::default();
        for (i, vl) in self
            .qos_sl2vl
            .split(',')
            .take(16)
            .filter_map(|vl| vl.trim().parse::<u8>().ok())
            .enumerate()
        {
            table.vls[i] = vl & 0x0F;
        }
        table
    }

    // VL arbitration entries parsed from a "vl:weight,..." list.
    fn qos_vlarb_entries(spec: &str) -> crate::packet::smp::VlArbTableBlock {
        let mut block = crate::packet::smp::VlArbTableBlock::default();
        for (i, entry) in spec.split(',').take(32).enumerate() {
            if let Some((vl, weight)) = entry.split_once(':')
                && let (Ok(vl), Ok(weight)) =
                    (vl.trim().parse::<u8>(), weight.trim().parse::<u8>())
            {
                block.entries[i] = (vl & 0x0F, weight);
            }
        }
        block
    }

    pub fn qos_vlarb_high_table(&self) -> crate::packet::smp::VlArbTableBlock {
        SmConfig::qos_vlarb_entries(&self.qos_vlarb_high)
    }

    pub fn qos_vlarb_low_table(&self) -> crate::packet::smp::VlArbTableBlock {
        SmConfig::qos_vlarb_entries(&self.qos_vlarb_low)
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_engine_list() {
        let mut config = SmConfig::default();
        config.routing_engine = "updn, minhop,file".to_owned();
        assert_eq!(config.routing_engines(), vec!["updn", "minhop", "file"]);
    }

    #[test]
    fn reload_subset() {
        let mut config = SmConfig::default();
        let mut fresh = SmConfig::default();
        fresh.sm_priority = 14;
        fresh.lmc = 3;
        config.reload(&fresh);
        assert_eq!(config.sm_priority, 14);
        // LMC is not live re-readable.
        assert_eq!(config.lmc, 0);
    }
}
