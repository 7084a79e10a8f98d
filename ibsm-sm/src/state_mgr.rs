//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;

use ibsm_utils::ib::Guid;
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::instance::SmUpView;
use crate::packet::smp::SmState;
use crate::{
    discovery, drop_mgr, dump, election, inform, lid_mgr, mcast, partition,
    routing,
};

// Sweep phases. Every phase is resumable: the instance calls
// `process_idle` whenever the pacer drains, and the phase advances once
// its outstanding transactions have completed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SweepPhase {
    #[default]
    Idle,
    Discovering,
    MasterDiscoveryDone,
    ConfiguringLids,
    ConfiguringUnicast,
    ConfiguringMulticast,
    SettingLinkState,
    SubnetUp,
}

// Sweep orchestration state.
#[derive(Debug, Default)]
pub struct SweepState {
    pub phase: SweepPhase,
    pub heavy: bool,
    // Another sweep was requested while one is running.
    pub pending: bool,
    pub pending_heavy: bool,
    // Per-GUID re-query counters for duplicate-GUID/cable-move suspects.
    pub dup_guid_retries: HashMap<Guid, u32>,
    // Name of the routing engine that produced the current LFTs.
    pub engine_used: Option<&'static str>,
    // A duplicated GUID survived its re-queries; fatal by default.
    pub fatal_dup_guid: bool,
}

// Number of re-queries before a duplicated GUID is declared.
pub const DUP_GUID_MAX_RETRIES: u32 = 5;

// ===== global functions =====

// Requests a sweep. If one is already running, it is recorded and started
// once the current sweep finishes.
pub(crate) fn request_sweep(sm: &mut SmUpView<'_>, heavy: bool) {
    let heavy = heavy || sm.subnet.force_heavy_sweep;
    if sm.sweep.phase != SweepPhase::Idle {
        sm.sweep.pending = true;
        sm.sweep.pending_heavy |= heavy;
        return;
    }
    start_sweep(sm, heavy);
}

fn start_sweep(sm: &mut SmUpView<'_>, heavy: bool) {
    Debug::SweepStart(heavy).log();

    sm.subnet.force_heavy_sweep = false;
    sm.subnet.force_light_sweep = false;
    sm.sweep.heavy = heavy;
    sm.sweep.dup_guid_retries.clear();
    sm.subnet.clear_discovery_counters();
    sm.pacer.start_sweep_accounting();

    if heavy {
        // Heavy sweeps recompute everything, including the hop matrices.
        for sw in sm.subnet.switches.iter_mut() {
            sw.clear_hops();
        }
    }

    set_phase(sm, SweepPhase::Discovering);
    discovery::start(sm);
}

fn set_phase(sm: &mut SmUpView<'_>, phase: SweepPhase) {
    if sm.sweep.phase != phase {
        Debug::SweepPhaseChange(sm.sweep.phase, phase).log();
        sm.sweep.phase = phase;
    }
}

// Advances the sweep whenever the pacer has no outstanding transactions.
pub(crate) fn process_idle(sm: &mut SmUpView<'_>) {
    if !sm.pacer.is_idle() {
        return;
    }

    // A timeout burst aborts the sweep and forces a heavy one.
    if sm.sweep.phase != SweepPhase::Idle
        && sm.pacer.sweep_timeouts > sm.config.max_sweep_timeouts
    {
        Debug::SweepAborted(sm.pacer.sweep_timeouts).log();
        sm.subnet.force_heavy_sweep = true;
        sm.sweep.pending = true;
        sm.sweep.pending_heavy = true;
        finish_sweep(sm);
        return;
    }

    match sm.sweep.phase {
        SweepPhase::Idle => (),
        SweepPhase::Discovering => {
            // Discovery quiesced. Decide mastership before configuring
            // anything.
            election::decide(sm);
            if sm.subnet.sm_state != SmState::Master {
                // Standby and Not-Active SMs do not touch the subnet.
                finish_sweep(sm);
                return;
            }
            set_phase(sm, SweepPhase::MasterDiscoveryDone);
            drop_mgr::process(sm);
            set_phase(sm, SweepPhase::ConfiguringLids);
            if let Err(error) = lid_mgr::assign_lids(sm) {
                error.log();
                finish_sweep(sm);
                return;
            }
            partition::apply(sm);
        }
        SweepPhase::MasterDiscoveryDone => {
            // Transient phase; nothing outstanding can park here.
            set_phase(sm, SweepPhase::ConfiguringLids);
        }
        SweepPhase::ConfiguringLids => {
            set_phase(sm, SweepPhase::ConfiguringUnicast);
            match routing::run(sm) {
                Ok(engine) => sm.sweep.engine_used = Some(engine),
                Err(error) => {
                    error.log();
                    sm.subnet.initialization_error = true;
                    finish_sweep(sm);
                }
            }
        }
        SweepPhase::ConfiguringUnicast => {
            routing::commit(sm);
            set_phase(sm, SweepPhase::ConfiguringMulticast);
            mcast::run(sm);
        }
        SweepPhase::ConfiguringMulticast => {
            set_phase(sm, SweepPhase::SettingLinkState);
            if sm.config.qos {
                configure_qos(sm);
            }
            advance_link_state(sm);
        }
        SweepPhase::SettingLinkState => {
            set_phase(sm, SweepPhase::SubnetUp);
            subnet_up(sm);
        }
        SweepPhase::SubnetUp => {
            finish_sweep(sm);
        }
    }
}

// Programs the configured SL-to-VL and VL arbitration tables on every
// port advertising more than one data VL.
fn configure_qos(sm: &mut SmUpView<'_>) {
    use crate::packet::smp::SmpAttr;
    use crate::pacer::MadContext;

    let sl2vl = sm.config.qos_sl2vl_table();
    let vlarb_high = sm.config.qos_vlarb_high_table();
    let vlarb_low = sm.config.qos_vlarb_low_table();

    let mut writes = Vec::new();
    for node_idx in sm.subnet.nodes.indexes().collect::<Vec<_>>() {
        let node = &sm.subnet.nodes[node_idx];
        for physp in node.physps() {
            if physp.info.vl_cap <= 1 || !physp.is_link_up() {
                continue;
            }
            writes.push((node_idx, physp.port_num, physp.dr_path.clone()));
        }
    }
    for (node_idx, port_num, path) in writes {
        discovery::send_dr_set(
            sm,
            SmpAttr::SlToVlTable(sl2vl.clone()),
            ((port_num as u32) << 8) | port_num as u32,
            &path,
            MadContext::SlToVl {
                node_idx,
                in_port: port_num,
                out_port: port_num,
                set: true,
            },
        );
        for (block, table) in
            [(1u32, vlarb_high.clone()), (2u32, vlarb_low.clone())]
        {
            discovery::send_dr_set(
                sm,
                SmpAttr::VlArbTable(table),
                (block << 16) | port_num as u32,
                &path,
                MadContext::VlArb {
                    node_idx,
                    port_num,
                    block,
                    set: true,
                },
            );
        }
    }
}

// Writes PortInfo to bring every initialized port up to Active.
fn advance_link_state(sm: &mut SmUpView<'_>) {
    use ibsm_utils::ib::PortState;

    let mut writes = Vec::new();
    for node_idx in sm.subnet.nodes.indexes().collect::<Vec<_>>() {
        let node = &sm.subnet.nodes[node_idx];
        for physp in node.physps() {
            if physp.info.port_state == PortState::Init
                || physp.info.port_state == PortState::Armed
            {
                let mut info = physp.info.clone();
                info.port_state = PortState::Active;
                info.m_key = sm.config.m_key;
                info.m_key_lease_period = sm.config.m_key_lease_period;
                info.subnet_prefix = sm.config.subnet_prefix;
                info.master_sm_base_lid = sm.subnet.sm_base_lid;
                info.master_sm_sl = sm.config.sm_sl;
                info.subnet_timeout = sm.config.subnet_timeout;
                writes.push((node_idx, physp.port_num, info));
            }
        }
    }
    for (node_idx, port_num, info) in writes {
        discovery::send_port_info_set(sm, node_idx, port_num, info);
    }
}

// Final actions once the subnet is fully configured.
fn subnet_up(sm: &mut SmUpView<'_>) {
    Debug::SubnetUp.log();
    sm.subnet.act_count = sm.subnet.act_count.wrapping_add(1);
    sm.subnet.first_time_master_sweep = false;

    // Announce ports that appeared while we are master.
    inform::report_new_ports(sm);

    // Persist addressing state and optional dumps.
    if let Err(error) = dump::write_guid2lid(sm.config, sm.subnet) {
        error.log();
    }
    if sm.config.dump_lft
        && let Err(error) = dump::write_lft(sm.config, sm.subnet)
    {
        error.log();
    }
    if sm.config.dump_sa_db
        && let Err(error) = dump::write_sa_db(sm.config, sm.subnet)
    {
        error.log();
    }
}

fn finish_sweep(sm: &mut SmUpView<'_>) {
    set_phase(sm, SweepPhase::Idle);
    if sm.sweep.pending {
        sm.sweep.pending = false;
        let heavy = sm.sweep.pending_heavy;
        sm.sweep.pending_heavy = false;
        start_sweep(sm, heavy);
    }
}
