//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_utils::ib::{Guid, Lid, NodeType, PortNum};
use tracing::{debug, debug_span};

use crate::packet::smp::{SmState, SmpAttr};
use crate::state_mgr::SweepPhase;

// Subnet manager debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Lifecycle
    InstanceStart,
    InstanceStop,
    // Sweeps
    SweepStart(bool),
    SweepPhaseChange(SweepPhase, SweepPhase),
    SweepAborted(u32),
    SubnetUp,
    // Discovery
    NodeCreate(Guid, NodeType),
    PortCreate(Guid),
    LinkCreate(Guid, PortNum, Guid, PortNum),
    AttrRx(&'a SmpAttr),
    // Addressing
    LidAssign(Guid, Lid, u8),
    // Routing
    RoutingEngineStart(&'a str),
    RoutingEngineDone(&'a str),
    LftEmit(Guid, u16),
    MftEmit(Guid, u16),
    // Election
    SmStateChange(SmState, SmState),
    RemoteSmDiscovered(Guid, SmState),
    Handover(Guid),
    PollRetry(u32),
    // SA plane
    SaRequestRx(u16, u16),
    GroupCreate(Lid),
    GroupDelete(Lid),
    ServiceExpired(u64),
    // Traps
    TrapRx(u16, Lid),
    ReportForward(Lid),
    SubscriptionRemoved(Lid),
    // Drop manager
    EntityDropped(Guid),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart | Debug::InstanceStop => {
                debug!("{}", self);
            }
            Debug::SweepStart(heavy) => {
                debug_span!("sweep").in_scope(|| {
                    debug!(%heavy, "{}", self);
                });
            }
            Debug::SweepPhaseChange(old, new) => {
                debug_span!("sweep").in_scope(|| {
                    debug!(?old, ?new, "{}", self);
                });
            }
            Debug::SweepAborted(timeouts) => {
                debug_span!("sweep").in_scope(|| {
                    debug!(%timeouts, "{}", self);
                });
            }
            Debug::SubnetUp => {
                debug!("{}", self);
            }
            Debug::NodeCreate(guid, node_type) => {
                debug_span!("discovery").in_scope(|| {
                    debug!(%guid, %node_type, "{}", self);
                });
            }
            Debug::PortCreate(guid) => {
                debug_span!("discovery").in_scope(|| {
                    debug!(%guid, "{}", self);
                });
            }
            Debug::LinkCreate(guid_a, port_a, guid_b, port_b) => {
                debug_span!("discovery").in_scope(|| {
                    debug!(%guid_a, %port_a, %guid_b, %port_b, "{}", self);
                });
            }
            Debug::AttrRx(attr) => {
                debug_span!("discovery").in_scope(|| {
                    let data = serde_json::to_string(&attr).unwrap();
                    debug!(%data, "{}", self);
                });
            }
            Debug::LidAssign(guid, lid, lmc) => {
                debug!(%guid, %lid, %lmc, "{}", self);
            }
            Debug::RoutingEngineStart(name)
            | Debug::RoutingEngineDone(name) => {
                debug_span!("routing").in_scope(|| {
                    debug!(%name, "{}", self);
                });
            }
            Debug::LftEmit(guid, block) | Debug::MftEmit(guid, block) => {
                debug_span!("routing").in_scope(|| {
                    debug!(%guid, %block, "{}", self);
                });
            }
            Debug::SmStateChange(old, new) => {
                debug_span!("election").in_scope(|| {
                    debug!(?old, ?new, "{}", self);
                });
            }
            Debug::RemoteSmDiscovered(guid, state) => {
                debug_span!("election").in_scope(|| {
                    debug!(%guid, ?state, "{}", self);
                });
            }
            Debug::Handover(guid) => {
                debug_span!("election").in_scope(|| {
                    debug!(%guid, "{}", self);
                });
            }
            Debug::PollRetry(retry) => {
                debug_span!("election").in_scope(|| {
                    debug!(%retry, "{}", self);
                });
            }
            Debug::SaRequestRx(attr_id, status) => {
                debug_span!("sa").in_scope(|| {
                    debug!(attr_id = %format_args!("{:#06x}", attr_id), %status, "{}", self);
                });
            }
            Debug::GroupCreate(mlid) | Debug::GroupDelete(mlid) => {
                debug_span!("sa").in_scope(|| {
                    debug!(mlid = %format_args!("{:#06x}", mlid), "{}", self);
                });
            }
            Debug::ServiceExpired(service_id) => {
                debug_span!("sa").in_scope(|| {
                    debug!(%service_id, "{}", self);
                });
            }
            Debug::TrapRx(trap_num, lid) => {
                debug_span!("trap").in_scope(|| {
                    debug!(%trap_num, %lid, "{}", self);
                });
            }
            Debug::ReportForward(lid) | Debug::SubscriptionRemoved(lid) => {
                debug_span!("trap").in_scope(|| {
                    debug!(%lid, "{}", self);
                });
            }
            Debug::EntityDropped(guid) => {
                debug!(%guid, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceStart => {
                write!(f, "instance starting")
            }
            Debug::InstanceStop => {
                write!(f, "instance stopping")
            }
            Debug::SweepStart(..) => {
                write!(f, "sweep starting")
            }
            Debug::SweepPhaseChange(..) => {
                write!(f, "sweep phase change")
            }
            Debug::SweepAborted(..) => {
                write!(f, "sweep aborted on timeout burst")
            }
            Debug::SubnetUp => {
                write!(f, "SUBNET UP")
            }
            Debug::NodeCreate(..) => {
                write!(f, "new node discovered")
            }
            Debug::PortCreate(..) => {
                write!(f, "new endport discovered")
            }
            Debug::LinkCreate(..) => {
                write!(f, "link established")
            }
            Debug::AttrRx(..) => {
                write!(f, "attribute received")
            }
            Debug::LidAssign(..) => {
                write!(f, "LID range assigned")
            }
            Debug::RoutingEngineStart(..) => {
                write!(f, "routing engine starting")
            }
            Debug::RoutingEngineDone(..) => {
                write!(f, "routing engine finished")
            }
            Debug::LftEmit(..) => {
                write!(f, "LFT block written")
            }
            Debug::MftEmit(..) => {
                write!(f, "MFT block written")
            }
            Debug::SmStateChange(..) => {
                write!(f, "SM state change")
            }
            Debug::RemoteSmDiscovered(..) => {
                write!(f, "remote SM discovered")
            }
            Debug::Handover(..) => {
                write!(f, "mastership handover")
            }
            Debug::PollRetry(..) => {
                write!(f, "master poll retry")
            }
            Debug::SaRequestRx(..) => {
                write!(f, "SA request")
            }
            Debug::GroupCreate(..) => {
                write!(f, "multicast group created")
            }
            Debug::GroupDelete(..) => {
                write!(f, "multicast group deleted")
            }
            Debug::ServiceExpired(..) => {
                write!(f, "service record lease expired")
            }
            Debug::TrapRx(..) => {
                write!(f, "trap received")
            }
            Debug::ReportForward(..) => {
                write!(f, "report forwarded to subscriber")
            }
            Debug::SubscriptionRemoved(..) => {
                write!(f, "stale subscription removed")
            }
            Debug::EntityDropped(..) => {
                write!(f, "stale entity dropped")
            }
        }
    }
}
