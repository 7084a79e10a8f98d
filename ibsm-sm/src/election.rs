//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use ibsm_utils::ib::{DrPath, Guid, PortNum};
use ibsm_utils::task::IntervalTask;

use crate::collections::NodeIndex;
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::SmUpView;
use crate::packet::smp::{
    ATTR_SM_INFO, SmInfo, SmInfoControl, SmState, SmpAttr,
};
use crate::packet::{
    MAD_STATUS_INVALID_FIELD, MAD_STATUS_OK, Mad, MadBody, Method,
};
use crate::pacer::MadContext;
use crate::subnet::RemoteSm;
use crate::transport::MadAddr;
use crate::{discovery, state_mgr, tasks};

// Election bookkeeping outside the subnet model.
#[derive(Debug, Default)]
pub struct ElectionState {
    // The master being polled while in Standby.
    pub polling_sm: Option<Guid>,
    pub retry_number: u32,
    pub poll_task: Option<IntervalTask>,
}

// ===== global functions =====

// The local SMInfo image.
pub(crate) fn local_sm_info(sm: &SmUpView<'_>) -> SmInfo {
    SmInfo {
        guid: sm.subnet.sm_port_guid,
        sm_key: sm.config.sm_key,
        act_count: sm.subnet.act_count,
        priority: sm.config.sm_priority,
        state: sm.subnet.sm_state,
    }
}

fn set_state(sm: &mut SmUpView<'_>, new_state: SmState) {
    if sm.subnet.sm_state != new_state {
        Debug::SmStateChange(sm.subnet.sm_state, new_state).log();
        sm.subnet.sm_state = new_state;
    }
}

// Election rule: higher priority wins; equal priority, lower GUID wins.
fn beats(a: (u8, Guid), b: (u8, Guid)) -> bool {
    a.0 > b.0 || (a.0 == b.0 && a.1 < b.1)
}

// ===== outgoing SMInfo traffic =====

// Queries the SM advertised behind a discovered port.
pub(crate) fn query_remote_sm(
    sm: &mut SmUpView<'_>,
    node_idx: NodeIndex,
    port_num: PortNum,
    port_guid: Guid,
) {
    let Some(physp) = sm.subnet.nodes[node_idx].physp(port_num) else {
        return;
    };
    let path = physp.dr_path.clone();
    send_sminfo_get(sm, port_guid, &path);
}

fn send_sminfo_get(sm: &mut SmUpView<'_>, remote_guid: Guid, path: &DrPath) {
    discovery::send_dr_get(
        sm,
        ATTR_SM_INFO,
        0,
        path,
        MadContext::SmInfo {
            remote_guid,
            control: None,
        },
    );
}

fn send_sminfo_set(
    sm: &mut SmUpView<'_>,
    remote_guid: Guid,
    control: SmInfoControl,
) {
    let Some(remote) = sm.subnet.remote_sms.get(&remote_guid) else {
        return;
    };
    let path = remote.dr_path.clone();
    let info = local_sm_info(sm);
    let mad = discovery::dr_request(
        sm,
        Method::Set,
        ATTR_SM_INFO,
        control as u32,
        &path,
        Some(SmpAttr::SmInfo(info)),
    );
    sm.pacer.send(
        mad,
        MadAddr::Dr(path),
        MadContext::SmInfo {
            remote_guid,
            control: Some(control),
        },
    );
}

// ===== response processing =====

pub(crate) fn process_sminfo_response(
    sm: &mut SmUpView<'_>,
    remote_guid: Guid,
    control: Option<SmInfoControl>,
    mad: Mad,
) -> Result<(), Error> {
    let MadBody::Smp(smp) = mad.body else {
        return Err(Error::InternalError("non-SMP SMInfo completion"));
    };
    let Some(SmpAttr::SmInfo(info)) = smp.attr else {
        return Err(Error::InternalError("SMInfo completion without payload"));
    };

    // A zero key is accepted; any other mismatch disqualifies the peer.
    if info.sm_key != 0
        && sm.config.sm_key != 0
        && info.sm_key != sm.config.sm_key
    {
        return Err(Error::InvalidSmKey(remote_guid));
    }

    // Handover acknowledged: we relinquish mastership.
    if control == Some(SmInfoControl::Handover) {
        set_state(sm, SmState::Standby);
        start_polling(sm, remote_guid);
        return Ok(());
    }

    let dr_path = sm
        .subnet
        .ports
        .get_by_guid(remote_guid)
        .and_then(|(_, port)| sm.subnet.port_physp(port))
        .map(|physp| physp.dr_path.clone());

    let lid = sm
        .subnet
        .ports
        .get_by_guid(remote_guid)
        .map(|(_, port)| port.base_lid)
        .unwrap_or(0);

    let remote =
        sm.subnet.remote_sms.entry(remote_guid).or_insert_with(|| {
            Debug::RemoteSmDiscovered(remote_guid, info.state).log();
            RemoteSm {
                port_guid: remote_guid,
                lid: 0,
                dr_path: DrPath::local(),
                sm_info: info.clone(),
                failed_polls: 0,
                discovery_count: 0,
            }
        });
    remote.sm_info = info;
    remote.lid = lid;
    if let Some(dr_path) = dr_path {
        remote.dr_path = dr_path;
    }
    remote.discovery_count += 1;
    remote.failed_polls = 0;

    // A successful poll of the master resets the retry counter.
    if sm.election.polling_sm == Some(remote_guid) {
        sm.election.retry_number = 0;
    }

    // A Master that sees a strictly better alive SM hands over.
    if sm.subnet.sm_state == SmState::Master {
        let ours = (sm.config.sm_priority, sm.subnet.sm_port_guid);
        let remote = sm.subnet.remote_sms.get(&remote_guid).unwrap();
        let theirs = (remote.sm_info.priority, remote_guid);
        if remote.sm_info.state != SmState::NotActive && beats(theirs, ours) {
            Debug::Handover(remote_guid).log();
            send_sminfo_set(sm, remote_guid, SmInfoControl::Handover);
        }
    }

    Ok(())
}

// ===== election decision =====

// Runs after discovery quiesces: pick Master or Standby.
pub(crate) fn decide(sm: &mut SmUpView<'_>) {
    let ours = (sm.config.sm_priority, sm.subnet.sm_port_guid);
    let best_remote = sm
        .subnet
        .remote_sms
        .values()
        .filter(|remote| remote.discovery_count > 0)
        .filter(|remote| remote.sm_info.state != SmState::NotActive)
        .map(|remote| (remote.sm_info.priority, remote.port_guid))
        .max_by(|a, b| {
            if beats(*a, *b) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Less
            }
        });

    match best_remote {
        Some(theirs) if beats(theirs, ours) => {
            if sm.subnet.sm_state == SmState::Master {
                Debug::Handover(theirs.1).log();
                send_sminfo_set(sm, theirs.1, SmInfoControl::Handover);
            }
            set_state(sm, SmState::Standby);
            start_polling(sm, theirs.1);
        }
        _ => {
            if sm.subnet.sm_state != SmState::Master {
                sm.subnet.first_time_master_sweep = true;
                set_state(sm, SmState::Master);
            }
            stop_polling(sm);
        }
    }
}

// ===== standby polling =====

fn start_polling(sm: &mut SmUpView<'_>, master_guid: Guid) {
    sm.election.polling_sm = Some(master_guid);
    sm.election.retry_number = 0;
    let interval =
        Duration::from_millis(sm.config.sminfo_polling_timeout.into());
    sm.election.poll_task = Some(tasks::sminfo_poll_timer(
        interval,
        &sm.tx.sminfo_poll,
    ));
}

fn stop_polling(sm: &mut SmUpView<'_>) {
    sm.election.polling_sm = None;
    sm.election.retry_number = 0;
    sm.election.poll_task = None;
}

// Periodic poll of the master while in Standby.
pub(crate) fn process_poll_tick(sm: &mut SmUpView<'_>) {
    if sm.subnet.sm_state != SmState::Standby {
        return;
    }
    let Some(master_guid) = sm.election.polling_sm else {
        return;
    };
    let Some(remote) = sm.subnet.remote_sms.get(&master_guid) else {
        return;
    };
    let path = remote.dr_path.clone();
    send_sminfo_get(sm, master_guid, &path);
}

// A poll transaction timed out (after the pacer's own retries).
pub(crate) fn process_poll_timeout(sm: &mut SmUpView<'_>, remote_guid: Guid) {
    if let Some(remote) = sm.subnet.remote_sms.get_mut(&remote_guid) {
        remote.failed_polls += 1;
    }
    if sm.election.polling_sm != Some(remote_guid) {
        return;
    }

    sm.election.retry_number += 1;
    Debug::PollRetry(sm.election.retry_number).log();
    if sm.election.retry_number >= sm.config.polling_retry_number {
        // The master is gone: rediscover and re-elect.
        stop_polling(sm);
        set_state(sm, SmState::Discovering);
        sm.subnet.force_heavy_sweep = true;
        state_mgr::request_sweep(sm, true);
    }
}

// ===== SMInfo receivers (requests from peers) =====

// SMInfo Get: answer with the local image.
pub(crate) fn process_sminfo_get(sm: &mut SmUpView<'_>, mad: &Mad) {
    let info = local_sm_info(sm);
    respond_sminfo(sm, mad, MAD_STATUS_OK, info);
}

// SMInfo Set: control requests from peer SMs, validated against the
// requester's advertised state.
pub(crate) fn process_sminfo_set(sm: &mut SmUpView<'_>, mad: &Mad) {
    use num_traits::FromPrimitive;

    let MadBody::Smp(smp) = &mad.body else {
        return;
    };
    let Some(SmpAttr::SmInfo(requester)) = &smp.attr else {
        return;
    };

    // The subnet-wide SM key must match or be zero; otherwise answer with
    // a zeroed key and refuse authoritative operations.
    if requester.sm_key != 0
        && sm.config.sm_key != 0
        && requester.sm_key != sm.config.sm_key
    {
        Error::InvalidSmKey(requester.guid).log();
        let mut info = local_sm_info(sm);
        info.sm_key = 0;
        respond_sminfo(sm, mad, MAD_STATUS_INVALID_FIELD, info);
        return;
    }

    let control = SmInfoControl::from_u32(mad.hdr.attr_mod);
    let valid = match control {
        // ACKNOWLEDGE may only originate from a Standby SM.
        Some(SmInfoControl::Acknowledge) => {
            requester.state == SmState::Standby
        }
        // The remaining controls only originate from a Master SM.
        Some(
            SmInfoControl::Handover
            | SmInfoControl::Disable
            | SmInfoControl::Standby
            | SmInfoControl::Discover,
        ) => requester.state == SmState::Master,
        None => false,
    };
    if !valid {
        Error::InvalidSmInfoSet("disposition/state mismatch").log();
        respond_sminfo(
            sm,
            mad,
            MAD_STATUS_INVALID_FIELD,
            local_sm_info(sm),
        );
        return;
    }

    match control.unwrap() {
        SmInfoControl::Acknowledge => (),
        SmInfoControl::Disable => {
            set_state(sm, SmState::NotActive);
            stop_polling(sm);
        }
        SmInfoControl::Standby => {
            set_state(sm, SmState::Standby);
            start_polling(sm, requester.guid);
        }
        SmInfoControl::Discover => {
            set_state(sm, SmState::Discovering);
            state_mgr::request_sweep(sm, true);
        }
        SmInfoControl::Handover => {
            // Mastership received.
            set_state(sm, SmState::Master);
            sm.subnet.first_time_master_sweep = true;
            sm.subnet.force_heavy_sweep = true;
            stop_polling(sm);
            state_mgr::request_sweep(sm, true);
        }
    }

    respond_sminfo(sm, mad, MAD_STATUS_OK, local_sm_info(sm));
}

fn respond_sminfo(
    sm: &mut SmUpView<'_>,
    request: &Mad,
    status: u16,
    info: SmInfo,
) {
    let MadBody::Smp(req_smp) = &request.body else {
        return;
    };
    let hdr = request.hdr.response(status);
    let dest = match &req_smp.dr {
        Some(dr) => MadAddr::Dr(dr.initial_path.clone()),
        None => MadAddr::Lid(0),
    };
    let mad = Mad {
        hdr,
        body: MadBody::Smp(crate::packet::smp::Smp {
            m_key: req_smp.m_key,
            dr: req_smp.dr.clone(),
            attr: Some(SmpAttr::SmInfo(info)),
        }),
    };
    sm.pacer.send_response(mad, dest);
}
