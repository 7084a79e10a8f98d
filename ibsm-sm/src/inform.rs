//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_utils::ib::{Gid, Lid};

use crate::debug::Debug;
use crate::instance::SmUpView;
use crate::packet::sa::{ATTR_NOTICE, Rmpp, Sa, SaAttr};
use crate::packet::smp::{
    Notice, NoticeDetails, NoticeType, PRODUCER_TYPE_CLASS_MGR,
    TRAP_CAPABILITY_MASK_CHANGE, TRAP_GID_IN_SERVICE,
    TRAP_LINK_STATE_CHANGE,
};
use crate::packet::{Mad, MadBody, MadHeader, Method, MgmtClass};
use crate::pacer::MadContext;
use crate::state_mgr;
use crate::subnet::InformRid;
use crate::transport::MadAddr;

// Subscription match outcome.
enum MatchResult {
    Match,
    NoMatch,
    // Structural match, but the subscriber does not share a partition
    // with the trap source.
    PkeyFail,
}

// ===== trap input =====

// A trap received from the fabric: forward it to subscribers and re-enter
// discovery for topology-affecting events.
pub(crate) fn process_trap(sm: &mut SmUpView<'_>, notice: Notice) {
    Debug::TrapRx(notice.trap_num, notice.issuer_lid).log();

    if notice.generic
        && (notice.trap_num == TRAP_LINK_STATE_CHANGE
            || notice.trap_num == TRAP_CAPABILITY_MASK_CHANGE)
    {
        // Link state moved under us: re-read the changed entities.
        sm.subnet.force_light_sweep = true;
        state_mgr::request_sweep(sm, false);
    }

    process_notice(sm, notice);
}

// ===== notice fan-out =====

// Matches a notice against every subscription and forwards a Report to
// each subscriber that passes the full conjunction. Subscriptions failing
// the P_Key check are removed unless their LID range is the wildcard.
pub(crate) fn process_notice(sm: &mut SmUpView<'_>, notice: Notice) {
    let mut reports: Vec<(Gid, Lid)> = Vec::new();
    let mut stale: Vec<InformRid> = Vec::new();

    for (rid, entry) in &sm.subnet.informs {
        match matches(sm, entry.report_lid, rid, &notice) {
            MatchResult::Match => {
                reports.push((rid.0, entry.report_lid));
            }
            MatchResult::NoMatch => (),
            MatchResult::PkeyFail => {
                if entry.record.inform.lid_range_begin != 0xFFFF {
                    stale.push(*rid);
                }
            }
        }
    }

    for rid in stale {
        if let Some(entry) = sm.subnet.informs.remove(&rid) {
            Debug::SubscriptionRemoved(entry.report_lid).log();
        }
    }
    for (subscriber_gid, report_lid) in reports {
        send_report(sm, subscriber_gid, report_lid, &notice);
    }
}

fn matches(
    sm: &SmUpView<'_>,
    _report_lid: Lid,
    rid: &InformRid,
    notice: &Notice,
) -> MatchResult {
    let entry = &sm.subnet.informs[rid];
    let inform = &entry.record.inform;

    // LID range, unless wildcarded with 0xFFFF.
    if inform.lid_range_begin != 0xFFFF
        && (notice.issuer_lid < inform.lid_range_begin
            || notice.issuer_lid > inform.lid_range_end)
    {
        return MatchResult::NoMatch;
    }
    // Generic/vendor plane must agree.
    if inform.is_generic != notice.generic {
        return MatchResult::NoMatch;
    }
    // Type, trap number and producer match unless wildcarded.
    if inform.trap_type != 0xFFFF
        && inform.trap_type != notice.notice_type as u16
    {
        return MatchResult::NoMatch;
    }
    if inform.trap_num != 0xFFFF && inform.trap_num != notice.trap_num {
        return MatchResult::NoMatch;
    }
    if inform.producer_or_vendor != 0x00FF_FFFF
        && inform.producer_or_vendor != notice.producer_or_vendor
    {
        return MatchResult::NoMatch;
    }

    // The subscriber must share a partition with the trap source.
    let subscriber = sm
        .subnet
        .port_by_gid(&entry.record.subscriber_gid)
        .map(|(_, port)| port);
    let source = sm
        .subnet
        .ports
        .get_by_lid(notice.issuer_lid)
        .map(|(_, port)| port);
    match (subscriber, source) {
        (Some(subscriber), Some(source)) => {
            if sm
                .subnet
                .ports_share_pkey(subscriber, source)
                .unwrap_or(false)
            {
                MatchResult::Match
            } else {
                MatchResult::PkeyFail
            }
        }
        // An unresolvable source cannot be partition-checked; the
        // notice is forwarded rather than silently lost.
        _ => MatchResult::Match,
    }
}

// Sends a Report carrying the notice verbatim to the subscriber's saved
// address. Delivery failures are logged by the completion path but not
// retried here.
fn send_report(
    sm: &mut SmUpView<'_>,
    subscriber_gid: Gid,
    report_lid: Lid,
    notice: &Notice,
) {
    let mad = Mad {
        hdr: MadHeader::request(
            MgmtClass::SubnAdm,
            Method::Report,
            ATTR_NOTICE,
            0,
            0,
        ),
        body: MadBody::Sa(Sa {
            rmpp: Rmpp::default(),
            sm_key: 0,
            comp_mask: 0,
            records: vec![SaAttr::Notice(notice.clone())],
        }),
    };
    Debug::ReportForward(report_lid).log();
    sm.pacer.send(
        mad,
        MadAddr::Lid(report_lid),
        MadContext::Report { subscriber_gid },
    );
}

pub(crate) fn process_report_timeout(sm: &mut SmUpView<'_>, gid: Gid) {
    let _ = sm;
    tracing::warn!(subscriber = %gid, "report delivery timed out");
}

// ===== SM-sourced traps =====

// Trap 64 for every port first seen while we are master.
pub(crate) fn report_new_ports(sm: &mut SmUpView<'_>) {
    let prefix = sm.subnet.subnet_prefix;
    let new_ports: Vec<Gid> = sm
        .subnet
        .ports
        .iter_mut()
        .filter(|port| port.is_new && port.base_lid != 0)
        .map(|port| {
            port.is_new = false;
            Gid::from_parts(prefix, port.guid)
        })
        .collect();
    for gid in new_ports {
        report_port_change(sm, gid, TRAP_GID_IN_SERVICE);
    }
}

// Issues an SM-sourced port availability trap (64/65) into the inform
// engine. The issuer identifies the SM itself.
pub(crate) fn report_port_change(
    sm: &mut SmUpView<'_>,
    gid: Gid,
    trap_num: u16,
) {
    let notice = Notice {
        generic: true,
        notice_type: NoticeType::SubnetManagement,
        producer_or_vendor: PRODUCER_TYPE_CLASS_MGR,
        trap_num,
        issuer_lid: sm.subnet.sm_base_lid,
        toggle_count: 0,
        details: NoticeDetails::PortChange { gid },
        issuer_gid: Gid::from_parts(
            sm.subnet.subnet_prefix,
            sm.subnet.sm_port_guid,
        ),
    };
    process_notice(sm, notice);
}
