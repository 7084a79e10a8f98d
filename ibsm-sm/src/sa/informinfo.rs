//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use crate::instance::SmUpView;
use crate::packet::SaStatus;
use crate::packet::sa::{
    InformInfo, InformInfoRecord, InformInfoRecordMask, SaAttr,
};
use crate::sa::{Requester, SaResult};
use crate::subnet::InformEntry;

// ===== Set (subscribe / unsubscribe) =====

pub(crate) fn set(
    sm: &mut SmUpView<'_>,
    requester: &Requester,
    template: Option<&SaAttr>,
) -> SaResult {
    let Some(SaAttr::InformInfo(request)) = template else {
        return Err(SaStatus::ReqInvalid);
    };

    // The subscriber identity: the InformInfo GID when given, otherwise
    // the requester itself.
    let subscriber_gid = if request.gid.is_zero() {
        requester.gid
    } else {
        request.gid
    };

    // Subscribers must resolve on this subnet so reports can be routed
    // back.
    let Some((_, port)) = sm.subnet.port_by_gid(&subscriber_gid) else {
        return Err(SaStatus::ReqInvalid);
    };
    let report_lid = if port.base_lid != 0 {
        port.base_lid
    } else {
        requester.lid
    };

    if request.subscribe {
        // A valid LID range is required unless wildcarded.
        if request.lid_range_begin != 0xFFFF
            && request.lid_range_begin > request.lid_range_end
        {
            return Err(SaStatus::ReqInvalid);
        }

        let subscriber_enum = sm
            .subnet
            .informs
            .keys()
            .filter(|(gid, _)| *gid == subscriber_gid)
            .map(|(_, subscriber_enum)| subscriber_enum + 1)
            .max()
            .unwrap_or(0);
        let record = InformInfoRecord {
            subscriber_gid,
            subscriber_enum,
            inform: request.clone(),
        };
        sm.subnet.informs.insert(
            (subscriber_gid, subscriber_enum),
            InformEntry { record, report_lid },
        );
    } else {
        // Unsubscribe: remove the matching subscriptions.
        let stale: Vec<_> = sm
            .subnet
            .informs
            .iter()
            .filter(|((gid, _), entry)| {
                *gid == subscriber_gid
                    && entry.record.inform.trap_type == request.trap_type
                    && entry.record.inform.trap_num == request.trap_num
            })
            .map(|(rid, _)| *rid)
            .collect();
        if stale.is_empty() {
            return Err(SaStatus::NoRecords);
        }
        for rid in stale {
            sm.subnet.informs.remove(&rid);
        }
    }

    // The response echoes the request with subscribe confirmed.
    let mut confirmed = request.clone();
    confirmed.gid = subscriber_gid;
    Ok(vec![SaAttr::InformInfo(confirmed)])
}

// ===== InformInfoRecord GetTable =====

// Lists stored subscriptions, scoped to requesters sharing a partition
// with the subscriber.
pub(crate) fn get_table(
    sm: &mut SmUpView<'_>,
    requester: &Requester,
    comp_mask: u64,
    template: Option<&SaAttr>,
) -> SaResult {
    let mask = InformInfoRecordMask::from_bits_truncate(comp_mask);
    let default = InformInfoRecord {
        subscriber_gid: Default::default(),
        subscriber_enum: 0,
        inform: InformInfo::default(),
    };
    let template = match template {
        Some(SaAttr::InformInfoRecord(record)) => record,
        _ => &default,
    };

    let mut records = vec![];
    for entry in sm.subnet.informs.values() {
        let record = &entry.record;
        if mask.contains(InformInfoRecordMask::SUBSCRIBER_GID)
            && template.subscriber_gid != record.subscriber_gid
        {
            continue;
        }
        if mask.contains(InformInfoRecordMask::SUBSCRIBER_ENUM)
            && template.subscriber_enum != record.subscriber_enum
        {
            continue;
        }
        // P_Key scoping against the subscriber port.
        let visible = match (
            requester.port_idx,
            sm.subnet.port_by_gid(&record.subscriber_gid),
        ) {
            (Some(req_idx), Some((_, sub_port))) => sm
                .subnet
                .ports_share_pkey(&sm.subnet.ports[req_idx], sub_port)
                .unwrap_or(false),
            _ => requester.trusted,
        };
        if !visible {
            continue;
        }
        records.push(SaAttr::InformInfoRecord(record.clone()));
    }
    Ok(records)
}
