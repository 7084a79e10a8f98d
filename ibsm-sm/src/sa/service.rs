//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::{Duration, Instant};

use crate::debug::Debug;
use crate::instance::SmUpView;
use crate::packet::SaStatus;
use crate::packet::sa::{
    SERVICE_LEASE_INFINITE, SaAttr, ServiceRecord, ServiceRecordMask,
};
use crate::sa::{Requester, SaResult};
use crate::subnet::ServiceEntry;

// ===== Get/GetTable =====

// ServiceRecord queries. Records with a non-zero P_Key are only visible
// to requesters carrying it; the service key is hidden from untrusted
// requesters.
pub(crate) fn get(
    sm: &mut SmUpView<'_>,
    requester: &Requester,
    comp_mask: u64,
    template: Option<&SaAttr>,
) -> SaResult {
    let mask = ServiceRecordMask::from_bits_truncate(comp_mask);
    let default = empty_record();
    let template = match template {
        Some(SaAttr::ServiceRecord(record)) => record,
        _ => &default,
    };

    let mut records = vec![];
    for entry in sm.subnet.services.values() {
        let record = &entry.record;
        if !matches(&mask, template, record) {
            continue;
        }
        if !pkey_scope_ok(sm, requester, record) {
            continue;
        }
        let mut record = record.clone();
        if !requester.trusted {
            record.service_key = [0; 16];
        }
        records.push(SaAttr::ServiceRecord(record));
    }
    Ok(records)
}

fn matches(
    mask: &ServiceRecordMask,
    template: &ServiceRecord,
    record: &ServiceRecord,
) -> bool {
    if mask.contains(ServiceRecordMask::SERVICE_ID)
        && template.service_id != record.service_id
    {
        return false;
    }
    if mask.contains(ServiceRecordMask::SERVICE_GID)
        && template.service_gid != record.service_gid
    {
        return false;
    }
    if mask.contains(ServiceRecordMask::SERVICE_PKEY)
        && template.service_pkey.base() != record.service_pkey.base()
    {
        return false;
    }
    if mask.contains(ServiceRecordMask::SERVICE_LEASE)
        && template.service_lease != record.service_lease
    {
        return false;
    }
    if mask.contains(ServiceRecordMask::SERVICE_KEY)
        && template.service_key != record.service_key
    {
        return false;
    }
    if mask.contains(ServiceRecordMask::SERVICE_NAME)
        && template.service_name != record.service_name
    {
        return false;
    }
    true
}

// A non-zero service P_Key must be carried by the requester and, when it
// resolves on the subnet, by the service GID's port.
fn pkey_scope_ok(
    sm: &SmUpView<'_>,
    requester: &Requester,
    record: &ServiceRecord,
) -> bool {
    if record.service_pkey.is_zero() {
        return true;
    }
    let requester_ok = match requester.port_idx {
        Some(port_idx) => {
            let port = &sm.subnet.ports[port_idx];
            sm.subnet.port_has_pkey(port, record.service_pkey)
        }
        None => requester.trusted,
    };
    if !requester_ok {
        return false;
    }
    if let Some((_, service_port)) =
        sm.subnet.port_by_gid(&record.service_gid)
        && !sm.subnet.port_has_pkey(service_port, record.service_pkey)
    {
        return false;
    }
    true
}

// ===== Set =====

pub(crate) fn set(
    sm: &mut SmUpView<'_>,
    requester: &Requester,
    comp_mask: u64,
    template: Option<&SaAttr>,
) -> SaResult {
    let mask = ServiceRecordMask::from_bits_truncate(comp_mask);
    let Some(SaAttr::ServiceRecord(request)) = template else {
        return Err(SaStatus::ReqInvalid);
    };

    // The RID components are mandatory.
    if !mask.contains(
        ServiceRecordMask::SERVICE_ID
            | ServiceRecordMask::SERVICE_GID
            | ServiceRecordMask::SERVICE_PKEY,
    ) {
        return Err(SaStatus::InsufficientComponents);
    }
    if !pkey_scope_ok(sm, requester, request) {
        return Err(SaStatus::ReqInvalid);
    }

    let mut record = request.clone();
    // An omitted lease means indefinite.
    if !mask.contains(ServiceRecordMask::SERVICE_LEASE) {
        record.service_lease = SERVICE_LEASE_INFINITE;
    }
    let expires = (record.service_lease != SERVICE_LEASE_INFINITE).then(|| {
        Instant::now() + Duration::from_secs(record.service_lease.into())
    });

    let rid = (
        record.service_id,
        record.service_gid,
        record.service_pkey.base(),
    );
    sm.subnet.services.insert(
        rid,
        ServiceEntry {
            record: record.clone(),
            expires,
        },
    );

    if !requester.trusted {
        record.service_key = [0; 16];
    }
    Ok(vec![SaAttr::ServiceRecord(record)])
}

// ===== Delete =====

pub(crate) fn delete(
    sm: &mut SmUpView<'_>,
    requester: &Requester,
    comp_mask: u64,
    template: Option<&SaAttr>,
) -> SaResult {
    let mask = ServiceRecordMask::from_bits_truncate(comp_mask);
    let Some(SaAttr::ServiceRecord(request)) = template else {
        return Err(SaStatus::ReqInvalid);
    };
    if !mask.contains(
        ServiceRecordMask::SERVICE_ID
            | ServiceRecordMask::SERVICE_GID
            | ServiceRecordMask::SERVICE_PKEY,
    ) {
        return Err(SaStatus::InsufficientComponents);
    }

    let rid = (
        request.service_id,
        request.service_gid,
        request.service_pkey.base(),
    );
    let Some(entry) = sm.subnet.services.get(&rid) else {
        return Err(SaStatus::NoRecords);
    };
    if !pkey_scope_ok(sm, requester, &entry.record) {
        return Err(SaStatus::ReqInvalid);
    }

    let entry = sm.subnet.services.remove(&rid).unwrap();
    let mut record = entry.record;
    if !requester.trusted {
        record.service_key = [0; 16];
    }
    Ok(vec![SaAttr::ServiceRecord(record)])
}

// ===== lease expiry =====

// Trims service records whose finite lease ran out. Driven by the
// periodic lease sweep task.
pub(crate) fn expire_leases(sm: &mut SmUpView<'_>) {
    let now = Instant::now();
    let expired: Vec<_> = sm
        .subnet
        .services
        .iter()
        .filter(|(_, entry)| {
            entry.expires.is_some_and(|deadline| deadline <= now)
        })
        .map(|(rid, _)| *rid)
        .collect();
    for rid in expired {
        Debug::ServiceExpired(rid.0).log();
        sm.subnet.services.remove(&rid);
    }
}

fn empty_record() -> ServiceRecord {
    ServiceRecord {
        service_id: 0,
        service_gid: Default::default(),
        service_pkey: Default::default(),
        service_lease: 0,
        service_key: [0; 16],
        service_name: String::new(),
    }
}
