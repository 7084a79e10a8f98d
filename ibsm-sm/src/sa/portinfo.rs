//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use crate::instance::SmUpView;
use crate::packet::sa::{PortInfoRecord, PortInfoRecordMask, SaAttr};
use crate::sa::{Requester, SaResult};

// PortInfoRecord Get/GetTable: one record per endport, ordered by LID.
// The M_Key is zeroed for untrusted requesters.
pub(crate) fn get(
    sm: &mut SmUpView<'_>,
    requester: &Requester,
    comp_mask: u64,
    template: Option<&SaAttr>,
) -> SaResult {
    let mask = PortInfoRecordMask::from_bits_truncate(comp_mask);
    let template = match template {
        Some(SaAttr::PortInfoRecord(record)) => Some(record),
        _ => None,
    };

    let mut records = vec![];
    for port in sm.subnet.ports.iter_by_lid() {
        let Some(physp) = sm.subnet.port_physp(port) else {
            continue;
        };
        let mut record = PortInfoRecord {
            endport_lid: port.base_lid,
            port_num: physp.port_num,
            port_info: physp.info.clone(),
        };
        if !requester.trusted {
            record.port_info.m_key = 0;
        }
        if let Some(template) = template
            && !matches(&mask, template, &record)
        {
            continue;
        }
        records.push(SaAttr::PortInfoRecord(record));
    }
    Ok(records)
}

fn matches(
    mask: &PortInfoRecordMask,
    template: &PortInfoRecord,
    record: &PortInfoRecord,
) -> bool {
    if mask.contains(PortInfoRecordMask::ENDPORT_LID)
        && template.endport_lid != record.endport_lid
    {
        return false;
    }
    if mask.contains(PortInfoRecordMask::PORT_NUM)
        && template.port_num != record.port_num
    {
        return false;
    }
    let t = &template.port_info;
    let r = &record.port_info;
    if mask.contains(PortInfoRecordMask::BASE_LID)
        && t.base_lid != r.base_lid
    {
        return false;
    }
    if mask.contains(PortInfoRecordMask::MASTER_SM_BASE_LID)
        && t.master_sm_base_lid != r.master_sm_base_lid
    {
        return false;
    }
    if mask.contains(PortInfoRecordMask::CAPABILITY_MASK)
        && t.capability_mask != r.capability_mask
    {
        return false;
    }
    if mask.contains(PortInfoRecordMask::LMC) && t.lmc != r.lmc {
        return false;
    }
    if mask.contains(PortInfoRecordMask::PORT_STATE)
        && t.port_state != r.port_state
    {
        return false;
    }
    if mask.contains(PortInfoRecordMask::PHYS_STATE)
        && t.phys_state != r.phys_state
    {
        return false;
    }
    if mask.contains(PortInfoRecordMask::MTU_CAP) && t.mtu_cap != r.mtu_cap {
        return false;
    }
    if mask.contains(PortInfoRecordMask::SUBNET_TIMEOUT)
        && t.subnet_timeout != r.subnet_timeout
    {
        return false;
    }
    true
}
