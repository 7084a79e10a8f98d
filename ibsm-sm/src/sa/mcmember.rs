//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_utils::ib::{Gid, Mtu, Pkey, Rate, Selector};
use num_traits::FromPrimitive;

use crate::debug::Debug;
use crate::group::{McGroup, McGroupMember};
use crate::instance::SmUpView;
use crate::mcast;
use crate::packet::SaStatus;
use crate::packet::sa::{
    JoinState, McMemberRecord, McMemberRecordMask, SaAttr,
};
use crate::sa::{Requester, SaResult};

// Multicast scope for SA-synthesized MGIDs when none was requested.
const MC_SCOPE_LINK_LOCAL: u8 = 0x02;

// ===== Get/GetTable =====

// MCMemberRecord queries. Requesters only see groups they share a P_Key
// with; untrusted requesters get the member identity fields zeroed.
pub(crate) fn get(
    sm: &mut SmUpView<'_>,
    requester: &Requester,
    comp_mask: u64,
    template: Option<&SaAttr>,
) -> SaResult {
    let mask = McMemberRecordMask::from_bits_truncate(comp_mask);
    let default = McMemberRecord::default();
    let template = match template {
        Some(SaAttr::McMemberRecord(record)) => record,
        _ => &default,
    };

    let mut records = vec![];
    for group in sm.subnet.groups.iter() {
        // P_Key scoping.
        if !requester_in_pkey(sm, requester, group.pkey) {
            continue;
        }
        if !group_matches(&mask, template, group) {
            continue;
        }

        if mask.contains(McMemberRecordMask::PORT_GID) {
            let Some(member) = group.members.get(&template.port_gid) else {
                continue;
            };
            records.push(render(group, Some(member), requester.trusted));
        } else if group.members.is_empty() {
            records.push(render(group, None, requester.trusted));
        } else {
            for member in group.members.values() {
                records.push(render(group, Some(member), requester.trusted));
            }
        }
    }
    Ok(records)
}

// Whether the requester's endport carries the given partition key.
fn requester_in_pkey(
    sm: &crate::instance::SmUpView<'_>,
    requester: &Requester,
    pkey: Pkey,
) -> bool {
    match requester.port_idx {
        Some(port_idx) => {
            let port = &sm.subnet.ports[port_idx];
            sm.subnet.port_has_pkey(port, pkey)
        }
        None => requester.trusted,
    }
}

fn render(
    group: &McGroup,
    member: Option<&McGroupMember>,
    trusted: bool,
) -> SaAttr {
    let mut record = group.to_record(member);
    if !trusted {
        // Member identity is hidden from untrusted requesters.
        record.port_gid = Gid::ZERO;
        record.join_state = JoinState::empty();
        record.proxy_join = false;
    }
    SaAttr::McMemberRecord(record)
}

fn group_matches(
    mask: &McMemberRecordMask,
    template: &McMemberRecord,
    group: &McGroup,
) -> bool {
    if mask.contains(McMemberRecordMask::MGID) && template.mgid != group.mgid
    {
        return false;
    }
    if mask.contains(McMemberRecordMask::MLID) && template.mlid != group.mlid
    {
        return false;
    }
    if mask.contains(McMemberRecordMask::QKEY) && template.qkey != group.qkey
    {
        return false;
    }
    if mask.contains(McMemberRecordMask::PKEY)
        && template.pkey.base() != group.pkey.base()
    {
        return false;
    }
    if mask.contains(McMemberRecordMask::MTU) {
        let selector = if mask.contains(McMemberRecordMask::MTU_SELECTOR) {
            template.mtu_selector
        } else {
            Selector::Exactly
        };
        if !selector.satisfied_by(template.mtu, group.mtu) {
            return false;
        }
    }
    if mask.contains(McMemberRecordMask::RATE) {
        let selector = if mask.contains(McMemberRecordMask::RATE_SELECTOR) {
            template.rate_selector
        } else {
            Selector::Exactly
        };
        if !selector.satisfied_by(template.rate, group.rate) {
            return false;
        }
    }
    if mask.contains(McMemberRecordMask::SL) && template.sl != group.sl {
        return false;
    }
    if mask.contains(McMemberRecordMask::SCOPE)
        && template.scope != group.scope
    {
        return false;
    }
    true
}

// ===== Set (join / create) =====

pub(crate) fn set(
    sm: &mut SmUpView<'_>,
    requester: &Requester,
    comp_mask: u64,
    template: Option<&SaAttr>,
) -> SaResult {
    let mask = McMemberRecordMask::from_bits_truncate(comp_mask);
    let Some(SaAttr::McMemberRecord(request)) = template else {
        return Err(SaStatus::ReqInvalid);
    };

    // RID components of a join.
    if !mask
        .contains(McMemberRecordMask::PORT_GID | McMemberRecordMask::JOIN_STATE)
    {
        return Err(SaStatus::InsufficientComponents);
    }
    // A join with no JoinState bits is meaningless and rejected.
    if request.join_state.is_empty() {
        return Err(SaStatus::ReqInvalid);
    }

    // The joining port must exist on this subnet.
    let Some((_, port)) = sm.subnet.port_by_gid(&request.port_gid) else {
        return Err(SaStatus::InvalidGid);
    };
    let port_guid = port.guid;

    // Proxy joins: the requester acts for another port and must share a
    // partition with it.
    let proxy_join = requester.gid != request.port_gid;
    if proxy_join {
        let Some(req_port_idx) = requester.port_idx else {
            return Err(SaStatus::ReqInvalid);
        };
        let req_port = &sm.subnet.ports[req_port_idx];
        let joined = sm.subnet.ports.get_by_guid(port_guid).unwrap().1;
        if !sm
            .subnet
            .ports_share_pkey(req_port, joined)
            .unwrap_or(false)
        {
            return Err(SaStatus::ReqInvalid);
        }
    }

    let zero_mgid = request.mgid.is_zero();
    let existing_mlid = if zero_mgid {
        None
    } else {
        sm.subnet.groups.get_by_mgid(&request.mgid).map(|g| g.mlid)
    };

    let mlid = match existing_mlid {
        Some(mlid) => join_existing(sm, &mask, request, mlid, port_guid)?,
        None => create_group(sm, &mask, request, zero_mgid, port_guid)?,
    };

    // Record the membership.
    let group = sm.subnet.groups.get_mut_by_mlid(mlid).unwrap();
    let member = group
        .members
        .entry(request.port_gid)
        .or_insert_with(|| McGroupMember {
            port_gid: request.port_gid,
            join_state: JoinState::empty(),
            proxy_join,
        });
    member.join_state |= request.join_state;

    let record = group.to_record(group.members.get(&request.port_gid));

    // Route the group and program the affected MFTs right away.
    mcast::build_group_tree(sm.subnet, mlid);
    mcast::emit_group(sm, mlid);

    Ok(vec![SaAttr::McMemberRecord(record)])
}

// Validates a join against an existing group's realized parameters.
fn join_existing(
    sm: &mut SmUpView<'_>,
    mask: &McMemberRecordMask,
    request: &McMemberRecord,
    mlid: ibsm_utils::ib::Lid,
    port_guid: ibsm_utils::ib::Guid,
) -> Result<ibsm_utils::ib::Lid, SaStatus> {
    let group = sm.subnet.groups.get_by_mlid(mlid).unwrap();

    if mask.contains(McMemberRecordMask::PKEY)
        && request.pkey.base() != group.pkey.base()
    {
        return Err(SaStatus::ReqInvalid);
    }
    if mask.contains(McMemberRecordMask::MTU) {
        let selector = if mask.contains(McMemberRecordMask::MTU_SELECTOR) {
            request.mtu_selector
        } else {
            Selector::Exactly
        };
        if !selector.satisfied_by(request.mtu, group.mtu) {
            return Err(SaStatus::ReqInvalid);
        }
    }
    if mask.contains(McMemberRecordMask::RATE) {
        let selector = if mask.contains(McMemberRecordMask::RATE_SELECTOR) {
            request.rate_selector
        } else {
            Selector::Exactly
        };
        if !selector.satisfied_by(request.rate, group.rate) {
            return Err(SaStatus::ReqInvalid);
        }
    }

    // Every member port must carry the group's partition key.
    let (_, port) = sm.subnet.ports.get_by_guid(port_guid).unwrap();
    if !sm.subnet.port_has_pkey(port, group.pkey) {
        return Err(SaStatus::ReqInvalid);
    }

    Ok(mlid)
}

// Creates a new group, synthesizing the MGID when none was given.
fn create_group(
    sm: &mut SmUpView<'_>,
    mask: &McMemberRecordMask,
    request: &McMemberRecord,
    zero_mgid: bool,
    port_guid: ibsm_utils::ib::Guid,
) -> Result<ibsm_utils::ib::Lid, SaStatus> {
    // Group creation requires a full-membership join.
    if !request.join_state.contains(JoinState::FULL) {
        return Err(SaStatus::ReqInvalid);
    }
    if !zero_mgid && !valid_requested_mgid(&request.mgid) {
        return Err(SaStatus::ReqInvalid);
    }

    // Allocate the MLID before it is needed for MGID synthesis.
    let Some(mlid) = sm
        .subnet
        .groups
        .new_mlid(request.mlid, sm.subnet.max_mcast_lid)
    else {
        return Err(SaStatus::NoResources);
    };

    // Realize the requested parameters against the joining port.
    let (_, port) = sm.subnet.ports.get_by_guid(port_guid).unwrap();
    let physp =
        sm.subnet.port_physp(port).ok_or(SaStatus::ReqInvalid)?;
    let pkey = if mask.contains(McMemberRecordMask::PKEY) {
        if !physp.has_pkey(request.pkey) {
            return Err(SaStatus::ReqInvalid);
        }
        request.pkey
    } else {
        physp.pkeys.first().copied().unwrap_or(Pkey(0x7FFF))
    };
    let mtu = realize_mtu(mask, request, physp.info.mtu_cap)
        .ok_or(SaStatus::ReqInvalid)?;
    let rate =
        realize_rate(mask, request, crate::sa::path_record::link_rate(physp))
            .ok_or(SaStatus::ReqInvalid)?;

    let mgid = if zero_mgid {
        synthesize_mgid(sm, mask, request, mlid)
    } else {
        request.mgid
    };

    let mut record = request.clone();
    record.mlid = mlid;
    record.pkey = pkey;
    record.mtu = mtu;
    record.rate = rate;
    if !mask.contains(McMemberRecordMask::SCOPE) {
        record.scope = MC_SCOPE_LINK_LOCAL;
    }

    Debug::GroupCreate(mlid).log();
    let group = McGroup::new(mgid, mlid, &record);
    sm.subnet.groups.insert(group);
    Ok(mlid)
}

// SA-assigned MGIDs carry the 0xA01B signature:
// byte 0 = 0xFF, byte 1 = flags/scope, bytes 2-3 = signature, bytes 4-11
// = subnet prefix, with the MLID stamped twice over the tail.
fn synthesize_mgid(
    sm: &SmUpView<'_>,
    mask: &McMemberRecordMask,
    request: &McMemberRecord,
    mlid: ibsm_utils::ib::Lid,
) -> Gid {
    // Without an explicit scope, link-local guarantees no collision with
    // other subnets.
    let scope = if mask.contains(McMemberRecordMask::SCOPE) {
        request.scope & 0x0F
    } else {
        MC_SCOPE_LINK_LOCAL
    };

    let mut raw = [0u8; 16];
    raw[0] = 0xFF;
    raw[1] = 0x10 | scope;
    raw[2] = 0xA0;
    raw[3] = 0x1B;
    raw[4..12].copy_from_slice(&sm.subnet.subnet_prefix.to_be_bytes());
    raw[10..12].copy_from_slice(&mlid.to_be_bytes());
    raw[12..14].copy_from_slice(&mlid.to_be_bytes());
    Gid(raw)
}

// A requested MGID must be multicast and must not reuse the SA signature
// with link-local scope.
fn valid_requested_mgid(mgid: &Gid) -> bool {
    if !mgid.is_multicast() {
        return false;
    }
    let signature = u16::from_be_bytes([mgid.0[2], mgid.0[3]]);
    if signature == 0xA01B && mgid.mcast_scope() == MC_SCOPE_LINK_LOCAL {
        return false;
    }
    true
}

fn realize_mtu(
    mask: &McMemberRecordMask,
    request: &McMemberRecord,
    cap: Mtu,
) -> Option<Mtu> {
    if !mask.contains(McMemberRecordMask::MTU) {
        return Some(cap);
    }
    let selector = if mask.contains(McMemberRecordMask::MTU_SELECTOR) {
        request.mtu_selector
    } else {
        Selector::Exactly
    };
    match selector {
        Selector::Greater => (cap > request.mtu).then_some(cap),
        Selector::Less => {
            let below = Mtu::from_u8(request.mtu as u8 - 1)?;
            Some(below.min(cap))
        }
        Selector::Exactly => (cap >= request.mtu).then_some(request.mtu),
        Selector::Best => Some(cap),
    }
}

fn realize_rate(
    mask: &McMemberRecordMask,
    request: &McMemberRecord,
    cap: Rate,
) -> Option<Rate> {
    if !mask.contains(McMemberRecordMask::RATE) {
        return Some(cap);
    }
    let selector = if mask.contains(McMemberRecordMask::RATE_SELECTOR) {
        request.rate_selector
    } else {
        Selector::Exactly
    };
    match selector {
        Selector::Greater => {
            (cap.weight() > request.rate.weight()).then_some(cap)
        }
        Selector::Less => crate::sa::path_record::rate_below(request.rate)
            .map(|rate| if rate.weight() < cap.weight() { rate } else { cap }),
        Selector::Exactly => {
            (cap.weight() >= request.rate.weight()).then_some(request.rate)
        }
        Selector::Best => Some(cap),
    }
}

// ===== Delete (leave) =====

pub(crate) fn delete(
    sm: &mut SmUpView<'_>,
    requester: &Requester,
    comp_mask: u64,
    template: Option<&SaAttr>,
) -> SaResult {
    let mask = McMemberRecordMask::from_bits_truncate(comp_mask);
    let Some(SaAttr::McMemberRecord(request)) = template else {
        return Err(SaStatus::ReqInvalid);
    };
    if !mask
        .contains(McMemberRecordMask::PORT_GID | McMemberRecordMask::JOIN_STATE)
    {
        return Err(SaStatus::InsufficientComponents);
    }

    let Some(group) = sm.subnet.groups.get_by_mgid(&request.mgid) else {
        return Err(SaStatus::NoRecords);
    };
    let mlid = group.mlid;
    let Some(member) = group.members.get(&request.port_gid) else {
        return Err(SaStatus::NoRecords);
    };

    // Leave rule: the requested JoinState must overlap the stored bits
    // and must not carry any bit outside them.
    let stored = member.join_state;
    if (request.join_state & stored).is_empty()
        || !stored.contains(request.join_state)
    {
        return Err(SaStatus::ReqInvalid);
    }

    // Proxy rules: a record joined directly may only be modified by its
    // own port; a proxy-joined record by any sharer of its partition.
    if member.proxy_join {
        let Some(req_port_idx) = requester.port_idx else {
            return Err(SaStatus::ReqInvalid);
        };
        let req_port = &sm.subnet.ports[req_port_idx];
        let Some((_, joined)) =
            sm.subnet.ports.get_by_guid(request.port_gid.guid())
        else {
            return Err(SaStatus::ReqInvalid);
        };
        if !sm
            .subnet
            .ports_share_pkey(req_port, joined)
            .unwrap_or(false)
        {
            return Err(SaStatus::ReqInvalid);
        }
    } else if requester.gid != request.port_gid {
        return Err(SaStatus::ReqInvalid);
    }

    let record = {
        let group = sm.subnet.groups.get_by_mlid(mlid).unwrap();
        group.to_record(group.members.get(&request.port_gid))
    };
    mcast::leave_group(sm.subnet, mlid, &request.port_gid, request.join_state);

    // Reroute what remains of the group.
    if sm.subnet.groups.get_by_mlid(mlid).is_some() {
        mcast::build_group_tree(sm.subnet, mlid);
        mcast::emit_group(sm, mlid);
    }

    Ok(vec![SaAttr::McMemberRecord(record)])
}
