//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_utils::ib::{Lid, Mtu, Pkey, Rate, Selector};
use num_traits::FromPrimitive;

use crate::collections::PortIndex;
use crate::instance::SmUpView;
use crate::node::PhysPort;
use crate::packet::sa::{PathRecord, PathRecordMask, SaAttr};
use crate::packet::SaStatus;
use crate::sa::{Requester, SaResult};

// PathRecord Get/GetTable.
//
// Source and destination port sets are resolved from the template; every
// surviving (src, dst) pair yields up to NumPath records over the
// LMC-expanded LID combinations, ordered by source then destination LID.
// A path exists only when source, destination and requester share a
// P_Key.
pub(crate) fn get(
    sm: &mut SmUpView<'_>,
    requester: &Requester,
    comp_mask: u64,
    template: Option<&SaAttr>,
) -> SaResult {
    let mask = PathRecordMask::from_bits_truncate(comp_mask);
    let default = PathRecord::default();
    let template = match template {
        Some(SaAttr::PathRecord(record)) => record,
        _ => &default,
    };

    let mut srcs = resolve_ports(
        sm,
        mask.contains(PathRecordMask::SGID).then_some(&template.sgid),
        mask.contains(PathRecordMask::SLID).then_some(template.slid),
    )?;
    let mut dsts = resolve_ports(
        sm,
        mask.contains(PathRecordMask::DGID).then_some(&template.dgid),
        mask.contains(PathRecordMask::DLID).then_some(template.dlid),
    )?;

    // Response ordering: by source LID, then destination LID.
    srcs.sort_by_key(|port_idx| sm.subnet.ports[*port_idx].base_lid);
    dsts.sort_by_key(|port_idx| sm.subnet.ports[*port_idx].base_lid);

    // NumPath is clamped to [1, 127].
    let limit = if mask.contains(PathRecordMask::NUM_PATH) {
        template.num_path.clamp(1, 127) as usize
    } else {
        1
    };

    let mut records = vec![];
    for src_idx in &srcs {
        for dst_idx in &dsts {
            build_pair(
                sm,
                requester,
                &mask,
                template,
                *src_idx,
                *dst_idx,
                limit,
                &mut records,
            )?;
        }
    }
    Ok(records)
}

fn build_pair(
    sm: &SmUpView<'_>,
    requester: &Requester,
    mask: &PathRecordMask,
    template: &PathRecord,
    src_idx: PortIndex,
    dst_idx: PortIndex,
    limit: usize,
    records: &mut Vec<SaAttr>,
) -> Result<(), SaStatus> {
    let src = &sm.subnet.ports[src_idx];
    let dst = &sm.subnet.ports[dst_idx];
    if src.base_lid == 0 || dst.base_lid == 0 {
        return Ok(());
    }
    let Some(src_physp) = sm.subnet.port_physp(src) else {
        return Ok(());
    };
    let Some(dst_physp) = sm.subnet.port_physp(dst) else {
        return Ok(());
    };

    // P_Key scoping: source, destination and requester must share one.
    let Some(pkey) = common_pkey(
        sm,
        requester,
        src_physp,
        dst_physp,
        mask.contains(PathRecordMask::PKEY).then_some(template.pkey),
    ) else {
        return Ok(());
    };

    // Path MTU: the largest value both endpoints can carry.
    let best_mtu = src_physp.info.mtu_cap.min(dst_physp.info.mtu_cap);
    let Some(mtu) = apply_mtu_selector(mask, template, best_mtu) else {
        return Ok(());
    };

    // Path rate from the active link parameters.
    let best_rate = link_rate(src_physp).min(link_rate(dst_physp));
    let Some(rate) = apply_rate_selector(mask, template, best_rate) else {
        return Ok(());
    };

    let Some(pkt_life) =
        apply_life_selector(mask, template, sm.config.packet_life_time)
    else {
        return Ok(());
    };

    // The partition's configured service level.
    let sl = sm
        .subnet
        .partitions
        .get(&pkey.base())
        .map(|partition| partition.sl)
        .unwrap_or(0);
    if mask.contains(PathRecordMask::SL) && template.sl != sl {
        return Ok(());
    }

    let prefix = sm.subnet.subnet_prefix;
    let (src_begin, src_end) = src.lid_range();
    let (dst_begin, dst_end) = dst.lid_range();
    let mut emitted = 0;
    'outer: for slid in src_begin..=src_end {
        for dlid in dst_begin..=dst_end {
            if emitted >= limit {
                break 'outer;
            }
            records.push(SaAttr::PathRecord(PathRecord {
                dgid: dst.gid(prefix),
                sgid: src.gid(prefix),
                dlid,
                slid,
                raw_traffic: false,
                flow_label: template.flow_label,
                hop_limit: template.hop_limit,
                tclass: template.tclass,
                reversible: true,
                num_path: limit as u8,
                pkey,
                qos_class: 0,
                sl,
                mtu_selector: Selector::Exactly,
                mtu,
                rate_selector: Selector::Exactly,
                rate,
                pkt_life_selector: Selector::Exactly,
                pkt_life,
                preference: 0,
            }));
            emitted += 1;
        }
    }
    Ok(())
}

// Resolves the port set a GID/LID template component pair names.
fn resolve_ports(
    sm: &SmUpView<'_>,
    gid: Option<&ibsm_utils::ib::Gid>,
    lid: Option<Lid>,
) -> Result<Vec<PortIndex>, SaStatus> {
    if let Some(gid) = gid {
        let Some((port_idx, _)) = sm.subnet.port_by_gid(gid) else {
            return Err(SaStatus::InvalidGid);
        };
        if let Some(lid) = lid
            && !sm.subnet.ports[port_idx].covers_lid(lid)
        {
            return Ok(vec![]);
        }
        return Ok(vec![port_idx]);
    }
    if let Some(lid) = lid {
        // LID components match by range containment.
        return Ok(sm
            .subnet
            .ports
            .get_by_lid(lid)
            .map(|(port_idx, _)| vec![port_idx])
            .unwrap_or_default());
    }
    Ok(sm
        .subnet
        .ports
        .indexes()
        .filter(|port_idx| sm.subnet.ports[*port_idx].base_lid != 0)
        .collect())
}

fn common_pkey(
    sm: &SmUpView<'_>,
    requester: &Requester,
    src: &PhysPort,
    dst: &PhysPort,
    required: Option<Pkey>,
) -> Option<Pkey> {
    let req_physp = requester
        .port_idx
        .map(|port_idx| &sm.subnet.ports[port_idx])
        .and_then(|port| sm.subnet.port_physp(port));

    let shared_by_all = |pkey: Pkey| {
        let req_ok = match req_physp {
            Some(physp) => physp.has_pkey(pkey),
            // Off-subnet requesters pass only on the trusted plane.
            None => requester.trusted,
        };
        req_ok && src.has_pkey(pkey) && dst.has_pkey(pkey)
    };

    match required {
        Some(pkey) => shared_by_all(pkey).then_some(pkey),
        None => src
            .pkeys
            .iter()
            .copied()
            .find(|pkey| shared_by_all(*pkey)),
    }
}

// ===== selector application =====

fn apply_mtu_selector(
    mask: &PathRecordMask,
    template: &PathRecord,
    best: Mtu,
) -> Option<Mtu> {
    if !mask.contains(PathRecordMask::MTU) {
        return Some(best);
    }
    let selector = if mask.contains(PathRecordMask::MTU_SELECTOR) {
        template.mtu_selector
    } else {
        Selector::Exactly
    };
    match selector {
        Selector::Greater => (best > template.mtu).then_some(best),
        Selector::Less => {
            let below = Mtu::from_u8(template.mtu as u8 - 1)?;
            Some(below.min(best))
        }
        Selector::Exactly => (best >= template.mtu).then_some(template.mtu),
        Selector::Best => Some(best),
    }
}

fn apply_rate_selector(
    mask: &PathRecordMask,
    template: &PathRecord,
    best: Rate,
) -> Option<Rate> {
    if !mask.contains(PathRecordMask::RATE) {
        return Some(best);
    }
    let selector = if mask.contains(PathRecordMask::RATE_SELECTOR) {
        template.rate_selector
    } else {
        Selector::Exactly
    };
    match selector {
        Selector::Greater => {
            (best.weight() > template.rate.weight()).then_some(best)
        }
        Selector::Less => rate_below(template.rate).map(|r| r.min(best)),
        Selector::Exactly => {
            (best.weight() >= template.rate.weight())
                .then_some(template.rate)
        }
        Selector::Best => Some(best),
    }
}

fn apply_life_selector(
    mask: &PathRecordMask,
    template: &PathRecord,
    configured: u8,
) -> Option<u8> {
    if !mask.contains(PathRecordMask::PKT_LIFE) {
        return Some(configured);
    }
    let selector = if mask.contains(PathRecordMask::PKT_LIFE_SELECTOR) {
        template.pkt_life_selector
    } else {
        Selector::Exactly
    };
    match selector {
        Selector::Greater => {
            (configured > template.pkt_life).then_some(configured)
        }
        Selector::Less => {
            (configured < template.pkt_life).then_some(configured)
        }
        Selector::Exactly => {
            (configured == template.pkt_life).then_some(configured)
        }
        Selector::Best => Some(configured),
    }
}

pub(crate) fn rate_below(rate: Rate) -> Option<Rate> {
    [
        Rate::Gbps2_5,
        Rate::Gbps5,
        Rate::Gbps10,
        Rate::Gbps20,
        Rate::Gbps30,
        Rate::Gbps40,
        Rate::Gbps60,
        Rate::Gbps80,
        Rate::Gbps120,
    ]
    .iter()
    .rev()
    .copied()
    .find(|candidate| candidate.weight() < rate.weight())
}

// Active link rate in 2.5 Gbps units, mapped onto the static rate scale.
pub(crate) fn link_rate(physp: &PhysPort) -> Rate {
    let speed_units = match physp.info.link_speed_active {
        2 => 2,
        4 => 4,
        _ => 1,
    };
    let width_units = match physp.info.link_width_active {
        2 => 4,
        4 => 8,
        8 => 12,
        _ => 1,
    };
    match speed_units * width_units {
        1 => Rate::Gbps2_5,
        2 => Rate::Gbps5,
        4 => Rate::Gbps10,
        8 => Rate::Gbps20,
        12 => Rate::Gbps30,
        16 => Rate::Gbps40,
        24 => Rate::Gbps60,
        32 => Rate::Gbps80,
        _ => Rate::Gbps120,
    }
}
