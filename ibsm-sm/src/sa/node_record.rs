//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use num_traits::ToPrimitive;

use crate::instance::SmUpView;
use crate::packet::sa::{NodeRecord, NodeRecordMask, SaAttr};
use crate::packet::smp::{NodeDescription, NodeInfo};
use crate::sa::{Requester, SaResult};

// NodeRecord Get/GetTable: derived view over the discovered nodes, one
// record per endport, ordered by LID.
pub(crate) fn get(
    sm: &mut SmUpView<'_>,
    _requester: &Requester,
    comp_mask: u64,
    template: Option<&SaAttr>,
) -> SaResult {
    let mask = NodeRecordMask::from_bits_truncate(comp_mask);
    let template = match template {
        Some(SaAttr::NodeRecord(record)) => Some(record),
        _ => None,
    };

    let mut records = vec![];
    for port in sm.subnet.ports.iter_by_lid() {
        let node = &sm.subnet.nodes[port.node_idx];
        let Some(physp) = sm.subnet.port_physp(port) else {
            continue;
        };
        let record = NodeRecord {
            lid: port.base_lid,
            node_info: NodeInfo {
                node_type: node.node_type,
                num_ports: node.num_ports,
                system_image_guid: node.system_image_guid,
                node_guid: node.guid,
                port_guid: physp.port_guid,
                partition_cap: physp.pkeys.len().max(1) as u16,
                device_id: 0,
                revision: 0,
                local_port_num: physp.port_num,
                vendor_id: 0,
            },
            node_desc: NodeDescription {
                description: node.description.clone(),
            },
        };
        if let Some(template) = template
            && !matches(&mask, template, &record)
        {
            continue;
        }
        records.push(SaAttr::NodeRecord(record));
    }
    Ok(records)
}

fn matches(
    mask: &NodeRecordMask,
    template: &NodeRecord,
    record: &NodeRecord,
) -> bool {
    if mask.contains(NodeRecordMask::LID) && template.lid != record.lid {
        return false;
    }
    let t = &template.node_info;
    let r = &record.node_info;
    if mask.contains(NodeRecordMask::NODE_TYPE)
        && t.node_type.to_u8() != r.node_type.to_u8()
    {
        return false;
    }
    if mask.contains(NodeRecordMask::NUM_PORTS) && t.num_ports != r.num_ports
    {
        return false;
    }
    if mask.contains(NodeRecordMask::SYSTEM_IMAGE_GUID)
        && t.system_image_guid != r.system_image_guid
    {
        return false;
    }
    if mask.contains(NodeRecordMask::NODE_GUID) && t.node_guid != r.node_guid
    {
        return false;
    }
    if mask.contains(NodeRecordMask::PORT_GUID) && t.port_guid != r.port_guid
    {
        return false;
    }
    if mask.contains(NodeRecordMask::PARTITION_CAP)
        && t.partition_cap != r.partition_cap
    {
        return false;
    }
    if mask.contains(NodeRecordMask::LOCAL_PORT_NUM)
        && t.local_port_num != r.local_port_num
    {
        return false;
    }
    if mask.contains(NodeRecordMask::NODE_DESC)
        && template.node_desc.description != record.node_desc.description
    {
        return false;
    }
    true
}
