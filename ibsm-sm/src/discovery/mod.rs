//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod node_info;
pub mod port_info;
pub mod switch_info;
pub mod tables;

use ibsm_utils::ib::{DrPath, PortNum};
use tracing::warn;

use crate::collections::NodeIndex;
use crate::error::Error;
use crate::instance::SmUpView;
use crate::packet::smp::{
    ATTR_NODE_INFO, ATTR_PORT_INFO, DrInfo, PortInfo, Smp, SmpAttr,
};
use crate::packet::{Mad, MadBody, MadHeader, Method, MgmtClass};
use crate::pacer::{Completion, CompletionStatus, MadContext};
use crate::transport::MadAddr;
use crate::{election, inform};

// ===== request builders =====

// Builds a directed-route SMP request.
pub(crate) fn dr_request(
    sm: &SmUpView<'_>,
    method: Method,
    attr_id: u16,
    attr_mod: u32,
    path: &DrPath,
    attr: Option<SmpAttr>,
) -> Mad {
    Mad {
        // The transaction id is stamped by the pacer.
        hdr: MadHeader::request(
            MgmtClass::SubnDirectedRoute,
            method,
            attr_id,
            attr_mod,
            0,
        ),
        body: MadBody::Smp(Smp {
            m_key: sm.config.m_key,
            dr: Some(DrInfo {
                hop_ptr: 0,
                initial_path: path.clone(),
                return_path: DrPath::local(),
            }),
            attr,
        }),
    }
}

pub(crate) fn send_dr_get(
    sm: &mut SmUpView<'_>,
    attr_id: u16,
    attr_mod: u32,
    path: &DrPath,
    context: MadContext,
) {
    let mad = dr_request(sm, Method::Get, attr_id, attr_mod, path, None);
    sm.pacer.send(mad, MadAddr::Dr(path.clone()), context);
}

pub(crate) fn send_dr_set(
    sm: &mut SmUpView<'_>,
    attr: SmpAttr,
    attr_mod: u32,
    path: &DrPath,
    context: MadContext,
) {
    let attr_id = attr.attr_id();
    let mad =
        dr_request(sm, Method::Set, attr_id, attr_mod, path, Some(attr));
    sm.pacer.send(mad, MadAddr::Dr(path.clone()), context);
}

// Writes PortInfo to a port, reusing its stored directed route.
pub(crate) fn send_port_info_set(
    sm: &mut SmUpView<'_>,
    node_idx: NodeIndex,
    port_num: PortNum,
    info: PortInfo,
) {
    let Some(physp) = sm.subnet.nodes[node_idx].physp(port_num) else {
        return;
    };
    let path = physp.dr_path.clone();
    send_dr_set(
        sm,
        SmpAttr::PortInfo(info),
        port_num as u32,
        &path,
        MadContext::PortInfo {
            node_idx,
            port_num,
            set: true,
        },
    );
}

// ===== sweep entry point =====

// Seeds a sweep: probe the local port with a zero-hop directed route and
// let the receivers fan out from there.
pub(crate) fn start(sm: &mut SmUpView<'_>) {
    let path = DrPath::local();
    send_dr_get(
        sm,
        ATTR_NODE_INFO,
        0,
        &path,
        MadContext::NodeInfo {
            path: path.clone(),
            via: None,
        },
    );
}

// ===== completion dispatch =====

// Routes a finished transaction back to the receiver that issued it.
pub(crate) fn process_completion(
    sm: &mut SmUpView<'_>,
    completion: Completion,
) {
    let mad = match completion.status {
        CompletionStatus::Response(mad) => mad,
        CompletionStatus::Timeout => {
            process_timeout(sm, completion.context);
            return;
        }
        CompletionStatus::Abort => return,
    };

    if let Err(error) = process_response(sm, completion.context, mad) {
        error.log();
    }
}

fn process_response(
    sm: &mut SmUpView<'_>,
    context: MadContext,
    mad: Mad,
) -> Result<(), Error> {
    // SMInfo flows on both the SMP and the election planes.
    if let MadContext::SmInfo { remote_guid, control } = context {
        return election::process_sminfo_response(
            sm,
            remote_guid,
            control,
            mad,
        );
    }
    if let MadContext::Report { subscriber_gid } = context {
        // ReportResp only acknowledges delivery.
        let _ = subscriber_gid;
        return Ok(());
    }

    let MadBody::Smp(smp) = mad.body else {
        return Err(Error::InternalError("non-SMP discovery completion"));
    };
    if mad.hdr.status != crate::packet::MAD_STATUS_OK {
        warn!(
            status = mad.hdr.status,
            attr_id = mad.hdr.attr_id,
            "attribute request failed"
        );
        return Ok(());
    }

    match (context, smp.attr) {
        (MadContext::NodeInfo { path, via }, Some(SmpAttr::NodeInfo(ni))) => {
            node_info::process(sm, path, via, ni)
        }
        (
            MadContext::NodeDescription { node_idx },
            Some(SmpAttr::NodeDescription(nd)),
        ) => tables::process_node_description(sm, node_idx, nd),
        (
            MadContext::PortInfo {
                node_idx,
                port_num,
                set,
            },
            Some(SmpAttr::PortInfo(pi)),
        ) => port_info::process(sm, node_idx, port_num, set, pi),
        (
            MadContext::SwitchInfo { node_idx, set },
            Some(SmpAttr::SwitchInfo(si)),
        ) => switch_info::process(sm, node_idx, set, si),
        (
            MadContext::PkeyTable {
                node_idx,
                port_num,
                block,
                set,
            },
            Some(SmpAttr::PkeyTable(pkeys)),
        ) => tables::process_pkey_table(sm, node_idx, port_num, block, set, pkeys),
        (
            MadContext::SlToVl {
                node_idx,
                in_port,
                out_port,
                set,
            },
            Some(SmpAttr::SlToVlTable(slvl)),
        ) => tables::process_sl2vl(sm, node_idx, in_port, out_port, set, slvl),
        (
            MadContext::VlArb {
                node_idx,
                port_num,
                block,
                set,
            },
            Some(SmpAttr::VlArbTable(vlarb)),
        ) => tables::process_vl_arb(sm, node_idx, port_num, block, set, vlarb),
        (MadContext::Lft { switch_idx, block }, _) => {
            tables::process_lft_ack(sm, switch_idx, block)
        }
        (
            MadContext::Mft {
                switch_idx,
                position,
                block,
            },
            _,
        ) => tables::process_mft_ack(sm, switch_idx, position, block),
        _ => Err(Error::InternalError(
            "attribute does not match transaction context",
        )),
    }
}

fn process_timeout(sm: &mut SmUpView<'_>, context: MadContext) {
    match context {
        MadContext::SmInfo { remote_guid, .. } => {
            election::process_poll_timeout(sm, remote_guid);
        }
        MadContext::Report { subscriber_gid } => {
            // Non-delivery is logged but not retried by this layer.
            inform::process_report_timeout(sm, subscriber_gid);
        }
        context => {
            // The next sweep pass re-queries.
            warn!(?context, "transaction timed out");
        }
    }
}

// Probes the neighbor behind a switch port.
pub(crate) fn probe_neighbor(
    sm: &mut SmUpView<'_>,
    node_idx: NodeIndex,
    port_num: PortNum,
) {
    let Some(physp) = sm.subnet.nodes[node_idx].physp(port_num) else {
        return;
    };
    let Some(path) = physp.dr_path.extended(port_num) else {
        warn!(port_num, "directed route exceeds the hop limit");
        return;
    };
    send_dr_get(
        sm,
        ATTR_NODE_INFO,
        0,
        &path,
        MadContext::NodeInfo {
            path: path.clone(),
            via: Some((node_idx, port_num)),
        },
    );
}

// Reads PortInfo for one port of a node.
pub(crate) fn read_port_info(
    sm: &mut SmUpView<'_>,
    node_idx: NodeIndex,
    port_num: PortNum,
    path: &DrPath,
) {
    send_dr_get(
        sm,
        ATTR_PORT_INFO,
        port_num as u32,
        path,
        MadContext::PortInfo {
            node_idx,
            port_num,
            set: false,
        },
    );
}
