//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod informinfo;
pub mod mcmember;
pub mod node_record;
pub mod path_record;
pub mod portinfo;
pub mod service;

use ibsm_utils::ib::{Gid, Lid};

use crate::collections::PortIndex;
use crate::debug::Debug;
use crate::instance::SmUpView;
use crate::packet::sa::{
    ATTR_INFORM_INFO, ATTR_INFORM_INFO_RECORD, ATTR_MC_MEMBER_RECORD,
    ATTR_NODE_RECORD, ATTR_PATH_RECORD, ATTR_PORT_INFO_RECORD,
    ATTR_SERVICE_RECORD, Rmpp, Sa, SaAttr,
};
use crate::packet::{
    MAD_STATUS_UNSUP_METHOD_ATTR, Mad, MadBody, Method, SaStatus,
};
use crate::transport::MadAddr;

// The resolved origin of an SA request.
#[derive(Debug)]
pub(crate) struct Requester {
    pub lid: Lid,
    pub gid: Gid,
    // Carries the subnet-wide SM key.
    pub trusted: bool,
    // The requester's endport, when it resolves on this subnet.
    pub port_idx: Option<PortIndex>,
}

// Outcome of one record handler: the matched/affected records, or an SA
// status error.
pub(crate) type SaResult = Result<Vec<SaAttr>, SaStatus>;

// ===== request dispatch =====

// Entry point for SubnAdm datagrams.
pub(crate) fn process_request(
    sm: &mut SmUpView<'_>,
    src_lid: Lid,
    src_gid: Gid,
    mad: &Mad,
) {
    let MadBody::Sa(sa) = &mad.body else {
        return;
    };

    let trusted = sa.sm_key != 0 && sa.sm_key == sm.config.sm_key;
    let port_idx = sm
        .subnet
        .port_by_gid(&src_gid)
        .map(|(port_idx, _)| port_idx)
        .or_else(|| {
            sm.subnet
                .ports
                .get_by_lid(src_lid)
                .map(|(port_idx, _)| port_idx)
        });
    let requester = Requester {
        lid: src_lid,
        gid: src_gid,
        trusted,
        port_idx,
    };

    let comp_mask = sa.comp_mask;
    let result: SaResult = match (mad.hdr.method, mad.hdr.attr_id) {
        (Method::Get | Method::GetTable, ATTR_NODE_RECORD) => {
            node_record::get(sm, &requester, comp_mask, sa.template())
        }
        (Method::Get | Method::GetTable, ATTR_PORT_INFO_RECORD) => {
            portinfo::get(sm, &requester, comp_mask, sa.template())
        }
        (Method::Get | Method::GetTable, ATTR_PATH_RECORD) => {
            path_record::get(sm, &requester, comp_mask, sa.template())
        }
        (Method::Get | Method::GetTable, ATTR_MC_MEMBER_RECORD) => {
            mcmember::get(sm, &requester, comp_mask, sa.template())
        }
        (Method::Set, ATTR_MC_MEMBER_RECORD) => {
            mcmember::set(sm, &requester, comp_mask, sa.template())
        }
        (Method::Delete, ATTR_MC_MEMBER_RECORD) => {
            mcmember::delete(sm, &requester, comp_mask, sa.template())
        }
        (Method::Get | Method::GetTable, ATTR_SERVICE_RECORD) => {
            service::get(sm, &requester, comp_mask, sa.template())
        }
        (Method::Set, ATTR_SERVICE_RECORD) => {
            service::set(sm, &requester, comp_mask, sa.template())
        }
        (Method::Delete, ATTR_SERVICE_RECORD) => {
            service::delete(sm, &requester, comp_mask, sa.template())
        }
        (Method::Set, ATTR_INFORM_INFO) => {
            informinfo::set(sm, &requester, sa.template())
        }
        (Method::Get | Method::GetTable, ATTR_INFORM_INFO_RECORD) => {
            informinfo::get_table(sm, &requester, comp_mask, sa.template())
        }
        _ => {
            respond_status(sm, mad, MAD_STATUS_UNSUP_METHOD_ATTR, src_lid);
            return;
        }
    };

    respond(sm, mad, &requester, result);
}

// ===== response framing =====

fn respond(
    sm: &mut SmUpView<'_>,
    request: &Mad,
    requester: &Requester,
    result: SaResult,
) {
    let (status, records) = match result {
        Ok(records) => match request.hdr.method {
            // Single-record methods must resolve to exactly one record.
            Method::Get | Method::Set | Method::Delete => {
                if records.is_empty() {
                    (SaStatus::NoRecords, vec![])
                } else if records.len() > 1 {
                    (SaStatus::TooManyRecords, vec![])
                } else {
                    (SaStatus::Success, records)
                }
            }
            _ => (SaStatus::Success, records),
        },
        Err(status) => (status, vec![]),
    };

    Debug::SaRequestRx(request.hdr.attr_id, status as u16).log();

    let stride = records
        .first()
        .map(|record| record.padded_len())
        .unwrap_or(0);
    let paylen = (stride * records.len()) as u32;
    let rmpp = if request.hdr.method == Method::GetTable {
        // Tabular responses are RMPP-paged; everything fits the
        // single-segment shortcut with FIRST | LAST | ACTIVE set.
        let mut rmpp = Rmpp::single();
        rmpp.paylen = paylen;
        rmpp
    } else {
        Rmpp::default()
    };

    let mad = Mad {
        hdr: request.hdr.response(status as u16),
        body: MadBody::Sa(Sa {
            rmpp,
            // Untrusted requesters never see the SM key.
            sm_key: if requester.trusted {
                sm.config.sm_key
            } else {
                0
            },
            comp_mask: request.sa().map(|sa| sa.comp_mask).unwrap_or(0),
            records,
        }),
    };
    sm.pacer.send_response(mad, MadAddr::Lid(requester.lid));
}

fn respond_status(
    sm: &mut SmUpView<'_>,
    request: &Mad,
    status: u16,
    dest_lid: Lid,
) {
    let mad = Mad {
        hdr: request.hdr.response(status),
        body: MadBody::Sa(Sa {
            rmpp: Rmpp::default(),
            sm_key: 0,
            comp_mask: 0,
            records: vec![],
        }),
    };
    sm.pacer.send_response(mad, MadAddr::Lid(dest_lid));
}
