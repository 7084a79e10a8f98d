//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_sm::config::SmConfig;
use ibsm_sm::packet::sa::{
    ATTR_MC_MEMBER_RECORD, ATTR_NODE_RECORD, ATTR_PATH_RECORD,
    ATTR_SERVICE_RECORD, InformInfo, JoinState, McMemberRecord,
    McMemberRecordMask, NodeRecordMask, PathRecord, PathRecordMask, Rmpp,
    Sa, SaAttr, ServiceRecord, ServiceRecordMask,
};
use ibsm_sm::packet::smp::{
    Notice, NoticeDetails, NoticeType, PRODUCER_TYPE_SWITCH, Smp, SmpAttr,
    TRAP_LINK_STATE_CHANGE,
};
use ibsm_sm::packet::{
    Mad, MadBody, MadHeader, Method, MgmtClass, SaStatus,
};
use ibsm_sm::test::TestSm;
use ibsm_sm::transport::{MadAddr, RxMad, TxMad};
use ibsm_utils::ib::{Gid, Lid, Mtu, NodeType, Pkey, Rate, Selector};

//
// Helper functions.
//

fn sa_mad(
    method: Method,
    attr_id: u16,
    comp_mask: u64,
    sm_key: u64,
    template: Option<SaAttr>,
) -> Mad {
    Mad {
        hdr: MadHeader::request(MgmtClass::SubnAdm, method, attr_id, 0, 0),
        body: MadBody::Sa(Sa {
            rmpp: Rmpp::default(),
            sm_key,
            comp_mask,
            records: template.into_iter().collect(),
        }),
    }
}

// A switch with three hosts, LIDs assigned.
fn fabric() -> TestSm {
    let mut config = SmConfig::default();
    config.dump_files_dir = std::env::temp_dir()
        .join(format!("ibsm-sa-test-{}", std::process::id()));
    let mut sm = TestSm::new(config);
    sm.add_switch(0x1, 4);
    sm.add_ca(0x100, 0x1, 1);
    sm.add_ca(0x200, 0x1, 2);
    sm.add_ca(0x300, 0x1, 3);
    sm.assign_lids().unwrap();
    sm.drain_tx();
    sm
}

fn response_of(tx: &[TxMad], method: Method) -> &Mad {
    tx.iter()
        .map(|tx| &tx.mad)
        .find(|mad| mad.hdr.method == method)
        .expect("response not sent")
}

//
// MCMemberRecord.
//

#[test]
fn mcmember_join_synthesizes_group() {
    let mut sm = fabric();
    let h1_gid = sm.port_gid(0x100);
    let h1_lid = sm.port_lid(0x100);

    let request = McMemberRecord {
        port_gid: h1_gid,
        join_state: JoinState::FULL,
        mtu_selector: Selector::Exactly,
        mtu: Mtu::Mtu2048,
        rate_selector: Selector::Exactly,
        rate: Rate::Gbps5,
        ..Default::default()
    };
    let mask = McMemberRecordMask::PORT_GID
        | McMemberRecordMask::JOIN_STATE
        | McMemberRecordMask::MTU_SELECTOR
        | McMemberRecordMask::MTU
        | McMemberRecordMask::RATE_SELECTOR
        | McMemberRecordMask::RATE;
    let mad = sa_mad(
        Method::Set,
        ATTR_MC_MEMBER_RECORD,
        mask.bits(),
        0,
        Some(SaAttr::McMemberRecord(request)),
    );
    sm.sa_request(h1_lid, h1_gid, &mad);

    let tx = sm.drain_tx();
    let resp = response_of(&tx, Method::GetResp);
    assert_eq!(resp.hdr.status, 0);
    let sa = resp.sa().unwrap();
    // Untrusted requesters never see the SM key.
    assert_eq!(sa.sm_key, 0);
    let SaAttr::McMemberRecord(record) = &sa.records[0] else {
        panic!("wrong record type");
    };
    assert_eq!(record.mlid, 0xC000);
    assert_eq!(record.mtu, Mtu::Mtu2048);
    assert_eq!(record.rate, Rate::Gbps5);
    // Synthesized MGID: ff12:a01b:<prefix>:<mlid>:<mlid>.
    assert_eq!(&record.mgid.0[0..4], &[0xFF, 0x12, 0xA0, 0x1B]);
    assert_eq!(&record.mgid.0[10..14], &[0xC0, 0x00, 0xC0, 0x00]);

    // The group exists and the host is a full member.
    let group = sm.subnet.groups.get_by_mlid(0xC000).unwrap();
    let member = group.members.get(&h1_gid).unwrap();
    assert!(member.join_state.contains(JoinState::FULL));
    // Membership P_Key invariant.
    let (_, port) = sm.subnet.ports.get_by_guid(h1_gid.guid()).unwrap();
    assert!(sm.subnet.port_has_pkey(port, group.pkey));

    // An MFT block selecting the host's switch port was pushed.
    let mft = tx
        .iter()
        .find_map(|tx| match &tx.mad.body {
            MadBody::Smp(smp) => match &smp.attr {
                Some(SmpAttr::MulticastFt(block)) => Some(block),
                _ => None,
            },
            _ => None,
        })
        .expect("no MFT block written");
    assert_eq!(mft.masks[0] & (1 << 1), 1 << 1);
}

#[test]
fn mcmember_join_without_state_rejected() {
    let mut sm = fabric();
    let h1_gid = sm.port_gid(0x100);
    let h1_lid = sm.port_lid(0x100);

    let request = McMemberRecord {
        port_gid: h1_gid,
        join_state: JoinState::empty(),
        ..Default::default()
    };
    let mask =
        McMemberRecordMask::PORT_GID | McMemberRecordMask::JOIN_STATE;
    let mad = sa_mad(
        Method::Set,
        ATTR_MC_MEMBER_RECORD,
        mask.bits(),
        0,
        Some(SaAttr::McMemberRecord(request)),
    );
    sm.sa_request(h1_lid, h1_gid, &mad);

    let tx = sm.drain_tx();
    let resp = response_of(&tx, Method::GetResp);
    assert_eq!(resp.hdr.status, SaStatus::ReqInvalid as u16);
}

#[test]
fn mcmember_leave_follows_join_state_rules() {
    let mut sm = fabric();
    let h1_gid = sm.port_gid(0x100);
    let h1_lid = sm.port_lid(0x100);

    // Join with full membership.
    let join = McMemberRecord {
        port_gid: h1_gid,
        join_state: JoinState::FULL,
        ..Default::default()
    };
    let mask =
        McMemberRecordMask::PORT_GID | McMemberRecordMask::JOIN_STATE;
    let mad = sa_mad(
        Method::Set,
        ATTR_MC_MEMBER_RECORD,
        mask.bits(),
        0,
        Some(SaAttr::McMemberRecord(join)),
    );
    sm.sa_request(h1_lid, h1_gid, &mad);
    let mgid = {
        let tx = sm.drain_tx();
        let resp = response_of(&tx, Method::GetResp);
        let SaAttr::McMemberRecord(record) =
            &resp.sa().unwrap().records[0]
        else {
            panic!("wrong record type");
        };
        record.mgid
    };

    // A leave naming bits outside the stored JoinState is invalid.
    let bad_leave = McMemberRecord {
        mgid,
        port_gid: h1_gid,
        join_state: JoinState::NON_MEMBER,
        ..Default::default()
    };
    let mad = sa_mad(
        Method::Delete,
        ATTR_MC_MEMBER_RECORD,
        mask.bits(),
        0,
        Some(SaAttr::McMemberRecord(bad_leave.clone())),
    );
    sm.sa_request(h1_lid, h1_gid, &mad);
    let tx = sm.drain_tx();
    let resp = response_of(&tx, Method::DeleteResp);
    assert_eq!(resp.hdr.status, SaStatus::ReqInvalid as u16);

    // Leaving with the stored bits deletes the last member and the group.
    let mut leave = bad_leave;
    leave.join_state = JoinState::FULL;
    let mad = sa_mad(
        Method::Delete,
        ATTR_MC_MEMBER_RECORD,
        mask.bits(),
        0,
        Some(SaAttr::McMemberRecord(leave)),
    );
    sm.sa_request(h1_lid, h1_gid, &mad);
    let tx = sm.drain_tx();
    let resp = response_of(&tx, Method::DeleteResp);
    assert_eq!(resp.hdr.status, 0);
    assert!(sm.subnet.groups.is_empty());
}

#[test]
fn mcmember_query_hides_members_from_untrusted() {
    let mut sm = fabric();
    let h1_gid = sm.port_gid(0x100);
    let h1_lid = sm.port_lid(0x100);

    let join = McMemberRecord {
        port_gid: h1_gid,
        join_state: JoinState::FULL,
        ..Default::default()
    };
    let mask =
        McMemberRecordMask::PORT_GID | McMemberRecordMask::JOIN_STATE;
    let mad = sa_mad(
        Method::Set,
        ATTR_MC_MEMBER_RECORD,
        mask.bits(),
        0,
        Some(SaAttr::McMemberRecord(join)),
    );
    sm.sa_request(h1_lid, h1_gid, &mad);
    sm.drain_tx();

    // Untrusted GetTable: member identity zeroed.
    let mad = sa_mad(Method::GetTable, ATTR_MC_MEMBER_RECORD, 0, 0, None);
    sm.sa_request(h1_lid, h1_gid, &mad);
    let tx = sm.drain_tx();
    let resp = response_of(&tx, Method::GetTableResp);
    let SaAttr::McMemberRecord(record) = &resp.sa().unwrap().records[0]
    else {
        panic!("wrong record type");
    };
    assert_eq!(record.port_gid, Gid::ZERO);
    assert!(record.join_state.is_empty());

    // The trusted plane sees everything.
    let sm_key = sm.config.sm_key;
    let mad =
        sa_mad(Method::GetTable, ATTR_MC_MEMBER_RECORD, 0, sm_key, None);
    sm.sa_request(h1_lid, h1_gid, &mad);
    let tx = sm.drain_tx();
    let resp = response_of(&tx, Method::GetTableResp);
    let SaAttr::McMemberRecord(record) = &resp.sa().unwrap().records[0]
    else {
        panic!("wrong record type");
    };
    assert_eq!(record.port_gid, h1_gid);
}

//
// PathRecord.
//

#[test]
fn path_record_between_hosts() {
    let mut sm = fabric();
    sm.run_unicast().unwrap();
    sm.drain_tx();
    let h1_gid = sm.port_gid(0x100);
    let h2_gid = sm.port_gid(0x200);
    let h1_lid = sm.port_lid(0x100);
    let h2_lid = sm.port_lid(0x200);

    let template = PathRecord {
        sgid: h1_gid,
        dgid: h2_gid,
        ..Default::default()
    };
    let mask = PathRecordMask::SGID | PathRecordMask::DGID;
    let mad = sa_mad(
        Method::Get,
        ATTR_PATH_RECORD,
        mask.bits(),
        0,
        Some(SaAttr::PathRecord(template)),
    );
    sm.sa_request(h1_lid, h1_gid, &mad);

    let tx = sm.drain_tx();
    let resp = response_of(&tx, Method::GetResp);
    assert_eq!(resp.hdr.status, 0);
    let SaAttr::PathRecord(record) = &resp.sa().unwrap().records[0] else {
        panic!("wrong record type");
    };
    assert_eq!(record.slid, h1_lid);
    assert_eq!(record.dlid, h2_lid);
    assert_eq!(record.mtu, Mtu::Mtu2048);
    assert!(record.reversible);
    assert_eq!(record.pkey.base(), 0x7FFF);
}

#[test]
fn path_record_requires_shared_pkey() {
    let mut sm = fabric();
    sm.run_unicast().unwrap();
    sm.drain_tx();
    let h1_gid = sm.port_gid(0x100);
    let h2_gid = sm.port_gid(0x200);
    let h1_lid = sm.port_lid(0x100);

    // Isolate H2 in a different partition.
    sm.set_pkeys(0x200, &[0x8005]);

    let template = PathRecord {
        sgid: h1_gid,
        dgid: h2_gid,
        ..Default::default()
    };
    let mask = PathRecordMask::SGID | PathRecordMask::DGID;
    let mad = sa_mad(
        Method::Get,
        ATTR_PATH_RECORD,
        mask.bits(),
        0,
        Some(SaAttr::PathRecord(template)),
    );
    sm.sa_request(h1_lid, h1_gid, &mad);

    let tx = sm.drain_tx();
    let resp = response_of(&tx, Method::GetResp);
    assert_eq!(resp.hdr.status, SaStatus::NoRecords as u16);
}

#[test]
fn path_record_table_ordering_is_stable() {
    let mut sm = fabric();
    sm.run_unicast().unwrap();
    sm.drain_tx();
    let h1_gid = sm.port_gid(0x100);
    let h1_lid = sm.port_lid(0x100);

    let run = |sm: &mut TestSm| -> Vec<(Lid, Lid)> {
        let mad = sa_mad(Method::GetTable, ATTR_PATH_RECORD, 0, 0, None);
        sm.sa_request(h1_lid, h1_gid, &mad);
        let tx = sm.drain_tx();
        let resp = response_of(&tx, Method::GetTableResp);
        resp.sa()
            .unwrap()
            .records
            .iter()
            .map(|record| {
                let SaAttr::PathRecord(record) = record else {
                    panic!("wrong record type");
                };
                (record.slid, record.dlid)
            })
            .collect()
    };

    let first = run(&mut sm);
    let second = run(&mut sm);
    assert!(!first.is_empty());
    assert_eq!(first, second);
    // Ordered by source LID, then destination LID.
    let mut sorted = first.clone();
    sorted.sort_unstable();
    assert_eq!(first, sorted);
}

//
// ServiceRecord.
//

#[test]
fn service_record_lifecycle() {
    let mut sm = fabric();
    let h1_gid = sm.port_gid(0x100);
    let h1_lid = sm.port_lid(0x100);

    let record = ServiceRecord {
        service_id: 0x1234,
        service_gid: h1_gid,
        service_pkey: Pkey(0xFFFF),
        service_lease: 0,
        service_key: [7; 16],
        service_name: "vendor.io/echo".to_owned(),
    };
    let rid_mask = ServiceRecordMask::SERVICE_ID
        | ServiceRecordMask::SERVICE_GID
        | ServiceRecordMask::SERVICE_PKEY;

    // Registration with the lease omitted defaults to indefinite.
    let mad = sa_mad(
        Method::Set,
        ATTR_SERVICE_RECORD,
        rid_mask.bits(),
        0,
        Some(SaAttr::ServiceRecord(record.clone())),
    );
    sm.sa_request(h1_lid, h1_gid, &mad);
    let tx = sm.drain_tx();
    assert_eq!(response_of(&tx, Method::GetResp).hdr.status, 0);
    // The indefinite lease never expires.
    sm.expire_services();
    assert_eq!(sm.subnet.services.len(), 1);

    // Untrusted queries hide the service key.
    let mad = sa_mad(
        Method::GetTable,
        ATTR_SERVICE_RECORD,
        ServiceRecordMask::SERVICE_ID.bits(),
        0,
        Some(SaAttr::ServiceRecord(record.clone())),
    );
    sm.sa_request(h1_lid, h1_gid, &mad);
    let tx = sm.drain_tx();
    let resp = response_of(&tx, Method::GetTableResp);
    let SaAttr::ServiceRecord(found) = &resp.sa().unwrap().records[0]
    else {
        panic!("wrong record type");
    };
    assert_eq!(found.service_key, [0; 16]);

    // Re-register with a zero-length lease: expires at the next sweep.
    let mask = rid_mask | ServiceRecordMask::SERVICE_LEASE;
    let mad = sa_mad(
        Method::Set,
        ATTR_SERVICE_RECORD,
        mask.bits(),
        0,
        Some(SaAttr::ServiceRecord(record.clone())),
    );
    sm.sa_request(h1_lid, h1_gid, &mad);
    sm.drain_tx();
    sm.expire_services();
    assert!(sm.subnet.services.is_empty());

    // Deleting a missing record reports NO_RECORDS.
    let mad = sa_mad(
        Method::Delete,
        ATTR_SERVICE_RECORD,
        rid_mask.bits(),
        0,
        Some(SaAttr::ServiceRecord(record)),
    );
    sm.sa_request(h1_lid, h1_gid, &mad);
    let tx = sm.drain_tx();
    assert_eq!(
        response_of(&tx, Method::DeleteResp).hdr.status,
        SaStatus::NoRecords as u16
    );
}

//
// NodeRecord.
//

#[test]
fn node_record_table() {
    let mut sm = fabric();
    let h1_gid = sm.port_gid(0x100);
    let h1_lid = sm.port_lid(0x100);

    let mad = sa_mad(Method::GetTable, ATTR_NODE_RECORD, 0, 0, None);
    sm.sa_request(h1_lid, h1_gid, &mad);
    let tx = sm.drain_tx();
    let resp = response_of(&tx, Method::GetTableResp);
    // One record per endport: three hosts plus the switch.
    assert_eq!(resp.sa().unwrap().records.len(), 4);

    // Filter down to channel adapters.
    let template = ibsm_sm::packet::sa::NodeRecord {
        lid: 0,
        node_info: ibsm_sm::packet::smp::NodeInfo {
            node_type: NodeType::ChannelAdapter,
            num_ports: 0,
            system_image_guid: Default::default(),
            node_guid: Default::default(),
            port_guid: Default::default(),
            partition_cap: 0,
            device_id: 0,
            revision: 0,
            local_port_num: 0,
            vendor_id: 0,
        },
        node_desc: Default::default(),
    };
    let mad = sa_mad(
        Method::GetTable,
        ATTR_NODE_RECORD,
        NodeRecordMask::NODE_TYPE.bits(),
        0,
        Some(SaAttr::NodeRecord(template)),
    );
    sm.sa_request(h1_lid, h1_gid, &mad);
    let tx = sm.drain_tx();
    let resp = response_of(&tx, Method::GetTableResp);
    assert_eq!(resp.sa().unwrap().records.len(), 3);
}

//
// Trap forwarding (InformInfo subscriptions).
//

fn subscribe(sm: &mut TestSm, subscriber_guid: u64, trap_type: u16) {
    let gid = sm.port_gid(subscriber_guid);
    let lid = sm.port_lid(subscriber_guid);
    let inform = InformInfo {
        gid: Gid::ZERO,
        lid_range_begin: 0,
        lid_range_end: 0xFFFF,
        is_generic: true,
        subscribe: true,
        trap_type,
        trap_num: 0xFFFF,
        qpn: 1,
        resp_time_value: 0,
        producer_or_vendor: 0x00FF_FFFF,
    };
    let mad = sa_mad(
        Method::Set,
        ibsm_sm::packet::sa::ATTR_INFORM_INFO,
        0,
        0,
        Some(SaAttr::InformInfo(inform)),
    );
    sm.sa_request(lid, gid, &mad);
    let tx = sm.drain_tx();
    assert_eq!(response_of(&tx, Method::GetResp).hdr.status, 0);
}

fn trap_mad(notice: Notice) -> Mad {
    Mad {
        hdr: MadHeader::request(
            MgmtClass::SubnLid,
            Method::Trap,
            ibsm_sm::packet::smp::ATTR_NOTICE,
            0,
            0,
        ),
        body: MadBody::Smp(Smp {
            m_key: 0,
            dr: None,
            attr: Some(SmpAttr::Notice(notice)),
        }),
    }
}

#[test]
fn trap_forwarded_to_subscriber() {
    let mut sm = fabric();
    subscribe(&mut sm, 0x300, NoticeType::Security as u16);
    let subscriber_lid = sm.port_lid(0x300);
    let source_lid = sm.port_lid(0x200);

    let notice = Notice {
        generic: true,
        notice_type: NoticeType::Security,
        producer_or_vendor: PRODUCER_TYPE_SWITCH,
        trap_num: TRAP_LINK_STATE_CHANGE,
        issuer_lid: source_lid,
        toggle_count: 0,
        details: NoticeDetails::LinkStateChange { lid: source_lid },
        issuer_gid: Gid::ZERO,
    };
    sm.deliver(RxMad {
        src_lid: source_lid,
        src_gid: sm.port_gid(0x200),
        mad: Ok(trap_mad(notice.clone())),
    });

    let tx = sm.drain_tx();
    let report = tx
        .iter()
        .find(|tx| tx.mad.hdr.method == Method::Report)
        .expect("no report sent");
    // Delivered to the subscriber's saved address.
    assert_eq!(report.dest, MadAddr::Lid(subscriber_lid));
    // The notice is carried verbatim.
    let SaAttr::Notice(forwarded) = &report.mad.sa().unwrap().records[0]
    else {
        panic!("wrong record type");
    };
    assert_eq!(forwarded.issuer_lid, notice.issuer_lid);
    assert_eq!(forwarded.trap_num, notice.trap_num);
    assert_eq!(forwarded.details, notice.details);
}

#[test]
fn pkey_mismatch_removes_subscription() {
    let mut sm = fabric();
    subscribe(&mut sm, 0x300, 0xFFFF);
    assert_eq!(sm.subnet.informs.len(), 1);

    // The subscriber loses the partition shared with the trap source.
    sm.set_pkeys(0x300, &[0x8005]);

    let source_lid = sm.port_lid(0x200);
    let notice = Notice {
        generic: true,
        notice_type: NoticeType::Urgent,
        producer_or_vendor: PRODUCER_TYPE_SWITCH,
        trap_num: TRAP_LINK_STATE_CHANGE,
        issuer_lid: source_lid,
        toggle_count: 0,
        details: NoticeDetails::LinkStateChange { lid: source_lid },
        issuer_gid: Gid::ZERO,
    };
    sm.deliver(RxMad {
        src_lid: source_lid,
        src_gid: sm.port_gid(0x200),
        mad: Ok(trap_mad(notice)),
    });

    let tx = sm.drain_tx();
    assert!(tx.iter().all(|tx| tx.mad.hdr.method != Method::Report));
    assert!(sm.subnet.informs.is_empty());
}
