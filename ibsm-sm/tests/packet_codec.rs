//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_utils::ib::{
    DrPath, Gid, Guid, Mtu, NodeType, Pkey, Rate, Selector,
};
use ibsm_sm::packet::sa::{
    JoinState, McMemberRecord, PathRecord, Rmpp, Sa, SaAttr,
};
use ibsm_sm::packet::smp::{
    ATTR_NODE_INFO, ATTR_PORT_INFO, DrInfo, NodeInfo, Notice, NoticeDetails,
    NoticeType, PortInfo, Smp, SmpAttr, TRAP_LINK_STATE_CHANGE,
};
use ibsm_sm::packet::{
    MAD_BLOCK_SIZE, Mad, MadBody, MadHeader, Method, MgmtClass,
};

//
// Helper functions.
//

fn roundtrip(mad: &Mad) -> Mad {
    let bytes = mad.encode();
    Mad::decode(bytes).unwrap()
}

//
// SMP plane.
//

#[test]
fn dr_get_header_layout() {
    let path = DrPath::from(&[1, 3][..]);
    let mad = Mad {
        hdr: MadHeader::request(
            MgmtClass::SubnDirectedRoute,
            Method::Get,
            ATTR_NODE_INFO,
            0,
            0x1122_3344_5566_7788,
        ),
        body: MadBody::Smp(Smp {
            m_key: 0,
            dr: Some(DrInfo {
                hop_ptr: 0,
                initial_path: path.clone(),
                return_path: DrPath::from(&[0, 0][..]),
            }),
            attr: None,
        }),
    };

    let bytes = mad.encode();
    // SMPs are fixed-size datagrams.
    assert_eq!(bytes.len(), MAD_BLOCK_SIZE);
    // Common header: version, class, class version, method.
    assert_eq!(&bytes[0..4], &[0x01, 0x81, 0x01, 0x01]);
    // Status, then hop pointer / hop count.
    assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x02]);
    // Transaction id.
    assert_eq!(
        &bytes[8..16],
        &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]
    );
    // Attribute id.
    assert_eq!(&bytes[16..18], &[0x00, 0x11]);
    // Initial path starts at the DR path area.
    assert_eq!(&bytes[128..131], &[0x01, 0x03, 0x00]);

    assert_eq!(roundtrip(&mad), mad);
}

#[test]
fn node_info_roundtrip() {
    let mad = Mad {
        hdr: MadHeader::request(
            MgmtClass::SubnDirectedRoute,
            Method::GetResp,
            ATTR_NODE_INFO,
            0,
            7,
        ),
        body: MadBody::Smp(Smp {
            m_key: 0xAABB,
            dr: Some(DrInfo {
                hop_ptr: 1,
                initial_path: DrPath::from(&[3][..]),
                return_path: DrPath::from(&[1][..]),
            }),
            attr: Some(SmpAttr::NodeInfo(NodeInfo {
                node_type: NodeType::Switch,
                num_ports: 36,
                system_image_guid: Guid(0x0002_c902_0041_0001),
                node_guid: Guid(0x0002_c902_0041_0002),
                port_guid: Guid(0x0002_c902_0041_0003),
                partition_cap: 32,
                device_id: 0xBD36,
                revision: 0xA1,
                local_port_num: 3,
                vendor_id: 0x0002C9,
            })),
        }),
    };
    assert_eq!(roundtrip(&mad), mad);
}

#[test]
fn port_info_field_packing() {
    let pi = PortInfo {
        m_key: 1,
        subnet_prefix: 0xFE80_0000_0000_0000,
        base_lid: 42,
        master_sm_base_lid: 1,
        m_key_lease_period: 60,
        local_port_num: 2,
        lmc: 3,
        m_key_protect: 2,
        port_state: ibsm_utils::ib::PortState::Armed,
        phys_state: ibsm_utils::ib::PortPhysState::LinkUp,
        link_speed_active: 2,
        link_speed_enabled: 3,
        neighbor_mtu: Mtu::Mtu1024,
        master_sm_sl: 5,
        mtu_cap: Mtu::Mtu4096,
        operational_vls: 4,
        subnet_timeout: 18,
        resp_time_value: 16,
        ..Default::default()
    };
    let mad = Mad {
        hdr: MadHeader::request(
            MgmtClass::SubnLid,
            Method::GetResp,
            ATTR_PORT_INFO,
            2,
            1,
        ),
        body: MadBody::Smp(Smp {
            m_key: 0,
            dr: None,
            attr: Some(SmpAttr::PortInfo(pi.clone())),
        }),
    };

    let decoded = roundtrip(&mad);
    let MadBody::Smp(smp) = &decoded.body else {
        panic!("not an SMP");
    };
    let Some(SmpAttr::PortInfo(decoded_pi)) = &smp.attr else {
        panic!("not a PortInfo");
    };
    // Nibble and sub-byte fields survive the packing.
    assert_eq!(decoded_pi.lmc, 3);
    assert_eq!(decoded_pi.m_key_protect, 2);
    assert_eq!(decoded_pi.neighbor_mtu, Mtu::Mtu1024);
    assert_eq!(decoded_pi.master_sm_sl, 5);
    assert_eq!(decoded_pi.link_speed_active, 2);
    assert_eq!(decoded_pi.link_speed_enabled, 3);
    assert_eq!(*decoded_pi, pi);
}

//
// SA plane.
//

#[test]
fn path_record_table_response() {
    let record = |slid, dlid| {
        SaAttr::PathRecord(PathRecord {
            dgid: Gid::from_parts(0xFE80_0000_0000_0000, Guid(0x20)),
            sgid: Gid::from_parts(0xFE80_0000_0000_0000, Guid(0x10)),
            dlid,
            slid,
            flow_label: 0x12345,
            hop_limit: 64,
            tclass: 0,
            reversible: true,
            num_path: 1,
            pkey: Pkey(0xFFFF),
            qos_class: 0,
            sl: 1,
            mtu_selector: Selector::Exactly,
            mtu: Mtu::Mtu2048,
            rate_selector: Selector::Exactly,
            rate: Rate::Gbps10,
            pkt_life_selector: Selector::Exactly,
            pkt_life: 18,
            ..Default::default()
        })
    };
    let mad = Mad {
        hdr: MadHeader::request(
            MgmtClass::SubnAdm,
            Method::GetTableResp,
            ibsm_sm::packet::sa::ATTR_PATH_RECORD,
            0,
            99,
        ),
        body: MadBody::Sa(Sa {
            rmpp: Rmpp::single(),
            sm_key: 0,
            comp_mask: 0x0000_000C,
            records: vec![record(1, 2), record(1, 3)],
        }),
    };

    let decoded = roundtrip(&mad);
    let sa = decoded.sa().unwrap();
    // Records are concatenated at the fixed per-record offset.
    assert_eq!(sa.records.len(), 2);
    assert_eq!(decoded, mad);
}

#[test]
fn mcmember_record_roundtrip() {
    let mad = Mad {
        hdr: MadHeader::request(
            MgmtClass::SubnAdm,
            Method::GetResp,
            ibsm_sm::packet::sa::ATTR_MC_MEMBER_RECORD,
            0,
            5,
        ),
        body: MadBody::Sa(Sa {
            rmpp: Rmpp::default(),
            sm_key: 0,
            comp_mask: 0x1_0003,
            records: vec![SaAttr::McMemberRecord(McMemberRecord {
                mgid: Gid([
                    0xFF, 0x12, 0xA0, 0x1B, 0xFE, 0x80, 0, 0, 0, 0, 0xC0,
                    0x00, 0xC0, 0x00, 0, 0,
                ]),
                port_gid: Gid::from_parts(0xFE80_0000_0000_0000, Guid(0x100)),
                qkey: 0x80010000,
                mlid: 0xC000,
                mtu_selector: Selector::Exactly,
                mtu: Mtu::Mtu2048,
                tclass: 0,
                pkey: Pkey(0xFFFF),
                rate_selector: Selector::Exactly,
                rate: Rate::Gbps5,
                sl: 0,
                flow_label: 0,
                hop_limit: 0,
                scope: 2,
                join_state: JoinState::FULL,
                proxy_join: false,
                ..Default::default()
            })],
        }),
    };
    assert_eq!(roundtrip(&mad), mad);
}

#[test]
fn notice_report_roundtrip() {
    let mad = Mad {
        hdr: MadHeader::request(
            MgmtClass::SubnAdm,
            Method::Report,
            ibsm_sm::packet::sa::ATTR_NOTICE,
            0,
            11,
        ),
        body: MadBody::Sa(Sa {
            rmpp: Rmpp::default(),
            sm_key: 0,
            comp_mask: 0,
            records: vec![SaAttr::Notice(Notice {
                generic: true,
                notice_type: NoticeType::Urgent,
                producer_or_vendor: 2,
                trap_num: TRAP_LINK_STATE_CHANGE,
                issuer_lid: 9,
                toggle_count: 0,
                details: NoticeDetails::LinkStateChange { lid: 9 },
                issuer_gid: Gid::from_parts(
                    0xFE80_0000_0000_0000,
                    Guid(0x42),
                ),
            })],
        }),
    };
    assert_eq!(roundtrip(&mad), mad);
}

#[test]
fn malformed_datagram_rejected() {
    // Bad base version.
    let mut bytes = vec![0u8; MAD_BLOCK_SIZE];
    bytes[0] = 0x02;
    bytes[1] = 0x81;
    assert!(Mad::decode(bytes::Bytes::from(bytes)).is_err());

    // Truncated header.
    let bytes = vec![0x01u8, 0x81, 0x01];
    assert!(Mad::decode(bytes::Bytes::from(bytes)).is_err());
}
