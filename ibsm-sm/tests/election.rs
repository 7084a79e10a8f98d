//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_sm::config::SmConfig;
use ibsm_sm::packet::smp::{
    ATTR_SM_INFO, SmInfo, SmInfoControl, SmState, Smp, SmpAttr,
};
use ibsm_sm::packet::{
    MAD_STATUS_INVALID_FIELD, Mad, MadBody, MadHeader, Method, MgmtClass,
};
use ibsm_sm::test::TestSm;
use ibsm_utils::ib::Guid;

//
// Helper functions.
//

fn fabric(priority: u8) -> TestSm {
    let mut config = SmConfig::default();
    config.port_guid = Guid(0x30);
    config.sm_priority = priority;
    config.polling_retry_number = 3;
    config.dump_files_dir = std::env::temp_dir()
        .join(format!("ibsm-election-test-{}", std::process::id()));
    let mut sm = TestSm::new(config);
    sm.add_switch(0x1, 4);
    sm.add_ca(0x30, 0x1, 1);
    sm.add_ca(0x99, 0x1, 2);
    sm.assign_lids().unwrap();
    sm.drain_tx();
    sm
}

fn remote_info(guid: u64, priority: u8, state: SmState) -> SmInfo {
    SmInfo {
        guid: Guid(guid),
        sm_key: 0,
        act_count: 1,
        priority,
        state,
    }
}

fn sminfo_set_mad(control: SmInfoControl, requester: SmInfo) -> Mad {
    Mad {
        hdr: MadHeader::request(
            MgmtClass::SubnLid,
            Method::Set,
            ATTR_SM_INFO,
            control as u32,
            0,
        ),
        body: MadBody::Smp(Smp {
            m_key: 0,
            dr: None,
            attr: Some(SmpAttr::SmInfo(requester)),
        }),
    }
}

//
// Election and handover.
//

#[tokio::test]
async fn higher_priority_remote_wins() {
    // Local SM: priority 5, GUID 0x30; remote: priority 8, GUID 0x99.
    let mut sm = fabric(5);
    sm.sminfo_response(
        0x99,
        None,
        remote_info(0x99, 8, SmState::Master),
    );
    sm.decide_election();

    assert_eq!(sm.subnet.sm_state, SmState::Standby);
    assert_eq!(sm.election.polling_sm, Some(Guid(0x99)));
}

#[tokio::test]
async fn equal_priority_lower_guid_wins() {
    let mut sm = fabric(5);
    sm.sminfo_response(
        0x99,
        None,
        remote_info(0x99, 5, SmState::Discovering),
    );
    sm.decide_election();

    // 0x30 < 0x99: the local SM takes mastership.
    assert_eq!(sm.subnet.sm_state, SmState::Master);
    assert!(sm.election.polling_sm.is_none());
}

#[tokio::test]
async fn standby_repolls_then_takes_over() {
    let mut sm = fabric(5);
    sm.sminfo_response(
        0x99,
        None,
        remote_info(0x99, 8, SmState::Master),
    );
    sm.decide_election();
    assert_eq!(sm.subnet.sm_state, SmState::Standby);
    sm.drain_tx();

    // The master stops answering: each failed poll bumps the retry
    // counter until the configured limit sends us back to discovery.
    sm.poll_timeout(0x99);
    sm.poll_timeout(0x99);
    assert_eq!(sm.subnet.sm_state, SmState::Standby);
    sm.poll_timeout(0x99);

    assert_eq!(sm.subnet.sm_state, SmState::Discovering);
    assert!(sm.election.polling_sm.is_none());
    // A heavy re-sweep was scheduled.
    assert!(
        sm.sweep.phase != ibsm_sm::state_mgr::SweepPhase::Idle
            || sm.subnet.force_heavy_sweep
            || sm.sweep.pending
    );
}

#[tokio::test]
async fn master_hands_over_to_better_sm() {
    let mut sm = fabric(5);
    sm.subnet.sm_state = SmState::Master;

    sm.sminfo_response(
        0x99,
        None,
        remote_info(0x99, 8, SmState::Standby),
    );

    // A handover Set went out to the better SM.
    let tx = sm.drain_tx();
    let handover = tx
        .iter()
        .find(|tx| {
            tx.mad.hdr.attr_id == ATTR_SM_INFO
                && tx.mad.hdr.method == Method::Set
        })
        .expect("no handover sent");
    assert_eq!(
        handover.mad.hdr.attr_mod,
        SmInfoControl::Handover as u32
    );

    // The acknowledgement moves us to Standby.
    sm.sminfo_response(
        0x99,
        Some(SmInfoControl::Handover),
        remote_info(0x99, 8, SmState::Master),
    );
    assert_eq!(sm.subnet.sm_state, SmState::Standby);
    assert_eq!(sm.election.polling_sm, Some(Guid(0x99)));
}

//
// SMInfo Set receiver validation.
//

#[tokio::test]
async fn handover_received_promotes_to_master() {
    let mut sm = fabric(5);
    sm.subnet.sm_state = SmState::Standby;

    let mad = sminfo_set_mad(
        SmInfoControl::Handover,
        remote_info(0x99, 8, SmState::Master),
    );
    sm.deliver(ibsm_sm::transport::RxMad {
        src_lid: 2,
        src_gid: sm.port_gid(0x99),
        mad: Ok(mad),
    });

    assert_eq!(sm.subnet.sm_state, SmState::Master);
    assert!(sm.subnet.first_time_master_sweep);
    assert!(sm.subnet.force_heavy_sweep || sm.sweep.pending
        || sm.sweep.phase != ibsm_sm::state_mgr::SweepPhase::Idle);
}

#[tokio::test]
async fn handover_from_non_master_rejected() {
    let mut sm = fabric(5);
    sm.subnet.sm_state = SmState::Standby;

    // HANDOVER may only originate from a Master SM.
    let mad = sminfo_set_mad(
        SmInfoControl::Handover,
        remote_info(0x99, 8, SmState::Standby),
    );
    sm.deliver(ibsm_sm::transport::RxMad {
        src_lid: 2,
        src_gid: sm.port_gid(0x99),
        mad: Ok(mad),
    });

    assert_eq!(sm.subnet.sm_state, SmState::Standby);
    let tx = sm.drain_tx();
    let resp = tx
        .iter()
        .find(|tx| tx.mad.hdr.method == Method::GetResp)
        .expect("no response sent");
    assert_eq!(resp.mad.hdr.status, MAD_STATUS_INVALID_FIELD);
}

#[tokio::test]
async fn mismatched_sm_key_answered_with_zero_key() {
    let mut sm = fabric(5);
    let mut requester = remote_info(0x99, 8, SmState::Master);
    requester.sm_key = 0xBAD;

    let mad = sminfo_set_mad(SmInfoControl::Handover, requester);
    sm.deliver(ibsm_sm::transport::RxMad {
        src_lid: 2,
        src_gid: sm.port_gid(0x99),
        mad: Ok(mad),
    });

    // The authoritative operation was refused.
    assert_ne!(sm.subnet.sm_state, SmState::Master);
    let tx = sm.drain_tx();
    let resp = tx
        .iter()
        .find(|tx| tx.mad.hdr.method == Method::GetResp)
        .expect("no response sent");
    assert_eq!(resp.mad.hdr.status, MAD_STATUS_INVALID_FIELD);
    let MadBody::Smp(smp) = &resp.mad.body else {
        panic!("not an SMP");
    };
    let Some(SmpAttr::SmInfo(info)) = &smp.attr else {
        panic!("no SMInfo payload");
    };
    assert_eq!(info.sm_key, 0);
}

#[tokio::test]
async fn sminfo_get_reports_local_state() {
    let mut sm = fabric(7);
    sm.subnet.sm_state = SmState::Master;

    let mad = Mad {
        hdr: MadHeader::request(
            MgmtClass::SubnLid,
            Method::Get,
            ATTR_SM_INFO,
            0,
            0,
        ),
        body: MadBody::Smp(Smp {
            m_key: 0,
            dr: None,
            attr: None,
        }),
    };
    sm.deliver(ibsm_sm::transport::RxMad {
        src_lid: 2,
        src_gid: sm.port_gid(0x99),
        mad: Ok(mad),
    });

    let tx = sm.drain_tx();
    let resp = tx
        .iter()
        .find(|tx| tx.mad.hdr.method == Method::GetResp)
        .expect("no response sent");
    let MadBody::Smp(smp) = &resp.mad.body else {
        panic!("not an SMP");
    };
    let Some(SmpAttr::SmInfo(info)) = &smp.attr else {
        panic!("no SMInfo payload");
    };
    assert_eq!(info.guid, Guid(0x30));
    assert_eq!(info.priority, 7);
    assert_eq!(info.state, SmState::Master);
}
