//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::io::Write;

use ibsm_sm::config::SmConfig;
use ibsm_sm::packet::smp::ATTR_LINEAR_FWD_TABLE;
use ibsm_sm::test::TestSm;
use ibsm_utils::ib::{Guid, HOPS_UNREACHABLE, LFT_NO_PATH};

fn test_config() -> SmConfig {
    let mut config = SmConfig::default();
    config.dump_files_dir = std::env::temp_dir()
        .join(format!("ibsm-routing-test-{}", std::process::id()));
    config
}

// Two switches, one host each.
fn two_switch_sm() -> TestSm {
    let mut sm = TestSm::new(test_config());
    sm.add_switch(0x1, 4);
    sm.add_switch(0x2, 4);
    sm.link_switches(0x1, 3, 0x2, 3);
    sm.add_ca(0x10, 0x1, 1);
    sm.add_ca(0x20, 0x2, 1);
    sm.assign_lids().unwrap();
    sm.drain_tx();
    sm
}

#[test]
fn minhop_two_switches() {
    let mut sm = two_switch_sm();
    assert_eq!(sm.run_unicast().unwrap(), "minhop");

    let lid_h1 = sm.port_lid(0x10);
    let lid_h2 = sm.port_lid(0x20);
    assert_eq!(lid_h1, 1);
    assert_eq!(lid_h2, 2);

    let subnet = &sm.subnet;
    let (_, sw_a) = subnet.switches.get_by_guid(Guid(0x1)).unwrap();
    let (_, sw_b) = subnet.switches.get_by_guid(Guid(0x2)).unwrap();

    // Forwarding entries.
    assert_eq!(sw_a.new_lft_entry(lid_h1), 1);
    assert_eq!(sw_a.new_lft_entry(lid_h2), 3);
    assert_eq!(sw_b.new_lft_entry(lid_h1), 3);
    assert_eq!(sw_b.new_lft_entry(lid_h2), 1);

    // Min-hop consistency: every forwarding decision follows a port with
    // a finite minimal hop count.
    for sw in subnet.switches.iter() {
        for lid in 1..=subnet.max_ucast_lid {
            let port = sw.new_lft_entry(lid);
            if port == LFT_NO_PATH {
                continue;
            }
            let least = sw.least_hops(lid).unwrap();
            assert_eq!(sw.hops_via(lid, port), least);
        }
    }
}

#[test]
fn unchanged_lfts_are_not_rewritten() {
    let mut sm = two_switch_sm();
    sm.config.use_ucast_cache = true;

    sm.run_unicast().unwrap();
    sm.commit_unicast();
    let first: Vec<_> = sm
        .drain_tx()
        .into_iter()
        .filter(|tx| tx.mad.hdr.attr_id == ATTR_LINEAR_FWD_TABLE)
        .collect();
    assert!(!first.is_empty());

    // A second identical pass over an unchanged fabric emits nothing.
    sm.run_unicast().unwrap();
    sm.commit_unicast();
    let second: Vec<_> = sm
        .drain_tx()
        .into_iter()
        .filter(|tx| tx.mad.hdr.attr_id == ATTR_LINEAR_FWD_TABLE)
        .collect();
    assert!(second.is_empty());
}

#[test]
fn engine_fallback_order() {
    let mut sm = two_switch_sm();
    // The first engine is unavailable in this build; minhop takes over.
    sm.config.routing_engine = "lash,minhop".to_owned();
    assert_eq!(sm.run_unicast().unwrap(), "minhop");

    // Without fallback the failure is terminal.
    sm.config.no_fallback = true;
    assert!(sm.run_unicast().is_err());
}

//
// Up/Down: a three-tier fabric where the only minimal-length detour goes
// down through a leaf and back up, which the ranking constraint forbids.
//
//            R1 (0x101)
//           /          \
//      A1 (0x201)    A2 (0x202)
//      /    |          |    \
//  L1(0x301) \        /  L2(0x302)
//     |      LX (0x303)      |
//  H1(0x401)             H2(0x402)
//

fn three_tier_sm(config: SmConfig) -> TestSm {
    let mut sm = TestSm::new(config);
    sm.add_switch(0x101, 8);
    sm.add_switch(0x201, 8);
    sm.add_switch(0x202, 8);
    sm.add_switch(0x301, 8);
    sm.add_switch(0x302, 8);
    sm.add_switch(0x303, 8);
    // Aggregation to root.
    sm.link_switches(0x201, 1, 0x101, 1);
    sm.link_switches(0x202, 1, 0x101, 2);
    // Leaves to aggregation.
    sm.link_switches(0x301, 1, 0x201, 2);
    sm.link_switches(0x302, 1, 0x202, 2);
    // The crossing leaf reaches both aggregation switches.
    sm.link_switches(0x303, 1, 0x201, 3);
    sm.link_switches(0x303, 2, 0x202, 3);
    // Hosts.
    sm.add_ca(0x401, 0x301, 4);
    sm.add_ca(0x402, 0x302, 4);
    sm.assign_lids().unwrap();
    sm.drain_tx();
    sm
}

#[test]
fn updn_rejects_down_up_transition() {
    // Root set from a file.
    let dir = std::env::temp_dir()
        .join(format!("ibsm-updn-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let roots_path = dir.join("root_guids");
    let mut file = std::fs::File::create(&roots_path).unwrap();
    writeln!(file, "0x0000000000000101").unwrap();

    let mut config = test_config();
    config.routing_engine = "updn".to_owned();
    config.root_guid_file = Some(roots_path);
    let mut sm = three_tier_sm(config);

    assert_eq!(sm.run_unicast().unwrap(), "updn");

    let lid_h2 = sm.port_lid(0x402);
    let subnet = &sm.subnet;
    let (_, a1) = subnet.switches.get_by_guid(Guid(0x201)).unwrap();

    // From A1, H2 is reachable up through the root in four hops...
    assert_eq!(a1.hops_via(lid_h2, 1), 4);
    // ...but never down through the crossing leaf, although that path
    // has the same length.
    assert_eq!(a1.hops_via(lid_h2, 3), HOPS_UNREACHABLE);
    assert_eq!(a1.new_lft_entry(lid_h2), 1);

    // The legal route is intact end to end.
    let (_, l1) = subnet.switches.get_by_guid(Guid(0x301)).unwrap();
    assert_eq!(l1.new_lft_entry(lid_h2), 1);
    assert_eq!(l1.least_hops(lid_h2), Some(5));
}

#[test]
fn updn_auto_detect_needs_roots() {
    // No root file and a histogram with no switch above the thresholds:
    // updn fails and the engine list falls back.
    let mut config = test_config();
    config.routing_engine = "updn,minhop".to_owned();
    let mut sm = two_switch_sm();
    sm.config = config;
    assert_eq!(sm.run_unicast().unwrap(), "minhop");
}

#[test]
fn dor_is_deterministic() {
    let mut sm = two_switch_sm();
    sm.config.routing_engine = "dor".to_owned();
    assert_eq!(sm.run_unicast().unwrap(), "dor");
    let (_, sw_a) = sm.subnet.switches.get_by_guid(Guid(0x1)).unwrap();
    assert_eq!(sw_a.new_lft_entry(sm.subnet.max_ucast_lid + 1), LFT_NO_PATH);
}
