//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::io::Write;

use ibsm_sm::config::SmConfig;
use ibsm_sm::packet::sa::JoinState;
use ibsm_sm::test::TestSm;
use ibsm_utils::ib::Guid;

fn test_config(tag: &str) -> SmConfig {
    let mut config = SmConfig::default();
    config.dump_files_dir = std::env::temp_dir().join(format!(
        "ibsm-model-{}-{}",
        tag,
        std::process::id()
    ));
    config
}

fn small_fabric(config: SmConfig) -> TestSm {
    let mut sm = TestSm::new(config);
    sm.add_switch(0x1, 4);
    sm.add_switch(0x2, 4);
    sm.link_switches(0x1, 3, 0x2, 3);
    sm.add_ca(0x10, 0x1, 1);
    sm.add_ca(0x20, 0x2, 1);
    sm
}

//
// LID management.
//

#[test]
fn lid_ranges_are_aligned_and_disjoint() {
    let mut config = test_config("lmc");
    config.lmc = 2;
    let mut sm = small_fabric(config);
    sm.assign_lids().unwrap();

    // CAs get 4-wide aligned ranges; switch port 0 stays at LMC 0.
    let mut ranges = vec![];
    for port in sm.subnet.ports.iter() {
        let (begin, end) = port.lid_range();
        let is_switch =
            sm.subnet.nodes[port.node_idx].is_switch();
        if is_switch {
            assert_eq!(port.lmc, 0);
        } else {
            assert_eq!(port.lmc, 2);
            assert_eq!(begin % 4, 0);
        }
        ranges.push((begin, end));
    }
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        assert!(pair[0].1 < pair[1].0, "ranges overlap: {:?}", pair);
    }
}

#[test]
fn guid2lid_file_is_honored() {
    let mut config = test_config("guid2lid");
    config.honor_guid2lid_file = true;
    std::fs::create_dir_all(&config.dump_files_dir).unwrap();
    let mut file =
        std::fs::File::create(config.guid2lid_file()).unwrap();
    // H2 is pinned to LID 7.
    writeln!(file, "0x0000000000000020 7 0").unwrap();
    drop(file);

    let mut sm = small_fabric(config);
    sm.assign_lids().unwrap();
    assert_eq!(sm.port_lid(0x20), 7);
    assert_eq!(sm.port_lid(0x10), 1);
}

#[test]
fn reassign_discards_current_lids() {
    let mut sm = small_fabric(test_config("reassign"));
    sm.assign_lids().unwrap();
    let first = sm.port_lid(0x20);
    assert_ne!(first, 0);

    // Pretend the device remembered some stale LID.
    {
        let (_, port) =
            sm.subnet.ports.get_by_guid(Guid(0x20)).unwrap();
        let node_idx = port.node_idx;
        let physp =
            sm.subnet.nodes[node_idx].physp_mut(1).unwrap();
        physp.info.base_lid = 99;
    }

    // Without reassignment the current (valid, free) LID is preserved.
    sm.config.reassign_lids = false;
    sm.assign_lids().unwrap();
    assert_eq!(sm.port_lid(0x20), 99);

    // With reassignment history is discarded and the range recomputed.
    sm.config.reassign_lids = true;
    sm.assign_lids().unwrap();
    assert_ne!(sm.port_lid(0x20), 99);
}

//
// Drop manager.
//

#[test]
fn vanished_entities_are_dropped() {
    let mut sm = small_fabric(test_config("drop"));
    sm.assign_lids().unwrap();
    sm.sweep.heavy = true;

    // H2 disappears: nothing about it was seen this sweep.
    {
        let (node_idx, _) =
            sm.subnet.nodes.get_by_guid(Guid(0x20)).unwrap();
        let node = &mut sm.subnet.nodes[node_idx];
        node.discovery_count = 0;
        for physp in node.physps_mut() {
            physp.discovery_count = 0;
        }
        let (_, port) =
            sm.subnet.ports.get_mut_by_guid(Guid(0x20)).unwrap();
        port.discovery_count = 0;
    }

    sm.run_drop();

    // The node and its endport are gone.
    assert!(sm.subnet.nodes.get_by_guid(Guid(0x20)).is_none());
    assert!(sm.subnet.ports.get_by_guid(Guid(0x20)).is_none());
    // The switch port it hung off is unlinked.
    let (node_idx, _) =
        sm.subnet.nodes.get_by_guid(Guid(0x2)).unwrap();
    let physp = sm.subnet.nodes[node_idx].physp(1).unwrap();
    assert!(physp.remote.is_none());
    // The surviving switches are untouched.
    assert!(sm.subnet.switches.get_by_guid(Guid(0x1)).is_some());
    assert!(sm.subnet.switches.get_by_guid(Guid(0x2)).is_some());
}

//
// Multicast spanning tree.
//

#[test]
fn group_tree_spans_member_switches() {
    let mut sm = small_fabric(test_config("mcast"));
    // A third switch hangs off SwB but has no members behind it.
    sm.add_switch(0x3, 4);
    sm.link_switches(0x2, 4, 0x3, 4);
    sm.add_ca(0x30, 0x1, 2);
    sm.assign_lids().unwrap();

    // Build a group joined by H1 (SwA), H2 (SwB) and H3 (SwA).
    let mlid = {
        use ibsm_sm::group::{McGroup, McGroupMember};
        use ibsm_sm::packet::sa::McMemberRecord;

        let record = McMemberRecord {
            pkey: ibsm_utils::ib::Pkey(0xFFFF),
            ..Default::default()
        };
        let mut group = McGroup::new(
            sm.port_gid(0x10),
            0xC000,
            &record,
        );
        for guid in [0x10u64, 0x20, 0x30] {
            let gid = sm.port_gid(guid);
            group.members.insert(
                gid,
                McGroupMember {
                    port_gid: gid,
                    join_state: JoinState::FULL,
                    proxy_join: false,
                },
            );
        }
        let mlid = group.mlid;
        sm.subnet.groups.insert(group);
        mlid
    };

    sm.run_mcast();

    let subnet = &sm.subnet;
    let (_, sw_a) = subnet.switches.get_by_guid(Guid(0x1)).unwrap();
    let (_, sw_b) = subnet.switches.get_by_guid(Guid(0x2)).unwrap();
    let (_, sw_c) = subnet.switches.get_by_guid(Guid(0x3)).unwrap();

    // SwA (two members) is the root: its mask carries both member ports
    // and the tree edge toward SwB.
    let mask_a = sw_a.mft_mask(mlid).unwrap()[0];
    assert_eq!(mask_a & (1 << 1), 1 << 1);
    assert_eq!(mask_a & (1 << 2), 1 << 2);
    assert_eq!(mask_a & (1 << 3), 1 << 3);

    // SwB forwards to its member and back up the tree.
    let mask_b = sw_b.mft_mask(mlid).unwrap()[0];
    assert_eq!(mask_b & (1 << 1), 1 << 1);
    assert_eq!(mask_b & (1 << 3), 1 << 3);
    // Nothing leaks toward the memberless switch.
    assert_eq!(mask_b & (1 << 4), 0);
    assert!(sw_c.mft_mask(mlid).is_none());
}
