//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use ibsm_sm::config::SmConfig;
use ibsm_sm::instance::{ExitReason, SubnetManager};
use ibsm_sm::packet::smp::SmState;
use ibsm_sm::test::sim::SimFabric;
use ibsm_utils::ib::Guid;
use tokio::sync::mpsc;

//
// End-to-end sweeps against the simulated fabric: two switches with one
// host each, linked back to back.
//
//   H1 (0x10) -- SwA(0x1):1   SwA:3 -- SwB:3   SwB(0x2):1 -- H2 (0x20)
//

fn two_switch_fabric() -> SimFabric {
    let fabric = SimFabric::new();
    fabric.add_switch(0x1, 4);
    fabric.add_switch(0x2, 4);
    fabric.add_ca(0x10);
    fabric.add_ca(0x20);
    fabric.connect(0x1, 3, 0x2, 3);
    fabric.connect(0x1, 1, 0x10, 1);
    fabric.connect(0x2, 1, 0x20, 1);
    fabric
}

fn test_config() -> SmConfig {
    let mut config = SmConfig::default();
    config.port_guid = Guid(0x10);
    config.sweep_interval = 0;
    config.transaction_timeout = 50;
    config.transaction_retries = 1;
    config.dump_files_dir = std::env::temp_dir()
        .join(format!("ibsm-sweep-test-{}", std::process::id()));
    config
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached within the deadline");
}

#[tokio::test]
async fn two_switch_fabric_sweep() {
    let mut fabric = two_switch_fabric();
    let sim = fabric.state.clone();

    let (tx, channels_rx) = SubnetManager::protocol_input_channels();
    let mut sm =
        SubnetManager::new(test_config(), &mut fabric, tx).unwrap();
    let subnet = sm.subnet.clone();

    let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        sm.event_loop(channels_rx, shutdown_rx).await
    });

    // Hosts get the first LIDs (LMC 0), switches follow.
    wait_for(|| {
        let sim = sim.lock().unwrap();
        sim.port_lid(0x10, 1) == 1 && sim.port_lid(0x20, 1) == 2
    })
    .await;

    // LFTs: SwA reaches H2 through the inter-switch link and vice versa.
    wait_for(|| {
        let sim = sim.lock().unwrap();
        sim.lft_entry(0x1, 2) == 3 && sim.lft_entry(0x2, 1) == 3
    })
    .await;

    {
        let sim = sim.lock().unwrap();
        // Each switch reaches its own host directly.
        assert_eq!(sim.lft_entry(0x1, 1), 1);
        assert_eq!(sim.lft_entry(0x2, 2), 1);
        // Switch management LIDs route as well.
        assert_eq!(sim.lft_entry(0x1, 3), 0);
        assert_eq!(sim.lft_entry(0x2, 3), 3);
    }

    // Ports were advanced to Active.
    wait_for(|| {
        let sim = sim.lock().unwrap();
        sim.port_state(0x10, 1) == ibsm_utils::ib::PortState::Active
    })
    .await;

    {
        let subnet = subnet.read().unwrap();
        // We won the election unopposed.
        assert_eq!(subnet.sm_state, SmState::Master);

        // Min-hop: SwA is two hops away from H2.
        let (_, sw_a) = subnet.switches.get_by_guid(Guid(0x1)).unwrap();
        assert_eq!(sw_a.least_hops(2), Some(2));
        let (_, sw_b) = subnet.switches.get_by_guid(Guid(0x2)).unwrap();
        assert_eq!(sw_b.least_hops(2), Some(1));

        // Link symmetry invariant across every discovered physp.
        for node in subnet.nodes.iter() {
            for physp in node.physps() {
                let Some(remote) = physp.remote else {
                    continue;
                };
                let far = subnet.nodes[remote.node_idx]
                    .physp(remote.port_num)
                    .unwrap();
                let back = far.remote.unwrap();
                assert_eq!(
                    subnet.nodes[back.node_idx].guid,
                    node.guid
                );
                assert_eq!(back.port_num, physp.port_num);
            }
        }
    }

    shutdown_tx.send(()).unwrap();
    assert_eq!(handle.await.unwrap(), ExitReason::Shutdown);
}

//
// Duplicated GUID: two hosts behind the same switch advertise the same
// node GUID on different directed routes.
//

#[tokio::test]
async fn duplicate_guid_is_fatal() {
    let fabric = SimFabric::new();
    fabric.add_switch(0x1, 4);
    fabric.add_ca(0x10);
    fabric.add_ca(0x42);
    fabric.add_ca(0x43);
    fabric.connect(0x1, 1, 0x10, 1);
    fabric.connect(0x1, 2, 0x42, 1);
    fabric.connect(0x1, 3, 0x43, 1);
    // The second host impersonates the first.
    fabric.advertise_guid(0x43, 0x42);

    let mut fabric = fabric;
    let (tx, channels_rx) = SubnetManager::protocol_input_channels();
    let mut sm =
        SubnetManager::new(test_config(), &mut fabric, tx).unwrap();

    let (_shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
    let reason = tokio::time::timeout(
        Duration::from_secs(10),
        sm.event_loop(channels_rx, shutdown_rx),
    )
    .await
    .expect("duplicate GUID not detected in time");
    assert_eq!(reason, ExitReason::FatalDuplicateGuid);
}
