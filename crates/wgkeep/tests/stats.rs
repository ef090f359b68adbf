//! Traffic accounting through the manager.

use tempfile::TempDir;
use wgkeep::{
    Accounting, AddPeer, CreateInterface, FakeTunnel, ManagerConfig, TunnelOp, WgManager,
    WgkeepError,
};

fn setup() -> (TempDir, FakeTunnel, WgManager<FakeTunnel>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ManagerConfig::default()
        .with_state_dir(dir.path().join("state"))
        .with_wireguard_dir(dir.path().join("wireguard"));
    let fake = FakeTunnel::new();
    let manager = WgManager::new(&config, fake.clone());
    (dir, fake, manager)
}

#[tokio::test]
async fn test_totals_survive_interface_restart() {
    let (_dir, fake, manager) = setup();
    manager
        .create(CreateInterface::new("wg0", "10.0.0.1/24"))
        .await
        .expect("create");
    let alice = manager.add_peer(AddPeer::new("wg0", "alice")).await.expect("alice");
    manager.start("wg0").await.expect("start");

    fake.simulate_traffic("wg0", &alice.public_key, 100, 10)
        .await
        .expect("traffic");
    fake.simulate_handshake("wg0", &alice.public_key, "203.0.113.9:51000", 1_700_000_000)
        .await
        .expect("handshake");
    let summary = manager.update_stats("wg0").await.expect("first sample");
    assert_eq!(summary.peers_new, 1);

    fake.simulate_traffic("wg0", &alice.public_key, 50, 5)
        .await
        .expect("traffic");
    manager.update_stats("wg0").await.expect("second sample");

    manager.restart("wg0").await.expect("restart");
    fake.simulate_traffic("wg0", &alice.public_key, 30, 3)
        .await
        .expect("traffic");
    let summary = manager.update_stats("wg0").await.expect("after restart");
    assert_eq!(summary.resets_observed, 1);

    let report = manager.show_stats("wg0").await.expect("show");
    let usage = &report.peers[0];
    assert_eq!(usage.name, "alice");
    let stats = usage.stats.as_ref().expect("sampled");
    assert_eq!((stats.total_rx, stats.total_tx), (180, 18));
    assert_eq!((stats.transfer_rx, stats.transfer_tx), (30, 3));
    assert_eq!(stats.accounting, Accounting::ResetObserved);
    assert_eq!(stats.latest_handshake, 1_700_000_000);
    assert_eq!(stats.endpoint, "203.0.113.9:51000");
}

#[tokio::test]
async fn test_counter_reset_without_restart_is_folded() {
    let (_dir, fake, manager) = setup();
    manager
        .create(CreateInterface::new("wg0", "10.0.0.1/24"))
        .await
        .expect("create");
    let alice = manager.add_peer(AddPeer::new("wg0", "alice")).await.expect("alice");
    manager.start("wg0").await.expect("start");

    fake.simulate_traffic("wg0", &alice.public_key, 100, 10)
        .await
        .expect("traffic");
    manager.update_stats("wg0").await.expect("first sample");

    fake.simulate_counter_reset("wg0").await.expect("reset");
    fake.simulate_traffic("wg0", &alice.public_key, 20, 2)
        .await
        .expect("traffic");
    let summary = manager.update_stats("wg0").await.expect("after reset");
    assert_eq!(summary.resets_observed, 1);

    let summary = manager.update_stats("wg0").await.expect("idle sample");
    assert_eq!(summary.resets_observed, 0);

    let report = manager.show_stats("wg0").await.expect("show");
    let stats = report.peers[0].stats.as_ref().expect("sampled");
    assert_eq!((stats.total_rx, stats.total_tx), (120, 12));
}

#[tokio::test]
async fn test_stats_resolve_to_peers_by_public_key() {
    let (_dir, fake, manager) = setup();
    manager
        .create(CreateInterface::new("wg0", "10.0.0.1/24"))
        .await
        .expect("create");
    let alice = manager.add_peer(AddPeer::new("wg0", "alice")).await.expect("alice");
    let bob = manager.add_peer(AddPeer::new("wg0", "bob")).await.expect("bob");
    manager.start("wg0").await.expect("start");
    fake.simulate_traffic("wg0", &bob.public_key, 7, 7)
        .await
        .expect("traffic");
    manager.update_stats("wg0").await.expect("sample");

    let record = manager.store().load("wg0").await.expect("load");
    let report = manager.show_stats("wg0").await.expect("show");
    for usage in &report.peers {
        let configured = record.peer(&usage.name).expect("configured");
        assert_eq!(configured.public_key, usage.public_key);
    }
    let bob_usage = report
        .peers
        .iter()
        .find(|u| u.public_key == bob.public_key)
        .expect("bob");
    assert_eq!(bob_usage.name, "bob");
    assert_eq!(bob_usage.stats.as_ref().map(|s| s.total_rx), Some(7));
    assert!(report.orphaned.is_empty());

    manager.remove_peer("wg0", "bob").await.expect("remove");
    let report = manager.show_stats("wg0").await.expect("show");
    assert_eq!(report.peers.len(), 1);
    assert_eq!(report.peers[0].public_key, alice.public_key);
    assert_eq!(report.orphaned.len(), 1);
    assert_eq!(report.orphaned[0].public_key, bob.public_key);

    assert!(manager.flush_stats("wg0").await.expect("flush"));
    let report = manager.show_stats("wg0").await.expect("show");
    assert!(report.orphaned.is_empty());
    assert!(report.update_at.is_none());
}

#[tokio::test]
async fn test_update_all_reports_each_interface() {
    let (_dir, fake, manager) = setup();
    for (name, address) in [("wg0", "10.0.0.1/24"), ("wg1", "10.1.0.1/24"), ("wg2", "10.2.0.1/24")] {
        manager
            .create(CreateInterface::new(name, address))
            .await
            .expect("create");
        manager.add_peer(AddPeer::new(name, "alice")).await.expect("peer");
    }
    manager.start("wg0").await.expect("start wg0");
    manager.start("wg1").await.expect("start wg1");

    let report = manager.update_all_stats().await.expect("batch");
    assert!(report.is_success());
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.skipped, vec!["wg2".to_string()]);

    fake.fail_on(TunnelOp::Dump).await;
    let report = manager.update_all_stats().await.expect("batch");
    assert_eq!(report.failures(), 2);
    assert!(report
        .outcomes
        .iter()
        .all(|o| matches!(o.result, Err(WgkeepError::CommandFailed { .. }))));
}

#[tokio::test]
async fn test_corrupt_stats_record_fails_only_its_interface() {
    let (_dir, _fake, manager) = setup();
    for (name, address) in [("wg0", "10.0.0.1/24"), ("wg1", "10.1.0.1/24")] {
        manager
            .create(CreateInterface::new(name, address))
            .await
            .expect("create");
        manager.start(name).await.expect("start");
    }
    let path = manager.store().stats_path("wg1");
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(&path, b"[]").expect("write");

    let report = manager.update_all_stats().await.expect("batch");
    assert_eq!(report.failures(), 1);
    let failed = report
        .outcomes
        .iter()
        .find(|o| o.result.is_err())
        .expect("one failure");
    assert_eq!(failed.interface, "wg1");
    assert!(matches!(failed.result, Err(WgkeepError::Corrupt { .. })));
}
