use scanward_core::{
    CycleOptions, Engine, EngineError, JsonSnapshotStore, ObjectKind, ScannerError, SnapshotStore,
};
use scanward_devkit::fixtures::{clock, job, snapshot, stamp_days_ago};
use scanward_devkit::harness::default_settings;
use scanward_devkit::{CycleHarness, FakeDiscovery, FakeScanner, MemoryStore};

fn stale_history() -> MemoryStore {
    let mut stale = snapshot("10.0.0.5", "AA:BB:CC:DD:EE:FF");
    stale.last_report = Some(stamp_days_ago(40));
    stale.last_attempt = Some(stamp_days_ago(1));
    let mut quiet = snapshot("10.0.0.6", "AA:BB:CC:DD:EE:06");
    quiet.last_report = Some(stamp_days_ago(40));
    quiet.last_attempt = Some(stamp_days_ago(45));
    MemoryStore::with_snapshots(vec![stale, quiet])
}

fn stale_scanner() -> FakeScanner {
    FakeScanner::new()
        .with_target("10.0.0.5", "target-5")
        .with_task("10.0.0.5", "AA:BB:CC:DD:EE:FF", "task-5", false)
}

#[tokio::test]
async fn test_stale_host_is_deleted_and_dropped() {
    let harness = CycleHarness::new(stale_scanner(), FakeDiscovery::new(), stale_history())
        .with_retention_days(31);

    let report = harness.run(&[], &CycleOptions::default()).await.unwrap();

    assert_eq!(report.retention.removed, vec!["10.0.0.5"]);
    assert_eq!(
        harness.scanner.deleted(),
        vec![
            (ObjectKind::Task, "task-5".to_string()),
            (ObjectKind::Target, "target-5".to_string())
        ]
    );
    assert!(report.registry.get("10.0.0.5").is_none());
    assert_eq!(harness.store.saved_addresses(), vec!["10.0.0.6"]);
}

#[tokio::test]
async fn test_deletion_failure_still_drops_host() {
    let scanner = stale_scanner();
    scanner.reject_delete("task-5");
    let harness = CycleHarness::new(scanner, FakeDiscovery::new(), stale_history());

    let report = harness.run(&[], &CycleOptions::default()).await.unwrap();

    assert_eq!(report.retention.deletion_failures, 1);
    assert_eq!(harness.scanner.deleted().len(), 2);
    assert!(!harness.store.saved_addresses().contains(&"10.0.0.5".to_string()));
}

#[tokio::test]
async fn test_pinned_and_running_hosts_survive_retention() {
    let scanner = stale_scanner().with_task("10.0.0.6", "AA:BB:CC:DD:EE:06", "task-6", true);
    let harness = CycleHarness::new(scanner, FakeDiscovery::new(), stale_history())
        .with_retention_days(0);

    let report = harness
        .run(&[job("10.0.0.5", "AA:BB:CC:DD:EE:FF")], &CycleOptions::default())
        .await
        .unwrap();

    assert!(report.retention.removed.is_empty());
    assert!(harness.scanner.deleted().is_empty());
    assert_eq!(harness.store.saved_addresses().len(), 2);
}

#[tokio::test]
async fn test_transport_failure_aborts_before_save() {
    let scanner = FakeScanner::new();
    scanner.go_offline("empty response");
    let harness = CycleHarness::new(scanner, FakeDiscovery::new(), stale_history());

    let err = harness.run_scan(&[]).await.unwrap_err();

    assert!(matches!(
        err,
        EngineError::Scanner(ScannerError::TransportUnavailable(_))
    ));
    assert_eq!(err.exit_code(), 66);
    assert!(harness.store.saved().is_none());
}

#[tokio::test]
async fn test_save_failure_is_reported_not_fatal() {
    let harness = CycleHarness::new(
        FakeScanner::new(),
        FakeDiscovery::new(),
        MemoryStore::new().failing_saves(),
    );

    let report = harness.run(&[job("10.0.0.1", "00:00:00:00:00:01")], &CycleOptions::default())
        .await
        .unwrap();

    assert!(!report.saved);
    assert_eq!(report.provision.tasks_created, 1);
}

#[tokio::test]
async fn test_state_carries_over_between_runs_on_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = JsonSnapshotStore::new(dir.path().join("hosts.json"));
    let scanner = FakeScanner::new();
    let discovery = FakeDiscovery::new();
    let engine = Engine::new(&scanner, &discovery, &store).with_settings(default_settings());
    let scan = CycleOptions {
        subnet: None,
        run_scan: true,
    };

    let first = engine
        .run_cycle(&[job("10.0.0.1", "aa:00:00:00:00:01")], &scan, clock())
        .await
        .unwrap();
    assert_eq!(first.started(), Some("10.0.0.1"));

    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved[0].mac.as_deref(), Some("AA:00:00:00:00:01"));
    assert_eq!(saved[0].last_attempt.as_deref(), Some(stamp_days_ago(0).as_str()));
    assert_eq!(saved[0].created.as_deref(), Some(stamp_days_ago(0).as_str()));

    let later = clock() + chrono::Duration::days(1);
    let second = engine.run_cycle(&[], &CycleOptions::default(), later).await.unwrap();
    let record = second.registry.get("10.0.0.1").unwrap();
    assert_eq!(record.last_attempt_at, clock());
    assert_eq!(record.created_at, clock());
    assert!(record.running);
}
