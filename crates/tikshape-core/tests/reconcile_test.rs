#![allow(clippy::unwrap_used)]
// Reconciliation runs against the in-process mock router.
//
// Each test starts its own router on a loopback port and inspects its
// tables directly after driving the engine.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use secrecy::SecretString;

use tikshape_api::mock::MockRouter;
use tikshape_api::{Rate, RouterClient, SessionPool};
use tikshape_core::{
    AddressAction, BandwidthPackage, ClientBinding, ClientLookup, CoreError, MemoryStore,
    ParentAction, Reconciler, ShapingConfig, SyncOptions, SyncRequest, SyncStep,
};

const QUEUES: &str = "/queue/tree";
const MANGLE: &str = "/ip/firewall/mangle";
const ADDRESSES: &str = "/ip/address";

// ── Helpers ─────────────────────────────────────────────────────────

fn paket_10() -> BandwidthPackage {
    let mut package = BandwidthPackage::new(10, "PAKET-10", Rate::mega(10), Rate::mega(10));
    package.max_clients = 5;
    package
}

fn budi() -> ClientBinding {
    ClientBinding::new(1, "Budi", 10, "192.168.5.1/30".parse().unwrap()).with_interface("ether2")
}

async fn setup(store: MemoryStore) -> (MockRouter, Reconciler<MemoryStore>) {
    let router = MockRouter::start().await.unwrap();
    let client = RouterClient::new(Arc::new(SessionPool::default()), router.connection());
    let engine = Reconciler::new(client, store, ShapingConfig::default());
    (router, engine)
}

fn default_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.upsert_package(paket_10()).unwrap();
    store.upsert_client(budi()).unwrap();
    store
}

fn names(router: &MockRouter) -> Vec<String> {
    let mut names: Vec<String> = router
        .table(QUEUES)
        .iter()
        .filter_map(|r| r.get("name").map(str::to_owned))
        .collect();
    names.sort();
    names
}

fn field(router: &MockRouter, menu: &str, name: &str, key: &str) -> Option<String> {
    router
        .find(menu, "name", name)
        .and_then(|r| r.get(key).map(str::to_owned))
}

// ── Sync ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_paket_10_scenario() {
    let (router, engine) = setup(default_store()).await;

    let report = engine.sync_client(&ClientLookup::parse("Budi")).await.unwrap();
    assert_eq!(report.peer, "192.168.5.2");
    assert_eq!(report.address, AddressAction::Added);
    assert!(matches!(report.parents.download, ParentAction::Created { .. }));
    assert!(report.warnings.is_empty());

    assert_eq!(names(&router), ["Budi", "PAKET-10", "UP-Budi", "UP-PAKET-10"]);
    assert_eq!(field(&router, QUEUES, "PAKET-10", "max-limit").as_deref(), Some("10M"));
    assert_eq!(field(&router, QUEUES, "PAKET-10", "parent").as_deref(), Some("global"));

    assert_eq!(field(&router, QUEUES, "Budi", "parent").as_deref(), Some("PAKET-10"));
    assert_eq!(field(&router, QUEUES, "Budi", "max-limit").as_deref(), Some("10M"));
    assert_eq!(field(&router, QUEUES, "Budi", "limit-at").as_deref(), Some("2M"));
    assert_eq!(
        field(&router, QUEUES, "Budi", "packet-mark").as_deref(),
        Some("192.168.5.2")
    );
    assert_eq!(
        field(&router, QUEUES, "UP-Budi", "parent").as_deref(),
        Some("UP-PAKET-10")
    );
    assert_eq!(
        field(&router, QUEUES, "UP-Budi", "packet-mark").as_deref(),
        Some("UP-192.168.5.2")
    );

    let download = router.find(MANGLE, "dst-address", "192.168.5.2").unwrap();
    assert_eq!(download.get("new-packet-mark"), Some("192.168.5.2"));
    assert_eq!(download.get("chain"), Some("forward"));
    assert_eq!(download.get("passthrough"), Some("yes"));
    let upload = router.find(MANGLE, "src-address", "192.168.5.2").unwrap();
    assert_eq!(upload.get("new-packet-mark"), Some("UP-192.168.5.2"));
    assert!(upload.get("comment").unwrap().contains("Budi"));

    let binding = router.find(ADDRESSES, "address", "192.168.5.1/30").unwrap();
    assert_eq!(binding.get("interface"), Some("ether2"));
    assert_eq!(binding.get("comment"), Some("Budi"));
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let (router, engine) = setup(default_store()).await;
    let lookup = ClientLookup::Id(1);

    engine.sync_client(&lookup).await.unwrap();
    let second = engine.sync_client(&lookup).await.unwrap();

    assert_eq!(router.table(QUEUES).len(), 4);
    assert_eq!(router.table(MANGLE).len(), 2);
    assert_eq!(router.table(ADDRESSES).len(), 1);
    assert!(matches!(second.parents.upload, ParentAction::Updated { .. }));
    assert_eq!(second.address, AddressAction::Unchanged);
    assert_eq!(second.queues_removed, 2);
    assert_eq!(second.mangle_rules_replaced, 2);
}

#[tokio::test]
async fn test_rename_leaves_no_old_queues() {
    let (router, engine) = setup(default_store()).await;
    engine
        .sync_client_binding(&SyncRequest::new("C1", 10, "10.20.0.1/30"))
        .await
        .unwrap();

    let renamed = SyncRequest::new("C2", 10, "10.20.0.1/30").with_options(SyncOptions {
        previous_client_name: Some("C1".into()),
        ..SyncOptions::default()
    });
    engine.sync_client_binding(&renamed).await.unwrap();

    assert_eq!(names(&router), ["C2", "PAKET-10", "UP-C2", "UP-PAKET-10"]);
    assert_eq!(router.table(MANGLE).len(), 2);
}

#[tokio::test]
async fn test_address_change_retires_old_binding() {
    let (router, engine) = setup(default_store()).await;
    engine.sync_client(&ClientLookup::Id(1)).await.unwrap();

    let moved = SyncRequest::new("Budi", 10, "192.168.6.1/30").with_options(SyncOptions {
        previous_ip_cidr: Some("192.168.5.1/30".into()),
        ..SyncOptions::default()
    });
    let report = engine.sync_client_binding(&moved).await.unwrap();
    assert_eq!(report.peer, "192.168.6.2");

    let addresses: Vec<_> = router
        .table(ADDRESSES)
        .iter()
        .filter_map(|r| r.get("address").map(str::to_owned))
        .collect();
    assert_eq!(addresses, ["192.168.6.1/30"]);
    let marks: Vec<_> = router
        .table(MANGLE)
        .iter()
        .filter_map(|r| r.get("new-packet-mark").map(str::to_owned))
        .collect();
    assert_eq!(marks, ["192.168.6.2", "UP-192.168.6.2"]);
}

#[tokio::test]
async fn test_stale_marked_queue_is_replaced() {
    let (router, engine) = setup(default_store()).await;
    engine.sync_client(&ClientLookup::Id(1)).await.unwrap();
    // A queue left behind under another name still carries Budi's mark.
    router.insert(
        QUEUES,
        &[("name", "old-budi"), ("parent", "PAKET-10"), ("packet-mark", "192.168.5.2")],
    );

    let report = engine.sync_client(&ClientLookup::Id(1)).await.unwrap();
    assert_eq!(report.queues_removed, 3);
    assert!(router.find(QUEUES, "name", "old-budi").is_none());
}

#[tokio::test]
async fn test_burst_applied_when_both_directions_define_it() {
    let mut package = paket_10();
    for child in [&mut package.child_download, &mut package.child_upload] {
        child.burst_limit = Some(Rate::mega(15));
        child.burst_threshold = Some(Rate::mega(8));
        child.burst_time = Some("8s".into());
        child.queue_type = Some("pcq-download-default".into());
        child.priority = Some(4);
    }
    let store = MemoryStore::new();
    store.upsert_package(package).unwrap();
    store.upsert_client(budi()).unwrap();
    let (router, engine) = setup(store).await;

    engine.sync_client(&ClientLookup::Id(1)).await.unwrap();
    assert_eq!(field(&router, QUEUES, "Budi", "burst-limit").as_deref(), Some("15M"));
    assert_eq!(field(&router, QUEUES, "UP-Budi", "burst-time").as_deref(), Some("8s"));
    assert_eq!(field(&router, QUEUES, "Budi", "priority").as_deref(), Some("4"));
    assert_eq!(
        field(&router, QUEUES, "Budi", "queue").as_deref(),
        Some("pcq-download-default")
    );
}

#[tokio::test]
async fn test_overrides_and_cached_lookups_see_writes() {
    let (_router, engine) = setup(default_store()).await;
    engine.sync_client(&ClientLookup::Id(1)).await.unwrap();
    let before = engine.router().find_queue_by_name("Budi").await.unwrap().unwrap();
    assert_eq!(before.limit_at.as_deref(), Some("2M"));

    let request = SyncRequest::new("Budi", 10, "192.168.5.1/30").with_options(SyncOptions {
        download_limit: Some(Rate::mega(20)),
        download_limit_at: Some(Rate::mega(3)),
        ..SyncOptions::default()
    });
    engine.sync_client_binding(&request).await.unwrap();

    let after = engine.router().find_queue_by_name("Budi").await.unwrap().unwrap();
    assert_eq!(after.max_limit.as_deref(), Some("20M"));
    assert_eq!(after.limit_at.as_deref(), Some("3M"));
}

#[tokio::test]
async fn test_lookup_sync_with_operator_overrides() {
    let (router, engine) = setup(default_store()).await;

    let options = SyncOptions {
        interface: Some("bridge1".into()),
        upload_limit: Some(Rate::mega(5)),
        ..SyncOptions::default()
    };
    let report = engine
        .sync_client_with(&ClientLookup::parse("192.168.5.1"), options)
        .await
        .unwrap();
    assert_eq!(report.client_name, "Budi");
    assert_eq!(report.upload.max_limit, Rate::mega(5));
    assert_eq!(report.download.max_limit, Rate::mega(10));
    assert_eq!(
        router
            .find(ADDRESSES, "address", "192.168.5.1/30")
            .and_then(|r| r.get("interface").map(str::to_owned))
            .as_deref(),
        Some("bridge1")
    );
}

#[tokio::test]
async fn test_over_subscription_warns_but_syncs() {
    let mut package = paket_10();
    package.max_clients = 1;
    let store = MemoryStore::new();
    store.upsert_package(package).unwrap();
    store.upsert_client(budi()).unwrap();
    store
        .upsert_client(ClientBinding::new(2, "Sari", 10, "192.168.7.1/30".parse().unwrap()))
        .unwrap();
    let (_router, engine) = setup(store).await;

    let report = engine.sync_client(&ClientLookup::Id(1)).await.unwrap();
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.download.limit_at, None);
}

// ── Failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unknown_package_never_contacts_router() {
    let (router, engine) = setup(default_store()).await;
    let err = engine
        .sync_client_binding(&SyncRequest::new("Budi", 99, "192.168.5.1/30"))
        .await
        .unwrap_err();
    assert_eq!(err.step(), Some(SyncStep::LoadPackage));
    assert!(matches!(err.root(), CoreError::PackageNotFound { .. }));
    assert_eq!(router.login_count(), 0);
}

#[tokio::test]
async fn test_invalid_address_never_contacts_router() {
    let (router, engine) = setup(default_store()).await;
    for bad in ["192.168.5/30", "192.168.5.1/33"] {
        let err = engine
            .sync_client_binding(&SyncRequest::new("Budi", 10, bad))
            .await
            .unwrap_err();
        assert!(matches!(
            err.root(),
            CoreError::InvalidAddress { .. } | CoreError::InvalidPrefix { .. }
        ));
    }
    assert_eq!(router.login_count(), 0);
}

#[tokio::test]
async fn test_child_failure_is_partial() {
    let (router, engine) = setup(default_store()).await;
    engine.sync_client(&ClientLookup::Id(1)).await.unwrap();

    router.fail_next("/queue/tree/add", "failure: out of memory");
    let err = engine.sync_client(&ClientLookup::Id(1)).await.unwrap_err();
    assert!(err.is_partial());
    assert_eq!(err.step(), Some(SyncStep::CreateDownloadQueue));
    assert!(matches!(err.root(), CoreError::DeviceRejected { .. }));
    // Classification is already in place; the next run converges.
    assert_eq!(router.table(MANGLE).len(), 2);
    engine.sync_client(&ClientLookup::Id(1)).await.unwrap();
    assert_eq!(router.table(QUEUES).len(), 4);
}

#[tokio::test]
async fn test_sync_all_continues_past_failures() {
    let store = default_store();
    store
        .upsert_client(
            ClientBinding::new(2, "Sari", 10, "192.168.7.1/30".parse().unwrap())
                .with_interface("ether99"),
        )
        .unwrap();
    let (router, engine) = setup(store).await;

    let report = engine.sync_all().await.unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.synced.len(), 1);
    assert_eq!(report.synced[0].client_name, "Budi");
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].client_name, "Sari");
    assert_eq!(report.failed[0].step, Some(SyncStep::BindAddress));
    assert!(!report.failed[0].retryable);
    assert!(router.find(QUEUES, "name", "Sari").is_none());
}

#[tokio::test]
async fn test_sync_all_logs_in_once_with_bad_credentials() {
    let store = default_store();
    for (id, name, ip) in [(2, "Sari", "192.168.7.1/30"), (3, "Andi", "192.168.9.1/30")] {
        store
            .upsert_client(ClientBinding::new(id, name, 10, ip.parse().unwrap()))
            .unwrap();
    }
    let router = MockRouter::start().await.unwrap();
    let mut connection = router.connection();
    connection.password = SecretString::from("wrong".to_owned());
    let client = RouterClient::new(Arc::new(SessionPool::default()), connection);
    let engine = Reconciler::new(client, store, ShapingConfig::default());

    let report = engine.sync_all().await.unwrap();
    assert!(report.synced.is_empty());
    assert_eq!(report.failed.len(), 3);
    assert!(report.failed.iter().all(|f| !f.retryable));
    assert_eq!(router.rejected_login_count(), 1);
    assert_eq!(router.login_count(), 0);
}

// ── Packages ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_package_rename_moves_children() {
    let store = default_store();
    let (router, engine) = setup(store).await;
    engine.sync_client(&ClientLookup::Id(1)).await.unwrap();

    let mut renamed = paket_10();
    renamed.name = "PAKET-20".into();
    renamed.max_limit_download = Rate::mega(20);
    engine.store().upsert_package(renamed).unwrap();

    let report = engine.sync_package(10, Some("PAKET-10")).await.unwrap();
    assert!(matches!(
        report.download,
        ParentAction::Renamed { ref from, .. } if from == "PAKET-10"
    ));
    assert!(router.find(QUEUES, "name", "PAKET-10").is_none());
    assert_eq!(field(&router, QUEUES, "PAKET-20", "max-limit").as_deref(), Some("20M"));
    assert_eq!(field(&router, QUEUES, "Budi", "parent").as_deref(), Some("PAKET-20"));
    assert_eq!(field(&router, QUEUES, "UP-Budi", "parent").as_deref(), Some("UP-PAKET-20"));
}

#[tokio::test]
async fn test_upstream_parent_is_respected() {
    let mut package = paket_10();
    package.parent_download = "ether1".into();
    let store = MemoryStore::new();
    store.upsert_package(package.clone()).unwrap();
    let (router, engine) = setup(store).await;

    engine.ensure_package_parents(&package, None).await.unwrap();
    assert_eq!(field(&router, QUEUES, "PAKET-10", "parent").as_deref(), Some("ether1"));
    assert_eq!(field(&router, QUEUES, "UP-PAKET-10", "parent").as_deref(), Some("global"));
}

// ── Deletion ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_delete_client_keeps_package() {
    let (router, engine) = setup(default_store()).await;
    engine.sync_client(&ClientLookup::Id(1)).await.unwrap();

    let report = engine
        .delete_client_binding("Budi", "192.168.5.1/30")
        .await
        .unwrap();
    assert!(report.address_removed);
    assert_eq!(report.mangle_rules_removed, 2);
    assert_eq!(report.queues_removed, 2);

    assert_eq!(names(&router), ["PAKET-10", "UP-PAKET-10"]);
    assert!(router.table(MANGLE).is_empty());
    assert!(router.table(ADDRESSES).is_empty());

    let again = engine.delete_client(&ClientLookup::Id(1)).await.unwrap();
    assert!(again.is_noop());
}

#[tokio::test]
async fn test_delete_package_parents() {
    let (router, engine) = setup(default_store()).await;
    engine.ensure_package_parents(&paket_10(), None).await.unwrap();

    assert_eq!(engine.delete_package_parents("PAKET-10").await.unwrap(), 2);
    assert!(router.table(QUEUES).is_empty());
    assert_eq!(engine.delete_package_parents("PAKET-10").await.unwrap(), 0);
}
