//! Reconciler tests over the in-memory store and registry.

use std::sync::Arc;
use std::time::Duration;

use fleetq::model::{LivenessRecord, WorkerStatus, unix_now};
use fleetq::reconciler::{MemoryRegistry, Reconciler, WorkerRegistry};
use fleetq::store::LivenessStore;
use fleetq::store::memory::MemoryStore;

const ONLINE_TIMEOUT: Duration = Duration::from_secs(60);

struct Fixture {
    store: Arc<MemoryStore>,
    registry: Arc<MemoryRegistry>,
    reconciler: Reconciler,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(MemoryRegistry::new());
    let reconciler = Reconciler::new(store.clone(), registry.clone(), ONLINE_TIMEOUT);
    Fixture {
        store,
        registry,
        reconciler,
    }
}

async fn publish(store: &MemoryStore, name: &str, status: WorkerStatus, last_seen: i64) {
    store
        .publish(
            &LivenessRecord {
                name: name.to_string(),
                server_address: "host-1".to_string(),
                status,
            },
            last_seen,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn discovery_creates_rows_for_unseen_workers() {
    let f = fixture();
    publish(&f.store, "w1", WorkerStatus::Online, unix_now()).await;
    publish(&f.store, "w2", WorkerStatus::Online, unix_now()).await;

    let report = f.reconciler.reconcile().await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.created, 2);
    assert_eq!(report.updated, 0);

    let entry = f.registry.get_by_name("w1").await.unwrap().unwrap();
    assert!(entry.is_active);
    assert_eq!(entry.server_address, "host-1");
}

#[tokio::test]
async fn stale_worker_is_created_inactive() {
    let f = fixture();
    publish(&f.store, "w1", WorkerStatus::Online, unix_now() - 120).await;

    f.reconciler.reconcile().await.unwrap();

    let entry = f.registry.get_by_name("w1").await.unwrap().unwrap();
    assert!(!entry.is_active);
}

#[tokio::test]
async fn flag_flips_when_liveness_changes() {
    let f = fixture();
    publish(&f.store, "w1", WorkerStatus::Online, unix_now()).await;
    f.reconciler.reconcile().await.unwrap();
    assert!(f.registry.get_by_name("w1").await.unwrap().unwrap().is_active);

    // Worker shuts down: explicit offline, timestamp untouched.
    f.store
        .set_status("w1", WorkerStatus::Offline)
        .await
        .unwrap();
    let report = f.reconciler.reconcile().await.unwrap();
    assert_eq!(report.updated, 1);
    assert!(!f.registry.get_by_name("w1").await.unwrap().unwrap().is_active);

    // Worker comes back.
    publish(&f.store, "w1", WorkerStatus::Online, unix_now()).await;
    let report = f.reconciler.reconcile().await.unwrap();
    assert_eq!(report.updated, 1);
    assert!(f.registry.get_by_name("w1").await.unwrap().unwrap().is_active);
}

#[tokio::test]
async fn unchanged_snapshot_produces_zero_writes() {
    let f = fixture();
    publish(&f.store, "w1", WorkerStatus::Online, unix_now()).await;
    publish(&f.store, "w2", WorkerStatus::Offline, unix_now()).await;

    let first = f.reconciler.reconcile().await.unwrap();
    assert_eq!(first.created, 2);

    let second = f.reconciler.reconcile().await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 0);
}

#[tokio::test]
async fn rows_absent_from_the_store_keep_their_flag() {
    let f = fixture();
    // A row with no liveness entry at all — e.g. the store was wiped.
    f.registry.create("ghost", "host-9", true).await.unwrap();

    let report = f.reconciler.reconcile().await.unwrap();
    assert_eq!(report.scanned, 0);
    assert_eq!(report.updated, 0);
    // Absence is "unknown", not offline.
    assert!(f.registry.get_by_name("ghost").await.unwrap().unwrap().is_active);
}

#[tokio::test]
async fn delete_worker_removes_row_and_liveness_entries() {
    let f = fixture();
    publish(&f.store, "w1", WorkerStatus::Online, unix_now()).await;
    f.reconciler.reconcile().await.unwrap();

    let entry = f.registry.get_by_name("w1").await.unwrap().unwrap();
    f.reconciler.delete_worker(entry.id).await.unwrap();

    assert!(f.registry.get_by_name("w1").await.unwrap().is_none());
    assert!(f.store.get("w1").await.unwrap().is_none());
    assert!(f.store.last_seen("w1").await.unwrap().is_none());
}

#[tokio::test]
async fn delete_unknown_worker_is_not_found() {
    let f = fixture();
    let err = f
        .reconciler
        .delete_worker(fleetq::model::WorkerId(404))
        .await
        .unwrap_err();
    assert!(matches!(err, fleetq::error::Error::NotFound(_)));
}
