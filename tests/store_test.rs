//! Liveness store tests: the staleness rule and the in-memory store.

use std::time::Duration;

use fleetq::model::{AccountId, LivenessRecord, WorkerStatus};
use fleetq::store::memory::MemoryStore;
use fleetq::store::{AccountStatusCache, LivenessStore, is_online_at};

const ONLINE_TIMEOUT: Duration = Duration::from_secs(60);

fn record(name: &str, status: WorkerStatus) -> LivenessRecord {
    LivenessRecord {
        name: name.to_string(),
        server_address: "host-1".to_string(),
        status,
    }
}

// ---------------------------------------------------------------------------
// The staleness rule
// ---------------------------------------------------------------------------

#[test]
fn online_when_recent_and_not_offline() {
    let rec = record("w1", WorkerStatus::Online);
    assert!(is_online_at(Some(&rec), Some(0), 30, ONLINE_TIMEOUT));
    // Exactly at the boundary still counts as online.
    assert!(is_online_at(Some(&rec), Some(0), 60, ONLINE_TIMEOUT));
}

#[test]
fn offline_when_heartbeat_stale() {
    // Heartbeat at t=0, checked at t=61: 61 > 60s timeout.
    let rec = record("w1", WorkerStatus::Online);
    assert!(!is_online_at(Some(&rec), Some(0), 61, ONLINE_TIMEOUT));
}

#[test]
fn online_when_later_heartbeat_landed() {
    // Heartbeat at t=40, checked at t=61: 21s old.
    let rec = record("w1", WorkerStatus::Online);
    assert!(is_online_at(Some(&rec), Some(40), 61, ONLINE_TIMEOUT));
}

#[test]
fn offline_when_explicitly_marked() {
    // A fresh timestamp does not override an explicit offline status.
    let rec = record("w1", WorkerStatus::Offline);
    assert!(!is_online_at(Some(&rec), Some(100), 100, ONLINE_TIMEOUT));
}

#[test]
fn offline_when_either_entry_missing() {
    let rec = record("w1", WorkerStatus::Online);
    assert!(!is_online_at(None, Some(0), 1, ONLINE_TIMEOUT));
    assert!(!is_online_at(Some(&rec), None, 1, ONLINE_TIMEOUT));
    assert!(!is_online_at(None, None, 1, ONLINE_TIMEOUT));
}

// ---------------------------------------------------------------------------
// Memory store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_then_list_all_round_trips_exactly() {
    let store = MemoryStore::new();
    let rec = record("w1", WorkerStatus::Online);
    store.publish(&rec, 1234).await.unwrap();

    let all = store.list_all().await.unwrap();
    assert_eq!(all, vec![rec]);
    assert_eq!(store.last_seen("w1").await.unwrap(), Some(1234));
}

#[tokio::test]
async fn fresh_publish_reads_online() {
    let store = MemoryStore::new();
    store
        .publish(&record("w1", WorkerStatus::Online), fleetq::model::unix_now())
        .await
        .unwrap();
    assert!(store.is_online("w1", ONLINE_TIMEOUT).await.unwrap());
}

#[tokio::test]
async fn set_status_offline_preserves_last_seen() {
    let store = MemoryStore::new();
    store
        .publish(&record("w1", WorkerStatus::Online), 777)
        .await
        .unwrap();

    assert!(store.set_status("w1", WorkerStatus::Offline).await.unwrap());

    let rec = store.get("w1").await.unwrap().unwrap();
    assert_eq!(rec.status, WorkerStatus::Offline);
    // Shutdown intentionally leaves the timestamp alone.
    assert_eq!(store.last_seen("w1").await.unwrap(), Some(777));
    assert!(!store.is_online("w1", ONLINE_TIMEOUT).await.unwrap());
}

#[tokio::test]
async fn set_status_on_unknown_worker_is_a_noop() {
    let store = MemoryStore::new();
    assert!(!store.set_status("ghost", WorkerStatus::Offline).await.unwrap());
}

#[tokio::test]
async fn touch_refreshes_only_the_timestamp() {
    let store = MemoryStore::new();
    store
        .publish(&record("w1", WorkerStatus::Online), 10)
        .await
        .unwrap();
    store.touch("w1", 99).await.unwrap();

    assert_eq!(store.last_seen("w1").await.unwrap(), Some(99));
    assert_eq!(
        store.get("w1").await.unwrap().unwrap().status,
        WorkerStatus::Online
    );
}

#[tokio::test]
async fn remove_deletes_both_entries() {
    let store = MemoryStore::new();
    store
        .publish(&record("w1", WorkerStatus::Online), 1)
        .await
        .unwrap();
    store.remove("w1").await.unwrap();

    assert!(store.get("w1").await.unwrap().is_none());
    assert!(store.last_seen("w1").await.unwrap().is_none());
    assert!(store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn list_all_ignores_unrelated_keys() {
    let store = MemoryStore::new();
    store
        .publish(&record("w1", WorkerStatus::Online), 1)
        .await
        .unwrap();
    store
        .put_account_status(
            AccountId(7),
            &AccountStatusCache {
                status: "running".to_string(),
                is_connected: true,
                last_updated: 1,
            },
            Duration::from_secs(300),
        )
        .await
        .unwrap();

    assert_eq!(store.list_all().await.unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Account status cache
// ---------------------------------------------------------------------------

#[tokio::test]
async fn account_cache_round_trips() {
    let store = MemoryStore::new();
    let cache = AccountStatusCache {
        status: "running".to_string(),
        is_connected: true,
        last_updated: 42,
    };
    store
        .put_account_status(AccountId(3), &cache, Duration::from_secs(300))
        .await
        .unwrap();

    assert_eq!(store.account_status(AccountId(3)).await.unwrap(), Some(cache));
    assert_eq!(store.account_status(AccountId(4)).await.unwrap(), None);
}

#[tokio::test]
async fn account_cache_expires() {
    let store = MemoryStore::new();
    let cache = AccountStatusCache {
        status: "stopped".to_string(),
        is_connected: false,
        last_updated: 1,
    };
    store
        .put_account_status(AccountId(3), &cache, Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(store.account_status(AccountId(3)).await.unwrap(), None);
}
