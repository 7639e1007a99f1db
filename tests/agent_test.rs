//! Worker agent tests: identity persistence, operation handling, and
//! the full dispatch round trip.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use fleetq::agent::{WorkerAgent, identity};
use fleetq::dispatch::{TaskDispatcher, TaskQueue, VISIBILITY_TIMEOUT};
use fleetq::dispatch::memory::MemoryQueue;
use fleetq::error::Result;
use fleetq::model::{
    AccountId, AccountSession, CONTROL_QUEUE, OP_ADD_ACCOUNT, OP_GET_ACCOUNT_STATUS,
    OP_GET_ALL_ACCOUNTS_STATUS, OP_PING, OP_REGISTER, OP_START_ACCOUNT, OP_STOP_ACCOUNT,
    TaskRequest, WorkerIdentity, WorkerStatus,
};
use fleetq::runtime::AccountRuntime;
use fleetq::runtime::connector::{Connector, NetworkSession};
use fleetq::store::LivenessStore;
use fleetq::store::memory::MemoryStore;

const ONLINE_TIMEOUT: Duration = Duration::from_secs(60);
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct StubConnector;

#[async_trait]
impl Connector for StubConnector {
    async fn connect(&self, _session: &AccountSession) -> Result<Box<dyn NetworkSession>> {
        Ok(Box::new(StubSession))
    }
}

struct StubSession;

#[async_trait]
impl NetworkSession for StubSession {
    fn is_authorized(&self) -> bool {
        true
    }

    fn export_credential(&self) -> Option<String> {
        None
    }

    async fn poll_updates(&mut self) -> Result<u64> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(0)
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

struct Harness {
    agent: Arc<WorkerAgent>,
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
}

fn harness(name: &str) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let runtime = Arc::new(AccountRuntime::new(Arc::new(StubConnector)));
    let agent = Arc::new(WorkerAgent::new(
        WorkerIdentity {
            name: name.to_string(),
            server_address: "host-1".to_string(),
        },
        store.clone(),
        queue.clone(),
        runtime,
        HEARTBEAT_PERIOD,
    ));
    Harness {
        agent,
        store,
        queue,
    }
}

fn account_payload(id: i64) -> serde_json::Value {
    json!({
        "account_id": id,
        "phone": format!("+1555000{id:04}"),
        "api_id": "12345",
        "api_hash": "abcdef",
        "session_credential": "token",
    })
}

// ---------------------------------------------------------------------------
// Identity persistence
// ---------------------------------------------------------------------------

#[test]
fn identity_is_generated_once_and_reused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("worker.env");

    let first = identity::load_or_generate(&path, "host-1").unwrap();
    assert!(first.name.starts_with("worker_"));

    let second = identity::load_or_generate(&path, "host-1").unwrap();
    assert_eq!(first.name, second.name);

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains(&format!("WORKER_NAME={}", first.name)));
}

#[test]
fn identity_respects_an_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("worker.env");
    std::fs::write(&path, "# worker settings\nWORKER_NAME=worker_fixed\n").unwrap();

    let loaded = identity::load_or_generate(&path, "host-2").unwrap();
    assert_eq!(loaded.name, "worker_fixed");
    assert_eq!(loaded.server_address, "host-2");
}

#[test]
fn identity_appends_to_a_file_missing_the_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("worker.env");
    std::fs::write(&path, "SERVER_ADDRESS=host-9\n").unwrap();

    let generated = identity::load_or_generate(&path, "host-9").unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("SERVER_ADDRESS=host-9"));
    assert!(content.contains(&format!("WORKER_NAME={}", generated.name)));
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn on_start_publishes_online_and_announces() {
    let h = harness("w1");
    h.agent.on_start().await.unwrap();

    let record = h.store.get("w1").await.unwrap().unwrap();
    assert_eq!(record.status, WorkerStatus::Online);
    assert!(h.store.last_seen("w1").await.unwrap().is_some());
    assert!(h.store.is_online("w1", ONLINE_TIMEOUT).await.unwrap());

    let msg = h
        .queue
        .receive(CONTROL_QUEUE, VISIBILITY_TIMEOUT)
        .await
        .unwrap()
        .unwrap();
    let announce: TaskRequest = serde_json::from_value(msg.payload).unwrap();
    assert_eq!(announce.op, OP_REGISTER);
    assert_eq!(announce.args["worker_name"], "w1");
    assert!(announce.reply_to.is_none());
}

#[tokio::test]
async fn shutdown_marks_offline_without_advancing_last_seen() {
    let h = harness("w1");
    h.agent.on_start().await.unwrap();
    let seen_at_start = h.store.last_seen("w1").await.unwrap().unwrap();

    h.agent.on_shutdown().await.unwrap();

    let record = h.store.get("w1").await.unwrap().unwrap();
    assert_eq!(record.status, WorkerStatus::Offline);
    assert_eq!(h.store.last_seen("w1").await.unwrap(), Some(seen_at_start));
    // Explicit offline wins even though the timestamp is fresh.
    assert!(!h.store.is_online("w1", ONLINE_TIMEOUT).await.unwrap());
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_returns_pong_and_refreshes_liveness() {
    let h = harness("w1");
    let outcome = h.agent.execute(OP_PING, &json!({})).await;

    assert!(outcome.is_success());
    let data = outcome.data.unwrap();
    assert_eq!(data["status"], "pong");
    assert_eq!(data["worker"], "w1");
    assert!(data["time"].as_i64().is_some());

    // Ping rewrites the heartbeat as a side effect.
    assert!(h.store.is_online("w1", ONLINE_TIMEOUT).await.unwrap());
}

#[tokio::test]
async fn unknown_operation_returns_an_error_outcome() {
    let h = harness("w1");
    let outcome = h.agent.execute("worker.reboot", &json!({})).await;
    assert!(!outcome.is_success());
    assert!(outcome.message.contains("worker.reboot"));
}

#[tokio::test]
async fn account_lifecycle_through_operations() {
    let h = harness("w1");

    let added = h.agent.execute(OP_ADD_ACCOUNT, &account_payload(1)).await;
    assert!(added.is_success());

    let duplicate = h.agent.execute(OP_ADD_ACCOUNT, &account_payload(1)).await;
    assert!(!duplicate.is_success());

    let status = h
        .agent
        .execute(OP_GET_ACCOUNT_STATUS, &json!({"account_id": 1}))
        .await;
    assert!(status.is_success());
    let data = status.data.unwrap();
    assert_eq!(data["is_running"], false);
    assert_eq!(data["is_connected"], false);

    let started = h
        .agent
        .execute(OP_START_ACCOUNT, &json!({"account_id": 1}))
        .await;
    assert!(started.is_success());

    let running = h
        .agent
        .execute(OP_GET_ACCOUNT_STATUS, &json!({"account_id": 1}))
        .await;
    assert_eq!(running.data.unwrap()["is_running"], true);

    let stopped = h
        .agent
        .execute(OP_STOP_ACCOUNT, &json!({"account_id": 1}))
        .await;
    assert!(stopped.is_success());

    let stopped_again = h
        .agent
        .execute(OP_STOP_ACCOUNT, &json!({"account_id": 1}))
        .await;
    assert!(!stopped_again.is_success());
}

#[tokio::test]
async fn missing_account_id_is_an_error_outcome() {
    let h = harness("w1");
    let outcome = h.agent.execute(OP_START_ACCOUNT, &json!({})).await;
    assert!(!outcome.is_success());
    assert!(outcome.message.contains("account_id"));
}

#[tokio::test]
async fn all_accounts_status_maps_by_id() {
    let h = harness("w1");
    h.agent.execute(OP_ADD_ACCOUNT, &account_payload(1)).await;
    h.agent.execute(OP_ADD_ACCOUNT, &account_payload(2)).await;

    let outcome = h.agent.execute(OP_GET_ALL_ACCOUNTS_STATUS, &json!({})).await;
    assert!(outcome.is_success());
    let data = outcome.data.unwrap();
    assert!(data.get("1").is_some());
    assert!(data.get("2").is_some());
}

#[tokio::test]
async fn malformed_requests_are_discarded_and_acked() {
    let h = harness("w1");
    h.queue.send("w1", &json!({"not": "a request"})).await.unwrap();

    assert!(h.agent.consume_once().await.unwrap());
    // Nothing left to redeliver.
    assert!(!h.agent.consume_once().await.unwrap());
}

// ---------------------------------------------------------------------------
// Full round trip through the dispatcher
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispatcher_round_trip_against_a_running_agent() {
    let h = harness("w1");
    let queue: Arc<dyn TaskQueue> = h.queue.clone();
    let store: Arc<dyn LivenessStore> = h.store.clone();
    let dispatcher = TaskDispatcher::new(queue, store, ONLINE_TIMEOUT);

    let agent = h.agent.clone();
    let running = tokio::spawn(async move { agent.run().await });

    let outcome = dispatcher
        .submit("w1", OP_PING, json!({}), Some(Duration::from_secs(5)))
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.data.unwrap()["worker"], "w1");

    let added = dispatcher
        .submit(
            "w1",
            OP_ADD_ACCOUNT,
            account_payload(7),
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap()
        .unwrap();
    assert!(added.is_success());

    let status = dispatcher
        .account_status("w1", AccountId(7), Duration::from_secs(5))
        .await
        .unwrap();
    assert!(status.is_success());

    // The status query refreshed the cache entry.
    let cached = h.store.account_status(AccountId(7)).await.unwrap().unwrap();
    assert_eq!(cached.status, "stopped");

    h.agent.shutdown();
    running.await.unwrap().unwrap();

    // The run loop's shutdown path marked the worker offline.
    assert_eq!(
        h.store.get("w1").await.unwrap().unwrap().status,
        WorkerStatus::Offline
    );
}
