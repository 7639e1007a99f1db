//! Task dispatcher tests over in-memory queues.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use fleetq::dispatch::{QueuedMessage, TaskDispatcher, TaskQueue, VISIBILITY_TIMEOUT};
use fleetq::dispatch::memory::MemoryQueue;
use fleetq::error::Error;
use fleetq::model::{
    LivenessRecord, OP_PING, OP_START_ACCOUNT, OpOutcome, TaskRequest, TaskResponse, WorkerStatus,
    unix_now,
};
use fleetq::store::LivenessStore;
use fleetq::store::memory::MemoryStore;

const ONLINE_TIMEOUT: Duration = Duration::from_secs(60);

fn dispatcher() -> (TaskDispatcher, Arc<MemoryQueue>, Arc<MemoryStore>) {
    let queue = Arc::new(MemoryQueue::new());
    let store = Arc::new(MemoryStore::new());
    let dispatcher = TaskDispatcher::new(queue.clone(), store.clone(), ONLINE_TIMEOUT);
    (dispatcher, queue, store)
}

async fn publish_online(store: &MemoryStore, name: &str) {
    store
        .publish(
            &LivenessRecord {
                name: name.to_string(),
                server_address: "host-1".to_string(),
                status: WorkerStatus::Online,
            },
            unix_now(),
        )
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// Queue semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queue_is_fifo_and_ack_retires() {
    let queue = MemoryQueue::new();
    queue.ensure("w1").await.unwrap();
    queue.send("w1", &json!({"n": 1})).await.unwrap();
    queue.send("w1", &json!({"n": 2})).await.unwrap();

    let first = queue.receive("w1", VISIBILITY_TIMEOUT).await.unwrap().unwrap();
    assert_eq!(first.payload["n"], 1);
    queue.ack("w1", first.msg_id).await.unwrap();

    let second = queue.receive("w1", VISIBILITY_TIMEOUT).await.unwrap().unwrap();
    assert_eq!(second.payload["n"], 2);
}

#[tokio::test]
async fn received_message_is_invisible_until_timeout() {
    let queue = MemoryQueue::new();
    queue.send("w1", &json!({"n": 1})).await.unwrap();

    let vt = Duration::from_millis(50);
    let msg = queue.receive("w1", vt).await.unwrap().unwrap();
    // Hidden while in flight.
    assert!(queue.receive("w1", vt).await.unwrap().is_none());

    // Unacked past the visibility timeout: redelivered.
    tokio::time::sleep(Duration::from_millis(70)).await;
    let redelivered = queue.receive("w1", vt).await.unwrap().unwrap();
    assert_eq!(redelivered.msg_id, msg.msg_id);
}

#[tokio::test]
async fn purge_drops_the_queue_and_contents() {
    let queue = MemoryQueue::new();
    queue.send("w1", &json!({"n": 1})).await.unwrap();
    queue.purge("w1").await.unwrap();
    assert!(queue.receive("w1", VISIBILITY_TIMEOUT).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_without_wait_enqueues_and_returns_pending() {
    let (dispatcher, queue, _store) = dispatcher();

    let result = dispatcher
        .submit("w1", OP_START_ACCOUNT, json!({"account_id": 5}), None)
        .await
        .unwrap();
    assert!(result.is_none());

    let msg = queue.receive("w1", VISIBILITY_TIMEOUT).await.unwrap().unwrap();
    let request: TaskRequest = serde_json::from_value(msg.payload).unwrap();
    assert_eq!(request.op, OP_START_ACCOUNT);
    assert_eq!(request.args["account_id"], 5);
    assert!(request.reply_to.is_none());
}

#[tokio::test(start_paused = true)]
async fn submit_to_offline_worker_times_out_with_dispatch_timeout() {
    let (dispatcher, queue, _store) = dispatcher();

    // Nobody consumes w1's queue — the offline-worker case.
    let err = dispatcher
        .submit(
            "w1",
            OP_START_ACCOUNT,
            json!({"account_id": 5}),
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap_err();

    match err {
        Error::DispatchTimeout { worker, op, waited_ms } => {
            assert_eq!(worker, "w1");
            assert_eq!(op, OP_START_ACCOUNT);
            assert_eq!(waited_ms, 5000);
        }
        other => panic!("expected DispatchTimeout, got {other}"),
    }

    // The request is still queued for the worker to pick up later.
    assert!(queue.receive("w1", VISIBILITY_TIMEOUT).await.unwrap().is_some());
}

#[tokio::test]
async fn submit_with_wait_returns_the_worker_outcome() {
    let (dispatcher, queue, _store) = dispatcher();

    // Hand-rolled responder standing in for a worker agent.
    let responder_queue = queue.clone();
    tokio::spawn(async move {
        loop {
            if let Some(msg) = responder_queue
                .receive("w1", VISIBILITY_TIMEOUT)
                .await
                .unwrap()
            {
                let request: TaskRequest = serde_json::from_value(msg.payload).unwrap();
                let response = TaskResponse {
                    request_id: request.id,
                    outcome: OpOutcome::success("done"),
                };
                let reply = request.reply_to.expect("waited request carries reply_to");
                responder_queue
                    .send(&reply, &serde_json::to_value(&response).unwrap())
                    .await
                    .unwrap();
                responder_queue.ack("w1", msg.msg_id).await.unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let outcome = dispatcher
        .submit("w1", OP_PING, json!({}), Some(Duration::from_secs(2)))
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.message, "done");
}

// ---------------------------------------------------------------------------
// Worker status / broadcast operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn check_worker_status_without_record_is_offline() {
    let (dispatcher, queue, _store) = dispatcher();
    assert_eq!(
        dispatcher.check_worker_status("ghost").await.unwrap(),
        WorkerStatus::Offline
    );
    // No record means no ping either.
    assert!(queue.receive("ghost", VISIBILITY_TIMEOUT).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn check_worker_status_marks_offline_when_ping_times_out() {
    let (dispatcher, _queue, store) = dispatcher();
    publish_online(&store, "w1").await;

    let status = dispatcher.check_worker_status("w1").await.unwrap();
    assert_eq!(status, WorkerStatus::Offline);
    assert_eq!(
        store.get("w1").await.unwrap().unwrap().status,
        WorkerStatus::Offline
    );
}

#[tokio::test]
async fn list_active_workers_applies_the_staleness_rule() {
    let (dispatcher, _queue, store) = dispatcher();

    publish_online(&store, "fresh").await;
    store
        .publish(
            &LivenessRecord {
                name: "stale".to_string(),
                server_address: "host-2".to_string(),
                status: WorkerStatus::Online,
            },
            unix_now() - 120,
        )
        .await
        .unwrap();
    store
        .publish(
            &LivenessRecord {
                name: "gone".to_string(),
                server_address: "host-3".to_string(),
                status: WorkerStatus::Offline,
            },
            unix_now(),
        )
        .await
        .unwrap();

    let active = dispatcher.list_active_workers().await.unwrap();
    let names: Vec<&str> = active.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["fresh"]);
}

// ---------------------------------------------------------------------------
// Envelope shape
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reply_queue_names_are_unique_per_request() {
    let (dispatcher, queue, _store) = dispatcher();

    for _ in 0..2 {
        // Fire-and-forget keeps no reply queue; a waited submit does.
        dispatcher
            .submit("w1", OP_PING, json!({}), None)
            .await
            .unwrap();
    }

    let first: TaskRequest = serde_json::from_value(
        queue
            .receive("w1", VISIBILITY_TIMEOUT)
            .await
            .unwrap()
            .unwrap()
            .payload,
    )
    .unwrap();
    let second: TaskRequest = serde_json::from_value(
        queue
            .receive("w1", VISIBILITY_TIMEOUT)
            .await
            .unwrap()
            .unwrap()
            .payload,
    )
    .unwrap();
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn queued_message_payload_survives_round_trip() {
    let queue = MemoryQueue::new();
    let payload = json!({"op": "worker.ping", "args": {"nested": [1, 2, 3]}});
    queue.send("w1", &payload).await.unwrap();

    let QueuedMessage { payload: got, .. } =
        queue.receive("w1", VISIBILITY_TIMEOUT).await.unwrap().unwrap();
    assert_eq!(got, payload);
}
