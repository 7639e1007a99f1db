//! Task dispatcher: deliver a named operation to a specific worker's
//! inbound queue and optionally block for the result.
//!
//! Delivery is at-most-once-observed-by-caller. A message for an
//! offline worker sits queued until that worker returns (or forever),
//! so callers pair [`TaskDispatcher::submit`] with a liveness
//! pre-check and always supply a timeout when they need an answer.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use serde_json::json;
use tokio::time::Instant;
use tracing::{Instrument, debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    AccountId, AccountSnapshot, LivenessRecord, OP_GET_ACCOUNT_STATUS, OP_PING, OpOutcome,
    TaskRequest, TaskResponse, WorkerStatus, unix_now,
};
use crate::store::{ACCOUNT_STATUS_TTL, AccountStatusCache, LivenessStore};
use crate::telemetry::metrics;
use crate::telemetry::dispatch::{record_dispatch_outcome, start_dispatch_span};

/// How long a received message stays invisible before redelivery.
pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(60);

/// Active-ping wait used by [`TaskDispatcher::check_worker_status`].
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll cadence while waiting on a reply queue.
const REPLY_POLL: Duration = Duration::from_millis(100);

/// A message read from a task queue.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub msg_id: i64,
    pub payload: serde_json::Value,
}

/// Named FIFO queues with visibility-timeout redelivery. Implemented
/// by pgmq on [`crate::db::Db`] and by [`memory::MemoryQueue`]. Queue
/// names are worker names, the shared control queue, and short-lived
/// reply queues — all valid pgmq identifiers.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Create the queue if it does not exist (idempotent).
    async fn ensure(&self, queue: &str) -> Result<()>;

    async fn send(&self, queue: &str, payload: &serde_json::Value) -> Result<i64>;

    /// Read the next message, hiding it for `visibility_timeout`.
    /// Returns None when the queue is empty or absent.
    async fn receive(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<QueuedMessage>>;

    /// Retire a received message for good.
    async fn ack(&self, queue: &str, msg_id: i64) -> Result<()>;

    /// Drop a queue and everything in it. Used for reply queues.
    async fn purge(&self, queue: &str) -> Result<()>;
}

/// Remote invocation front-end over a [`TaskQueue`] plus the liveness
/// store for the scan-backed operations.
pub struct TaskDispatcher {
    queue: Arc<dyn TaskQueue>,
    store: Arc<dyn LivenessStore>,
    online_timeout: Duration,
}

impl TaskDispatcher {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        store: Arc<dyn LivenessStore>,
        online_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            online_timeout,
        }
    }

    /// Enqueue `op` for `worker`. With `wait` set, block until the
    /// reply arrives or fail with [`Error::DispatchTimeout`] — an
    /// ambiguous outcome, not a failure: the worker may still execute
    /// the operation. Without `wait`, returns None right after the
    /// enqueue.
    pub async fn submit(
        &self,
        worker: &str,
        op: &str,
        args: serde_json::Value,
        wait: Option<Duration>,
    ) -> Result<Option<OpOutcome>> {
        let span = start_dispatch_span(op, worker);
        async {
            let request_id = Uuid::new_v4();
            let reply_to = wait.map(|_| reply_queue_name(request_id));
            if let Some(ref reply) = reply_to {
                self.queue.ensure(reply).await?;
            }

            let request = TaskRequest {
                id: request_id,
                op: op.to_string(),
                args,
                reply_to: reply_to.clone(),
            };
            self.queue.ensure(worker).await?;
            self.queue
                .send(worker, &serde_json::to_value(&request)?)
                .await?;
            metrics::dispatch_submitted().add(1, &[KeyValue::new("op", op.to_string())]);

            let Some(wait) = wait else {
                record_dispatch_outcome("pending");
                return Ok(None);
            };
            let Some(reply) = reply_to else {
                return Err(Error::Other("reply queue missing for waited submit".into()));
            };

            let started = Instant::now();
            loop {
                if let Some(msg) = self.queue.receive(&reply, VISIBILITY_TIMEOUT).await? {
                    self.queue.ack(&reply, msg.msg_id).await?;
                    if let Err(e) = self.queue.purge(&reply).await {
                        debug!(queue = %reply, "reply queue cleanup failed: {e}");
                    }
                    let response: TaskResponse = serde_json::from_value(msg.payload)?;
                    let elapsed = started.elapsed();
                    metrics::dispatch_duration_ms().record(
                        elapsed.as_millis() as f64,
                        &[KeyValue::new("op", op.to_string())],
                    );
                    record_dispatch_outcome(if response.outcome.is_success() {
                        "success"
                    } else {
                        "error"
                    });
                    return Ok(Some(response.outcome));
                }

                if started.elapsed() >= wait {
                    if let Err(e) = self.queue.purge(&reply).await {
                        debug!(queue = %reply, "reply queue cleanup failed: {e}");
                    }
                    metrics::dispatch_timeouts().add(1, &[KeyValue::new("op", op.to_string())]);
                    record_dispatch_outcome("timeout");
                    return Err(Error::DispatchTimeout {
                        worker: worker.to_string(),
                        op: op.to_string(),
                        waited_ms: wait.as_millis() as u64,
                    });
                }

                tokio::time::sleep(REPLY_POLL).await;
            }
        }
        .instrument(span)
        .await
    }

    /// The `worker.status` operation: passive staleness check, then an
    /// active ping. A pong refreshes last-seen and flips the stored
    /// status online; anything else marks the blob offline.
    pub async fn check_worker_status(&self, name: &str) -> Result<WorkerStatus> {
        if self.store.get(name).await?.is_none() {
            return Ok(WorkerStatus::Offline);
        }

        match self.submit(name, OP_PING, json!({}), Some(PING_TIMEOUT)).await {
            Ok(Some(outcome)) if outcome.is_success() => {
                self.store.touch(name, unix_now()).await?;
                self.store.set_status(name, WorkerStatus::Online).await?;
                Ok(WorkerStatus::Online)
            }
            Ok(_) | Err(Error::DispatchTimeout { .. }) => {
                self.store.set_status(name, WorkerStatus::Offline).await?;
                Ok(WorkerStatus::Offline)
            }
            Err(e) => Err(e),
        }
    }

    /// The `worker.list_active` operation: every worker passing the
    /// staleness rule. A store scan — never a per-worker round-trip.
    pub async fn list_active_workers(&self) -> Result<Vec<LivenessRecord>> {
        let mut active = Vec::new();
        for record in self.store.list_all().await? {
            if self.store.is_online(&record.name, self.online_timeout).await? {
                active.push(record);
            }
        }
        Ok(active)
    }

    /// Whether a worker passes the staleness rule right now. The
    /// pre-check callers run before a waited submit.
    pub async fn is_online(&self, name: &str) -> Result<bool> {
        self.store.is_online(name, self.online_timeout).await
    }

    /// Fetch one account's status from its worker and refresh the
    /// cached entry on success.
    pub async fn account_status(
        &self,
        worker: &str,
        account_id: AccountId,
        wait: Duration,
    ) -> Result<OpOutcome> {
        let outcome = self
            .submit(
                worker,
                OP_GET_ACCOUNT_STATUS,
                json!({ "account_id": account_id }),
                Some(wait),
            )
            .await?
            .ok_or_else(|| Error::Other("waited submit returned no outcome".into()))?;

        if outcome.is_success()
            && let Some(snapshot) = outcome
                .data
                .as_ref()
                .and_then(|data| serde_json::from_value::<AccountSnapshot>(data.clone()).ok())
        {
            let cache = AccountStatusCache {
                status: if snapshot.is_running {
                    "running".to_string()
                } else {
                    "stopped".to_string()
                },
                is_connected: snapshot.is_connected,
                last_updated: unix_now(),
            };
            if let Err(e) = self
                .store
                .put_account_status(account_id, &cache, ACCOUNT_STATUS_TTL)
                .await
            {
                warn!(%account_id, "account status cache write failed: {e}");
            }
        }

        Ok(outcome)
    }
}

fn reply_queue_name(request_id: Uuid) -> String {
    format!("reply_{}", request_id.simple())
}
