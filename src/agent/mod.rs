//! Worker agent: one process identity publishing heartbeats and
//! serving remote operations from its inbound queue.
//!
//! The agent consumes its own queue plus the shared control queue,
//! executes each named operation against its account runtime, and
//! answers on the request's reply queue when the caller is waiting.

pub mod identity;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::{TaskQueue, VISIBILITY_TIMEOUT};
use crate::error::Result;
use crate::model::{
    AccountId, AccountSession, CONTROL_QUEUE, LivenessRecord, OP_ADD_ACCOUNT,
    OP_GET_ACCOUNT_STATUS, OP_GET_ALL_ACCOUNTS_STATUS, OP_HEARTBEAT, OP_PING, OP_REGISTER,
    OP_REMOVE_ACCOUNT, OP_START_ACCOUNT, OP_STOP_ACCOUNT, OP_STOP_ALL_ACCOUNTS, OpOutcome,
    TaskRequest, TaskResponse, WorkerIdentity, WorkerStatus, unix_now,
};
use crate::runtime::AccountRuntime;
use crate::store::LivenessStore;
use crate::telemetry::metrics;

/// Idle delay between queue polls when nothing is pending.
const IDLE_POLL: Duration = Duration::from_millis(250);

pub struct WorkerAgent {
    identity: WorkerIdentity,
    store: Arc<dyn LivenessStore>,
    queue: Arc<dyn TaskQueue>,
    runtime: Arc<AccountRuntime>,
    heartbeat_period: Duration,
    shutdown: Arc<Notify>,
}

impl WorkerAgent {
    pub fn new(
        identity: WorkerIdentity,
        store: Arc<dyn LivenessStore>,
        queue: Arc<dyn TaskQueue>,
        runtime: Arc<AccountRuntime>,
        heartbeat_period: Duration,
    ) -> Self {
        Self {
            identity,
            store,
            queue,
            runtime,
            heartbeat_period,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Ask the run loop to exit. Safe to call from another task.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Publish the initial online record, make sure both inbound
    /// queues exist, and announce on the control queue. The announce
    /// is a latency optimization only — scan-based discovery by the
    /// reconciler is authoritative.
    pub async fn on_start(&self) -> Result<()> {
        self.publish_online().await?;
        self.queue.ensure(&self.identity.name).await?;
        self.queue.ensure(CONTROL_QUEUE).await?;

        let announce = TaskRequest {
            id: Uuid::new_v4(),
            op: OP_REGISTER.to_string(),
            args: json!({
                "worker_name": self.identity.name,
                "server_address": self.identity.server_address,
            }),
            reply_to: None,
        };
        if let Err(e) = self
            .queue
            .send(CONTROL_QUEUE, &serde_json::to_value(&announce)?)
            .await
        {
            warn!(worker = %self.identity.name, "register announce failed: {e}");
        }

        info!(
            worker = %self.identity.name,
            server = %self.identity.server_address,
            "worker registered"
        );
        Ok(())
    }

    async fn publish_online(&self) -> Result<()> {
        let record = LivenessRecord {
            name: self.identity.name.clone(),
            server_address: self.identity.server_address.clone(),
            status: WorkerStatus::Online,
        };
        self.store.publish(&record, unix_now()).await?;
        metrics::heartbeats_published().add(
            1,
            &[KeyValue::new("worker", self.identity.name.clone())],
        );
        Ok(())
    }

    /// Rewrite the liveness record and refresh last-seen. Side effect
    /// only; nothing consumes the return value.
    pub async fn heartbeat(&self) -> Result<()> {
        self.publish_online().await?;
        debug!(worker = %self.identity.name, "heartbeat published");
        Ok(())
    }

    /// Heartbeat plus an explicit pong, for active liveness probes.
    pub async fn ping(&self) -> Result<OpOutcome> {
        self.publish_online().await?;
        Ok(OpOutcome::success_with(
            "pong",
            json!({
                "status": "pong",
                "worker": self.identity.name,
                "time": unix_now(),
            }),
        ))
    }

    /// Stop every account (best-effort), then flip the stored status
    /// to offline WITHOUT advancing last-seen, so stale-offline
    /// detection and the explicit flag agree.
    pub async fn on_shutdown(&self) -> Result<()> {
        self.runtime.stop_all_accounts().await;
        match self
            .store
            .set_status(&self.identity.name, WorkerStatus::Offline)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(worker = %self.identity.name, "no liveness record to mark offline"),
            Err(e) => warn!(worker = %self.identity.name, "offline publish failed: {e}"),
        }
        info!(worker = %self.identity.name, "worker shut down, all accounts stopped");
        Ok(())
    }

    /// Drive heartbeats and queue consumption until shutdown.
    pub async fn run(&self) -> Result<()> {
        self.on_start().await?;

        let mut heartbeat = tokio::time::interval(self.heartbeat_period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(worker = %self.identity.name, "shutdown requested");
                    break;
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = self.heartbeat().await {
                        warn!(worker = %self.identity.name, "heartbeat failed: {e}");
                    }
                }
                consumed = self.consume_once() => match consumed {
                    Ok(true) => {}
                    Ok(false) => tokio::time::sleep(IDLE_POLL).await,
                    Err(e) => {
                        warn!(worker = %self.identity.name, "queue consumption error: {e}");
                        tokio::time::sleep(IDLE_POLL).await;
                    }
                }
            }
        }

        self.on_shutdown().await
    }

    /// Pull and execute one request from the per-worker or control
    /// queue. Returns whether anything was processed.
    pub async fn consume_once(&self) -> Result<bool> {
        for queue in [self.identity.name.as_str(), CONTROL_QUEUE] {
            let Some(msg) = self.queue.receive(queue, VISIBILITY_TIMEOUT).await? else {
                continue;
            };

            match serde_json::from_value::<TaskRequest>(msg.payload.clone()) {
                Ok(request) => {
                    debug!(queue, op = %request.op, "request received");
                    let outcome = self.execute(&request.op, &request.args).await;
                    if let Some(reply) = &request.reply_to {
                        let response = TaskResponse {
                            request_id: request.id,
                            outcome,
                        };
                        if let Err(e) = self
                            .queue
                            .send(reply, &serde_json::to_value(&response)?)
                            .await
                        {
                            // Caller gave up and dropped its reply queue.
                            debug!(queue = %reply, "reply dropped: {e}");
                        }
                    }
                }
                Err(e) => {
                    warn!(queue, "discarding malformed request: {e}");
                }
            }

            self.queue.ack(queue, msg.msg_id).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Execute one named operation against this worker's runtime.
    /// Expected failures come back as error outcomes, never as Err
    /// across this boundary.
    pub async fn execute(&self, op: &str, args: &serde_json::Value) -> OpOutcome {
        match op {
            OP_PING => match self.ping().await {
                Ok(outcome) => outcome,
                Err(e) => OpOutcome::error(format!("ping failed: {e}")),
            },
            OP_HEARTBEAT => match self.publish_online().await {
                Ok(()) => OpOutcome::success(format!(
                    "heartbeat recorded for worker {}",
                    self.identity.name
                )),
                Err(e) => OpOutcome::error(format!("heartbeat failed: {e}")),
            },
            OP_REGISTER => match self.publish_online().await {
                Ok(()) => {
                    OpOutcome::success(format!("worker {} registered", self.identity.name))
                }
                Err(e) => OpOutcome::error(format!("register failed: {e}")),
            },
            OP_ADD_ACCOUNT => self.add_account(args),
            OP_REMOVE_ACCOUNT => self.remove_account(args).await,
            OP_START_ACCOUNT => self.start_account(args).await,
            OP_STOP_ACCOUNT => self.stop_account(args).await,
            OP_GET_ACCOUNT_STATUS => self.account_status(args),
            OP_GET_ALL_ACCOUNTS_STATUS => self.all_accounts_status(),
            OP_STOP_ALL_ACCOUNTS => {
                self.runtime.stop_all_accounts().await;
                OpOutcome::success("all accounts stopped")
            }
            other => OpOutcome::error(format!("unknown operation {other}")),
        }
    }

    fn add_account(&self, args: &serde_json::Value) -> OpOutcome {
        let session: AccountSession = match serde_json::from_value(args.clone()) {
            Ok(session) => session,
            Err(e) => return OpOutcome::error(format!("bad account payload: {e}")),
        };
        let phone = session.phone.clone();
        match self.runtime.add_account(session) {
            Ok(()) => OpOutcome::success(format!("account {phone} added")),
            Err(e) => OpOutcome::error(format!("account {phone} not added: {e}")),
        }
    }

    async fn remove_account(&self, args: &serde_json::Value) -> OpOutcome {
        let id = match account_id_arg(args) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        match self.runtime.remove_account(id).await {
            Ok(()) => OpOutcome::success(format!("account {id} removed")),
            Err(e) => OpOutcome::error(format!("account {id} not removed: {e}")),
        }
    }

    async fn start_account(&self, args: &serde_json::Value) -> OpOutcome {
        let id = match account_id_arg(args) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        match self.runtime.start_account(id).await {
            Ok(true) => OpOutcome::success(format!("account {id} started")),
            Ok(false) => OpOutcome::error(format!("account {id} is already running")),
            Err(e) => OpOutcome::error(format!("account {id} not started: {e}")),
        }
    }

    async fn stop_account(&self, args: &serde_json::Value) -> OpOutcome {
        let id = match account_id_arg(args) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        match self.runtime.stop_account(id).await {
            Ok(true) => OpOutcome::success(format!("account {id} stopped")),
            Ok(false) => OpOutcome::error(format!("account {id} is already stopped")),
            Err(e) => OpOutcome::error(format!("account {id} not stopped: {e}")),
        }
    }

    fn account_status(&self, args: &serde_json::Value) -> OpOutcome {
        let id = match account_id_arg(args) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        match self.runtime.account_status(id) {
            Ok(snapshot) => match serde_json::to_value(&snapshot) {
                Ok(data) => OpOutcome::success_with(format!("account {id} status"), data),
                Err(e) => OpOutcome::error(format!("status serialization failed: {e}")),
            },
            Err(e) => OpOutcome::error(format!("account {id}: {e}")),
        }
    }

    fn all_accounts_status(&self) -> OpOutcome {
        let statuses: BTreeMap<String, _> = self
            .runtime
            .all_accounts_status()
            .into_iter()
            .map(|snapshot| (snapshot.account_id.to_string(), snapshot))
            .collect();
        match serde_json::to_value(&statuses) {
            Ok(data) => OpOutcome::success_with("all accounts status", data),
            Err(e) => OpOutcome::error(format!("status serialization failed: {e}")),
        }
    }
}

fn account_id_arg(args: &serde_json::Value) -> std::result::Result<AccountId, OpOutcome> {
    args.get("account_id")
        .and_then(serde_json::Value::as_i64)
        .map(AccountId)
        .ok_or_else(|| OpOutcome::error("missing or invalid account_id"))
}
