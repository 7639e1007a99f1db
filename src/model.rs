//! Core data model.
//!
//! A worker is one process that runs account sessions and reports
//! liveness into the shared store. The durable registry row is what
//! operators see once a worker goes quiet; everything else here is
//! the wire shape of liveness records and dispatched operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Worker identity & liveness
// ---------------------------------------------------------------------------

/// One worker process's identity. Created on first launch, persisted
/// locally, reused across restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    /// Globally unique name, e.g. `worker_1717171717`.
    pub name: String,
    pub server_address: String,
}

/// Status field of a liveness record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Online,
    Offline,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Online => write!(f, "online"),
            WorkerStatus::Offline => write!(f, "offline"),
        }
    }
}

/// The JSON blob stored under `worker_status:<name>`. The numeric
/// last-seen timestamp lives in its own entry; both together feed the
/// staleness rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessRecord {
    pub name: String,
    pub server_address: String,
    pub status: WorkerStatus,
}

// ---------------------------------------------------------------------------
// Worker registry
// ---------------------------------------------------------------------------

/// Newtype for durable worker row IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub i64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A durable worker row. Created by the reconciler when it first
/// observes a name; only `is_active` changes after that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistryEntry {
    pub id: WorkerId,
    pub name: String,
    pub server_address: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Newtype for account IDs. Assigned by the external account table;
/// opaque to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub i64);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One managed network identity. Bound to exactly one worker's runtime
/// at a time; this is also the `worker.add_account` payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSession {
    pub account_id: AccountId,
    pub phone: String,
    pub api_id: String,
    pub api_hash: String,
    /// Opaque transport credential. Absent until an operator supplies
    /// one or a session exports a freshly-created credential.
    pub session_credential: Option<String>,
}

/// Lifecycle state of one account's execution context.
///
/// `Absent` has no variant: an account with no session entry simply
/// isn't in the runtime's map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for AccountState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AccountState::Stopped => "stopped",
            AccountState::Starting => "starting",
            AccountState::Running => "running",
            AccountState::Stopping => "stopping",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time view of one account's runtime state. Never persisted;
/// reconstructed as zero-state on worker restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_id: AccountId,
    pub phone: String,
    /// True for any state other than Stopped. `is_connected` implies
    /// `is_running`.
    pub is_running: bool,
    pub is_connected: bool,
    pub messages_count: u64,
    pub has_session: bool,
}

// ---------------------------------------------------------------------------
// Dispatch envelope
// ---------------------------------------------------------------------------

/// A dispatched operation, as enqueued on a worker's inbound queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: Uuid,
    /// Operation name, one of the `OP_*` constants.
    pub op: String,
    #[serde(default)]
    pub args: serde_json::Value,
    /// Reply queue name when the caller is waiting for a result.
    pub reply_to: Option<String>,
}

/// The worker's answer, sent to the request's reply queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub request_id: Uuid,
    pub outcome: OpOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Success => write!(f, "success"),
            OutcomeStatus::Error => write!(f, "error"),
        }
    }
}

/// Structured result of every remote operation. Expected failures
/// (unknown account, duplicate add, unauthenticated session) come back
/// as error outcomes, never as transport-level failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpOutcome {
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl OpOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: message.into(),
            data: None,
        }
    }

    pub fn success_with(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

// ---------------------------------------------------------------------------
// Operation names
// ---------------------------------------------------------------------------

/// Shared queue every worker consumes in addition to its own.
pub const CONTROL_QUEUE: &str = "control";

pub const OP_PING: &str = "worker.ping";
pub const OP_ADD_ACCOUNT: &str = "worker.add_account";
pub const OP_REMOVE_ACCOUNT: &str = "worker.remove_account";
pub const OP_START_ACCOUNT: &str = "worker.start_account";
pub const OP_STOP_ACCOUNT: &str = "worker.stop_account";
pub const OP_GET_ACCOUNT_STATUS: &str = "worker.get_account_status";
pub const OP_GET_ALL_ACCOUNTS_STATUS: &str = "worker.get_all_accounts_status";
pub const OP_STOP_ALL_ACCOUNTS: &str = "worker.stop_all_accounts";
pub const OP_HEARTBEAT: &str = "worker.heartbeat";
pub const OP_REGISTER: &str = "worker.register";
/// Served by the dispatcher against the liveness store (passive check
/// plus active ping); not delivered to a worker queue.
pub const OP_STATUS: &str = "worker.status";
/// Served by the dispatcher as a store scan; never a per-worker
/// round-trip.
pub const OP_LIST_ACTIVE: &str = "worker.list_active";

/// Current Unix time in whole seconds, the unit of last-seen entries.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}
