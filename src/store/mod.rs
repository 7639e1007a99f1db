//! Liveness store client.
//!
//! Each worker publishes a status blob and a last-seen timestamp under
//! well-known keys; the reconciler and dispatcher read them back
//! through the one staleness rule below. Two implementations: the
//! shared Postgres [`crate::db::Db`] handle and [`memory::MemoryStore`]
//! for single-process use and tests.

pub mod memory;
pub mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{AccountId, LivenessRecord, WorkerStatus, unix_now};

pub const WORKER_STATUS_PREFIX: &str = "worker_status:";
pub const WORKER_LAST_SEEN_PREFIX: &str = "worker_last_seen:";
pub const ACCOUNT_STATUS_PREFIX: &str = "account_status:";

/// Expiry for cached account status entries. The cache is a caller
/// optimization; the runtime snapshot stays authoritative.
pub const ACCOUNT_STATUS_TTL: Duration = Duration::from_secs(300);

pub fn status_key(name: &str) -> String {
    format!("{WORKER_STATUS_PREFIX}{name}")
}

pub fn last_seen_key(name: &str) -> String {
    format!("{WORKER_LAST_SEEN_PREFIX}{name}")
}

pub fn account_status_key(id: AccountId) -> String {
    format!("{ACCOUNT_STATUS_PREFIX}{id}")
}

/// Cached account status, stored under `account_status:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatusCache {
    pub status: String,
    pub is_connected: bool,
    pub last_updated: i64,
}

/// The single staleness rule: a worker is online iff both entries are
/// present, the timestamp is recent, and the blob is not explicitly
/// offline. Every caller in the system goes through this function.
///
/// A worker whose heartbeat writes silently fail reads as offline once
/// the timestamp ages out, even though the process may be up — that is
/// the intended behavior, not a bug.
pub fn is_online_at(
    record: Option<&LivenessRecord>,
    last_seen: Option<i64>,
    now: i64,
    online_timeout: Duration,
) -> bool {
    let (Some(record), Some(last_seen)) = (record, last_seen) else {
        return false;
    };
    if record.status == WorkerStatus::Offline {
        return false;
    }
    now - last_seen <= online_timeout.as_secs() as i64
}

/// Read/write access to the shared liveness entries. All writes are
/// unconditional overwrites — each key is single-writer in practice,
/// so last-write-wins needs no versioning.
#[async_trait]
pub trait LivenessStore: Send + Sync {
    /// Overwrite both entries for this worker.
    async fn publish(&self, record: &LivenessRecord, last_seen: i64) -> Result<()>;

    async fn get(&self, name: &str) -> Result<Option<LivenessRecord>>;

    async fn last_seen(&self, name: &str) -> Result<Option<i64>>;

    /// Rewrite only the status field of an existing blob, preserving
    /// the stored last-seen timestamp. Returns false when no blob
    /// exists for this name.
    async fn set_status(&self, name: &str, status: WorkerStatus) -> Result<bool>;

    /// Refresh the last-seen timestamp without touching the blob.
    async fn touch(&self, name: &str, last_seen: i64) -> Result<()>;

    /// Full scan of status-prefixed keys. O(number of workers);
    /// fleets are small.
    async fn list_all(&self) -> Result<Vec<LivenessRecord>>;

    /// Delete both entries. Used on explicit worker removal only.
    async fn remove(&self, name: &str) -> Result<()>;

    async fn put_account_status(
        &self,
        id: AccountId,
        cache: &AccountStatusCache,
        ttl: Duration,
    ) -> Result<()>;

    async fn account_status(&self, id: AccountId) -> Result<Option<AccountStatusCache>>;

    /// Recency AND not-explicitly-offline, per [`is_online_at`].
    async fn is_online(&self, name: &str, online_timeout: Duration) -> Result<bool> {
        let record = self.get(name).await?;
        let last_seen = self.last_seen(name).await?;
        Ok(is_online_at(
            record.as_ref(),
            last_seen,
            unix_now(),
            online_timeout,
        ))
    }
}
