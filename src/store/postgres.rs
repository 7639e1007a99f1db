//! Postgres-backed liveness store on the shared [`Db`] handle.
//!
//! Entries live in the `fleet_kv` table under exactly the keys the
//! wire format names (`worker_status:<name>`, `worker_last_seen:<name>`,
//! `account_status:<id>`); values are opaque text.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;

use crate::db::Db;
use crate::error::Result;
use crate::model::{AccountId, LivenessRecord, WorkerStatus};
use crate::telemetry::metrics;

use super::{
    AccountStatusCache, LivenessStore, WORKER_STATUS_PREFIX, account_status_key, last_seen_key,
    status_key,
};

impl Db {
    async fn kv_put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at: Option<DateTime<Utc>> =
            ttl.map(|ttl| Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64));
        sqlx::query(
            "INSERT INTO fleet_kv (key, value, expires_at) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(self.pool())
        .await?;
        metrics::store_operations().add(1, &[KeyValue::new("operation", "put")]);
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM fleet_kv WHERE key = $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await?;
        metrics::store_operations().add(1, &[KeyValue::new("operation", "get")]);
        Ok(row.map(|(value,)| value))
    }

    async fn kv_delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM fleet_kv WHERE key = $1")
            .bind(key)
            .execute(self.pool())
            .await?;
        metrics::store_operations().add(1, &[KeyValue::new("operation", "delete")]);
        Ok(())
    }
}

#[async_trait]
impl LivenessStore for Db {
    async fn publish(&self, record: &LivenessRecord, last_seen: i64) -> Result<()> {
        self.kv_put(&status_key(&record.name), &serde_json::to_string(record)?, None)
            .await?;
        self.kv_put(&last_seen_key(&record.name), &last_seen.to_string(), None)
            .await
    }

    async fn get(&self, name: &str) -> Result<Option<LivenessRecord>> {
        match self.kv_get(&status_key(name)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn last_seen(&self, name: &str) -> Result<Option<i64>> {
        // Unparsable timestamps read as absent.
        Ok(self
            .kv_get(&last_seen_key(name))
            .await?
            .and_then(|raw| raw.parse().ok()))
    }

    async fn set_status(&self, name: &str, status: WorkerStatus) -> Result<bool> {
        let Some(raw) = self.kv_get(&status_key(name)).await? else {
            return Ok(false);
        };
        let mut record: LivenessRecord = serde_json::from_str(&raw)?;
        record.status = status;
        self.kv_put(&status_key(name), &serde_json::to_string(&record)?, None)
            .await?;
        Ok(true)
    }

    async fn touch(&self, name: &str, last_seen: i64) -> Result<()> {
        self.kv_put(&last_seen_key(name), &last_seen.to_string(), None)
            .await
    }

    async fn list_all(&self) -> Result<Vec<LivenessRecord>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT value FROM fleet_kv
             WHERE key LIKE $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(format!("{WORKER_STATUS_PREFIX}%"))
        .fetch_all(self.pool())
        .await?;
        metrics::store_operations().add(1, &[KeyValue::new("operation", "scan")]);

        let mut records = Vec::with_capacity(rows.len());
        for (raw,) in rows {
            records.push(serde_json::from_str(&raw)?);
        }
        Ok(records)
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.kv_delete(&status_key(name)).await?;
        self.kv_delete(&last_seen_key(name)).await
    }

    async fn put_account_status(
        &self,
        id: AccountId,
        cache: &AccountStatusCache,
        ttl: Duration,
    ) -> Result<()> {
        self.kv_put(
            &account_status_key(id),
            &serde_json::to_string(cache)?,
            Some(ttl),
        )
        .await
    }

    async fn account_status(&self, id: AccountId) -> Result<Option<AccountStatusCache>> {
        match self.kv_get(&account_status_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
