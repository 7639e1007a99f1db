//! Worker registry rows in Postgres.
//!
//! Rows are created by reconciler discovery; only `is_active` mutates
//! after that. Concurrent reconcilers tolerate benign races — creation
//! upserts on the unique name, updates are idempotent last-write-wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;

use crate::error::{Error, Result};
use crate::model::{WorkerId, WorkerRegistryEntry};
use crate::reconciler::WorkerRegistry;
use crate::telemetry::metrics;

#[async_trait]
impl WorkerRegistry for super::Db {
    async fn get_by_id(&self, id: WorkerId) -> Result<Option<WorkerRegistryEntry>> {
        let row: Option<WorkerRow> = sqlx::query_as(
            "SELECT id, name, server_address, is_active, created_at FROM workers WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(WorkerRow::into_entry))
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<WorkerRegistryEntry>> {
        let row: Option<WorkerRow> = sqlx::query_as(
            "SELECT id, name, server_address, is_active, created_at FROM workers WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(WorkerRow::into_entry))
    }

    async fn create(
        &self,
        name: &str,
        server_address: &str,
        is_active: bool,
    ) -> Result<WorkerRegistryEntry> {
        let row: WorkerRow = sqlx::query_as(
            "INSERT INTO workers (name, server_address, is_active) VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE SET is_active = EXCLUDED.is_active
             RETURNING id, name, server_address, is_active, created_at",
        )
        .bind(name)
        .bind(server_address)
        .bind(is_active)
        .fetch_one(self.pool())
        .await?;
        metrics::registry_writes().add(1, &[KeyValue::new("operation", "create")]);
        Ok(row.into_entry())
    }

    async fn set_active(&self, id: WorkerId, is_active: bool) -> Result<()> {
        let rows_affected = sqlx::query("UPDATE workers SET is_active = $1 WHERE id = $2")
            .bind(is_active)
            .bind(id.0)
            .execute(self.pool())
            .await?
            .rows_affected();
        if rows_affected == 0 {
            return Err(Error::NotFound(format!("worker {id}")));
        }
        metrics::registry_writes().add(1, &[KeyValue::new("operation", "set_active")]);
        Ok(())
    }

    async fn list(&self, active_only: bool) -> Result<Vec<WorkerRegistryEntry>> {
        let query = if active_only {
            "SELECT id, name, server_address, is_active, created_at FROM workers
             WHERE is_active ORDER BY id"
        } else {
            "SELECT id, name, server_address, is_active, created_at FROM workers ORDER BY id"
        };
        let rows: Vec<WorkerRow> = sqlx::query_as(query).fetch_all(self.pool()).await?;
        Ok(rows.into_iter().map(WorkerRow::into_entry).collect())
    }

    async fn delete(&self, id: WorkerId) -> Result<()> {
        let rows_affected = sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(id.0)
            .execute(self.pool())
            .await?
            .rows_affected();
        if rows_affected == 0 {
            return Err(Error::NotFound(format!("worker {id}")));
        }
        metrics::registry_writes().add(1, &[KeyValue::new("operation", "delete")]);
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkerRow {
    id: i64,
    name: String,
    server_address: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl WorkerRow {
    fn into_entry(self) -> WorkerRegistryEntry {
        WorkerRegistryEntry {
            id: WorkerId(self.id),
            name: self.name,
            server_address: self.server_address,
            is_active: self.is_active,
            created_at: self.created_at,
        }
    }
}
