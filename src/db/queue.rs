//! pgmq-backed task queues via direct SQLx.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.archive, pgmq.drop_queue.

use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::KeyValue;

use crate::dispatch::{QueuedMessage, TaskQueue};
use crate::error::Result;
use crate::telemetry::metrics;

#[async_trait]
impl TaskQueue for super::Db {
    async fn ensure(&self, queue: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue)
            .execute(self.pool())
            .await?;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new("operation", "create"),
            ],
        );
        Ok(())
    }

    async fn send(&self, queue: &str, payload: &serde_json::Value) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(queue)
            .bind(payload)
            .bind(0i32)
            .fetch_one(self.pool())
            .await?;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new("operation", "send"),
            ],
        );
        Ok(row.0)
    }

    async fn receive(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<QueuedMessage>> {
        let row: Option<(i64, serde_json::Value)> =
            sqlx::query_as("SELECT msg_id, message FROM pgmq.read($1, $2, 1)")
                .bind(queue)
                .bind(visibility_timeout.as_secs() as i32)
                .fetch_optional(self.pool())
                .await?;

        let msg = row.map(|(msg_id, payload)| QueuedMessage { msg_id, payload });
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new(
                    "operation",
                    if msg.is_some() { "read" } else { "read_empty" },
                ),
            ],
        );
        Ok(msg)
    }

    async fn ack(&self, queue: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(queue)
            .bind(msg_id)
            .execute(self.pool())
            .await?;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new("operation", "archive"),
            ],
        );
        Ok(())
    }

    async fn purge(&self, queue: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.drop_queue($1)")
            .bind(queue)
            .execute(self.pool())
            .await?;
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new("operation", "drop"),
            ],
        );
        Ok(())
    }
}
