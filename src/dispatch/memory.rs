//! In-memory task queues for single-process deployments and tests.
//!
//! Mirrors the pgmq semantics: FIFO per named queue, received messages
//! invisible until acked or until the visibility timeout lapses.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::Result;

use super::{QueuedMessage, TaskQueue};

#[derive(Default)]
struct QueueState {
    ready: VecDeque<QueuedMessage>,
    /// Received but not yet acked: (redelivery deadline, message).
    in_flight: Vec<(Instant, QueuedMessage)>,
}

pub struct MemoryQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    next_id: AtomicI64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn ensure(&self, queue: &str) -> Result<()> {
        self.queues
            .lock()
            .expect("queue lock poisoned")
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn send(&self, queue: &str, payload: &serde_json::Value) -> Result<i64> {
        let msg_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.queues
            .lock()
            .expect("queue lock poisoned")
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(QueuedMessage {
                msg_id,
                payload: payload.clone(),
            });
        Ok(msg_id)
    }

    async fn receive(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<QueuedMessage>> {
        let mut queues = self.queues.lock().expect("queue lock poisoned");
        let Some(state) = queues.get_mut(queue) else {
            return Ok(None);
        };

        // Redeliver anything whose visibility window expired.
        let now = Instant::now();
        let mut i = 0;
        while i < state.in_flight.len() {
            if state.in_flight[i].0 <= now {
                let (_, msg) = state.in_flight.remove(i);
                state.ready.push_back(msg);
            } else {
                i += 1;
            }
        }

        let Some(msg) = state.ready.pop_front() else {
            return Ok(None);
        };
        state.in_flight.push((now + visibility_timeout, msg.clone()));
        Ok(Some(msg))
    }

    async fn ack(&self, queue: &str, msg_id: i64) -> Result<()> {
        if let Some(state) = self
            .queues
            .lock()
            .expect("queue lock poisoned")
            .get_mut(queue)
        {
            state.in_flight.retain(|(_, msg)| msg.msg_id != msg_id);
        }
        Ok(())
    }

    async fn purge(&self, queue: &str) -> Result<()> {
        self.queues.lock().expect("queue lock poisoned").remove(queue);
        Ok(())
    }
}
