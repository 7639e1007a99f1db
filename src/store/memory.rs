//! In-memory liveness store for single-process deployments and tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{AccountId, LivenessRecord, WorkerStatus};

use super::{
    AccountStatusCache, LivenessStore, WORKER_STATUS_PREFIX, account_status_key, last_seen_key,
    status_key,
};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > Instant::now())
    }
}

/// HashMap-backed key-value store with per-entry expiry.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&self, key: String, value: String, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .expect("memory store lock poisoned")
            .insert(key, Entry { value, expires_at });
    }

    fn fetch(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("memory store lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.live() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn delete(&self, key: &str) {
        self.entries
            .lock()
            .expect("memory store lock poisoned")
            .remove(key);
    }
}

#[async_trait]
impl LivenessStore for MemoryStore {
    async fn publish(&self, record: &LivenessRecord, last_seen: i64) -> Result<()> {
        self.put(status_key(&record.name), serde_json::to_string(record)?, None);
        self.put(last_seen_key(&record.name), last_seen.to_string(), None);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<LivenessRecord>> {
        match self.fetch(&status_key(name)) {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn last_seen(&self, name: &str) -> Result<Option<i64>> {
        // Unparsable timestamps read as absent.
        Ok(self
            .fetch(&last_seen_key(name))
            .and_then(|raw| raw.parse().ok()))
    }

    async fn set_status(&self, name: &str, status: WorkerStatus) -> Result<bool> {
        let Some(raw) = self.fetch(&status_key(name)) else {
            return Ok(false);
        };
        let mut record: LivenessRecord = serde_json::from_str(&raw)?;
        record.status = status;
        self.put(status_key(name), serde_json::to_string(&record)?, None);
        Ok(true)
    }

    async fn touch(&self, name: &str, last_seen: i64) -> Result<()> {
        self.put(last_seen_key(name), last_seen.to_string(), None);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<LivenessRecord>> {
        let entries = self.entries.lock().expect("memory store lock poisoned");
        let mut records = Vec::new();
        for (key, entry) in entries.iter() {
            if key.starts_with(WORKER_STATUS_PREFIX) && entry.live() {
                records.push(serde_json::from_str(&entry.value)?);
            }
        }
        Ok(records)
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.delete(&status_key(name));
        self.delete(&last_seen_key(name));
        Ok(())
    }

    async fn put_account_status(
        &self,
        id: AccountId,
        cache: &AccountStatusCache,
        ttl: Duration,
    ) -> Result<()> {
        self.put(account_status_key(id), serde_json::to_string(cache)?, Some(ttl));
        Ok(())
    }

    async fn account_status(&self, id: AccountId) -> Result<Option<AccountStatusCache>> {
        match self.fetch(&account_status_key(id)) {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
