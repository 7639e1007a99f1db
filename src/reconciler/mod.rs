//! Registry reconciler: keeps the durable worker rows consistent with
//! observed liveness.
//!
//! The reconciler only ever reacts to what the liveness store shows.
//! A name absent from a scan is "unknown", not offline — the staleness
//! timeout is the sole offline signal, so rows with no liveness entry
//! keep their last known flag.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::model::{WorkerId, WorkerRegistryEntry};
use crate::store::LivenessStore;
use crate::telemetry::metrics;

/// Durable worker rows. Implemented by [`crate::db::Db`] and by
/// [`MemoryRegistry`] for tests and single-process runs.
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    async fn get_by_id(&self, id: WorkerId) -> Result<Option<WorkerRegistryEntry>>;

    async fn get_by_name(&self, name: &str) -> Result<Option<WorkerRegistryEntry>>;

    async fn create(
        &self,
        name: &str,
        server_address: &str,
        is_active: bool,
    ) -> Result<WorkerRegistryEntry>;

    async fn set_active(&self, id: WorkerId, is_active: bool) -> Result<()>;

    async fn list(&self, active_only: bool) -> Result<Vec<WorkerRegistryEntry>>;

    async fn delete(&self, id: WorkerId) -> Result<()>;
}

/// What one reconcile pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub created: usize,
    pub updated: usize,
}

pub struct Reconciler {
    store: Arc<dyn LivenessStore>,
    registry: Arc<dyn WorkerRegistry>,
    online_timeout: Duration,
    shutdown: Arc<Notify>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn LivenessStore>,
        registry: Arc<dyn WorkerRegistry>,
        online_timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            online_timeout,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Ask the run loop to exit after the current pass.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// One pass: snapshot liveness, create rows for unseen names,
    /// update rows whose active flag disagrees with the staleness
    /// rule. Idempotent — an unchanged snapshot produces zero writes.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let snapshot = self.store.list_all().await?;
        let mut report = ReconcileReport {
            scanned: snapshot.len(),
            ..ReconcileReport::default()
        };

        for record in snapshot {
            let is_active = self
                .store
                .is_online(&record.name, self.online_timeout)
                .await?;

            match self.registry.get_by_name(&record.name).await? {
                None => {
                    info!(worker = %record.name, is_active, "discovered new worker");
                    self.registry
                        .create(&record.name, &record.server_address, is_active)
                        .await?;
                    report.created += 1;
                }
                Some(entry) if entry.is_active != is_active => {
                    info!(worker = %record.name, is_active, "worker active flag changed");
                    self.registry.set_active(entry.id, is_active).await?;
                    report.updated += 1;
                }
                Some(_) => {}
            }
        }

        if report.created + report.updated > 0 {
            metrics::reconcile_updates().add((report.created + report.updated) as u64, &[]);
        }
        Ok(report)
    }

    /// Remove the registry row and best-effort remove the liveness
    /// entries. Operator-driven; not part of the periodic pass.
    pub async fn delete_worker(&self, id: WorkerId) -> Result<()> {
        let entry = self
            .registry
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("worker {id}")))?;
        self.registry.delete(id).await?;
        if let Err(e) = self.store.remove(&entry.name).await {
            warn!(worker = %entry.name, "liveness cleanup failed: {e}");
        }
        info!(worker = %entry.name, "worker deleted");
        Ok(())
    }

    /// Poll loop with a fixed interval until shutdown. Store outages
    /// are logged and retried on the next tick — callers meanwhile
    /// fall back to the last persisted registry state.
    pub async fn run(&self, interval: Duration) -> Result<()> {
        info!(interval_secs = interval.as_secs(), "reconciler started");
        loop {
            match self.reconcile().await {
                Ok(report) if report.created + report.updated > 0 => {
                    info!(
                        scanned = report.scanned,
                        created = report.created,
                        updated = report.updated,
                        "reconcile pass applied changes"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("reconcile pass failed: {e}"),
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("reconciler shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory registry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryRegistryInner {
    next_id: i64,
    entries: Vec<WorkerRegistryEntry>,
}

/// Vec-backed registry for tests and single-process runs.
#[derive(Default)]
pub struct MemoryRegistry {
    inner: Mutex<MemoryRegistryInner>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerRegistry for MemoryRegistry {
    async fn get_by_id(&self, id: WorkerId) -> Result<Option<WorkerRegistryEntry>> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        Ok(inner.entries.iter().find(|e| e.id == id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<WorkerRegistryEntry>> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        Ok(inner.entries.iter().find(|e| e.name == name).cloned())
    }

    async fn create(
        &self,
        name: &str,
        server_address: &str,
        is_active: bool,
    ) -> Result<WorkerRegistryEntry> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if inner.entries.iter().any(|e| e.name == name) {
            return Err(Error::AlreadyExists(format!("worker {name}")));
        }
        inner.next_id += 1;
        let entry = WorkerRegistryEntry {
            id: WorkerId(inner.next_id),
            name: name.to_string(),
            server_address: server_address.to_string(),
            is_active,
            created_at: Utc::now(),
        };
        inner.entries.push(entry.clone());
        Ok(entry)
    }

    async fn set_active(&self, id: WorkerId, is_active: bool) -> Result<()> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::NotFound(format!("worker {id}")))?;
        entry.is_active = is_active;
        Ok(())
    }

    async fn list(&self, active_only: bool) -> Result<Vec<WorkerRegistryEntry>> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        Ok(inner
            .entries
            .iter()
            .filter(|e| !active_only || e.is_active)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: WorkerId) -> Result<()> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let before = inner.entries.len();
        inner.entries.retain(|e| e.id != id);
        if inner.entries.len() == before {
            return Err(Error::NotFound(format!("worker {id}")));
        }
        Ok(())
    }
}
