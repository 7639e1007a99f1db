//! Account runtime: a collection of independent long-lived network
//! sessions, each isolated in its own task so one session's failure
//! cannot corrupt another's state.
//!
//! Operations on the same account are serialized by a per-account
//! mutex (last writer wins on the state machine); different accounts
//! have no ordering relationship at all.

pub mod connector;
mod session;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::{AccountId, AccountSession, AccountSnapshot, AccountState};

use self::connector::Connector;
use self::session::{AccountSlot, run_session};

/// Bounded wait for an execution context to wind down on stop.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AccountRuntime {
    connector: Arc<dyn Connector>,
    accounts: Mutex<HashMap<AccountId, Arc<AccountSlot>>>,
}

impl AccountRuntime {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            accounts: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, id: AccountId) -> Result<Arc<AccountSlot>> {
        self.accounts
            .lock()
            .expect("accounts lock poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("account {id}")))
    }

    /// Create a stopped session entry. Does not start it.
    pub fn add_account(&self, session: AccountSession) -> Result<()> {
        let mut accounts = self.accounts.lock().expect("accounts lock poisoned");
        if accounts.contains_key(&session.account_id) {
            return Err(Error::AlreadyExists(format!(
                "account {}",
                session.account_id
            )));
        }
        info!(account_id = %session.account_id, phone = %session.phone, "account added");
        accounts.insert(session.account_id, Arc::new(AccountSlot::new(session)));
        Ok(())
    }

    /// Stop the account if needed (best-effort, bounded wait), then
    /// delete the entry. Terminal for this id.
    pub async fn remove_account(&self, id: AccountId) -> Result<()> {
        self.slot(id)?;
        if let Err(e) = self.stop_account(id).await {
            warn!(account_id = %id, "stop before removal failed: {e}");
        }
        self.accounts
            .lock()
            .expect("accounts lock poisoned")
            .remove(&id);
        info!(account_id = %id, "account removed");
        Ok(())
    }

    /// Launch the account's isolated execution context. Returns false
    /// as a no-op when already starting or running. The launch itself
    /// is the success signal; connect and authorization failures are
    /// observable only through a later status query.
    pub async fn start_account(&self, id: AccountId) -> Result<bool> {
        let slot = self.slot(id)?;
        let mut ctl = slot.ctl.lock().await;
        match slot.state() {
            AccountState::Starting | AccountState::Running => return Ok(false),
            AccountState::Stopping | AccountState::Stopped => {}
        }

        // A previous context may still be winding down.
        if let Some(task) = ctl.take() {
            let _ = tokio::time::timeout(JOIN_TIMEOUT, task).await;
        }

        slot.clear_stop();
        slot.set_state(AccountState::Starting);
        *ctl = Some(tokio::spawn(run_session(
            Arc::clone(&self.connector),
            Arc::clone(&slot),
        )));
        Ok(true)
    }

    /// Signal cooperative stop and wait out the join timeout. Returns
    /// false as a no-op when already stopped; safe to call repeatedly,
    /// including on an account that is still stopping.
    pub async fn stop_account(&self, id: AccountId) -> Result<bool> {
        let slot = self.slot(id)?;
        let mut ctl = slot.ctl.lock().await;
        if slot.state() == AccountState::Stopped {
            return Ok(false);
        }

        slot.set_state(AccountState::Stopping);
        slot.request_stop();
        if let Some(task) = ctl.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(JOIN_TIMEOUT, task).await.is_err() {
                warn!(account_id = %id, "account did not stop within {JOIN_TIMEOUT:?}; aborting its context");
                abort.abort();
            }
        }
        slot.finish_stopped();
        Ok(true)
    }

    /// Snapshot one account's runtime state.
    pub fn account_status(&self, id: AccountId) -> Result<AccountSnapshot> {
        Ok(self.slot(id)?.snapshot())
    }

    /// Snapshot every known account, running or not.
    pub fn all_accounts_status(&self) -> Vec<AccountSnapshot> {
        self.accounts
            .lock()
            .expect("accounts lock poisoned")
            .values()
            .map(|slot| slot.snapshot())
            .collect()
    }

    /// Stop every known account, swallowing per-account errors. The
    /// shutdown path: best-effort cleanup beats blocking exit.
    pub async fn stop_all_accounts(&self) {
        let ids: Vec<AccountId> = self
            .accounts
            .lock()
            .expect("accounts lock poisoned")
            .keys()
            .copied()
            .collect();
        for id in ids {
            if let Err(e) = self.stop_account(id).await {
                warn!(account_id = %id, "stop during shutdown failed: {e}");
            }
        }
    }
}
