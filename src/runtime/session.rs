//! One account's isolated execution context.
//!
//! The slot is the shared state between the runtime's control surface
//! and the account's task; the task body lives in [`run_session`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::model::{AccountSession, AccountSnapshot, AccountState};
use crate::runtime::connector::Connector;
use crate::telemetry::metrics;

pub(crate) struct AccountSlot {
    /// Serializes start/stop/remove for this account; holds the
    /// execution task handle between them.
    pub(crate) ctl: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    session: Mutex<AccountSession>,
    state: Mutex<AccountState>,
    connected: AtomicBool,
    messages: AtomicU64,
    stop: AtomicBool,
    stop_notify: Notify,
}

impl AccountSlot {
    pub(crate) fn new(session: AccountSession) -> Self {
        Self {
            ctl: tokio::sync::Mutex::new(None),
            session: Mutex::new(session),
            state: Mutex::new(AccountState::Stopped),
            connected: AtomicBool::new(false),
            messages: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    pub(crate) fn state(&self) -> AccountState {
        *self.state.lock().expect("account state lock poisoned")
    }

    pub(crate) fn set_state(&self, state: AccountState) {
        *self.state.lock().expect("account state lock poisoned") = state;
        metrics::account_transitions().add(1, &[KeyValue::new("to", state.to_string())]);
    }

    pub(crate) fn clear_stop(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // notify_one stores a permit, so a request that lands between
        // loop iterations is not lost.
        self.stop_notify.notify_one();
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn session(&self) -> AccountSession {
        self.session
            .lock()
            .expect("account session lock poisoned")
            .clone()
    }

    fn store_credential(&self, credential: String) {
        let mut session = self.session.lock().expect("account session lock poisoned");
        if session.session_credential.is_none() {
            session.session_credential = Some(credential);
        }
    }

    pub(crate) fn finish_stopped(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.set_state(AccountState::Stopped);
    }

    pub(crate) fn snapshot(&self) -> AccountSnapshot {
        let session = self.session.lock().expect("account session lock poisoned");
        let state = self.state();
        AccountSnapshot {
            account_id: session.account_id,
            phone: session.phone.clone(),
            is_running: state != AccountState::Stopped,
            is_connected: self.connected.load(Ordering::Relaxed),
            messages_count: self.messages.load(Ordering::Relaxed),
            has_session: session.session_credential.is_some(),
        }
    }
}

/// Body of the per-account task: connect, verify authorization, then
/// hold Running until stop is requested. Every failure path lands in
/// Stopped with is_connected=false; nothing propagates to the caller
/// of start — the asynchronous outcome is observable only through a
/// status query.
pub(crate) async fn run_session(connector: Arc<dyn Connector>, slot: Arc<AccountSlot>) {
    let session = slot.session();
    let account_id = session.account_id;

    let mut net = match connector.connect(&session).await {
        Ok(net) => net,
        Err(e) => {
            warn!(%account_id, error = %e, "account session failed to connect");
            slot.finish_stopped();
            return;
        }
    };

    if !net.is_authorized() {
        // Expected terminal state, not a crash: an operator must
        // supply a credential before this account can run. No retry.
        warn!(%account_id, "account session is not authorized; stopping");
        if let Err(e) = net.disconnect().await {
            warn!(%account_id, "disconnect after authorization check failed: {e}");
        }
        slot.finish_stopped();
        return;
    }

    if let Some(credential) = net.export_credential() {
        slot.store_credential(credential);
    }

    slot.connected.store(true, Ordering::Relaxed);
    slot.set_state(AccountState::Running);
    info!(%account_id, "account session running");

    while !slot.stop_requested() {
        tokio::select! {
            _ = slot.stop_notify.notified() => break,
            polled = net.poll_updates() => match polled {
                Ok(0) => {}
                Ok(n) => {
                    slot.messages.fetch_add(n, Ordering::Relaxed);
                    metrics::messages_observed().add(n, &[KeyValue::new("account_id", account_id.0)]);
                }
                Err(e) => {
                    warn!(%account_id, error = %e, "account session error; stopping");
                    break;
                }
            }
        }
    }

    if let Err(e) = net.disconnect().await {
        warn!(%account_id, "disconnect failed: {e}");
    }
    slot.finish_stopped();
    info!(%account_id, "account session stopped");
}
