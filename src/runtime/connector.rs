//! Network session seam for account runtimes.
//!
//! The runtime drives sessions through [`Connector`] and
//! [`NetworkSession`]; the production implementation long-polls the
//! Telegram Bot API. Tests inject scripted implementations.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::AccountSession;

/// Long-poll wait (seconds) passed to getUpdates.
const POLL_WAIT_SECS: u64 = 30;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a network session for the account. A transport-level
    /// failure is [`Error::ConnectionFailure`]; an unauthenticated
    /// session is NOT an error — it connects and reports
    /// `is_authorized() == false`.
    async fn connect(&self, session: &AccountSession) -> Result<Box<dyn NetworkSession>>;
}

#[async_trait]
pub trait NetworkSession: Send {
    fn is_authorized(&self) -> bool;

    /// The credential to persist back into the account session, when
    /// the transport created or confirmed one.
    fn export_credential(&self) -> Option<String>;

    /// Wait for inbound traffic; returns how many messages arrived.
    async fn poll_updates(&mut self) -> Result<u64>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// Telegram Bot API connector. `getMe` is the authorization check,
/// `getUpdates` long-polling is the message source, and the account's
/// session credential is the API token.
pub struct BotApiConnector {
    client: reqwest::Client,
    base_url: String,
}

impl BotApiConnector {
    pub fn new() -> Self {
        Self::with_base_url("https://api.telegram.org")
    }

    /// Point at a different API host (local gateways, tests).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for BotApiConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for BotApiConnector {
    async fn connect(&self, session: &AccountSession) -> Result<Box<dyn NetworkSession>> {
        let Some(token) = session.session_credential.clone() else {
            // No credential yet: connected but unauthorized. The
            // runtime reports this as a soft failure.
            return Ok(Box::new(BotApiSession {
                client: self.client.clone(),
                base_url: self.base_url.clone(),
                token: None,
                authorized: false,
                offset: 0,
            }));
        };

        let url = format!("{}/bot{}/getMe", self.base_url, token);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::ConnectionFailure(format!("getMe: {e}")))?;

        Ok(Box::new(BotApiSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            authorized: resp.status().is_success(),
            token: Some(token),
            offset: 0,
        }))
    }
}

struct BotApiSession {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    authorized: bool,
    offset: i64,
}

#[async_trait]
impl NetworkSession for BotApiSession {
    fn is_authorized(&self) -> bool {
        self.authorized
    }

    fn export_credential(&self) -> Option<String> {
        if self.authorized { self.token.clone() } else { None }
    }

    async fn poll_updates(&mut self) -> Result<u64> {
        // Only authorized sessions reach the poll loop.
        let Some(ref token) = self.token else {
            return Ok(0);
        };

        let url = format!("{}/bot{}/getUpdates", self.base_url, token);
        let body = json!({
            "offset": self.offset,
            "timeout": POLL_WAIT_SECS,
            "allowed_updates": ["message"],
        });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ConnectionFailure(format!("getUpdates: {e}")))?;
        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::ConnectionFailure(format!("getUpdates body: {e}")))?;

        let mut seen = 0;
        if let Some(results) = data.get("result").and_then(serde_json::Value::as_array) {
            for update in results {
                if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64) {
                    self.offset = uid + 1;
                }
                if update.get("message").is_some() {
                    seen += 1;
                }
            }
        }
        Ok(seen)
    }

    async fn disconnect(&mut self) -> Result<()> {
        debug!("bot api session closed");
        Ok(())
    }
}
