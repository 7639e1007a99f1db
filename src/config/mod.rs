//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Address published in this worker's liveness record.
    pub server_address: String,
    /// Dotenv-style file holding the persisted worker name.
    pub identity_file: PathBuf,
    /// How long a worker counts as online after its last heartbeat.
    pub online_timeout: Duration,
    pub heartbeat_period: Duration,
    pub reconcile_interval: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            server_address: std::env::var("SERVER_ADDRESS")
                .unwrap_or_else(|_| "localhost".to_string()),
            identity_file: std::env::var("WORKER_ENV_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("worker.env")),
            online_timeout: seconds_var("ONLINE_TIMEOUT", 60)?,
            heartbeat_period: seconds_var("HEARTBEAT_PERIOD", 30)?,
            reconcile_interval: seconds_var("RECONCILE_INTERVAL", 10)?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn seconds_var(name: &str, default_secs: u64) -> Result<Duration> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| Error::Config(format!("{name} must be whole seconds, got {raw:?}"))),
        Err(_) => Ok(Duration::from_secs(default_secs)),
    }
}
