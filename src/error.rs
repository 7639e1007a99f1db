//! Error types for fleetq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The wait for a dispatched operation elapsed. The outcome is
    /// unknown — the worker may still execute it — so callers re-query
    /// status rather than assume failure.
    #[error("dispatch of {op} to worker {worker} timed out after {waited_ms}ms")]
    DispatchTimeout {
        worker: String,
        op: String,
        waited_ms: u64,
    },

    /// A network session could not connect or authenticate. Logged at
    /// the execution-context boundary; surfaced to callers only via a
    /// later status query.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    #[error("liveness store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("identity error: {0}")]
    Identity(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
