//! # fleetq
//!
//! Worker fleet coordination: liveness publishing into a shared
//! key-value store, remote command dispatch over per-worker queues,
//! a per-worker account-session runtime, and a reconciler that keeps
//! the durable worker registry consistent with observed liveness.

pub mod agent;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod reconciler;
pub mod runtime;
pub mod store;
pub mod telemetry;
