//! Metric instrument factories for fleetq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"fleetq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for fleetq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("fleetq")
}

/// Counter: heartbeats published to the liveness store.
/// Labels: `worker`.
pub fn heartbeats_published() -> Counter<u64> {
    meter()
        .u64_counter("fleetq.worker.heartbeats")
        .with_description("Heartbeats published to the liveness store")
        .build()
}

/// Counter: queue-level operations (create, send, read, archive, drop).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("fleetq.queue.operations")
        .with_description("Number of task queue operations")
        .build()
}

/// Counter: liveness store operations (put, get, scan, delete).
/// Labels: `operation`.
pub fn store_operations() -> Counter<u64> {
    meter()
        .u64_counter("fleetq.store.operations")
        .with_description("Number of liveness store operations")
        .build()
}

/// Counter: operations submitted through the dispatcher.
/// Labels: `op`.
pub fn dispatch_submitted() -> Counter<u64> {
    meter()
        .u64_counter("fleetq.dispatch.submitted")
        .with_description("Operations submitted to worker queues")
        .build()
}

/// Counter: dispatched operations whose result wait timed out.
/// Labels: `op`.
pub fn dispatch_timeouts() -> Counter<u64> {
    meter()
        .u64_counter("fleetq.dispatch.timeouts")
        .with_description("Dispatched operations with an unknown outcome")
        .build()
}

/// Histogram: dispatch round-trip duration in milliseconds.
/// Labels: `op`.
pub fn dispatch_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("fleetq.dispatch.duration_ms")
        .with_description("Dispatch round-trip duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: registry rows created or updated by a reconcile pass.
pub fn reconcile_updates() -> Counter<u64> {
    meter()
        .u64_counter("fleetq.reconcile.updates")
        .with_description("Registry writes performed by reconcile passes")
        .build()
}

/// Counter: registry row writes.
/// Labels: `operation` ("create" | "set_active" | "delete").
pub fn registry_writes() -> Counter<u64> {
    meter()
        .u64_counter("fleetq.registry.writes")
        .with_description("Durable worker registry writes")
        .build()
}

/// Counter: account state-machine transitions.
/// Labels: `to`.
pub fn account_transitions() -> Counter<u64> {
    meter()
        .u64_counter("fleetq.account.state_transitions")
        .with_description("Account state transitions")
        .build()
}

/// Counter: inbound messages observed by running account sessions.
/// Labels: `account_id`.
pub fn messages_observed() -> Counter<u64> {
    meter()
        .u64_counter("fleetq.account.messages")
        .with_description("Messages observed by account sessions")
        .build()
}
