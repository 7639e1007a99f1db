//! Dispatch span helpers.
//!
//! Every submitted operation runs inside one span carrying the
//! operation name, target worker, and eventual outcome.

use tracing::Span;

/// Start a span for a dispatched operation.
///
/// The `dispatch.outcome` field is declared empty and filled in via
/// [`record_dispatch_outcome`].
pub fn start_dispatch_span(op: &str, worker: &str) -> Span {
    tracing::info_span!(
        "dispatch.submit",
        "dispatch.op" = op,
        "dispatch.worker" = worker,
        "dispatch.outcome" = tracing::field::Empty,
    )
}

/// Record the outcome ("success" | "error" | "timeout" | "pending")
/// on the current dispatch span.
pub fn record_dispatch_outcome(outcome: &str) {
    Span::current().record("dispatch.outcome", outcome);
}
