//! Span helpers for dispatch operations.

use tracing::Span;

/// Start a span for one coordinator operation on a task.
///
/// `dispatch.outcome` is declared empty and filled by [`record_outcome`].
pub fn start_dispatch_span(operation: &'static str, task_id: &str) -> Span {
    tracing::info_span!(
        "dispatch.op",
        "dispatch.operation" = operation,
        "dispatch.task_id" = task_id,
        "dispatch.outcome" = tracing::field::Empty,
    )
}

/// Record how an operation ended on its span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("dispatch.outcome", outcome);
}

/// Emit a task transition between structures, scoped to `span`.
pub fn record_transition(span: &Span, task_id: &str, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(task_id, from, to, "task_transition");
    });
}
