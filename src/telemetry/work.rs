//! Work execution span helpers.
//!
//! Provides span creation and state-transition recording for background
//! computations launched by the orchestrator.

use crate::model::Fingerprint;
use tracing::Span;

/// Start a span for one background computation.
///
/// The `work.outcome` field is declared empty and filled in by
/// [`record_state_transition`] once the computation settles.
pub fn start_work_span(fingerprint: &Fingerprint) -> Span {
    tracing::info_span!(
        "work.execute",
        "work.fingerprint" = %fingerprint,
        "work.outcome" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("work.outcome", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
