//! Metric instrument factories for palindrome-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"palindrome-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for palindrome-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("palindrome-rs")
}

/// Counter: attach calls.
/// Labels: `result` ("created" | "joined" | "rejoined").
pub fn work_attached() -> Counter<u64> {
    meter()
        .u64_counter("palindrome.work.attached")
        .with_description("Number of subscriptions attached to work")
        .build()
}

/// Counter: background computations that reached the commit point.
/// Labels: `result` ("committed" | "discarded" | "failed").
pub fn work_finished() -> Counter<u64> {
    meter()
        .u64_counter("palindrome.work.finished")
        .with_description("Number of background computations that finished")
        .build()
}

/// Counter: work items torn down while still referenced by a running task.
/// Labels: `reason` ("detached" | "cleared").
pub fn work_cancelled() -> Counter<u64> {
    meter()
        .u64_counter("palindrome.work.cancelled")
        .with_description("Number of work items cancelled")
        .build()
}

/// Histogram: background computation duration in milliseconds.
pub fn work_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("palindrome.work.duration_ms")
        .with_description("Background computation duration in milliseconds")
        .with_unit("ms")
        .build()
}
