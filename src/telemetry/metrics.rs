//! Metric instrument factories.
//!
//! Instruments come from the `"ticketq"` meter on the globally registered
//! `MeterProvider`. Without an OTLP endpoint that provider is the no-op
//! default, so recording is always safe.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("ticketq")
}

/// Counter: claims granted.
pub fn claims_acquired() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.claims.acquired")
        .with_description("Number of claims granted")
        .build()
}

/// Counter: acquire/renew/release attempts rejected because another worker
/// holds the ticket or the status moved underneath the caller.
/// Labels: `operation`.
pub fn claim_conflicts() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.claims.conflicts")
        .with_description("Number of claim operations lost to a concurrent holder")
        .build()
}

/// Counter: claims ended by their holder (or by force).
/// Labels: `outcome`, `forced`.
pub fn claims_released() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.claims.released")
        .with_description("Number of claims released")
        .build()
}

/// Counter: claims ended by the expiry sweep.
pub fn claims_expired() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.claims.expired")
        .with_description("Number of claims reclaimed after their lease ran out")
        .build()
}

/// Counter: ticket status transitions.
/// Labels: `from`, `to`.
pub fn ticket_transitions() -> Counter<u64> {
    meter()
        .u64_counter("ticketq.ticket.transitions")
        .with_description("Number of ticket status transitions")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("ticketq.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
