//! Span helpers for claim operations.

use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::Span;

use super::metrics;
use crate::model::TicketKey;

/// Span covering one claim operation on one ticket.
///
/// `claim.outcome` starts empty and is filled by [`record_outcome`].
pub fn start_claim_span(operation: &'static str, key: &TicketKey, worker_id: Option<&str>) -> Span {
    tracing::info_span!(
        "claim.op",
        "claim.operation" = operation,
        "ticket.key" = %key,
        "worker.id" = worker_id.unwrap_or(""),
        "claim.outcome" = tracing::field::Empty,
    )
}

/// Record how the operation ended on its span.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("claim.outcome", outcome);
}

/// Times an operation into `operation_duration_ms` when dropped.
pub struct OpTimer {
    operation: &'static str,
    started: Instant,
}

impl OpTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            started: Instant::now(),
        }
    }
}

impl Drop for OpTimer {
    fn drop(&mut self) {
        let ms = self.started.elapsed().as_secs_f64() * 1000.0;
        metrics::operation_duration_ms().record(ms, &[KeyValue::new("operation", self.operation)]);
    }
}
