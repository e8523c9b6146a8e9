//! Claims: time-bound exclusive leases on a ticket.
//!
//! A claim is created active by `acquire` and ends exactly once, by release
//! or expiry. It never becomes active again; a new attempt creates a new row.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ticket::{Resolution, Status, TicketId, TicketKey};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimId(pub Uuid);

impl ClaimId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub ticket_id: TicketId,
    pub worker_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
}

/// An active claim as seen by monitoring.
#[derive(Debug, Clone)]
pub struct ActiveClaim {
    pub claim: Claim,
    pub ticket_key: TicketKey,
    pub ticket_status: Status,
    /// Time left on the lease at snapshot time, never negative.
    pub remaining: Duration,
}

impl ActiveClaim {
    /// Past its deadline but not yet swept.
    pub fn is_overdue(&self) -> bool {
        self.remaining.is_zero()
    }
}

/// Lease length from a whole number of minutes, as taken on the command line.
pub fn lease_minutes(minutes: i64) -> crate::error::Result<Duration> {
    if minutes <= 0 {
        return Err(Error::InvalidArgument(format!(
            "lease minutes must be positive, got {minutes}"
        )));
    }
    Duration::try_minutes(minutes)
        .ok_or_else(|| Error::InvalidArgument(format!("lease of {minutes} minutes is out of range")))
}

// ---------------------------------------------------------------------------
// Release outcome
// ---------------------------------------------------------------------------

/// What the worker reports when giving a claim back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseOutcome {
    Complete(Resolution),
    Block,
    NeedsHuman,
    ReturnToReady,
    Abandon,
}

impl ReleaseOutcome {
    /// Status the ticket moves to, and the resolution it carries there.
    pub fn target(self) -> (Status, Option<Resolution>) {
        match self {
            ReleaseOutcome::Complete(resolution) => (Status::Closed, Some(resolution)),
            ReleaseOutcome::Block => (Status::Blocked, None),
            ReleaseOutcome::NeedsHuman => (Status::Human, None),
            ReleaseOutcome::ReturnToReady | ReleaseOutcome::Abandon => (Status::Ready, None),
        }
    }

    /// Parse an outcome label; `complete` takes its resolution separately
    /// and defaults to `Completed`.
    pub fn parse(label: &str, resolution: Option<Resolution>) -> crate::error::Result<Self> {
        let outcome = match label.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "complete" | "done" => {
                return Ok(ReleaseOutcome::Complete(
                    resolution.unwrap_or(Resolution::Completed),
                ));
            }
            "block" | "blocked" => ReleaseOutcome::Block,
            "needs_human" | "human" => ReleaseOutcome::NeedsHuman,
            "return_to_ready" | "return" => ReleaseOutcome::ReturnToReady,
            "abandon" => ReleaseOutcome::Abandon,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown release outcome: {other}"
                )));
            }
        };
        if let Some(resolution) = resolution {
            return Err(Error::InvalidArgument(format!(
                "resolution {resolution} only applies to complete"
            )));
        }
        Ok(outcome)
    }

    pub fn label(self) -> &'static str {
        match self {
            ReleaseOutcome::Complete(_) => "complete",
            ReleaseOutcome::Block => "block",
            ReleaseOutcome::NeedsHuman => "needs_human",
            ReleaseOutcome::ReturnToReady => "return_to_ready",
            ReleaseOutcome::Abandon => "abandon",
        }
    }
}

impl fmt::Display for ReleaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseOutcome::Complete(resolution) => write!(f, "complete({resolution})"),
            other => f.write_str(other.label()),
        }
    }
}

// ---------------------------------------------------------------------------
// Expiry report
// ---------------------------------------------------------------------------

/// Result of one expiry sweep. Failures on one ticket never stop the others.
#[derive(Debug, Default)]
pub struct ExpiryReport {
    pub expired: usize,
    pub errors: Vec<(TicketKey, Error)>,
}

impl ExpiryReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_minutes_rejects_out_of_range() {
        assert_eq!(lease_minutes(15).unwrap(), Duration::minutes(15));
        assert!(matches!(lease_minutes(0), Err(Error::InvalidArgument(_))));
        assert!(matches!(lease_minutes(-5), Err(Error::InvalidArgument(_))));
        assert!(matches!(lease_minutes(i64::MAX), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn outcomes_map_to_statuses() {
        assert_eq!(
            ReleaseOutcome::Complete(Resolution::WontDo).target(),
            (Status::Closed, Some(Resolution::WontDo))
        );
        assert_eq!(ReleaseOutcome::Block.target(), (Status::Blocked, None));
        assert_eq!(ReleaseOutcome::NeedsHuman.target(), (Status::Human, None));
        assert_eq!(ReleaseOutcome::Abandon.target(), (Status::Ready, None));
        assert_eq!(ReleaseOutcome::ReturnToReady.target(), (Status::Ready, None));
    }

    #[test]
    fn outcome_display_includes_resolution() {
        assert_eq!(
            ReleaseOutcome::Complete(Resolution::Completed).to_string(),
            "complete(completed)"
        );
        assert_eq!(ReleaseOutcome::NeedsHuman.to_string(), "needs_human");
    }

    #[test]
    fn parse_accepts_cli_spellings() {
        assert_eq!(
            ReleaseOutcome::parse("complete", None).unwrap(),
            ReleaseOutcome::Complete(Resolution::Completed)
        );
        assert_eq!(
            ReleaseOutcome::parse("complete", Some(Resolution::Obsolete)).unwrap(),
            ReleaseOutcome::Complete(Resolution::Obsolete)
        );
        assert_eq!(
            ReleaseOutcome::parse("needs-human", None).unwrap(),
            ReleaseOutcome::NeedsHuman
        );
        assert_eq!(
            ReleaseOutcome::parse("Return-To-Ready", None).unwrap(),
            ReleaseOutcome::ReturnToReady
        );
        assert!(ReleaseOutcome::parse("block", Some(Resolution::WontDo)).is_err());
        assert!(ReleaseOutcome::parse("explode", None).is_err());
    }
}
