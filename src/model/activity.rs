//! Activity log entries emitted by the engine on every state-affecting call.
//!
//! The log is append-only. Entries are written inside the same transaction as
//! the change they describe, so a rolled-back operation leaves no entry.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::claim::ReleaseOutcome;
use super::ticket::TicketKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    TicketCreated,
    Claimed,
    ClaimRenewed,
    /// Carries the outcome label (`complete`, `block`, ...).
    Released(String),
    /// Administrative release that bypassed the ownership check.
    ForceReleased(String),
    ClaimExpired,
    DependencyAdded,
    DependencyRemoved,
    Transitioned,
    /// Anything this build doesn't recognise.
    Other(String),
}

impl Action {
    pub fn released(outcome: ReleaseOutcome, forced: bool) -> Self {
        let label = outcome.label().to_string();
        if forced {
            Action::ForceReleased(label)
        } else {
            Action::Released(label)
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "ticket_created" => Action::TicketCreated,
            "claimed" => Action::Claimed,
            "claim_renewed" => Action::ClaimRenewed,
            "claim_expired" => Action::ClaimExpired,
            "dependency_added" => Action::DependencyAdded,
            "dependency_removed" => Action::DependencyRemoved,
            "transitioned" => Action::Transitioned,
            _ => {
                if let Some(outcome) = raw.strip_prefix("released:") {
                    Action::Released(outcome.to_string())
                } else if let Some(outcome) = raw.strip_prefix("force_released:") {
                    Action::ForceReleased(outcome.to_string())
                } else {
                    Action::Other(raw.to_string())
                }
            }
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::TicketCreated => f.write_str("ticket_created"),
            Action::Claimed => f.write_str("claimed"),
            Action::ClaimRenewed => f.write_str("claim_renewed"),
            Action::Released(outcome) => write!(f, "released:{outcome}"),
            Action::ForceReleased(outcome) => write!(f, "force_released:{outcome}"),
            Action::ClaimExpired => f.write_str("claim_expired"),
            Action::DependencyAdded => f.write_str("dependency_added"),
            Action::DependencyRemoved => f.write_str("dependency_removed"),
            Action::Transitioned => f.write_str("transitioned"),
            Action::Other(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Monotonic sequence number.
    pub seq: i64,
    pub ticket_key: TicketKey,
    pub action: Action,
    /// Worker involved, if any. For expiries this is the lapsed holder.
    pub worker_id: Option<String>,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}
