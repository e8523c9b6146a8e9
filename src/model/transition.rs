//! Ticket state machine: the single authority on legal status changes.
//!
//! Pure: it only mutates the `Ticket` it is handed. Callers persist the result
//! inside the same transaction as the claim change that caused it.

use chrono::{DateTime, Utc};

use super::ticket::{Resolution, Status, Ticket};
use crate::error::{Error, Result};

impl Status {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Ready, Working)
                | (Working, Review)
                | (Working, Blocked)
                | (Working, Human)
                | (Working, Closed)
                | (Working, Ready)   // returned, abandoned or expired
                | (Review, Working)
                | (Blocked, Working)
                | (Human, Working)
                | (Blocked, Ready)
                | (Human, Ready)
        )
    }
}

/// Validate a transition without applying it.
pub fn validate(from: Status, to: Status, resolution: Option<Resolution>) -> Result<()> {
    if !from.can_transition_to(to) {
        return Err(Error::InvalidTransition { from, to });
    }
    match (to, resolution) {
        (Status::Closed, None) => Err(Error::InvalidArgument(
            "closing a ticket requires a resolution".to_string(),
        )),
        (target, Some(resolution)) if target != Status::Closed => Err(Error::InvalidArgument(
            format!("resolution {resolution} is only valid when closing, not entering {target}"),
        )),
        _ => Ok(()),
    }
}

/// Apply a transition to `ticket`. Returns the previous status.
pub fn apply(
    ticket: &mut Ticket,
    to: Status,
    resolution: Option<Resolution>,
    now: DateTime<Utc>,
) -> Result<Status> {
    let from = ticket.status;
    validate(from, to, resolution)?;

    ticket.status = to;
    ticket.resolution = resolution;
    ticket.completed_at = if to == Status::Closed { Some(now) } else { None };
    ticket.updated_at = now;

    Ok(from)
}
