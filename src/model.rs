//! Core data model.
//!
//! Projects own tickets; tickets depend on other tickets; workers hold
//! claims on tickets. The state machine lives in [`transition`].

pub mod activity;
pub mod claim;
pub mod filter;
pub mod ticket;
pub mod transition;

pub use activity::{Action, ActivityEntry};
pub use claim::{ActiveClaim, Claim, ClaimId, ExpiryReport, ReleaseOutcome, lease_minutes};
pub use filter::{Filter, WorkOrder};
pub use ticket::{
    Complexity, NewTicket, Project, ProjectId, Resolution, Status, Ticket, TicketId, TicketKey,
};
