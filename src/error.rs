//! Error types for ticketq.
//!
//! Every rejected operation surfaces as a distinguishable variant; callers
//! that only care about the broad category use [`Error::kind`].

use thiserror::Error;

use crate::model::Status;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dependency {ticket} -> {prerequisite} would create a cycle")]
    Cycle {
        ticket: String,
        prerequisite: String,
    },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: Status, to: Status },

    #[error("{key} is {status}: {reason}")]
    State {
        key: String,
        status: Status,
        reason: String,
    },

    #[error("conflict on {key}: {detail}")]
    ConcurrentConflict { key: String, detail: String },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Broad error categories exposed to the CLI / server layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    Cycle,
    State,
    ConcurrentConflict,
    Storage,
    Config,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Cycle { .. } => ErrorKind::Cycle,
            Error::InvalidTransition { .. } | Error::State { .. } => ErrorKind::State,
            Error::ConcurrentConflict { .. } => ErrorKind::ConcurrentConflict,
            Error::Storage(_) | Error::Migration(_) => ErrorKind::Storage,
            Error::Config(_) => ErrorKind::Config,
            Error::Other(_) => ErrorKind::Other,
        }
    }

    /// A conflict means "someone else got there first": pick another ticket.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::ConcurrentConflict
    }
}

pub type Result<T> = std::result::Result<T, Error>;
