//! # ticketq
//!
//! Work distribution engine for autonomous agents sharing one backlog.
//!
//! Tickets depend on other tickets; a worker must hold an exclusive,
//! time-bound claim on a ticket before working it, and claims that are not
//! renewed are swept back into the pool. All coordination goes through the
//! SQLite store's transactions; there is no lock service.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod telemetry;

pub use db::Db;
pub use error::{Error, ErrorKind, Result};
