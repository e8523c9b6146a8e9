//! Background work around the store: the periodic lease sweep.

pub mod sweeper;

pub use sweeper::LeaseSweeper;
