//! Execution engine for zfsroot
//!
//! Planning, ordering, locking and skipping live in the `taskgraph` crate.
//! This module connects a scheduler run to the terminal: plan rendering,
//! the confirmation prompt and the outcome summary.

pub mod executor;

pub use executor::{RunOptions, execute};
