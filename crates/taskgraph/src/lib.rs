//! # Taskgraph
//!
//! Dependency-ordered execution of named, side-effecting tasks.
//!
//! This crate provides the engine behind idempotent provisioning: declare
//! what has to happen and in which order, let the engine run each piece
//! exactly once, and skip whatever is already in place on the machine.
//!
//! ## Core Concepts
//!
//! - **Task**: A named unit of work with dependencies, locks, skip predicates and an action
//! - **Completion**: A single-assignment cell holding a task's outcome, observable by many waiters
//! - **Lock**: FIFO mutual exclusion over a logical resource (a disk, the package database, a file)
//! - **Plan**: The flattened, topologically ordered graph below the requested tasks
//! - **Scheduler**: Plans, confirms and drives the requested tasks
//!
//! ## Example
//!
//! ```ignore
//! use taskgraph::{ExecuteOptions, Lock, Task, execute_simple};
//!
//! let partition = Task::new("zfs-partition-2-efi")
//!     .with_locks([Lock::path("/dev/sda")])
//!     .with_skip_if(|| async { Ok(std::path::Path::new("/dev/sda-part2").exists()) })
//!     .with_run(|| async { create_partition("/dev/sda", 2).await });
//!
//! let pool = Task::new("zfs-boot-pool")
//!     .with_dependencies([partition])
//!     .with_run(|| async { create_pool().await });
//!
//! let summary = execute_simple(&[pool], ExecuteOptions::default()).await?;
//! assert!(summary.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! - [`ProgressCallback`]: Receives the plan and per-task outcomes
//! - [`ConfirmCallback`]: Handles user confirmation before anything runs

pub mod completion;
pub mod context;
pub mod error;
pub mod graph;
pub mod lock;
pub mod scheduler;
pub mod task;
pub mod types;

// Re-export main types at crate root
pub use completion::Completion;
pub use context::{AutoConfirm, AutoDecline, ConfirmCallback, NoProgress, ProgressCallback};
pub use error::{Error, Failure, Result};
pub use graph::{Plan, toposort};
pub use lock::{Lock, LockGuard, LockKey, LockRegistry};
pub use scheduler::{Scheduler, execute_simple};
pub use task::{SkipPredicate, Task, TaskId};
pub use types::{ActionResult, ExecuteOptions, ExecuteSummary, Outcome, Status, TaskReport};
