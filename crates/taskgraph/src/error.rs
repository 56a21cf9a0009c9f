//! Error types for building and executing task graphs
//!
//! Two families exist:
//! - [`Error`]: configuration mistakes in the graph itself. These are found
//!   before any action runs and abort the whole run.
//! - [`Failure`]: a task that did not complete at run time. Failures are
//!   stored in completion cells and shared by every observer, so they are
//!   cheap to clone and carry rendered messages rather than live errors.

use thiserror::Error;

/// Configuration errors detected while building a plan
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The dependency relation contains a cycle
    #[error("dependency cycle between tasks: {}", .0.join(", "))]
    Cycle(Vec<String>),

    /// A second action was attached to a task that already had one
    #[error("task '{task}' was given more than one action")]
    ActionAlreadySet {
        /// Name of the offending task
        task: String,
    },

    /// A task was modified after its execution had started
    #[error("task '{task}' was modified after execution started")]
    Frozen {
        /// Name of the offending task
        task: String,
    },
}

/// Result type for graph configuration
pub type Result<T> = std::result::Result<T, Error>;

/// Why a task did not complete
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// A dependency failed, so this task was abandoned without running
    #[error("{task}: dependency '{dependency}' failed")]
    Dependency {
        /// The abandoned task
        task: String,
        /// The first dependency (in declaration order) that failed
        dependency: String,
        /// The dependency's own failure
        #[source]
        cause: Box<Failure>,
    },

    /// The task's action failed
    #[error("{task}: {message}")]
    Action {
        /// The failing task
        task: String,
        /// Rendered error, including captured process output when available
        message: String,
    },
}

impl Failure {
    /// Name of the task this failure belongs to
    pub fn task(&self) -> &str {
        match self {
            Self::Dependency { task, .. } | Self::Action { task, .. } => task,
        }
    }

    /// Follow dependency failures down to the action that actually failed
    pub fn root_cause(&self) -> &Failure {
        let mut current = self;
        while let Self::Dependency { cause, .. } = current {
            current = cause;
        }
        current
    }

    /// Names of the tasks from this one down to the root cause
    pub fn chain(&self) -> Vec<&str> {
        let mut names = vec![self.task()];
        let mut current = self;
        while let Self::Dependency { cause, .. } = current {
            names.push(cause.task());
            current = cause;
        }
        names
    }
}
