//! Core types for task execution

use crate::error::Failure;
use crate::task::Task;
use serde::{Deserialize, Serialize};

/// Terminal outcome of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The action ran and succeeded
    Success(String),
    /// Every skip predicate held, the action was not run
    AlreadySatisfied(String),
    /// The task or one of its dependencies failed
    Failure(Failure),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Check if the outcome is a success (ran or already satisfied)
    pub fn is_success(&self) -> bool {
        !self.is_failure()
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failure(failure) => Some(failure),
            _ => None,
        }
    }

    /// Human-readable message for display
    pub fn message(&self) -> String {
        match self {
            Self::Success(message) | Self::AlreadySatisfied(message) => message.clone(),
            Self::Failure(failure) => failure.to_string(),
        }
    }

    fn status(&self) -> Status {
        match self {
            Self::Success(_) => Status::Success,
            Self::AlreadySatisfied(_) => Status::AlreadySatisfied,
            Self::Failure(_) => Status::Failed,
        }
    }
}

impl From<Result<Outcome, Failure>> for Outcome {
    fn from(result: Result<Outcome, Failure>) -> Self {
        result.unwrap_or_else(Outcome::Failure)
    }
}

/// What an action hands back to the engine
pub enum ActionResult {
    /// Nothing to report, the task succeeded
    NoResult,
    /// The task succeeded with a custom message
    Message(String),
    /// The task failed with a message
    Failure(String),
    /// The task decided its remaining work at run time. The follow-ups are
    /// executed and the task completes with the last one's outcome.
    FollowUps(Vec<Task>),
}

impl From<()> for ActionResult {
    fn from((): ()) -> Self {
        Self::NoResult
    }
}

impl From<String> for ActionResult {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for ActionResult {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}

impl From<Vec<Task>> for ActionResult {
    fn from(tasks: Vec<Task>) -> Self {
        Self::FollowUps(tasks)
    }
}

impl From<Task> for ActionResult {
    fn from(task: Task) -> Self {
        Self::FollowUps(vec![task])
    }
}

/// Options for a scheduler run
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Drive requested roots concurrently rather than one after another
    pub concurrent_roots: bool,
    /// Build and report the plan, run nothing
    pub dry_run: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            concurrent_roots: true,
            dry_run: false,
        }
    }
}

/// Status column of a [`TaskReport`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Success,
    AlreadySatisfied,
    Failed,
}

/// Per-root line of an [`ExecuteSummary`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task: String,
    pub status: Status,
    pub message: String,
}

/// Summary of a scheduler run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub succeeded: usize,
    pub already_satisfied: usize,
    pub failed: usize,
    /// The user declined the confirmation prompt, nothing ran
    pub declined: bool,
    /// Dry run, nothing ran
    pub planned_only: bool,
    pub reports: Vec<TaskReport>,
}

impl ExecuteSummary {
    /// Record the outcome of a requested root
    pub fn add(&mut self, task: &str, outcome: &Outcome) {
        match outcome {
            Outcome::Success(_) => self.succeeded += 1,
            Outcome::AlreadySatisfied(_) => self.already_satisfied += 1,
            Outcome::Failure(_) => self.failed += 1,
        }
        self.reports.push(TaskReport {
            task: task.to_string(),
            status: outcome.status(),
            message: outcome.message(),
        });
    }

    /// Check if every requested root completed without failure
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of roots recorded
    pub fn total(&self) -> usize {
        self.succeeded + self.already_satisfied + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_outcomes() {
        let mut summary = ExecuteSummary::default();
        summary.add("a", &Outcome::Success("Success: a".into()));
        summary.add("b", &Outcome::AlreadySatisfied("Already done: b".into()));
        assert!(summary.is_success());

        summary.add(
            "c",
            &Outcome::Failure(Failure::Action {
                task: "c".into(),
                message: "exit 1".into(),
            }),
        );
        assert!(!summary.is_success());
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.reports[2].status, Status::Failed);
        assert_eq!(summary.reports[2].message, "c: exit 1");
    }

    #[test]
    fn test_summary_serializes_statuses_in_kebab_case() {
        let mut summary = ExecuteSummary::default();
        summary.add("b", &Outcome::AlreadySatisfied("Already done: b".into()));
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains(r#""status":"already-satisfied""#));
    }

    #[test]
    fn test_action_result_conversions() {
        assert!(matches!(ActionResult::from(()), ActionResult::NoResult));
        assert!(matches!(ActionResult::from("hi"), ActionResult::Message(m) if m == "hi"));
        assert!(matches!(
            ActionResult::from(Vec::<Task>::new()),
            ActionResult::FollowUps(tasks) if tasks.is_empty()
        ));
    }
}
