//! Progress and confirmation provider traits
//!
//! These traits let the scheduler report and ask questions without depending
//! on a particular terminal implementation.

use crate::graph::Plan;
use crate::types::Outcome;
use anyhow::Result;

/// Progress callback for scheduler runs
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback: Send {
    /// Called once the plan has been built, before confirmation
    fn on_plan(&mut self, plan: &Plan);

    /// Called when a requested root task has settled
    fn on_task_complete(&mut self, task: &str, outcome: &Outcome);
}

/// Confirmation callback for user interaction
///
/// Implement this trait to handle user confirmations.
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_plan(&mut self, _plan: &Plan) {}
    fn on_task_complete(&mut self, _task: &str, _outcome: &Outcome) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}
