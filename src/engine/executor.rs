//! Execution engine - zfsroot's terminal integration for the task graph

use anyhow::Result;
use colored::Colorize;
use taskgraph::{ConfirmCallback, ExecuteOptions, ExecuteSummary, Outcome, Plan, ProgressCallback, Scheduler, Task};

use crate::ui;

/// Options for execution (includes `yes` for confirmation skip)
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Plan only, run nothing
    pub dry_run: bool,
    /// Drive requested steps one after another
    pub sequential: bool,
    /// Skip confirmation prompts
    pub yes: bool,
    /// Suppress plan and outcome rendering
    pub quiet: bool,
}

/// Renders the plan and root outcomes on the terminal
pub struct TerminalProgress {
    quiet: bool,
    completed: usize,
    roots: usize,
}

impl TerminalProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            completed: 0,
            roots: 0,
        }
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_plan(&mut self, plan: &Plan) {
        self.roots = plan.roots().len();
        log::debug!("Planned {} tasks for {} steps", plan.len(), self.roots);
        if self.quiet {
            return;
        }
        ui::section(&format!("Plan ({} tasks)", plan.len()));
        print!("{plan}");
    }

    fn on_task_complete(&mut self, task: &str, outcome: &Outcome) {
        self.completed += 1;
        if self.quiet && outcome.is_success() {
            return;
        }
        if !self.quiet {
            ui::step(self.completed, self.roots, task);
        }
        ui::outcome(task, outcome);
    }
}

/// Asks before anything runs, unless `--yes` was given
pub struct Confirmer {
    yes: bool,
}

impl Confirmer {
    pub fn new(yes: bool) -> Self {
        Self { yes }
    }
}

impl ConfirmCallback for Confirmer {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        if self.yes {
            log::debug!("Confirmation skipped (--yes)");
            return Ok(true);
        }

        use dialoguer::Confirm;

        println!();
        let confirmed = Confirm::new().with_prompt(prompt).default(true).interact()?;

        Ok(confirmed)
    }
}

/// Plan, confirm and drive `roots` with terminal output
pub async fn execute(roots: &[Task], opts: &RunOptions) -> Result<ExecuteSummary> {
    let scheduler = Scheduler::new(ExecuteOptions {
        concurrent_roots: !opts.sequential,
        dry_run: opts.dry_run,
    });
    let mut progress = TerminalProgress::new(opts.quiet);
    let mut confirm = Confirmer::new(opts.yes);

    let summary = scheduler.run(roots, &mut progress, &mut confirm).await?;

    if !opts.quiet {
        print_summary(&summary);
    }
    Ok(summary)
}

/// Print summary
fn print_summary(summary: &ExecuteSummary) {
    println!();
    if summary.planned_only {
        ui::info("Dry run - nothing was executed");
        return;
    }
    if summary.declined {
        ui::warn("Aborted");
        return;
    }

    let mut parts = Vec::new();
    if summary.succeeded > 0 {
        parts.push(format!("{} done", summary.succeeded).green().to_string());
    }
    if summary.already_satisfied > 0 {
        parts.push(format!("{} already done", summary.already_satisfied).dimmed().to_string());
    }
    if summary.failed > 0 {
        parts.push(format!("{} failed", summary.failed).red().to_string());
    }

    if summary.is_success() {
        ui::success(&parts.join(", "));
    } else {
        ui::error(&parts.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_confirmer_with_yes_never_prompts() {
        let mut confirm = Confirmer::new(true);
        assert!(confirm.confirm("OK to start?").unwrap());
    }

    #[tokio::test]
    async fn test_dry_run_executes_nothing() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let task = Task::new("touch").with_run(move || async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        let opts = RunOptions {
            dry_run: true,
            quiet: true,
            ..Default::default()
        };
        let summary = execute(&[task], &opts).await.unwrap();

        assert!(summary.planned_only);
        assert_eq!(summary.total(), 0);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_execute_reports_each_root() {
        let ok = Task::new("ok").with_run(|| async { Ok("Done.") });
        let failing = Task::new("failing").with_run(|| async { Err::<(), _>(anyhow::anyhow!("nope")) });

        let opts = RunOptions {
            yes: true,
            quiet: true,
            sequential: true,
            ..Default::default()
        };
        let summary = execute(&[ok, failing], &opts).await.unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.is_success());
        assert_eq!(summary.reports[0].message, "Done.");
    }
}
