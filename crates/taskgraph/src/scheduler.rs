//! Scheduler - plans, confirms and drives a set of requested tasks

use crate::context::{AutoConfirm, ConfirmCallback, NoProgress, ProgressCallback};
use crate::error::Result;
use crate::graph::Plan;
use crate::task::Task;
use crate::types::{ExecuteOptions, ExecuteSummary, Outcome};
use futures::future::join_all;
use std::collections::HashSet;

/// Drives requested root tasks to completion
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    options: ExecuteOptions,
}

impl Scheduler {
    pub fn new(options: ExecuteOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExecuteOptions {
        &self.options
    }

    /// Flatten and validate the graph below `roots`
    pub fn plan(&self, roots: &[Task]) -> Result<Plan> {
        Plan::build(roots)
    }

    /// Plan, confirm and execute `roots`
    ///
    /// Configuration errors (cycles, double actions, late modification) abort
    /// before anything runs. Otherwise every root is driven to a terminal
    /// outcome; a failing root does not stop unrelated roots.
    pub async fn run<P, C>(
        &self,
        roots: &[Task],
        progress: &mut P,
        confirm: &mut C,
    ) -> anyhow::Result<ExecuteSummary>
    where
        P: ProgressCallback,
        C: ConfirmCallback,
    {
        let roots = dedup(roots);
        let plan = self.plan(&roots)?;
        progress.on_plan(&plan);

        if self.options.dry_run {
            return Ok(ExecuteSummary {
                planned_only: true,
                ..Default::default()
            });
        }

        if !confirm.confirm("OK to start?")? {
            log::info!("Run declined, nothing was executed");
            return Ok(ExecuteSummary {
                declined: true,
                ..Default::default()
            });
        }

        let outcomes = self.drive(&roots).await;

        let mut summary = ExecuteSummary::default();
        for (root, outcome) in roots.iter().zip(&outcomes) {
            progress.on_task_complete(root.name(), outcome);
            summary.add(root.name(), outcome);
        }
        Ok(summary)
    }

    async fn drive(&self, roots: &[Task]) -> Vec<Outcome> {
        if self.options.concurrent_roots {
            return join_all(roots.iter().map(Task::start)).await;
        }

        let mut outcomes = Vec::with_capacity(roots.len());
        for root in roots {
            outcomes.push(root.start().await);
        }
        outcomes
    }
}

/// Execute `roots` without progress reporting or confirmation
pub async fn execute_simple(roots: &[Task], options: ExecuteOptions) -> anyhow::Result<ExecuteSummary> {
    Scheduler::new(options)
        .run(roots, &mut NoProgress, &mut AutoConfirm)
        .await
}

fn dedup(roots: &[Task]) -> Vec<Task> {
    let mut seen = HashSet::new();
    roots
        .iter()
        .filter(|task| seen.insert(task.id()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AutoDecline;
    use crate::error::Error;
    use crate::lock::LockRegistry;
    use crate::types::Status;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        planned: Vec<String>,
        completed: Vec<(String, bool)>,
    }

    impl ProgressCallback for Recorder {
        fn on_plan(&mut self, plan: &Plan) {
            self.planned = plan.order().iter().map(|t| t.name().to_string()).collect();
        }

        fn on_task_complete(&mut self, task: &str, outcome: &Outcome) {
            self.completed.push((task.to_string(), outcome.is_success()));
        }
    }

    fn counting(name: &str, count: &Arc<AtomicUsize>) -> Task {
        let count = Arc::clone(count);
        Task::new(name).with_run(move || async move {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    /// A task that creates `path` unless it already exists
    fn creates(name: &str, path: PathBuf, ran: &Arc<Mutex<Vec<String>>>, registry: &LockRegistry) -> Task {
        let check = path.clone();
        let ran = Arc::clone(ran);
        let label = name.to_string();
        Task::new(name)
            .with_locks([registry.path(path.parent().unwrap_or(Path::new("/")))])
            .with_skip_if(move || {
                let exists = check.exists();
                async move { Ok(exists) }
            })
            .with_run(move || async move {
                let written = std::fs::write(&path, "ok");
                ran.lock().unwrap().push(label);
                written.map_err(anyhow::Error::from)
            })
    }

    /// A task with no skip predicates: it runs on every invocation
    fn always_runs(name: &str, ran: &Arc<Mutex<Vec<String>>>) -> Task {
        let ran = Arc::clone(ran);
        let label = name.to_string();
        Task::new(name).with_run(move || async move {
            ran.lock().unwrap().push(label);
            Ok(())
        })
    }

    fn provisioning_graph(dir: &Path, ran: &Arc<Mutex<Vec<String>>>) -> Vec<Task> {
        let registry = LockRegistry::new();
        let disk = registry.path("/dev/x");
        let prepare = always_runs("prepare-env", ran);
        let efi = creates("zfs-partition-2-efi", dir.join("x-part2"), ran, &registry)
            .with_locks([Arc::clone(&disk)])
            .with_dependencies([prepare.clone()]);
        let boot = creates("zfs-partition-3-boot", dir.join("x-part3"), ran, &registry)
            .with_locks([disk])
            .with_dependencies([prepare]);
        let partitions = Task::new("zfs-partitions").with_dependencies([efi, boot]);
        let pool = creates("zfs-boot-pool", dir.join("bpool"), ran, &registry)
            .with_dependencies([partitions.clone()]);
        vec![pool, partitions]
    }

    fn runs_of(ran: &Arc<Mutex<Vec<String>>>, name: &str) -> usize {
        ran.lock().unwrap().iter().filter(|entry| *entry == name).count()
    }

    #[tokio::test]
    async fn test_provisioning_twice_only_acts_once() {
        let dir = TempDir::new().unwrap();
        let ran = Arc::new(Mutex::new(Vec::new()));

        let first = execute_simple(&provisioning_graph(dir.path(), &ran), ExecuteOptions::default())
            .await
            .unwrap();
        assert!(first.is_success());
        assert_eq!(first.succeeded, 2);
        assert_eq!(runs_of(&ran, "prepare-env"), 1);
        assert_eq!(runs_of(&ran, "zfs-partition-2-efi"), 1);
        assert_eq!(runs_of(&ran, "zfs-partition-3-boot"), 1);
        assert_eq!(runs_of(&ran, "zfs-boot-pool"), 1);
        assert_eq!(ran.lock().unwrap()[0], "prepare-env");
        assert!(dir.path().join("bpool").exists());

        ran.lock().unwrap().clear();
        let second = execute_simple(&provisioning_graph(dir.path(), &ran), ExecuteOptions::default())
            .await
            .unwrap();
        assert!(second.is_success());
        assert_eq!(*ran.lock().unwrap(), vec!["prepare-env"]);
        assert_eq!(second.reports[0].status, Status::AlreadySatisfied);
        assert_eq!(second.reports[0].message, "Already done: zfs-boot-pool");
    }

    #[tokio::test]
    async fn test_partial_previous_run_resumes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("x-part2"), "from an earlier run").unwrap();
        let ran = Arc::new(Mutex::new(Vec::new()));

        let summary = execute_simple(&provisioning_graph(dir.path(), &ran), ExecuteOptions::default())
            .await
            .unwrap();
        assert!(summary.is_success());
        let mut ran = ran.lock().unwrap().clone();
        ran.sort();
        assert_eq!(ran, vec!["prepare-env", "zfs-boot-pool", "zfs-partition-3-boot"]);
    }

    #[tokio::test]
    async fn test_progress_sees_plan_and_root_outcomes() {
        let count = Arc::new(AtomicUsize::new(0));
        let dep = counting("dep", &count);
        let root = counting("root", &count).with_dependencies([dep]);
        let mut recorder = Recorder::default();

        let summary = Scheduler::default()
            .run(&[root.clone(), root], &mut recorder, &mut AutoConfirm)
            .await
            .unwrap();

        assert_eq!(recorder.planned, vec!["dep", "root"]);
        assert_eq!(recorder.completed, vec![("root".to_string(), true)]);
        assert_eq!(summary.total(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_declined_run_executes_nothing() {
        let count = Arc::new(AtomicUsize::new(0));
        let root = counting("root", &count);

        let summary = Scheduler::default()
            .run(&[root.clone()], &mut NoProgress, &mut AutoDecline)
            .await
            .unwrap();

        assert!(summary.declined);
        assert!(!root.is_started());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dry_run_only_plans() {
        let count = Arc::new(AtomicUsize::new(0));
        let root = counting("root", &count);
        let mut recorder = Recorder::default();

        let scheduler = Scheduler::new(ExecuteOptions {
            dry_run: true,
            ..Default::default()
        });
        let summary = scheduler
            .run(&[root], &mut recorder, &mut AutoConfirm)
            .await
            .unwrap();

        assert!(summary.planned_only);
        assert_eq!(recorder.planned, vec!["root"]);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cycle_aborts_before_any_action() {
        let count = Arc::new(AtomicUsize::new(0));
        let a = counting("a", &count);
        let b = counting("b", &count).with_dependencies([a.clone()]);
        let a = a.with_dependencies([b.clone()]);
        let ok = counting("unrelated", &count);

        let err = execute_simple(&[ok, a], ExecuteOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Cycle(_))));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_root_does_not_stop_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let bad = Task::new("bad").with_run(|| async { Err::<(), _>(anyhow::anyhow!("exit 1")) });
        let good = counting("good", &count);

        for concurrent_roots in [true, false] {
            let options = ExecuteOptions {
                concurrent_roots,
                ..Default::default()
            };
            let summary = execute_simple(&[bad.clone(), good.clone()], options)
                .await
                .unwrap();
            assert!(!summary.is_success());
            assert_eq!(summary.failed, 1);
            assert_eq!(summary.succeeded, 1);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_roots_run_in_request_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let make = |name: &'static str| {
            let order = Arc::clone(&order);
            Task::new(name).with_run(move || async move {
                order.lock().unwrap().push(name);
                Ok(())
            })
        };
        let options = ExecuteOptions {
            concurrent_roots: false,
            ..Default::default()
        };

        execute_simple(&[make("first"), make("second"), make("third")], options)
            .await
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }
}
