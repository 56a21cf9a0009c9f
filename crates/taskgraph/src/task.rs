//! Task nodes
//!
//! A [`Task`] is a named unit of side-effecting work. It declares the tasks it
//! depends on, the locks its action needs, an optional list of skip
//! predicates that recognise when its effect is already in place, and the
//! action itself.
//!
//! `Task` is a cheap handle: clones refer to the same node, and equality is
//! node identity rather than name. Executing a node is memoized, so a
//! dependency shared by many dependents runs once and every dependent sees the
//! same [`Outcome`].
//!
//! Nodes are configured with the `with_*` builders before their first
//! execution. Once execution starts the node is frozen: later `with_*` calls
//! are ignored and recorded as [`Error::Frozen`].

use crate::completion::Completion;
use crate::error::{Error, Failure};
use crate::graph::Plan;
use crate::lock::{Lock, LockKey};
use crate::types::{ActionResult, Outcome};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Process-unique identity of a task node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

type Action = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<ActionResult>> + Send>;
type Producer = Box<dyn FnOnce() -> Vec<Task> + Send>;

/// Async check of real system state
///
/// Returns `Ok(true)` when the task's effect is already present.
#[derive(Clone)]
pub struct SkipPredicate(Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>);

impl SkipPredicate {
    pub fn new<F, Fut>(predicate: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self(Arc::new(move || predicate().boxed()))
    }

    /// Check the system once
    pub async fn evaluate(&self) -> anyhow::Result<bool> {
        (self.0)().await
    }
}

impl fmt::Debug for SkipPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SkipPredicate")
    }
}

/// Dependencies computed on first use
struct LazyDependencies {
    producer: Mutex<Option<Producer>>,
    tasks: OnceLock<Vec<Task>>,
}

impl LazyDependencies {
    fn tasks(&self) -> &[Task] {
        self.tasks.get_or_init(|| {
            let producer = self
                .producer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            producer.map(|produce| produce()).unwrap_or_default()
        })
    }
}

#[derive(Clone)]
enum Dependency {
    Ready(Task),
    Lazy(Arc<LazyDependencies>),
}

#[derive(Default)]
struct Spec {
    dependencies: Vec<Dependency>,
    locks: Vec<Arc<Lock>>,
    skip_if_all: Vec<SkipPredicate>,
    action: Option<Action>,
    has_action: bool,
    frozen: bool,
    errors: Vec<Error>,
}

struct Inner {
    id: TaskId,
    name: String,
    spec: Mutex<Spec>,
    started: AtomicBool,
    skip: tokio::sync::OnceCell<bool>,
    completion: Completion<Outcome>,
}

/// Handle to a task node
#[derive(Clone)]
pub struct Task {
    inner: Arc<Inner>,
}

impl Task {
    /// Create a task with no dependencies, locks, predicates or action
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: TaskId::next(),
                name: name.into(),
                spec: Mutex::new(Spec::default()),
                started: AtomicBool::new(false),
                skip: tokio::sync::OnceCell::new(),
                completion: Completion::new(),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn spec(&self) -> MutexGuard<'_, Spec> {
        self.inner.spec.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a configuration change unless the node is frozen
    fn configure(&self, what: &str, apply: impl FnOnce(&mut Spec)) {
        let mut spec = self.spec();
        if spec.frozen {
            log::error!(
                "Ignoring {what} for task '{}': execution already started",
                self.name()
            );
            spec.errors.push(Error::Frozen {
                task: self.name().to_string(),
            });
            return;
        }
        apply(&mut spec);
    }

    /// Append dependencies
    pub fn with_dependencies(self, tasks: impl IntoIterator<Item = Task>) -> Self {
        let tasks: Vec<_> = tasks.into_iter().map(Dependency::Ready).collect();
        self.configure("dependencies", |spec| spec.dependencies.extend(tasks));
        self
    }

    /// Append dependencies produced on first use
    ///
    /// The producer runs at most once, the first time the dependency list is
    /// needed (planning or execution).
    pub fn with_lazy_dependencies<F>(self, producer: F) -> Self
    where
        F: FnOnce() -> Vec<Task> + Send + 'static,
    {
        let producer: Producer = Box::new(producer);
        let lazy = Arc::new(LazyDependencies {
            producer: Mutex::new(Some(producer)),
            tasks: OnceLock::new(),
        });
        self.configure("lazy dependencies", |spec| {
            spec.dependencies.push(Dependency::Lazy(lazy));
        });
        self
    }

    /// Append locks to hold while the action runs
    ///
    /// Locks are acquired in declaration order and duplicates (same key) are
    /// ignored. Tasks that share more than one lock must declare them in the
    /// same global order, otherwise two tasks can deadlock each other. Locks
    /// on disks are declared sorted by device path.
    pub fn with_locks(self, locks: impl IntoIterator<Item = Arc<Lock>>) -> Self {
        let locks: Vec<_> = locks.into_iter().collect();
        self.configure("locks", |spec| {
            for lock in locks {
                if !spec.locks.iter().any(|held| held.key() == lock.key()) {
                    spec.locks.push(lock);
                }
            }
        });
        self
    }

    /// Append one skip predicate
    pub fn with_skip_if<F, Fut>(self, predicate: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.with_skip_if_all([SkipPredicate::new(predicate)])
    }

    /// Append skip predicates
    ///
    /// The task is skipped only when every predicate holds. Predicates are
    /// evaluated in order and evaluation stops at the first one that does
    /// not hold. A predicate that errors counts as not holding.
    pub fn with_skip_if_all(self, predicates: impl IntoIterator<Item = SkipPredicate>) -> Self {
        let predicates: Vec<_> = predicates.into_iter().collect();
        self.configure("skip predicates", |spec| {
            spec.skip_if_all.extend(predicates);
        });
        self
    }

    /// Set the action
    ///
    /// A task has at most one action. Setting a second one keeps the first
    /// and records [`Error::ActionAlreadySet`], which fails planning.
    pub fn with_run<F, Fut, R>(self, run: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<ActionResult> + 'static,
    {
        let name = self.name().to_string();
        let action: Action =
            Box::new(move || async move { run().await.map(Into::<ActionResult>::into) }.boxed());
        self.configure("action", move |spec| {
            if spec.has_action {
                log::error!("Task '{name}' was given more than one action");
                spec.errors.push(Error::ActionAlreadySet { task: name });
                return;
            }
            spec.has_action = true;
            spec.action = Some(action);
        });
        self
    }

    /// Declared dependencies, with lazy ones materialized
    pub fn dependencies(&self) -> Vec<Task> {
        let declared = self.spec().dependencies.clone();
        let mut tasks = Vec::with_capacity(declared.len());
        for dependency in &declared {
            match dependency {
                Dependency::Ready(task) => tasks.push(task.clone()),
                Dependency::Lazy(lazy) => tasks.extend_from_slice(lazy.tasks()),
            }
        }
        tasks
    }

    pub fn locks(&self) -> Vec<LockKey> {
        self.spec().locks.iter().map(|lock| lock.key().clone()).collect()
    }

    pub fn has_action(&self) -> bool {
        self.spec().has_action
    }

    /// Misconfigurations recorded by the builders
    pub fn configuration_errors(&self) -> Vec<Error> {
        self.spec().errors.clone()
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// The settled outcome, without waiting
    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.completion.get().map(Outcome::from)
    }

    /// One-line description for plan listings
    pub fn describe(&self) -> String {
        let locks = self.locks();
        if locks.is_empty() {
            return self.name().to_string();
        }
        let locks: Vec<_> = locks.iter().map(ToString::to_string).collect();
        format!("{} [locks: {}]", self.name(), locks.join(", "))
    }

    /// Execute the task after its dependencies
    ///
    /// Safe to call any number of times from any number of places: the first
    /// call drives the node, every call returns the same outcome.
    ///
    /// Before the node has started, the graph below it is checked with
    /// [`Plan::build`]. A cycle or a configuration error fails this call
    /// without running anything and without settling the node.
    pub fn execute(&self) -> BoxFuture<'static, Outcome> {
        if !self.is_started()
            && let Err(e) = Plan::build(std::slice::from_ref(self))
        {
            log::error!("{}: {e}", self.name());
            return futures::future::ready(Outcome::Failure(Failure::Action {
                task: self.name().to_string(),
                message: format!("invalid task graph: {e}"),
            }))
            .boxed();
        }
        self.start()
    }

    /// Execute without checking the graph first
    ///
    /// Callers must have validated a plan containing this node.
    pub(crate) fn start(&self) -> BoxFuture<'static, Outcome> {
        let task = self.clone();
        async move { task.run().await }.boxed()
    }

    /// Wait for the outcome without starting the task
    pub async fn wait(&self) -> Outcome {
        self.inner.completion.wait().await.into()
    }

    async fn run(self) -> Outcome {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return self.wait().await;
        }
        self.spec().frozen = true;

        let outcome = self.drive().await;
        match &outcome {
            Outcome::Failure(Failure::Action { message, .. }) => {
                log::error!("{} failed: {message}", self.name());
            }
            other => log::info!("{}", other.message()),
        }

        let settled = match outcome {
            Outcome::Failure(failure) => self.inner.completion.reject(failure),
            other => self.inner.completion.resolve(other),
        };
        debug_assert!(settled, "task {} settled twice", self.name());
        self.wait().await
    }

    async fn drive(&self) -> Outcome {
        let name = self.name();

        let dependencies = self.dependencies();
        let outcomes = join_all(dependencies.iter().map(Task::start)).await;
        let failed = dependencies
            .iter()
            .zip(&outcomes)
            .find_map(|(task, outcome)| outcome.failure().map(|failure| (task, failure)));
        if let Some((dependency, cause)) = failed {
            log::info!("Abandoning {name}: {} failed", dependency.name());
            return Outcome::Failure(Failure::Dependency {
                task: name.to_string(),
                dependency: dependency.name().to_string(),
                cause: Box::new(cause.clone()),
            });
        }

        if self.is_satisfied().await {
            return Outcome::AlreadySatisfied(format!("Already done: {name}"));
        }

        let (locks, action) = {
            let mut spec = self.spec();
            (spec.locks.clone(), spec.action.take())
        };

        let mut guards = Vec::with_capacity(locks.len());
        for lock in &locks {
            guards.push(lock.acquire().await);
        }

        log::info!("Running {name}");
        let result = match action {
            Some(action) => AssertUnwindSafe(async move { action().await })
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("action panicked"))),
            None => Ok(ActionResult::NoResult),
        };
        drop(guards);

        match result {
            Ok(ActionResult::NoResult) => Outcome::Success(format!("Success: {name}")),
            Ok(ActionResult::Message(message)) => Outcome::Success(message),
            Ok(ActionResult::Failure(message)) => Outcome::Failure(Failure::Action {
                task: name.to_string(),
                message,
            }),
            Ok(ActionResult::FollowUps(tasks)) => self.run_follow_ups(tasks).await,
            Err(e) => Outcome::Failure(Failure::Action {
                task: name.to_string(),
                message: format!("{e:#}"),
            }),
        }
    }

    /// Skip decision, computed at most once
    async fn is_satisfied(&self) -> bool {
        let predicates = self.spec().skip_if_all.clone();
        if predicates.is_empty() {
            return false;
        }

        let name = self.name();
        *self
            .inner
            .skip
            .get_or_init(|| async move {
                for predicate in &predicates {
                    match predicate.evaluate().await {
                        Ok(true) => {}
                        Ok(false) => {
                            log::debug!("{name}: not yet satisfied");
                            return false;
                        }
                        Err(e) => {
                            log::warn!("{name}: skip check failed, running anyway: {e:#}");
                            return false;
                        }
                    }
                }
                log::debug!("{name}: already satisfied, skipping");
                true
            })
            .await
    }

    async fn run_follow_ups(&self, tasks: Vec<Task>) -> Outcome {
        let name = self.name();
        let Some(last) = tasks.last().cloned() else {
            return Outcome::Success(format!("Success: {name}"));
        };

        match Plan::build(&tasks) {
            Ok(plan) if plan.contains(self) => {
                return Outcome::Failure(Failure::Action {
                    task: name.to_string(),
                    message: "follow-up tasks depend on the task that produced them".into(),
                });
            }
            Ok(plan) => log::debug!("{name}: running {} follow-up tasks", plan.len()),
            Err(e) => {
                return Outcome::Failure(Failure::Action {
                    task: name.to_string(),
                    message: format!("invalid follow-up tasks: {e}"),
                });
            }
        }

        join_all(tasks.iter().map(Task::start)).await;
        last.wait().await
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Task {}

impl Hash for Task {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockRegistry;
    use std::sync::atomic::AtomicUsize;

    type Events = Arc<Mutex<Vec<String>>>;

    fn events() -> Events {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn recorded(events: &Events) -> Vec<String> {
        events.lock().unwrap().clone()
    }

    fn recording(name: &str, events: &Events) -> Task {
        let events = Arc::clone(events);
        let label = name.to_string();
        Task::new(name).with_run(move || async move {
            events.lock().unwrap().push(label);
            Ok(())
        })
    }

    fn counting(name: &str, count: &Arc<AtomicUsize>) -> Task {
        let count = Arc::clone(count);
        Task::new(name).with_run(move || async move {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn failing(name: &str) -> Task {
        Task::new(name).with_run(|| async { Err::<(), _>(anyhow::anyhow!("boom")) })
    }

    #[tokio::test]
    async fn test_action_without_result_reports_success() {
        let task = Task::new("noop").with_run(|| async { Ok(()) });
        assert_eq!(task.execute().await, Outcome::Success("Success: noop".into()));
        assert_eq!(task.outcome(), Some(Outcome::Success("Success: noop".into())));
    }

    #[tokio::test]
    async fn test_action_message_and_failure() {
        let message = Task::new("m").with_run(|| async { Ok("partitioned /dev/sda") });
        assert_eq!(
            message.execute().await,
            Outcome::Success("partitioned /dev/sda".into())
        );

        let failed = Task::new("f").with_run(|| async { Ok(ActionResult::Failure("nope".into())) });
        assert_eq!(
            failed.execute().await,
            Outcome::Failure(Failure::Action {
                task: "f".into(),
                message: "nope".into()
            })
        );

        let errored = failing("e");
        assert_eq!(errored.execute().await.message(), "e: boom");
    }

    #[tokio::test]
    async fn test_grouping_node_succeeds() {
        let group = Task::new("group");
        assert_eq!(group.execute().await, Outcome::Success("Success: group".into()));
    }

    #[tokio::test]
    async fn test_shared_dependency_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let d = counting("d", &count);
        let a = Task::new("a").with_dependencies([d.clone()]);
        let b = Task::new("b").with_dependencies([d.clone()]);
        let root = Task::new("root").with_dependencies([a, b]);

        assert!(root.execute().await.is_success());
        assert!(d.execute().await.is_success());
        assert!(root.execute().await.is_success());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let count = Arc::new(AtomicUsize::new(0));
        let task = counting("once", &count);

        let outcomes = join_all((0..5).map(|_| task.execute())).await;
        assert!(outcomes.iter().all(|o| o == &outcomes[0]));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dependencies_complete_before_dependents() {
        let events = events();
        let a = recording("a", &events);
        let b = recording("b", &events).with_dependencies([a.clone()]);
        let c = recording("c", &events).with_dependencies([a.clone()]);
        let d = recording("d", &events).with_dependencies([b, c]);

        assert!(d.execute().await.is_success());

        let order = recorded(&events);
        let position = |name: &str| order.iter().position(|e| e == name).unwrap();
        assert_eq!(order.len(), 4);
        assert!(position("a") < position("b"));
        assert!(position("a") < position("c"));
        assert!(position("b") < position("d"));
        assert!(position("c") < position("d"));
    }

    #[tokio::test]
    async fn test_failure_propagates_to_dependents_only() {
        let y_ran = Arc::new(AtomicUsize::new(0));
        let x = failing("x");
        let y = counting("y", &y_ran).with_dependencies([x.clone()]);
        let w = Task::new("w").with_dependencies([y.clone()]);
        let z_ran = Arc::new(AtomicUsize::new(0));
        let z = counting("z", &z_ran);

        let (w_outcome, z_outcome) = tokio::join!(w.execute(), z.execute());

        let failure = w_outcome.failure().unwrap();
        assert_eq!(failure.chain(), vec!["w", "y", "x"]);
        assert!(matches!(
            failure,
            Failure::Dependency { dependency, .. } if dependency == "y"
        ));
        assert!(y.outcome().unwrap().is_failure());
        assert_eq!(y_ran.load(Ordering::SeqCst), 0);

        assert!(z_outcome.is_success());
        assert_eq!(z_ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_failed_dependency_is_reported() {
        let ok = Task::new("ok");
        let first = failing("first");
        let second = failing("second");
        let task = Task::new("task").with_dependencies([ok, first, second]);

        match task.execute().await {
            Outcome::Failure(Failure::Dependency { dependency, .. }) => {
                assert_eq!(dependency, "first");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_skipped_when_every_predicate_holds() {
        let count = Arc::new(AtomicUsize::new(0));
        let task = counting("install-vim", &count)
            .with_skip_if(|| async { Ok(true) })
            .with_skip_if(|| async { Ok(true) });

        assert_eq!(
            task.execute().await,
            Outcome::AlreadySatisfied("Already done: install-vim".into())
        );
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_runs_when_any_predicate_fails() {
        let count = Arc::new(AtomicUsize::new(0));
        let task = counting("t", &count)
            .with_skip_if(|| async { Ok(true) })
            .with_skip_if(|| async { Ok(false) });

        assert_eq!(task.execute().await, Outcome::Success("Success: t".into()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_predicates_stop_at_first_false() {
        let checked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&checked);
        let task = Task::new("t")
            .with_skip_if(|| async { Ok(false) })
            .with_skip_if(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(true) }
            });

        assert!(task.execute().await.is_success());
        assert_eq!(checked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_predicate_error_counts_as_not_satisfied() {
        let count = Arc::new(AtomicUsize::new(0));
        let task = counting("t", &count)
            .with_skip_if(|| async { Err(anyhow::anyhow!("zpool: command not found")) });

        assert_eq!(task.execute().await, Outcome::Success("Success: t".into()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_predicates_not_evaluated_when_dependency_fails() {
        let checked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&checked);
        let task = Task::new("t")
            .with_dependencies([failing("dep")])
            .with_skip_if(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(true) }
            });

        assert!(task.execute().await.is_failure());
        assert_eq!(checked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tasks_sharing_a_lock_never_overlap() {
        let registry = LockRegistry::new();
        let lock = registry.lock("disk");
        let events = events();

        let holder = |name: &'static str| {
            let events = Arc::clone(&events);
            Task::new(name)
                .with_locks([Arc::clone(&lock)])
                .with_run(move || async move {
                    events.lock().unwrap().push(format!("{name}:in"));
                    tokio::task::yield_now().await;
                    tokio::task::yield_now().await;
                    events.lock().unwrap().push(format!("{name}:out"));
                    Ok(())
                })
        };

        let a = Task::new("a");
        assert!(a.execute().await.is_success());
        let b = holder("b").with_dependencies([a.clone()]);
        let c = holder("c").with_dependencies([a.clone()]);
        let root = Task::new("root").with_dependencies([b, c]);

        assert!(root.execute().await.is_success());
        assert_eq!(recorded(&events), vec!["b:in", "b:out", "c:in", "c:out"]);
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_duplicate_locks_are_ignored() {
        let registry = LockRegistry::new();
        let task = Task::new("t").with_locks([registry.lock("apt"), registry.lock("apt")]);
        assert_eq!(task.locks(), vec![LockKey::Name("apt".into())]);
        assert!(task.execute().await.is_success());
    }

    #[tokio::test]
    async fn test_locks_released_after_failure() {
        let registry = LockRegistry::new();
        let lock = registry.lock("disk");
        let task = failing("t").with_locks([Arc::clone(&lock)]);

        assert!(task.execute().await.is_failure());
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_panicking_action_fails_and_releases_locks() {
        let registry = LockRegistry::new();
        let lock = registry.lock("disk");
        let task = Task::new("t")
            .with_locks([Arc::clone(&lock)])
            .with_run(|| async {
                if true {
                    panic!("kaboom");
                }
                Ok(())
            });

        assert_eq!(task.execute().await.message(), "t: action panicked");
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_follow_ups_decide_the_outcome() {
        let events = events();
        let first = recording("first", &events);
        let last = Task::new("last").with_run(|| async { Ok("wrote /etc/network/interfaces") });
        let follow_ups = vec![first, last];
        let parent = Task::new("network-interface").with_run(move || async move { Ok(follow_ups) });

        assert_eq!(
            parent.execute().await,
            Outcome::Success("wrote /etc/network/interfaces".into())
        );
        assert_eq!(recorded(&events), vec!["first"]);
    }

    #[tokio::test]
    async fn test_follow_up_outcome_can_be_already_satisfied() {
        let done = Task::new("done").with_skip_if(|| async { Ok(true) });
        let parent = Task::new("parent").with_run(move || async move { Ok(done) });

        assert_eq!(
            parent.execute().await,
            Outcome::AlreadySatisfied("Already done: done".into())
        );
    }

    #[tokio::test]
    async fn test_last_follow_up_outcome_wins_over_earlier_failure() {
        let bad = failing("bad");
        let good = Task::new("good").with_run(|| async { Ok("last ok") });
        let tasks = vec![bad.clone(), good];
        let parent = Task::new("parent").with_run(move || async move { Ok(tasks) });

        assert_eq!(parent.execute().await, Outcome::Success("last ok".into()));
        assert!(bad.outcome().unwrap().is_failure());
    }

    #[tokio::test]
    async fn test_failed_last_follow_up_fails_the_parent() {
        let tasks = vec![Task::new("good"), failing("bad")];
        let parent = Task::new("parent").with_run(move || async move { Ok(tasks) });

        let outcome = parent.execute().await;
        assert_eq!(outcome.failure().unwrap().task(), "bad");
    }

    #[tokio::test]
    async fn test_execute_rejects_a_cycle_without_running() {
        let count = Arc::new(AtomicUsize::new(0));
        let a = counting("a", &count);
        let b = counting("b", &count).with_dependencies([a.clone()]);
        let a = a.with_dependencies([b.clone()]);

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), a.execute())
            .await
            .expect("execute must not hang on a cycle");

        assert!(outcome.message().contains("dependency cycle"), "{}", outcome.message());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!a.is_started());
        assert!(!b.is_started());
    }

    #[tokio::test]
    async fn test_empty_follow_ups_succeed() {
        let parent = Task::new("parent").with_run(|| async { Ok(Vec::<Task>::new()) });
        assert_eq!(parent.execute().await, Outcome::Success("Success: parent".into()));
    }

    #[tokio::test]
    async fn test_follow_up_depending_on_parent_is_rejected() {
        let parent = Task::new("parent");
        let child = Task::new("child").with_dependencies([parent.clone()]);
        let parent = parent.with_run(move || async move { Ok(child) });

        let outcome = parent.execute().await;
        assert!(outcome.is_failure());
        assert!(outcome.message().contains("depend on the task that produced them"));
    }

    #[tokio::test]
    async fn test_follow_ups_run_without_parent_locks() {
        let registry = LockRegistry::new();
        let lock = registry.lock("file");
        let child = Task::new("child").with_locks([Arc::clone(&lock)]);
        let parent = Task::new("parent")
            .with_locks([Arc::clone(&lock)])
            .with_run(move || async move { Ok(child) });

        assert!(parent.execute().await.is_success());
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_lazy_dependencies_are_produced_once() {
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&produced);
        let ran = Arc::new(AtomicUsize::new(0));
        let dep = counting("dep", &ran);
        let task = Task::new("t").with_lazy_dependencies(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![dep]
        });

        assert_eq!(produced.load(Ordering::SeqCst), 0);
        assert_eq!(task.dependencies().len(), 1);
        assert_eq!(task.dependencies().len(), 1);
        assert!(task.execute().await.is_success());
        assert_eq!(produced.load(Ordering::SeqCst), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_action_is_recorded_and_nothing_runs() {
        let events = events();
        let first = Arc::clone(&events);
        let second = Arc::clone(&events);
        let task = Task::new("t")
            .with_run(move || async move {
                first.lock().unwrap().push("first".to_string());
                Ok(())
            })
            .with_run(move || async move {
                second.lock().unwrap().push("second".to_string());
                Ok(())
            });

        assert_eq!(
            task.configuration_errors(),
            vec![Error::ActionAlreadySet { task: "t".into() }]
        );
        let outcome = task.execute().await;
        assert!(outcome.message().contains("more than one action"), "{}", outcome.message());
        assert!(recorded(&events).is_empty());
        assert!(!task.is_started());
    }

    #[tokio::test]
    async fn test_builders_rejected_after_execution() {
        let task = Task::new("t");
        assert!(task.execute().await.is_success());
        assert!(task.is_started());

        let task = task.with_dependencies([Task::new("late")]);
        assert!(task.dependencies().is_empty());
        assert_eq!(
            task.configuration_errors(),
            vec![Error::Frozen { task: "t".into() }]
        );
    }

    #[test]
    fn test_identity_is_per_node() {
        let a = Task::new("same");
        let b = Task::new("same");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.to_string(), "same");
    }

    #[test]
    fn test_describe_lists_locks() {
        let registry = LockRegistry::new();
        let task = Task::new("zfs-boot-pool")
            .with_locks([registry.path("/dev/sda"), registry.path("/dev/sdb")]);
        assert_eq!(task.describe(), "zfs-boot-pool [locks: /dev/sda, /dev/sdb]");
        assert_eq!(Task::new("plain").describe(), "plain");
    }
}
