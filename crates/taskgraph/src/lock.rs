//! FIFO mutual exclusion over logical resources
//!
//! A [`Lock`] serializes the actions of every task that declares it. It guards
//! nothing by itself: the disk, package database or file it is named after is
//! only protected because all tasks touching that resource agree to take it.
//!
//! Waiters are granted the lock strictly in request order. Release hands the
//! lock directly to the next live waiter, so a newcomer can never overtake
//! the queue.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tokio::sync::oneshot;

/// Canonical identity of a lockable resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    /// A symbolic resource such as `package-database`
    Name(String),
    /// An absolute, lexically normalized filesystem path
    Path(PathBuf),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Default)]
struct LockState {
    held: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// A named lock with a FIFO wait queue
pub struct Lock {
    key: LockKey,
    state: Mutex<LockState>,
}

impl Lock {
    fn new(key: LockKey) -> Self {
        Self {
            key,
            state: Mutex::new(LockState::default()),
        }
    }

    /// The process-wide lock for a symbolic resource name
    pub fn named(name: impl Into<String>) -> Arc<Self> {
        LockRegistry::global().lock(name)
    }

    /// The process-wide lock for a filesystem path
    pub fn path(path: impl AsRef<Path>) -> Arc<Self> {
        LockRegistry::global().path(path)
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether someone currently holds the lock
    pub fn is_held(&self) -> bool {
        self.state().held
    }

    /// Number of queued waiters (including ones that gave up but were not yet skipped)
    pub fn queue_len(&self) -> usize {
        self.state().waiters.len()
    }

    /// Acquire the lock, waiting behind every earlier acquirer
    pub async fn acquire(self: &Arc<Self>) -> LockGuard {
        loop {
            let rx = {
                let mut state = self.state();
                if !state.held {
                    state.held = true;
                    return LockGuard {
                        lock: Arc::clone(self),
                    };
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                rx
            };

            log::debug!("Waiting for lock {}", self.key);
            let mut waiter = Waiter {
                lock: self,
                rx: Some(rx),
            };
            if waiter.granted().await {
                return LockGuard {
                    lock: Arc::clone(self),
                };
            }
        }
    }

    /// Hand the lock to the next live waiter, or mark it free
    fn release(&self) {
        let mut state = self.state();
        while let Some(tx) = state.waiters.pop_front() {
            if tx.send(()).is_ok() {
                return;
            }
        }
        state.held = false;
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Lock")
            .field("key", &self.key)
            .field("held", &state.held)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// A queued acquirer. Dropping it before the grant is observed gives the
/// lock back so the hand-over is not lost.
struct Waiter<'a> {
    lock: &'a Lock,
    rx: Option<oneshot::Receiver<()>>,
}

impl Waiter<'_> {
    async fn granted(&mut self) -> bool {
        let Some(rx) = self.rx.as_mut() else {
            return false;
        };
        let granted = rx.await.is_ok();
        self.rx = None;
        granted
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.lock.release();
            }
        }
    }
}

/// Proof of holding a [`Lock`]; releases on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    lock: Arc<Lock>,
}

impl LockGuard {
    pub fn key(&self) -> &LockKey {
        self.lock.key()
    }

    /// Release explicitly
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LockGuard").field(&self.lock.key).finish()
    }
}

/// Deduplicates locks by key
///
/// Two requests for the same key return the same `Arc<Lock>`. Locks live as
/// long as the registry.
#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<LockKey, Arc<Lock>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<LockRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    /// Lock for a symbolic resource name
    pub fn lock(&self, name: impl Into<String>) -> Arc<Lock> {
        self.get(LockKey::Name(name.into()))
    }

    /// Lock for a filesystem path, normalized lexically (`.` and `..` removed)
    pub fn path(&self, path: impl AsRef<Path>) -> Arc<Lock> {
        self.get(LockKey::Path(normalize(path.as_ref())))
    }

    fn get(&self, key: LockKey) -> Arc<Lock> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(key)
                .or_insert_with_key(|key| Arc::new(Lock::new(key.clone()))),
        )
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
