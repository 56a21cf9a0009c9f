//! Single-assignment completion cell
//!
//! A [`Completion`] starts pending and settles exactly once, either resolved
//! with a value or rejected with a [`Failure`]. Any number of observers may
//! wait on it; observers arriving after settlement get the stored value
//! immediately. Settling an already settled cell is a no-op, so racing
//! settlements keep the first value.

use crate::error::Failure;
use std::fmt;
use tokio::sync::watch;

#[derive(Debug, Clone)]
enum State<T> {
    Pending,
    Resolved(T),
    Rejected(Failure),
}

impl<T: Clone> State<T> {
    fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    fn terminal(&self) -> Option<Result<T, Failure>> {
        match self {
            Self::Pending => None,
            Self::Resolved(value) => Some(Ok(value.clone())),
            Self::Rejected(failure) => Some(Err(failure.clone())),
        }
    }
}

/// A one-shot, many-observer future for a task outcome
pub struct Completion<T> {
    tx: watch::Sender<State<T>>,
}

impl<T: Clone> Completion<T> {
    /// Create a pending cell
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(State::Pending);
        Self { tx }
    }

    /// Resolve with a value. Returns `false` if the cell was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(State::Resolved(value))
    }

    /// Reject with a failure. Returns `false` if the cell was already settled.
    pub fn reject(&self, failure: Failure) -> bool {
        self.settle(State::Rejected(failure))
    }

    fn settle(&self, next: State<T>) -> bool {
        let mut next = Some(next);
        self.tx.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            match next.take() {
                Some(terminal) => {
                    *state = terminal;
                    true
                }
                None => false,
            }
        })
    }

    /// Whether the cell has settled
    pub fn is_terminal(&self) -> bool {
        self.tx.borrow().is_terminal()
    }

    /// The settled value, without waiting
    pub fn get(&self) -> Option<Result<T, Failure>> {
        self.tx.borrow().terminal()
    }

    /// Wait until the cell settles and return its value
    pub async fn wait(&self) -> Result<T, Failure> {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(State::is_terminal).await {
            Ok(state) => match state.terminal() {
                Some(result) => result,
                None => unreachable!("wait_for returned a pending state"),
            },
            // `self` owns the sender and is borrowed for the whole wait.
            Err(_) => unreachable!("completion sender dropped while borrowed"),
        }
    }
}

impl<T: Clone> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("state", &*self.tx.borrow())
            .finish()
    }
}
