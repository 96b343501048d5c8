//! Latest-value broadcast channels.
//!
//! A [`Latest`] holds exactly one value. Publishing replaces it, every
//! subscriber sees the current value immediately on subscription, and a slow
//! subscriber only ever observes the most recent value: intermediate values
//! are dropped, never queued.

use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::watch;

/// Single-producer, multi-consumer latest-value channel.
#[derive(Debug)]
pub struct Latest<T> {
    tx: watch::Sender<T>,
}

impl<T> Latest<T> {
    /// Create a channel holding `initial`.
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Replace the current value and wake subscribers.
    pub fn publish(&self, value: T) {
        // send_replace never fails, even with no live receivers
        self.tx.send_replace(value);
    }

    /// Modify the current value in place and wake subscribers.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.tx.send_modify(f);
    }

    /// Subscribe. The returned receiver already sees the current value.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone> Latest<T> {
    /// Clone of the current value.
    pub fn current(&self) -> T {
        self.tx.borrow().clone()
    }
}

/// Snapshot of a served directory's change state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Change {
    /// Directory the signal refers to.
    pub directory: PathBuf,
    /// Alternates on every completed request.
    pub flag: bool,
    /// Number of completed requests.
    pub version: u64,
}

/// Change notification for a served directory.
///
/// Carries no information about what changed, only that a request completed.
#[derive(Debug)]
pub struct ChangeSignal {
    inner: Latest<Change>,
}

impl ChangeSignal {
    /// Create a signal for `directory` with the flag cleared.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            inner: Latest::new(Change {
                directory: directory.into(),
                flag: false,
                version: 0,
            }),
        }
    }

    /// Flip the flag and bump the version.
    pub fn notify(&self) {
        self.inner.update(|change| {
            change.flag = !change.flag;
            change.version = change.version.wrapping_add(1);
        });
    }

    /// Current snapshot.
    pub fn current(&self) -> Change {
        self.inner.current()
    }

    /// Subscribe to change snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Change> {
        self.inner.subscribe()
    }
}
