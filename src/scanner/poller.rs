//! Adaptive poll loop.
//!
//! The loop is an explicit state machine. A successful walk is followed by the
//! long sleep, a failed walk by the short one, so a freshly granted permission
//! is picked up quickly while an idle library costs almost nothing.

use super::{Walk, WalkOutcome};
use crate::signal::Latest;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Sleep durations after a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollInterval {
    /// After a successful walk.
    pub long: Duration,
    /// After a failed walk.
    pub short: Duration,
}

impl Default for PollInterval {
    fn default() -> Self {
        Self {
            long: Duration::from_secs(30),
            short: Duration::from_secs(1),
        }
    }
}

/// Where the poll loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Next step walks every root.
    Walking,
    /// Next step sleeps the short interval.
    SleepingShort,
    /// Next step sleeps the long interval.
    SleepingLong,
}

/// Time source for the poll loop.
pub trait Clock: Send + Sync + 'static {
    /// Suspend for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Periodically walks storage and publishes the latest outcome.
pub struct Poller<W, C = TokioClock> {
    source: Arc<W>,
    interval: PollInterval,
    clock: C,
    state: PollState,
    outcomes: Arc<Latest<Option<WalkOutcome>>>,
}

impl<W: Walk, C: Clock> Poller<W, C> {
    /// Create a poller that walks `source` first thing.
    pub fn new(source: W, interval: PollInterval, clock: C) -> Self {
        Self {
            source: Arc::new(source),
            interval,
            clock,
            state: PollState::Walking,
            outcomes: Arc::new(Latest::new(None)),
        }
    }

    /// Current state.
    pub fn state(&self) -> PollState {
        self.state
    }

    /// Shared handle to the walked source, for out-of-band rescans.
    pub fn source(&self) -> Arc<W> {
        Arc::clone(&self.source)
    }

    /// Subscribe to walk outcomes. `None` until the first walk completes.
    pub fn subscribe(&self) -> watch::Receiver<Option<WalkOutcome>> {
        self.outcomes.subscribe()
    }

    /// Walk once on the blocking pool. A panicking walk becomes an I/O failure.
    async fn walk_once(&self) -> WalkOutcome {
        let source = Arc::clone(&self.source);
        match tokio::task::spawn_blocking(move || source.walk()).await {
            Ok(outcome) => outcome,
            Err(e) => WalkOutcome::IoError {
                path: Default::default(),
                cause: format!("walk task failed: {}", e),
            },
        }
    }

    /// Advance the state machine by one transition and return the new state.
    pub async fn step(&mut self) -> PollState {
        self.state = match self.state {
            PollState::Walking => {
                let outcome = self.walk_once().await;
                let next = match &outcome {
                    WalkOutcome::Success(files) => {
                        tracing::debug!(files = files.len(), "Walk complete");
                        PollState::SleepingLong
                    }
                    WalkOutcome::PermissionDenied(path) => {
                        tracing::warn!(path = %path.display(), "Storage permission denied, retrying soon");
                        PollState::SleepingShort
                    }
                    WalkOutcome::IoError { path, cause } => {
                        tracing::warn!(path = %path.display(), cause = %cause, "Walk failed, retrying soon");
                        PollState::SleepingShort
                    }
                };
                self.outcomes.publish(Some(outcome));
                next
            }
            PollState::SleepingShort => {
                self.clock.sleep(self.interval.short).await;
                PollState::Walking
            }
            PollState::SleepingLong => {
                self.clock.sleep(self.interval.long).await;
                PollState::Walking
            }
        };

        self.state
    }

    /// Run forever. Stops only when the runtime is torn down.
    pub async fn run(mut self) {
        tracing::info!(
            long = ?self.interval.long,
            short = ?self.interval.short,
            "Starting storage poller"
        );
        loop {
            self.step().await;
        }
    }
}
