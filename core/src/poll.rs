//! Poll-with-budget primitives
//!
//! Every wait on external convergence goes through [`poll_until`]: a probe is
//! evaluated at a fixed interval until it reports readiness, the optional
//! deadline passes, or the shutdown signal fires. The three endings are
//! distinct variants of [`PollOutcome`] so callers cannot mistake a timeout
//! for success.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{BenchError, BenchResult};

/// Interval and optional deadline of a poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    /// Sleep between probes
    pub interval: Duration,
    /// Give up after this much time, never when `None`
    pub deadline: Option<Duration>,
}

impl PollBudget {
    /// Budget with a deadline
    pub fn new(interval: Duration, deadline: Option<Duration>) -> Self {
        Self { interval, deadline }
    }

    /// Budget without a deadline
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }
}

/// How a poll loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The probe reported readiness
    Ready(T),
    /// The deadline passed first
    TimedOut {
        /// Time spent polling
        elapsed: Duration,
        /// Probes evaluated
        attempts: u32,
    },
    /// Shutdown was requested
    Cancelled,
}

impl<T> PollOutcome<T> {
    /// Map a non-ready outcome to the matching error
    pub fn into_result(self, target: impl Into<String>) -> BenchResult<T> {
        match self {
            PollOutcome::Ready(value) => Ok(value),
            PollOutcome::TimedOut { elapsed, .. } => Err(BenchError::timeout(target, elapsed)),
            PollOutcome::Cancelled => Err(BenchError::Cancelled),
        }
    }
}

/// Result of waiting for the next tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Probe again
    Continue,
    /// Deadline passed
    Expired,
    /// Shutdown requested
    Cancelled,
}

/// Tracks attempts and elapsed time of one poll loop
#[derive(Debug)]
pub struct PollTimer {
    budget: PollBudget,
    started: Instant,
    attempts: u32,
    shutdown: Option<watch::Receiver<bool>>,
}

impl PollTimer {
    /// Start a timer now
    pub fn new(budget: PollBudget) -> Self {
        Self {
            budget,
            started: Instant::now(),
            attempts: 0,
            shutdown: None,
        }
    }

    /// Observe a shutdown signal while sleeping
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Completed waits so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time since the timer started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether shutdown has already been requested
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Sleep until the next tick
    ///
    /// The last sleep is shortened so one final probe lands on the deadline.
    pub async fn wait(&mut self) -> Wait {
        self.attempts += 1;
        if self.is_cancelled() {
            return Wait::Cancelled;
        }

        let sleep_for = match self.budget.deadline {
            Some(deadline) => {
                let elapsed = self.elapsed();
                if elapsed >= deadline {
                    return Wait::Expired;
                }
                self.budget.interval.min(deadline - elapsed)
            }
            None => self.budget.interval,
        };

        match self.shutdown.as_mut() {
            Some(rx) => {
                if sleep_or_shutdown(rx, sleep_for).await {
                    Wait::Cancelled
                } else {
                    Wait::Continue
                }
            }
            None => {
                tokio::time::sleep(sleep_for).await;
                Wait::Continue
            }
        }
    }
}

/// Sleep for `duration`, returning early with `true` if shutdown is signalled
pub async fn sleep_or_shutdown(rx: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *rx.borrow() {
        return true;
    }
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = rx.changed() => match changed {
                Ok(()) if *rx.borrow_and_update() => return true,
                Ok(()) => continue,
                Err(_) => {
                    // Sender gone, no signal can arrive any more
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}

/// Evaluate `probe` until it yields `Some`, the budget runs out, or shutdown
///
/// Probe errors abort the loop and propagate.
pub async fn poll_until<T, E, F, Fut>(timer: &mut PollTimer, mut probe: F) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    loop {
        if let Some(value) = probe().await? {
            return Ok(PollOutcome::Ready(value));
        }
        match timer.wait().await {
            Wait::Continue => {}
            Wait::Expired => {
                return Ok(PollOutcome::TimedOut {
                    elapsed: timer.elapsed(),
                    attempts: timer.attempts(),
                })
            }
            Wait::Cancelled => return Ok(PollOutcome::Cancelled),
        }
    }
}
