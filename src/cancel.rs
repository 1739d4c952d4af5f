// src/cancel.rs
//! Cooperative cancellation.
//!
//! The caller owns the signal (usually an `AtomicBool` flipped by a stop button
//! or Ctrl-C) and hands the pipeline a read-only predicate. Every suspension
//! point polls it; nothing in this crate ever sets or clears it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Granularity at which long sleeps re-check the predicate.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Marker returned when a stage stopped because cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

#[derive(Clone)]
pub struct CancellationToken {
    check: Arc<dyn Fn() -> bool + Send + Sync>,
    poll_interval: Duration,
}

impl CancellationToken {
    /// Wrap an arbitrary caller-supplied predicate.
    pub fn from_fn<F>(check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            check: Arc::new(check),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Observe a shared stop flag.
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self::from_fn(move || flag.load(Ordering::SeqCst))
    }

    /// A token that never fires (tests, maintenance commands).
    pub fn never() -> Self {
        Self::from_fn(|| false)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_cancelled(&self) -> bool {
        (self.check)()
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking every poll interval to re-check the
    /// predicate. Returns `Err(Cancelled)` as soon as it fires.
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.check()?;
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let step = (deadline - now).min(self.poll_interval);
            tokio::time::sleep(step).await;
            self.check()?;
        }
    }

    /// Resolves once the predicate fires. Meant to be raced against work
    /// that has no suspension points of its own (an in-flight request).
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}
