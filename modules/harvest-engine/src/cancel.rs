//! Cooperative cancellation threaded through every suspension point.
//!
//! A token combines an explicit cancel flag with an optional deadline. The
//! rate limiter, backoff sleeps, and action waits all sleep through
//! [`CancelToken::sleep`], so a cancelled run unwinds at the next tick
//! instead of finishing an arbitrary backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

const TICK: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that additionally trips once `max_runtime` has elapsed.
    pub fn with_deadline(max_runtime: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + max_runtime),
        }
    }

    /// Derive a child token sharing the cancel flag but with a tighter
    /// deadline. The effective deadline is the earlier of the two.
    pub fn child_with_deadline(&self, max_runtime: Duration) -> Self {
        let candidate = Instant::now() + max_runtime;
        let deadline = match self.deadline {
            Some(existing) => Some(existing.min(candidate)),
            None => Some(candidate),
        };
        Self {
            flag: self.flag.clone(),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::SeqCst) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Sleep in small ticks, aborting early when cancelled.
    /// Returns false when the sleep was interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let end = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= end {
                return true;
            }
            tokio::time::sleep(TICK.min(end - now)).await;
        }
    }
}
