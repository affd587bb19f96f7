//! Cancellation and deadline carrier for executor calls
//!
//! A `Context` is cheap to clone; clones share one cancellation flag, so
//! cancelling any clone wakes every sleeper on every clone. Deadlines are
//! per-value: deriving a context with a tighter deadline never loosens the
//! parent's.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::{ExecutorError, ExecutorResult};

#[derive(Debug, Default)]
struct CancelState {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Cancellation flag plus optional deadline
#[derive(Debug, Clone, Default)]
pub struct Context {
    state: Arc<CancelState>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context whose deadline is at most `timeout` from now
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// Derive a context whose deadline is the earlier of `deadline` and the
    /// current one
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            state: Arc::clone(&self.state),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and every clone of it
    pub fn cancel(&self) {
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *cancelled = true;
        self.state.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `Err` when the context is cancelled or its deadline has passed
    pub fn check(&self) -> ExecutorResult<()> {
        if self.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ExecutorError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Time left before the deadline, `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Block for `duration`, returning early with an error if the context is
    /// cancelled or its deadline passes first
    pub fn sleep(&self, duration: Duration) -> ExecutorResult<()> {
        let wake_at = Instant::now().checked_add(duration);
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        loop {
            if *cancelled {
                return Err(ExecutorError::Cancelled);
            }

            let now = Instant::now();
            if let Some(deadline) = self.deadline {
                if now >= deadline {
                    return Err(ExecutorError::DeadlineExceeded);
                }
            }

            if wake_at.is_some_and(|w| now >= w) {
                return Ok(());
            }

            let until = match (wake_at, self.deadline) {
                (Some(w), Some(d)) => w.min(d),
                (Some(w), None) => w,
                (None, Some(d)) => d,
                (None, None) => now + Duration::from_secs(3600),
            };

            let (guard, _) = self
                .state
                .wake
                .wait_timeout(cancelled, until.saturating_duration_since(now))
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            cancelled = guard;
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_background_never_expires() {
        let ctx = Context::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
    }

    #[test]
    fn test_sleep_completes_without_cancel() {
        let ctx = Context::background();
        let start = Instant::now();
        ctx.sleep(Duration::from_millis(30)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_cancel_wakes_sleeper() {
        let ctx = Context::background();
        let canceller = ctx.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        let start = Instant::now();
        let result = ctx.sleep(Duration::from_secs(10));
        handle.join().unwrap();

        assert!(matches!(result, Err(ExecutorError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(ctx.check().is_err());
    }

    #[test]
    fn test_deadline_cuts_sleep_short() {
        let ctx = Context::background().with_timeout(Duration::from_millis(40));
        let start = Instant::now();
        let result = ctx.sleep(Duration::from_secs(10));

        assert!(matches!(result, Err(ExecutorError::DeadlineExceeded)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_child_deadline_never_loosens_parent() {
        let parent = Context::background().with_timeout(Duration::from_millis(100));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let tighter = parent.with_timeout(Duration::from_millis(1));
        assert!(tighter.deadline() < parent.deadline());
    }

    #[test]
    fn test_cancel_propagates_to_clones() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.check(), Err(ExecutorError::Cancelled)));
    }
}
