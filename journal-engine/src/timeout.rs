//! Query deadline and cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Why a running query must stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupt {
    Cancelled,
    TimedOut,
}

/// A wall-clock budget plus a cancellation token, shared by everything
/// working on one query.
///
/// Clones share both the budget and the token, so a caller can keep a clone
/// to extend the deadline or cancel the query while it runs.
#[derive(Debug, Clone)]
pub struct Deadline {
    start: Instant,
    budget_us: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self::with_cancellation(budget, CancellationToken::new())
    }

    /// A deadline that is cancelled whenever `cancel` is.
    pub fn with_cancellation(budget: Duration, cancel: CancellationToken) -> Self {
        Self {
            start: Instant::now(),
            budget_us: Arc::new(AtomicU64::new(budget.as_micros() as u64)),
            cancel,
        }
    }

    /// A deadline that has already passed.
    pub fn expired() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Time left. `Duration::ZERO` once expired.
    pub fn remaining(&self) -> Duration {
        let budget_us = self.budget_us.load(Ordering::Relaxed);
        let elapsed_us = self.start.elapsed().as_micros() as u64;

        Duration::from_micros(budget_us.saturating_sub(elapsed_us))
    }

    pub fn extend(&self, additional: Duration) {
        self.budget_us
            .fetch_add(additional.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancellation wins over expiry.
    pub(crate) fn check(&self) -> Option<Interrupt> {
        if self.is_cancelled() {
            Some(Interrupt::Cancelled)
        } else if self.is_expired() {
            Some(Interrupt::TimedOut)
        } else {
            None
        }
    }

    /// Whether a file expected to take up to `per_file` should not be started.
    pub(crate) fn cannot_fit(&self, per_file: Duration) -> bool {
        let remaining = self.remaining();
        remaining.is_zero() || per_file.saturating_mul(3) >= remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fresh_deadline_is_not_expired() {
        let deadline = Deadline::new(Duration::from_secs(10));
        assert!(!deadline.is_expired());
        assert_eq!(deadline.check(), None);
    }

    #[test]
    fn expired_deadline_times_out() {
        let deadline = Deadline::expired();
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
        assert_eq!(deadline.check(), Some(Interrupt::TimedOut));
        assert!(deadline.cannot_fit(Duration::ZERO));
    }

    #[test]
    fn extension_is_shared_between_clones() {
        let deadline = Deadline::new(Duration::from_millis(50));
        let other = deadline.clone();
        thread::sleep(Duration::from_millis(30));

        other.extend(Duration::from_secs(5));
        assert!(deadline.remaining() > Duration::from_secs(4));
    }

    #[test]
    fn cancellation_wins_over_expiry() {
        let token = CancellationToken::new();
        let deadline = Deadline::with_cancellation(Duration::ZERO, token.clone());
        token.cancel();

        assert!(deadline.is_cancelled());
        assert_eq!(deadline.check(), Some(Interrupt::Cancelled));
    }

    #[test]
    fn slow_files_do_not_fit() {
        let deadline = Deadline::new(Duration::from_secs(10));
        assert!(!deadline.cannot_fit(Duration::from_secs(1)));
        assert!(deadline.cannot_fit(Duration::from_secs(4)));
    }
}
