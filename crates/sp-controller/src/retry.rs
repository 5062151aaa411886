//! Deterministic exponential backoff
//!
//! `delay(n) = min(base · 2^(n-1), cap)` for the n-th failed attempt. No
//! jitter; the delay depends only on the persisted attempt count.

use std::time::Duration;

/// Backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    /// Create a schedule; `cap` is raised to `base` if smaller
    #[must_use]
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
        }
    }

    /// Delay before retrying after `attempt` failures (1-based)
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.cap, |d| d.min(self.cap))
    }
}
