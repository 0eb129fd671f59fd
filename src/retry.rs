//! Retry and backoff policy for artifact downloads.
//!
//! Only transient failures are retried. Retrying is bounded twice: by a number
//! of attempts and by a total time budget. Each attempt also gets its own
//! timeout, clipped to whatever is left of the budget, so one slow attempt
//! cannot hold the caller past the budget.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter, bounded by attempts and by wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on a single backoff delay.
    pub max_delay: Duration,
    /// Fraction of each delay randomised in either direction (0.0 = none, 1.0 = up to double).
    pub jitter: f64,
    /// Total time budget across all attempts and delays.
    pub budget: Duration,
    /// Timeout for a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            jitter: 0.2,
            budget: Duration::from_secs(120),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Decision returned by the retry policy after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay.
    RetryAfter(Duration),
    /// Stop retrying.
    Stop(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    AttemptsExhausted,
    BudgetExhausted,
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`, without jitter.
    ///
    /// `attempt` is 1-based: `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exp = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(exp).min(self.max_delay)
    }

    /// Backoff with jitter applied, still capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.base_backoff(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        delay.mul_f64(factor).min(self.max_delay)
    }

    /// Decide what to do after attempt `attempt` failed transiently,
    /// `elapsed` into the budget.
    pub fn decide(&self, attempt: u32, elapsed: Duration) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::Stop(StopReason::AttemptsExhausted);
        }
        let delay = self.backoff(attempt);
        if elapsed.saturating_add(delay) >= self.budget {
            return RetryDecision::Stop(StopReason::BudgetExhausted);
        }
        RetryDecision::RetryAfter(delay)
    }

    /// Timeout for the next attempt given `elapsed` time so far.
    pub fn attempt_timeout_after(&self, elapsed: Duration) -> Duration {
        self.attempt_timeout.min(self.budget.saturating_sub(elapsed))
    }
}
