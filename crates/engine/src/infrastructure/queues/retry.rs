//! Retry policy owned by the queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::infrastructure::ports::{ClockPort, FailOutcome, RandomPort};

/// How many attempts a job gets and how long to wait between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Base delay in milliseconds before the first retry
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,
    /// Jitter factor (0.0-1.0) for randomizing delays to prevent thundering herd
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` (1-based) failed.
    ///
    /// `unit` is a uniform sample in `[0, 1)`, mapped onto ±`jitter_factor`.
    pub fn delay_after(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.base_delay_ms;
        // Exponential: base * 2^(attempt-1)
        let exponential = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(self.max_delay_ms);

        let jitter_range = capped as f64 * self.jitter_factor.clamp(0.0, 1.0);
        let jitter = (unit.clamp(0.0, 1.0) * 2.0 - 1.0) * jitter_range;
        let millis = (capped as f64 + jitter).max(0.0) as u64;
        Duration::from_millis(millis)
    }
}

/// Clock, randomness and policy shared by the queue backends.
#[derive(Clone)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    clock: Arc<dyn ClockPort>,
    random: Arc<dyn RandomPort>,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy, clock: Arc<dyn ClockPort>, random: Arc<dyn RandomPort>) -> Self {
        Self {
            policy,
            clock,
            random,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// What happens to an item whose attempt number `attempts` just failed.
    pub fn outcome(&self, attempts: u32, max_attempts: u32, now: DateTime<Utc>) -> FailOutcome {
        if attempts >= max_attempts {
            return FailOutcome::Exhausted;
        }
        let delay = self.policy.delay_after(attempts, self.random.unit());
        let delay = chrono::Duration::milliseconds(delay.as_millis() as i64);
        FailOutcome::Retrying {
            retry_at: now + delay,
        }
    }
}
