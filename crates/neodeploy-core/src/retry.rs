//! Retry policy shared by the provisioning path and the validation probe.

use std::fmt;
use std::time::Duration;

/// Exponential backoff: `initial * multiplier^(n-1)`, capped at `max_delay`.
///
/// A multiplier of 1.0 gives a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Backoff {
    pub fn exponential(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// How many times to retry, how long to wait and which errors qualify.
pub struct RetryPolicy<E> {
    pub max_retries: u32,
    pub backoff: Backoff,
    pub retryable: fn(&E) -> bool,
}

// Manual impls: `E` itself does not need to be Clone/Copy/Debug.
impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for RetryPolicy<E> {}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E> {
    pub fn new(max_retries: u32, backoff: Backoff, retryable: fn(&E) -> bool) -> Self {
        Self {
            max_retries,
            backoff,
            retryable,
        }
    }

    pub fn is_retryable(&self, error: &E) -> bool {
        (self.retryable)(error)
    }

    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.backoff.delay_for_retry(retry)
    }

    /// Every delay the policy can produce, in order.
    pub fn delays(&self) -> Vec<Duration> {
        (1..=self.max_retries)
            .map(|n| self.delay_for_retry(n))
            .collect()
    }

    /// Decide the next step after `retries_so_far` retries have already been
    /// spent and `error` occurred. `None` means give up.
    pub fn next_delay(&self, retries_so_far: u32, error: &E) -> Option<Duration> {
        if !self.is_retryable(error) || retries_so_far >= self.max_retries {
            return None;
        }
        Some(self.delay_for_retry(retries_so_far + 1))
    }

    /// Same backoff, different retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}
