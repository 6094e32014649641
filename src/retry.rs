//! Bounded retries with exponential backoff and jitter.
//!
//! Every network call in the crate (search APIs, feed downloads, store
//! writes) goes through a [`RetryPolicy`]. The policy is a fixed number of
//! attempts; there is no circuit breaking and no error classification, a
//! failed attempt is simply tried again after a delay:
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use rand::{Rng, rng};
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, warn};

/// Attempt budget and delay curve for one kind of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero behaves like one.
    pub max_attempts: usize,
    /// Delay after the first failure; doubles with each further failure.
    pub base_delay: Duration,
    /// Cap applied before jitter.
    pub max_delay: Duration,
    /// Whether to add 0-250 ms of random jitter.
    pub jitter: bool,
}

impl RetryPolicy {
    /// A policy with `max_attempts` tries starting at `base_delay`, capped at 30 s.
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// Retries with no delay at all.
    #[cfg(test)]
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Backoff before the attempt following failure number `failures`.
    pub fn delay_for(&self, failures: usize) -> Duration {
        let shift = failures.saturating_sub(1).min(16) as u32;
        let delay = self
            .base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay);
        if self.jitter {
            delay + Duration::from_millis(rng().random_range(0..=250))
        } else {
            delay
        }
    }

    /// Run `f` until it succeeds or the attempt budget is spent.
    ///
    /// `f` receives the 1-based attempt number. The last error is returned
    /// when every attempt failed.
    pub async fn run<T, E, F, Fut>(&self, op: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let total_t0 = Instant::now();
        let max = self.max_attempts.max(1);
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let total_dt = total_t0.elapsed();
                    if attempt >= max {
                        error!(
                            op,
                            attempt,
                            max,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "retries exhausted"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        op,
                        attempt,
                        max,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "attempt failed; backing off"
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: false,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        for _ in 0..20 {
            let d = policy.delay_for(1);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(350));
        }
    }

    #[tokio::test]
    async fn test_run_succeeds_after_failures() {
        let calls = Cell::new(0);
        let result: Result<&str, String> = RetryPolicy::immediate(3)
            .run("flaky", |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 3 {
                        Err(format!("boom {attempt}"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_run_returns_last_error() {
        let calls = Cell::new(0);
        let result: Result<(), String> = RetryPolicy::immediate(2)
            .run("always_fails", |attempt| {
                calls.set(calls.get() + 1);
                async move { Err(format!("boom {attempt}")) }
            })
            .await;
        assert_eq!(result, Err("boom 2".to_string()));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let calls = Cell::new(0);
        let _: Result<(), String> = RetryPolicy::immediate(0)
            .run("once", |_| {
                calls.set(calls.get() + 1);
                async { Err("nope".to_string()) }
            })
            .await;
        assert_eq!(calls.get(), 1);
    }
}
