//! Bounded retry of whole transactions on transient store failures.

use super::OrderError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl RetryPolicy {
    /// Default policy: 5 attempts, 10ms linear backoff with jitter, capped at 200ms.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_millis(10),
            backoff_max: Duration::from_millis(200),
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    #[must_use]
    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    /// Retry immediately, without sleeping between attempts.
    #[must_use]
    pub fn without_backoff(self) -> Self {
        self.with_backoff_base(Duration::ZERO)
            .with_backoff_max(Duration::ZERO)
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let max_attempts = self.max_attempts.max(1);
        let backoff_max = if self.backoff_max < self.backoff_base {
            self.backoff_base
        } else {
            self.backoff_max
        };
        Self {
            max_attempts,
            backoff_base: self.backoff_base,
            backoff_max,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }

    /// Sleep before retry number `attempt` (1-based): linear in the attempt,
    /// plus up to one base of jitter, never above `backoff_max`.
    fn delay(&self, attempt: u32) -> Duration {
        if self.backoff_base.is_zero() {
            return Duration::ZERO;
        }
        let base_ms = u64::try_from(self.backoff_base.as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=base_ms));
        self.backoff_base
            .saturating_mul(attempt)
            .saturating_add(jitter)
            .min(self.backoff_max)
    }

    /// Run `attempt` until it succeeds, fails for good, or the attempt bound is
    /// reached. Each call of `attempt` must run a complete transaction.
    pub(crate) async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, OrderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(OrderError::Store(err)) if err.is_transient() => {
                    if attempts >= max_attempts {
                        error!(operation, attempts, "giving up after transient failures: {err}");
                        return Err(OrderError::RetriesExhausted {
                            operation,
                            attempts,
                            source: err,
                        });
                    }
                    let delay = self.delay(attempts);
                    warn!(operation, attempts, ?delay, "retrying transaction: {err}");
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    fn deadlock() -> OrderError {
        OrderError::Store(StoreError::Deadlock("cycle".to_string()))
    }

    #[test]
    fn defaults_match_five_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.backoff_base(), Duration::from_millis(10));
        assert_eq!(policy.backoff_max(), Duration::from_millis(200));
    }

    #[test]
    fn normalize_fixes_degenerate_values() {
        let policy = RetryPolicy::new()
            .with_max_attempts(0)
            .with_backoff_base(Duration::from_millis(50))
            .with_backoff_max(Duration::from_millis(5))
            .normalize();
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.backoff_max(), Duration::from_millis(50));
    }

    #[test]
    fn delay_is_bounded() {
        let policy = RetryPolicy::new();
        for attempt in 1..10 {
            let delay = policy.delay(attempt);
            assert!(delay >= Duration::from_millis(10).min(policy.backoff_max()));
            assert!(delay <= policy.backoff_max());
        }
        assert_eq!(RetryPolicy::new().without_backoff().delay(3), Duration::ZERO);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let policy = RetryPolicy::new().without_backoff();
        let mut calls = 0;
        let result = policy
            .run("upsert", || {
                calls += 1;
                let outcome = if calls < 3 { Err(deadlock()) } else { Ok(calls) };
                async move { outcome }
            })
            .await;
        assert!(matches!(result, Ok(3)));
    }

    #[tokio::test]
    async fn exhausting_attempts_is_distinguishable() {
        let policy = RetryPolicy::new().without_backoff();
        let mut calls = 0;
        let result: Result<(), _> = policy
            .run("remove", || {
                calls += 1;
                async { Err(deadlock()) }
            })
            .await;
        assert_eq!(calls, 5);
        assert!(matches!(
            result,
            Err(OrderError::RetriesExhausted {
                operation: "remove",
                attempts: 5,
                source: StoreError::Deadlock(_),
            })
        ));
    }

    #[tokio::test]
    async fn validation_and_fatal_errors_are_not_retried() {
        let policy = RetryPolicy::new().without_backoff();
        let mut calls = 0;
        let result: Result<(), _> = policy
            .run("reorder_all", || {
                calls += 1;
                async { Err(OrderError::validation("keys differ")) }
            })
            .await;
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(OrderError::Validation(_))));

        let mut calls = 0;
        let result: Result<(), _> = policy
            .run("upsert", || {
                calls += 1;
                async { Err(OrderError::Store(StoreError::Backend("down".to_string()))) }
            })
            .await;
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(OrderError::Store(StoreError::Backend(_)))));
    }
}
