//! Bounded retry with exponential backoff for remote generation calls.
//!
//! Each call walks `Idle -> Attempting -> {Success | RetryPending -> Attempting | Failed}`.
//! Only [`AssistError::is_retryable`] failures enter `RetryPending`; everything
//! else fails on the spot. The loop is explicit so the attempt count and
//! delay schedule stay inspectable.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{AssistError, Result};

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each subsequent retry.
    pub base_delay: Duration,
    /// Optional bound on the whole sequence, backoff sleeps included.
    pub total_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            total_timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub const fn with_total_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.total_timeout = timeout;
        self
    }

    /// Delay before retry number `retry` (zero-based): `base_delay * 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// A retry about to be slept on, handed to observers.
#[derive(Debug)]
pub struct RetryAttempt<'a> {
    /// One-based retry number.
    pub retry: u32,
    pub delay: Duration,
    pub error: &'a AssistError,
}

/// Retry executor that handles the actual retry logic
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_observer(operation, |_| {}).await
    }

    /// Like [`execute`](Self::execute) but reports every scheduled retry.
    pub async fn execute_with_observer<F, Fut, T, O>(
        &self,
        operation: F,
        observer: O,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        O: FnMut(&RetryAttempt<'_>),
    {
        match self.policy.total_timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(operation, observer))
                .await
                .map_err(|_| {
                    AssistError::TransportFailure(format!(
                        "request timed out after {}ms",
                        limit.as_millis()
                    ))
                })?,
            None => self.run(operation, observer).await,
        }
    }

    async fn run<F, Fut, T, O>(&self, mut operation: F, mut observer: O) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        O: FnMut(&RetryAttempt<'_>),
    {
        let mut retries = 0;
        loop {
            let error = match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!(retries, "Request succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if retries >= self.policy.max_retries {
                warn!(
                    attempts = retries + 1,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(error);
            }

            let delay = self.policy.delay_for(retries);
            retries += 1;
            observer(&RetryAttempt {
                retry: retries,
                delay,
                error: &error,
            });
            warn!(
                retry = retries,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retryable failure, backing off"
            );
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn server_fault() -> AssistError {
        AssistError::ServerFault {
            status: 503,
            message: "Service Unavailable".to_string(),
        }
    }

    /// Fails with `error` for the first `failures` calls, then succeeds.
    fn flaky(
        counter: Arc<AtomicU32>,
        failures: u32,
        error: AssistError,
    ) -> impl FnMut() -> std::future::Ready<Result<&'static str>> {
        move || {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            if call < failures {
                std::future::ready(Err(error.clone()))
            } else {
                std::future::ready(Ok("success"))
            }
        }
    }

    fn schedule(policy: &RetryPolicy) -> Vec<Duration> {
        (0..policy.max_retries).map(|r| policy.delay_for(r)).collect()
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new()
            .with_max_retries(4)
            .with_base_delay(Duration::from_millis(100));

        assert_eq!(
            schedule(&policy),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
        assert_eq!(schedule(&RetryPolicy::default()), vec![
            Duration::from_secs(1),
            Duration::from_secs(2)
        ]);
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::new().with_base_delay(Duration::from_secs(1));
        assert_eq!(policy.delay_for(64), Duration::from_secs(1).saturating_mul(u32::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_one_transient_failure() {
        let counter = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::default();
        let mut observed = Vec::new();

        let result = executor
            .execute_with_observer(
                flaky(
                    counter.clone(),
                    1,
                    AssistError::TransportFailure("connection reset".into()),
                ),
                |attempt| observed.push((attempt.retry, attempt.delay)),
            )
            .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(observed, vec![(1, Duration::from_secs(1))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_returns_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::default();
        let mut delays = Vec::new();
        let started = tokio::time::Instant::now();

        let result = executor
            .execute_with_observer(flaky(counter.clone(), 10, server_fault()), |attempt| {
                delays.push(attempt.delay)
            })
            .await;

        assert!(matches!(result, Err(AssistError::ServerFault { status: 503, .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_errors_are_not_retried() {
        let terminal = [
            AssistError::RateLimited("429".into()),
            AssistError::ContentPolicyRejected("SAFETY".into()),
            AssistError::AuthenticationFailed {
                status: 401,
                message: "invalid key".into(),
            },
            AssistError::InvalidRequest("400".into()),
            AssistError::EmptyResult("no text".into()),
        ];

        for error in terminal {
            let counter = Arc::new(AtomicU32::new(0));
            let mut retries = 0;
            let result = RetryExecutor::default()
                .execute_with_observer(flaky(counter.clone(), 10, error.clone()), |_| {
                    retries += 1
                })
                .await;

            assert!(result.is_err());
            assert_eq!(counter.load(Ordering::SeqCst), 1, "{}", error.kind());
            assert_eq!(retries, 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_timeout_bounds_sequence() {
        let counter = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(
            RetryPolicy::new()
                .with_max_retries(5)
                .with_total_timeout(Some(Duration::from_millis(2500))),
        );

        let result = executor
            .execute(flaky(counter.clone(), 10, server_fault()))
            .await;

        match result {
            Err(AssistError::TransportFailure(message)) => {
                assert!(message.contains("timed out"))
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        // attempts at t=0s and t=1s; the t=3s attempt never starts
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(RetryPolicy::new().with_max_retries(0));

        let result = executor
            .execute(flaky(counter.clone(), 1, server_fault()))
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
