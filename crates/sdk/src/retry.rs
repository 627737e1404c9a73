//! Retry logic with exponential backoff.
//!
//! Two flavours share one [`RetryPolicy`]:
//! - [`with_retry`] drives `backon` and is used where no cancellation token is
//!   in scope (fragment transfers).
//! - [`with_retry_cancellable`] races every attempt and every backoff sleep
//!   against a `CancellationToken`, and is used by the query engine.

use std::{
    future::Future,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use backon::{ExponentialBuilder, Retryable};
use parking_lot::Mutex;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::{
    config::RetryPolicy,
    error::{Result, SdkError, duration_ms},
    metrics::SdkMetrics,
};

/// Execute an async operation with retry using exponential backoff.
///
/// The operation is retried according to `policy` while it fails with a
/// retryable error (see [`SdkError::is_retryable`]). Non-retryable errors are
/// returned unchanged; a retryable error on the final attempt is wrapped in
/// [`SdkError::RetryExhausted`].
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    // backon counts retries, not attempts.
    let max_retries = policy.max_attempts.saturating_sub(1) as usize;

    let backoff = ExponentialBuilder::new()
        .with_min_delay(policy.initial_backoff)
        .with_max_delay(policy.max_backoff)
        .with_factor(policy.multiplier as f32)
        .with_max_times(max_retries)
        .with_jitter();

    let attempt_count = AtomicU32::new(0);
    let attempt_history = Mutex::new(Vec::new());

    operation
        .retry(backoff)
        .sleep(tokio::time::sleep)
        .when(|e: &SdkError| e.is_retryable())
        .notify(|err: &SdkError, dur: Duration| {
            let attempt = attempt_count.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(
                attempt = attempt,
                backoff_ms = duration_ms(dur),
                error = %err,
                "retrying after backoff"
            );
            attempt_history.lock().push((attempt, err.to_string()));
        })
        .await
        .map_err(|e| {
            if e.is_retryable() {
                let attempts = attempt_count.load(Ordering::SeqCst) + 1;
                let mut history = std::mem::take(&mut *attempt_history.lock());
                history.push((attempts, e.to_string()));
                SdkError::RetryExhausted { attempts, last_error: e.to_string(), attempt_history: history }
            } else {
                e
            }
        })
}

/// Execute an async operation with retry and cancellation support.
///
/// Behaves like [`with_retry`], but races each attempt against `token`.
///
/// # Cancellation Semantics
///
/// - If the token is already cancelled at call time, returns `Cancelled` immediately.
/// - If the token is cancelled during an attempt, the in-flight attempt is dropped and `Cancelled`
///   is returned.
/// - If the token is cancelled during a backoff sleep, the sleep is interrupted and `Cancelled` is
///   returned.
///
/// Every retry is reported to `metrics` under `method`.
pub async fn with_retry_cancellable<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    metrics: &dyn SdkMetrics,
    method: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(SdkError::Cancelled);
    }

    let mut attempt: u32 = 0;
    let mut attempt_history: Vec<(u32, String)> = Vec::new();

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            () = token.cancelled() => {
                return Err(SdkError::Cancelled);
            }
            result = operation() => result,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt_history.push((attempt, err.to_string()));

                if !err.is_retryable() {
                    return Err(err);
                }
                if attempt >= policy.max_attempts {
                    return Err(SdkError::RetryExhausted {
                        attempts: attempt,
                        last_error: err.to_string(),
                        attempt_history,
                    });
                }

                metrics.record_retry(method, attempt, err.error_type());

                let jittered = apply_jitter(policy.backoff(attempt), policy.jitter);

                tracing::debug!(
                    method,
                    attempt = attempt,
                    backoff_ms = duration_ms(jittered),
                    error = %err,
                    "retrying after backoff (cancellable)"
                );

                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        return Err(SdkError::Cancelled);
                    }
                    () = tokio::time::sleep(jittered) => {}
                }
            },
        }
    }
}

/// Apply jitter to a duration.
///
/// Jitter adds randomness in the range `[dur * (1 - factor), dur * (1 + factor)]`.
fn apply_jitter(dur: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || dur.is_zero() {
        return dur;
    }

    let factor = factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();

    let base_nanos = dur.as_nanos() as f64;
    let min_nanos = base_nanos * (1.0 - factor);
    let max_nanos = base_nanos * (1.0 + factor);

    let jittered_nanos = rng.random_range(min_nanos..=max_nanos);
    Duration::from_nanos(jittered_nanos as u64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{error::TransportSnafu, metrics::NoopSdkMetrics};

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    fn transient() -> SdkError {
        TransportSnafu { method: "state_getStorage", message: "connection reset" }.build()
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = with_retry(&test_policy(), || {
            let count = Arc::clone(&counter);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok::<_, SdkError>("ok")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = with_retry(&test_policy(), || {
            let count = Arc::clone(&counter);
            async move {
                if count.fetch_add(1, Ordering::SeqCst) == 0 { Err(transient()) } else { Ok(7) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = with_retry(&test_policy(), || {
            let count = Arc::clone(&counter);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            }
        })
        .await;

        match result.unwrap_err() {
            SdkError::RetryExhausted { attempts, attempt_history, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(attempt_history.len(), 3);
            },
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = with_retry(&test_policy(), || {
            let count = Arc::clone(&counter);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err(SdkError::Encoding { message: "bad bytes".to_owned() })
            }
        })
        .await;

        assert!(matches!(result.unwrap_err(), SdkError::Encoding { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellable_retries_then_succeeds() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = with_retry_cancellable(&test_policy(), &token, &NoopSdkMetrics, "read", || {
            let count = Arc::clone(&counter);
            async move {
                if count.fetch_add(1, Ordering::SeqCst) < 2 { Err(transient()) } else { Ok(1u8) }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellable_exhaustion() {
        let token = CancellationToken::new();
        let result: Result<()> =
            with_retry_cancellable(&test_policy(), &token, &NoopSdkMetrics, "read", || async {
                Err(transient())
            })
            .await;
        assert!(matches!(result.unwrap_err(), SdkError::RetryExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_already_cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> =
            with_retry_cancellable(&test_policy(), &token, &NoopSdkMetrics, "read", || {
                let count = Arc::clone(&counter);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result.unwrap_err(), SdkError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let token = CancellationToken::new();
        let policy = RetryPolicy {
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(60),
            ..test_policy()
        };

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<()> =
            with_retry_cancellable(&policy, &token, &NoopSdkMetrics, "read", || async {
                Err(transient())
            })
            .await;

        assert!(matches!(result.unwrap_err(), SdkError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..100 {
            let d = apply_jitter(base, 0.25);
            assert!(d >= Duration::from_millis(75) && d <= Duration::from_millis(125));
        }
        assert_eq!(apply_jitter(base, 0.0), base);
    }
}
