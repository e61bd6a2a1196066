//! Retrying calls to external collaborators

use backoff::future::retry_notify;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;

use crate::settings::RetryPolicy;
use crate::types::*;

/// Run `operation` until it succeeds, fails permanently, or the policy is
/// exhausted.
///
/// Only transient errors (see [`ReconError::is_transient`]) are retried. The
/// last error is returned once `max_attempts` or `max_elapsed` is reached.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, what: &str, mut operation: F) -> ReconResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ReconResult<T>>,
{
    let backoff = ExponentialBackoff {
        initial_interval: policy.initial_backoff,
        current_interval: policy.initial_backoff,
        max_interval: policy.max_backoff,
        multiplier: policy.multiplier,
        max_elapsed_time: Some(policy.max_elapsed),
        ..Default::default()
    };

    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    retry_notify(
        backoff,
        || {
            attempt += 1;
            let current = attempt;
            let call = operation();
            async move {
                match call.await {
                    Ok(value) => Ok(value),
                    Err(err) if err.is_transient() && current < max_attempts => {
                        Err(backoff::Error::transient(err))
                    }
                    Err(err) => Err(backoff::Error::permanent(err)),
                }
            }
        },
        |err: ReconError, wait: Duration| {
            tracing::warn!(
                operation = what,
                error = %err,
                retry_in_ms = wait.as_millis() as u64,
                "Transient failure, retrying"
            );
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            max_elapsed: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(&quick_policy(5), "flaky", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(ReconError::external("embedding", "unavailable"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_at_attempt_cap() {
        let calls = AtomicU32::new(0);
        let result: ReconResult<()> = with_backoff(&quick_policy(2), "down", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ReconError::external("embedding", "down")) }
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: ReconResult<()> = with_backoff(&quick_policy(5), "bad", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ReconError::Storage("corrupt".into())) }
        })
        .await;
        assert_eq!(result, Err(ReconError::Storage("corrupt".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
