//! Retrying a fallible async operation a bounded number of times.

use std::time::Duration as StdDuration;

use tokio_retry2::Retry;
use tokio_retry2::RetryError;
use tokio_retry2::strategy::FixedInterval;

/// Runs `operation` up to `max_tries` times, waiting `wait` between
/// attempts, logging a warning on every failed-but-retryable attempt.
///
/// Every error is treated as transient and retried until `max_tries` is
/// exhausted, at which point the last error is returned.
pub async fn retry<T, E, F, Fut>(
    max_tries: usize,
    wait: StdDuration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let strategy = FixedInterval::from_millis(wait.as_millis() as u64).take(max_tries.saturating_sub(1));

    let mut attempt = 0usize;
    Retry::spawn(strategy, || {
        attempt += 1;
        let current = attempt;
        let fut = operation();
        async move {
            fut.await.map_err(|e| {
                if current < max_tries {
                    tracing::warn!(
                        attempt = current,
                        max_tries,
                        "{e}\nAttempting again in {:?}.",
                        wait
                    );
                    RetryError::transient(e)
                } else {
                    RetryError::permanent(e)
                }
            })
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32, String> = retry(5, StdDuration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("not yet".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_tries() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32, String> = retry(3, StdDuration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<u32, String>("always fails".to_string()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
