//! Retry helper for idempotent reads.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use farmgate_core::AppResult;

/// Run a read, retrying on `StorageUnavailable` with linear backoff.
///
/// Never wrap writes in this: a failed write may have committed.
pub async fn retry_read<T, F, Fut>(attempts: u32, backoff: Duration, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(attempt, max_attempts = attempts, error = %e, "Read failed, retrying");
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmgate_core::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_storage_failures_only() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_read(3, Duration::from_millis(10), || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(AppError::storage_unavailable("down"))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: AppResult<()> = retry_read(3, Duration::from_millis(10), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::validation("bad"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: AppResult<()> = retry_read(2, Duration::from_millis(10), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::storage_unavailable("down"))
        })
        .await;
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
