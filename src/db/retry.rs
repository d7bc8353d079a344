//! Bounded retry for transient SQLite contention.
//!
//! Concurrent writers (ingestion run vs. spawned reconciliation tasks) can
//! still hit `SQLITE_BUSY` despite WAL and the connection busy timeout. Lock
//! contention is retried with exponential backoff; every other error surfaces
//! immediately.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

/// Run `op`, retrying on lock contention per `policy`.
///
/// Non-contention errors return immediately on the first attempt. Exhausting
/// the retry budget returns the last error.
///
/// # Errors
///
/// Propagates the error from the final attempt of `op`.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.base_delay;

    for attempt in 0..=policy.max_retries {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && is_busy_error(&err) => {
                warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64,
                      "Database busy, retrying: {err:#}");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(policy.max_delay);
            }
            Err(err) => return Err(err),
        }
    }

    unreachable!("retry loop always returns")
}

/// Whether an error chain indicates SQLite lock contention.
fn is_busy_error(err: &anyhow::Error) -> bool {
    // Match on message text: the error arrives through sqlx/anyhow layers and
    // the sqlite result code is not reliably reachable from here.
    let message = format!("{err:#}").to_lowercase();
    message.contains("database is locked")
        || message.contains("database locked")
        || message.contains("busy")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32> = with_retry(quick_policy(5), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_busy_error_exhausts_exactly_max_retries_plus_one() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = with_retry(quick_policy(5), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("database is locked")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_non_busy_error_returns_immediately() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = with_retry(quick_policy(5), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("UNIQUE constraint failed: posts.external_id")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_contention() {
        let attempts = AtomicU32::new(0);
        let result: Result<&str> = with_retry(quick_policy(5), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow::anyhow!("SQLITE_BUSY: database is locked"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_double_then_cap() {
        let policy = RetryPolicy {
            max_retries: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
        };

        // Paused clock: each sleep advances virtual time by exactly its
        // duration, so attempt timestamps expose the delay schedule.
        let timestamps = std::sync::Mutex::new(Vec::new());
        let result: Result<()> = with_retry(policy, || {
            timestamps.lock().unwrap().push(tokio::time::Instant::now());
            async { Err(anyhow::anyhow!("database is locked")) }
        })
        .await;
        assert!(result.is_err());

        let timestamps = timestamps.into_inner().unwrap();
        let gaps: Vec<u64> = timestamps
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
            .collect();
        assert_eq!(gaps, vec![100, 200, 400, 400]);
    }

    #[test]
    fn test_busy_classification_is_case_insensitive() {
        assert!(is_busy_error(&anyhow::anyhow!("Database Is Locked")));
        assert!(is_busy_error(&anyhow::anyhow!("SQLITE_BUSY")));
        assert!(is_busy_error(&anyhow::anyhow!("database locked")));
        assert!(!is_busy_error(&anyhow::anyhow!("no such table: posts")));
    }
}
