//! Database retry logic
//!
//! Exponential backoff retry for transient SQLite lock errors. The total
//! retry window is bounded by the `vv_database_max_lock_wait_ms` setting.

use std::time::{Duration, Instant};

use carvet_common::{Error, Result};

/// Retry a database operation with exponential backoff until max_wait_ms
/// elapses.
///
/// Lock errors are retried (10ms initial delay, doubling, 1s cap); any
/// other error returns immediately.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                let is_lock_error = match &err {
                    Error::Database(db_err) => db_err.to_string().contains("database is locked"),
                    _ => false,
                };

                if !is_lock_error {
                    return Err(err);
                }

                if start_time.elapsed() >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        max_wait_ms,
                        "Database still locked after retry window, giving up"
                    );
                    return Err(err);
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
        }
    }
}
