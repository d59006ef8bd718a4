// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared SQLite plumbing for the record and watermark stores.
//!
//! Both stores are small write-mostly databases owned by one process, so
//! the pools stay tiny: WAL with NORMAL synchronous for file paths, a
//! single connection for `:memory:` (every `:memory:` connection is its
//! own database). Writes retry on SQLITE_BUSY/SQLITE_LOCKED with bounded
//! backoff; any other error surfaces immediately.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_MAX_ATTEMPTS: u32 = 5;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(10);
const RETRY_MAX_DELAY: Duration = Duration::from_millis(500);

pub(crate) async fn open_pool(path: &str) -> Result<SqlitePool, sqlx::Error> {
    if path == ":memory:" {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        return SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path))?
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6): the only codes worth retrying.
/// sqlx's SQLite driver always carries the numeric code on database errors.
pub(crate) fn is_busy(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => matches!(db_err.code().as_deref(), Some("5") | Some("6")),
        _ => false,
    }
}

/// Run a write, retrying busy/locked errors with exponential backoff.
/// Used by every record-store and watermark-store write.
pub(crate) async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 1;
    let mut delay = RETRY_BASE_DELAY;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Write succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if is_busy(&e) && attempt < RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = RETRY_MAX_ATTEMPTS,
                    delay_ms = delay.as_millis() as u64,
                    "Database busy, retrying"
                );
                crate::metrics::record_store_retry(operation_name);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(RETRY_MAX_DELAY);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_with_retry_succeeds_immediately() {
        let mut attempt_count = 0;

        let result: Result<i32, sqlx::Error> = execute_with_retry("test_op", || {
            attempt_count += 1;
            async { Ok(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempt_count, 1);
    }

    #[tokio::test]
    async fn test_non_busy_error_does_not_retry() {
        let mut attempt_count = 0;

        let result: Result<i32, sqlx::Error> = execute_with_retry("test_op", || {
            attempt_count += 1;
            async { Err(sqlx::Error::RowNotFound) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempt_count, 1);
    }

    #[test]
    fn test_is_busy_rejects_non_database_errors() {
        assert!(!is_busy(&sqlx::Error::RowNotFound));
        assert!(!is_busy(&sqlx::Error::PoolTimedOut));
    }

    #[tokio::test]
    async fn test_open_pool_in_memory() {
        let pool = open_pool(":memory:").await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(row.0, 1);
    }
}
