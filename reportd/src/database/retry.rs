//! Busy-retry helper for SQLite reads.
//!
//! External tooling writes the report tables while the pipeline is running.
//! A reader that hits the write lock after the connection busy timeout gets
//! `SQLITE_BUSY`/`SQLITE_LOCKED`; those are retried here with jittered
//! exponential back-off, everything else is returned as is.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

const MAX_BUSY_RETRIES: u32 = 8;
const BASE_DELAY: Duration = Duration::from_millis(10);
const MAX_DELAY: Duration = Duration::from_secs(2);

/// SQLite primary result codes for a busy or locked database.
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";

fn mentions_lock(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("database is locked") || message.contains("database is busy")
}

fn is_busy(err: &Error) -> bool {
    match err {
        Error::DatabaseSqlx(sqlx::Error::Database(db_err)) => {
            matches!(db_err.code().as_deref(), Some(SQLITE_BUSY | SQLITE_LOCKED))
                || mentions_lock(db_err.message())
        }
        Error::DatabaseSqlx(other) => mentions_lock(&other.to_string()),
        _ => false,
    }
}

/// Back-off before retry number `attempt` (0-indexed): doubling from 10 ms,
/// plus up to 25% jitter, capped at 2 s.
fn busy_delay(attempt: u32) -> Duration {
    let base = BASE_DELAY.saturating_mul(1u32 << attempt.min(16)).min(MAX_DELAY);
    let jitter = base.mul_f64(0.25 * rand::random::<f64>());
    (base + jitter).min(MAX_DELAY)
}

/// Run `op`, retrying while SQLite reports the database as busy.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(err) if is_busy(&err) && attempt < MAX_BUSY_RETRIES => {
                let delay = busy_delay(attempt);
                debug!(
                    op = op_name,
                    attempt = attempt + 1,
                    delay = ?delay,
                    "SQLite busy, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn busy() -> Error {
        Error::DatabaseSqlx(sqlx::Error::Protocol("database is busy".into()))
    }

    #[test]
    fn test_busy_detection() {
        assert!(is_busy(&busy()));
        assert!(!is_busy(&Error::EmptyRequest));
        assert!(!is_busy(&Error::DatabaseSqlx(sqlx::Error::RowNotFound)));
    }

    #[test]
    fn test_busy_delay_is_capped() {
        assert!(busy_delay(0) >= BASE_DELAY);
        assert!(busy_delay(0) <= BASE_DELAY.mul_f64(1.25));
        assert_eq!(busy_delay(30), MAX_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_busy_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let value = retry_on_sqlite_busy("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(busy()) } else { Ok(n) } }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_on_sqlite_busy("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::NoTargets("r".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::NoTargets(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
