//! Lock contention retry
//!
//! Writers from the engine and the settings store share one connection pool;
//! a statement that hits a held lock is retried with doubling delays.

use crate::{Error, Result};
use rusqlite::ErrorCode;
use std::time::Duration;

/// Attempts after the first failure before the lock error surfaces
pub const MAX_BUSY_RETRIES: u32 = 5;

/// Delay before the first retry, in milliseconds
pub const BASE_BACKOFF_MS: u64 = 50;

/// Ceiling for any single delay, in milliseconds
pub const MAX_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    retries: u32,
    base: Duration,
    ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: MAX_BUSY_RETRIES,
            base: Duration::from_millis(BASE_BACKOFF_MS),
            ceiling: Duration::from_millis(MAX_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), with up to 25% jitter
    fn delay(&self, attempt: u32) -> Duration {
        let doubled = self
            .base
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(8));
        let spread = (doubled.as_millis() as u64 / 4).max(1);
        let jitter = Duration::from_millis(rand::random::<u64>() % spread);
        (doubled + jitter).min(self.ceiling)
    }

    fn run<F, T>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Err(Error::Database(ref e)) if lock_contended(e) && attempt < self.retries => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Database locked, retrying"
                    );
                    std::thread::sleep(delay);
                }
                other => return other,
            }
        }
    }
}

/// Run `op` under the default [`RetryPolicy`]
pub(crate) fn with_retry<F, T>(op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    RetryPolicy::default().run(op)
}

fn lock_contended(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locked(code: std::os::raw::c_int) -> Error {
        Error::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(code),
            None,
        ))
    }

    #[test]
    fn test_delays_grow_and_stay_under_ceiling() {
        let policy = RetryPolicy::default();
        assert!(policy.delay(1) >= Duration::from_millis(BASE_BACKOFF_MS));
        assert!(policy.delay(3) >= Duration::from_millis(BASE_BACKOFF_MS * 4));
        for attempt in 1..40 {
            assert!(policy.delay(attempt) <= Duration::from_millis(MAX_BACKOFF_MS));
        }
    }

    #[test]
    fn test_contended_statement_eventually_succeeds() {
        let mut calls = 0;
        let value = with_retry(|| {
            calls += 1;
            match calls {
                1 => Err(locked(rusqlite::ffi::SQLITE_BUSY)),
                2 => Err(locked(rusqlite::ffi::SQLITE_LOCKED)),
                _ => Ok(7),
            }
        })
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_gives_up_after_configured_retries() {
        let policy = RetryPolicy {
            retries: 2,
            base: Duration::from_millis(1),
            ceiling: Duration::from_millis(2),
        };
        let mut calls = 0;
        let result: Result<()> = policy.run(|| {
            calls += 1;
            Err(locked(rusqlite::ffi::SQLITE_BUSY))
        });
        assert!(matches!(result, Err(Error::Database(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_unrelated_errors_surface_immediately() {
        let mut calls = 0;
        let result: Result<()> = with_retry(|| {
            calls += 1;
            Err(Error::NotFound("process".to_string()))
        });
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(calls, 1);
    }
}
