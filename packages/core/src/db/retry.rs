//! Bounded Retry for Temporary Store Failures
//!
//! Wraps individual store calls in a retry loop for errors the store marks
//! as temporary (server busy, document locked). Attempts and spacing are
//! bounded by [`RetryPolicy`]; every other error kind propagates on first
//! occurrence.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::Config;
use crate::db::error::StoreError;

/// Attempt bounds for retrying temporary store errors
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub times: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    /// Policy for plain store traffic, from the connection config
    pub fn temporary(config: &Config) -> Self {
        Self {
            enabled: config.retry_temporary_errors,
            times: config.temp_retry_times,
            interval: Duration::from_millis(config.temp_retry_interval_ms),
        }
    }

    /// Policy for lookup-document CAS loops, from the connection config
    ///
    /// Always enabled; index maintenance is meaningless without at least
    /// one conflict retry budget.
    pub fn atomic(config: &Config) -> Self {
        Self {
            enabled: true,
            times: config.atomic_retry_times,
            interval: Duration::from_millis(config.atomic_retry_interval_ms),
        }
    }

    /// A policy that never retries
    pub fn off() -> Self {
        Self {
            enabled: false,
            times: 0,
            interval: Duration::ZERO,
        }
    }
}

/// Run `op`, retrying while it fails with a temporary error
///
/// `op` is re-invoked at most `policy.times` additional times, sleeping
/// `policy.interval` between attempts. The last error is returned when the
/// budget is exhausted.
pub async fn with_temp_retry<T, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if policy.enabled && err.is_temporary() && attempt < policy.times => {
                attempt += 1;
                warn!(label, attempt, %err, "temporary store failure, retrying");
                if !policy.interval.is_zero() {
                    tokio::time::sleep(policy.interval).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_within_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            enabled: true,
            times: 5,
            interval: Duration::ZERO,
        };
        let result = with_temp_retry(policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::temporary("busy"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            enabled: true,
            times: 2,
            interval: Duration::ZERO,
        };
        let result: Result<(), _> = with_temp_retry(policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::temporary("busy")) }
        })
        .await;
        assert!(result.unwrap_err().is_temporary());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn disabled_policy_never_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_temp_retry(RetryPolicy::off(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::temporary("busy")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_temporary_errors_propagate_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            enabled: true,
            times: 5,
            interval: Duration::ZERO,
        };
        let result: Result<(), _> = with_temp_retry(policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::fatal("gone")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
