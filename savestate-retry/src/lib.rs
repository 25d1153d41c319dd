//! Retry and backoff helpers for savestate key-value store adapters
//!
//! Store adapters classify each failure as transient or permanent; the helpers
//! here re-run transient failures with exponential backoff until the policy's
//! attempt or time budget runs out.

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Common retry error types
#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Operation '{operation}' gave up after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        operation: &'static str,
        attempts: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Transient error in '{operation}': {source}")]
    Transient {
        operation: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Permanent error in '{operation}': {source}")]
    Permanent {
        operation: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RetryError {
    /// Recover the error returned by the last attempt.
    pub fn into_source(self) -> Box<dyn std::error::Error + Send + Sync> {
        match self {
            RetryError::MaxRetriesExceeded { source, .. }
            | RetryError::Transient { source, .. }
            | RetryError::Permanent { source, .. } => source,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T> = std::result::Result<T, RetryError>;

/// Boxed future for retry operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = RetryResult<T>> + Send + 'a>>;

/// Backoff parameters plus a hard cap on the number of attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed_time: Option<Duration>,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Build a fresh backoff schedule for one retried operation
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(self.max_elapsed_time)
            .with_multiplier(self.multiplier)
            .build()
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..default_retry_policy()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        default_retry_policy()
    }
}

/// Default policy for general operations
pub fn default_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_interval: Duration::from_millis(100),
        max_interval: Duration::from_secs(5),
        max_elapsed_time: Some(Duration::from_secs(30)),
        multiplier: 2.0,
    }
}

/// Policy for the cloud mirror (remote round-trips, longer waits)
pub fn cloud_storage_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(10),
        max_elapsed_time: Some(Duration::from_secs(60)),
        multiplier: 1.5,
    }
}

/// Policy for on-device storage (short waits)
pub fn local_storage_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_interval: Duration::from_millis(10),
        max_interval: Duration::from_millis(250),
        max_elapsed_time: Some(Duration::from_secs(2)),
        multiplier: 2.0,
    }
}

fn classify(
    op_name: &'static str,
    attempt: usize,
    max_attempts: usize,
    err: RetryError,
) -> backoff::Error<RetryError> {
    match err {
        RetryError::Transient { source, .. } if attempt >= max_attempts => {
            warn!(
                operation = op_name,
                attempts = attempt,
                "Giving up after reaching the attempt limit"
            );
            backoff::Error::permanent(RetryError::MaxRetriesExceeded {
                operation: op_name,
                attempts: attempt,
                source,
            })
        }
        err @ RetryError::Transient { .. } => backoff::Error::transient(err),
        err => {
            warn!(operation = op_name, attempt, "Operation failed permanently");
            backoff::Error::permanent(err)
        }
    }
}

fn finish<T>(
    op_name: &'static str,
    attempts: usize,
    result: Result<T, backoff::Error<RetryError>>,
) -> RetryResult<T> {
    match result {
        Ok(value) => {
            if attempts > 1 {
                debug!(operation = op_name, attempts, "Operation succeeded after retrying");
            }
            Ok(value)
        }
        Err(backoff::Error::Permanent(err)) => Err(err),
        // The time budget ran out while the last failure was still transient
        Err(backoff::Error::Transient { err, .. }) => Err(RetryError::MaxRetriesExceeded {
            operation: op_name,
            attempts,
            source: err.into_source(),
        }),
    }
}

/// Run a blocking operation under `policy`, sleeping the calling thread between attempts
///
/// The closure receives the 1-based attempt number.
pub fn retry_blocking<F, T>(op_name: &'static str, policy: &RetryPolicy, mut f: F) -> RetryResult<T>
where
    F: FnMut(usize) -> RetryResult<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    let result = backoff::retry_notify(
        policy.backoff(),
        || {
            attempt += 1;
            debug!(operation = op_name, attempt, "Attempting operation");
            f(attempt).map_err(|e| classify(op_name, attempt, max_attempts, e))
        },
        |err: RetryError, wait: Duration| {
            warn!(
                operation = op_name,
                error = %err,
                wait_ms = wait.as_millis() as u64,
                "Transient failure, retrying"
            );
        },
    );

    finish(op_name, attempt, result)
}

/// Execute an async operation with exponential backoff
#[cfg(feature = "async-rt")]
pub async fn with_backoff<F, T>(op_name: &'static str, policy: &RetryPolicy, mut f: F) -> RetryResult<T>
where
    F: FnMut(usize) -> BoxFuture<'static, T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let attempts = std::sync::atomic::AtomicUsize::new(0);

    let result = backoff::future::retry_notify(
        policy.backoff(),
        || {
            let attempt = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            debug!(operation = op_name, attempt, "Attempting operation");
            let fut = f(attempt);
            async move {
                fut.await
                    .map_err(|e| classify(op_name, attempt, max_attempts, e))
            }
        },
        |err: RetryError, wait: Duration| {
            warn!(
                operation = op_name,
                error = %err,
                wait_ms = wait.as_millis() as u64,
                "Transient failure, retrying"
            );
        },
    )
    .await;

    finish(
        op_name,
        attempts.load(std::sync::atomic::Ordering::SeqCst),
        result,
    )
}

/// Categorizes errors as transient or permanent
pub trait RetryableError {
    /// Returns true if the error is transient and the operation should be retried
    fn is_transient(&self) -> bool;

    /// Returns true if the error is permanent and retries should stop
    fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Wrap an error as transient or permanent according to its own classification
pub fn classify_error<E>(op_name: &'static str, err: E) -> RetryError
where
    E: RetryableError + std::error::Error + Send + Sync + 'static,
{
    if err.is_transient() {
        RetryError::Transient {
            operation: op_name,
            source: Box::new(err),
        }
    } else {
        RetryError::Permanent {
            operation: op_name,
            source: Box::new(err),
        }
    }
}

/// Helper macro for creating transient errors
#[macro_export]
macro_rules! transient_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Transient {
            operation: $op,
            source: Box::new($err),
        }
    };
}

/// Helper macro for creating permanent errors
#[macro_export]
macro_rules! permanent_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Permanent {
            operation: $op,
            source: Box::new($err),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            max_elapsed_time: Some(Duration::from_secs(5)),
            multiplier: 1.0,
        }
    }

    #[test]
    fn test_blocking_success_first_try() {
        let result = retry_blocking("test_op", &fast_policy(3), |_| Ok("done"));
        assert_eq!(result.unwrap(), "done");
    }

    #[test]
    fn test_blocking_transient_then_success() {
        let mut calls = 0;
        let result = retry_blocking("test_op", &fast_policy(5), |attempt| {
            calls += 1;
            if attempt < 3 {
                Err(transient_error!(
                    "test_op",
                    io::Error::new(io::ErrorKind::Interrupted, "interrupted")
                ))
            } else {
                Ok(attempt)
            }
        });

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_blocking_gives_up_at_attempt_limit() {
        let mut calls = 0;
        let result: RetryResult<()> = retry_blocking("test_op", &fast_policy(2), |_| {
            calls += 1;
            Err(transient_error!(
                "test_op",
                io::Error::new(io::ErrorKind::TimedOut, "timed out")
            ))
        });

        assert_eq!(calls, 2);
        match result {
            Err(RetryError::MaxRetriesExceeded { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected MaxRetriesExceeded, got {other:?}"),
        }
    }

    #[test]
    fn test_blocking_permanent_stops_immediately() {
        let mut calls = 0;
        let result: RetryResult<()> = retry_blocking("test_op", &fast_policy(5), |_| {
            calls += 1;
            Err(permanent_error!(
                "test_op",
                io::Error::new(io::ErrorKind::PermissionDenied, "permission denied")
            ))
        });

        assert_eq!(calls, 1);
        assert!(matches!(result, Err(RetryError::Permanent { .. })));
    }

    #[test]
    fn test_no_retry_policy() {
        let mut calls = 0;
        let result: RetryResult<()> = retry_blocking("test_op", &RetryPolicy::no_retry(), |_| {
            calls += 1;
            Err(transient_error!(
                "test_op",
                io::Error::new(io::ErrorKind::Interrupted, "interrupted")
            ))
        });
        assert_eq!(calls, 1);
        assert!(result.is_err());
    }

    #[derive(Debug, thiserror::Error)]
    #[error("flaky: {0}")]
    struct Flaky(bool);

    impl RetryableError for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_classify_error() {
        assert!(matches!(
            classify_error("op", Flaky(true)),
            RetryError::Transient { .. }
        ));
        assert!(matches!(
            classify_error("op", Flaky(false)),
            RetryError::Permanent { .. }
        ));
        assert!(Flaky(false).is_permanent());
    }

    #[cfg(feature = "async-rt")]
    #[tokio::test]
    async fn test_async_transient_failure_then_success() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = with_backoff("test_op", &fast_policy(5), move |_attempt| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if count < 2 {
                    Err(transient_error!(
                        "test_op",
                        io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused")
                    ))
                } else {
                    Ok("success")
                }
            })
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_into_source_keeps_last_error() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let err = retry_blocking::<_, ()>("test_op", &fast_policy(1), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Err(transient_error!(
                "test_op",
                io::Error::new(io::ErrorKind::Interrupted, "last failure")
            ))
        })
        .unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(err.into_source().to_string().contains("last failure"));
    }
}
