//! Retry with exponential backoff
//!
//! Wraps fallible async storage operations. Errors declare themselves
//! [`Recoverable`] or not; recoverable ones are retried with backoff until
//! the attempt limit or the overall deadline, the rest are surfaced after
//! the first attempt. Every retry and every terminal failure is recorded
//! against the entity's health.
//!
//! A multi-step operation takes one [`RetryExecutor::deadline`] up front and
//! passes it to [`RetryExecutor::run_until`] for each step, so the overall
//! timeout spans the whole operation rather than each step.

mod errors;
mod policy;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::FailureKind;
use crate::observability::{Event, HealthRegistry};

pub use errors::{Recoverable, RetryError};
pub use policy::RetryPolicy;

/// Runs operations under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    health: Arc<HealthRegistry>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, health: Arc<HealthRegistry>) -> Self {
        Self { policy, health }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deadline for an operation starting now
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.policy.overall_timeout()
    }

    /// Runs `operation` as a single-step operation with its own deadline.
    pub async fn run<T, E, F, Fut>(&self, entity_id: &str, operation: &str, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Recoverable + fmt::Display,
    {
        self.run_until(self.deadline(), entity_id, operation, op).await
    }

    /// Runs `operation` until it succeeds, fails fatally, runs out of
    /// attempts, or `deadline` passes.
    ///
    /// The deadline also bounds an attempt in flight: an attempt still
    /// running when it passes is dropped. A deadline already passed fails
    /// without attempting.
    pub async fn run_until<T, E, F, Fut>(
        &self,
        deadline: Instant,
        entity_id: &str,
        operation: &str,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Recoverable + fmt::Display,
    {
        let started = deadline
            .checked_sub(self.policy.overall_timeout())
            .unwrap_or_else(Instant::now);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;
        let mut last: Option<E> = None;

        if Instant::now() >= deadline {
            return Err(self.timed_out(entity_id, operation, attempt, started, last));
        }

        loop {
            attempt += 1;
            let err = match timeout_at(deadline, op()).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!(
                            event = %Event::RetryAttempt,
                            entity = entity_id,
                            operation = operation,
                            attempts = attempt,
                            outcome = "recovered"
                        );
                    }
                    return Ok(value);
                }
                Ok(Err(err)) => err,
                Err(_) => return Err(self.timed_out(entity_id, operation, attempt, started, last)),
            };

            if !err.is_recoverable() {
                self.health
                    .record_storage_failure(entity_id, err.failure_kind(), &err.to_string());
                warn!(
                    event = %Event::StorageFatal,
                    entity = entity_id,
                    operation = operation,
                    error = %err
                );
                return Err(RetryError::Fatal(err));
            }

            if attempt >= max_attempts {
                self.health
                    .record_storage_failure(entity_id, FailureKind::StorageTransientFailure, &err.to_string());
                warn!(
                    event = %Event::RetryExhausted,
                    entity = entity_id,
                    operation = operation,
                    attempts = attempt,
                    error = %err
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.policy.jittered_backoff(attempt);
            self.health.record_retry(entity_id);
            debug!(
                event = %Event::RetryAttempt,
                entity = entity_id,
                operation = operation,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err
            );
            last = Some(err);

            if Instant::now() + delay >= deadline {
                return Err(self.timed_out(entity_id, operation, attempt, started, last));
            }
            sleep(delay).await;
        }
    }

    fn timed_out<E: fmt::Display>(
        &self,
        entity_id: &str,
        operation: &str,
        attempts: u32,
        started: Instant,
        last: Option<E>,
    ) -> RetryError<E> {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let message = match &last {
            Some(err) => format!("{} timed out after {}ms: {}", operation, elapsed_ms, err),
            None => format!("{} timed out after {}ms", operation, elapsed_ms),
        };
        self.health
            .record_storage_failure(entity_id, FailureKind::StorageTransientFailure, &message);
        warn!(
            event = %Event::RetryTimeout,
            entity = entity_id,
            operation = operation,
            attempts = attempts,
            elapsed_ms = elapsed_ms
        );
        RetryError::TimedOut {
            attempts,
            elapsed_ms,
            last,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct TestError(bool);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error (recoverable: {})", self.0)
        }
    }

    impl Recoverable for TestError {
        fn is_recoverable(&self) -> bool {
            self.0
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            exponential_base: 2.0,
            jitter: 0.0,
            overall_timeout_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let health = Arc::new(HealthRegistry::new());
        let executor = RetryExecutor::new(fast_policy(5), Arc::clone(&health));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = executor
            .run("42", "append", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError(true))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let snapshot = health.check("42");
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.write_failures, 0);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let health = Arc::new(HealthRegistry::new());
        let executor = RetryExecutor::new(fast_policy(5), Arc::clone(&health));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = executor
            .run("42", "append", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError(false))
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.code(), "CAUSELOG_RETRY_FATAL");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            health.check("42").last_failure_kind,
            Some(FailureKind::StorageFatalFailure)
        );
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let health = Arc::new(HealthRegistry::new());
        let executor = RetryExecutor::new(fast_policy(3), Arc::clone(&health));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = executor
            .run("42", "load", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TestError(true))
            })
            .await;

        match result.unwrap_err() {
            RetryError::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected: {}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let snapshot = health.check("42");
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_overall_timeout_bounds_slow_attempts() {
        let health = Arc::new(HealthRegistry::new());
        let policy = RetryPolicy {
            overall_timeout_ms: 50,
            ..fast_policy(10)
        };
        let executor = RetryExecutor::new(policy, Arc::clone(&health));

        let result: Result<(), RetryError<TestError>> = executor
            .run("42", "append", || async {
                sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.code(), "CAUSELOG_RETRY_TIMEOUT");
        assert_eq!(err.attempts(), 1);
        assert!(err.last_error().is_none());
    }

    /// Two slow steps sharing one deadline: the second is cut short even
    /// though each step alone fits.
    #[tokio::test]
    async fn test_deadline_spans_every_step() {
        let health = Arc::new(HealthRegistry::new());
        let policy = RetryPolicy {
            overall_timeout_ms: 120,
            ..fast_policy(1)
        };
        let executor = RetryExecutor::new(policy, Arc::clone(&health));
        let deadline = executor.deadline();

        let step = || async {
            sleep(Duration::from_millis(80)).await;
            Ok::<_, TestError>(())
        };
        executor.run_until(deadline, "42", "read", step).await.unwrap();
        let err = executor
            .run_until(deadline, "42", "write", step)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CAUSELOG_RETRY_TIMEOUT");
        match err {
            RetryError::TimedOut { elapsed_ms, .. } => assert!(elapsed_ms >= 110, "elapsed {}", elapsed_ms),
            other => panic!("unexpected: {}", other),
        }
        assert_eq!(health.check("42").write_failures, 1);
    }

    #[tokio::test]
    async fn test_passed_deadline_makes_no_attempt() {
        let health = Arc::new(HealthRegistry::new());
        let executor = RetryExecutor::new(fast_policy(3), Arc::clone(&health));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> = executor
            .run_until(Instant::now(), "42", "write", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(())
            })
            .await;

        assert_eq!(result.unwrap_err().attempts(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(health.check("42").consecutive_failures, 1);
    }
}
