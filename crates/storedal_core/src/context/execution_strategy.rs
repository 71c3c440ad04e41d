//! Retry wrapper for unit-of-work commits.
//!
//! # Responsibility
//! - Re-execute a whole commit when it fails with a transient error.
//! - Bound retries by count and by elapsed time.
//!
//! # Invariants
//! - Concurrency conflicts are never retried.
//! - Backoff delays never decrease from one retry to the next and never exceed `max_delay`.
//! - Exhausting the budget yields `RetryLimitExceeded` carrying the last error.

use crate::repo::error::{RepoError, RepoResult};
use log::{info, warn};
use std::time::{Duration, Instant};

/// Classification of failures worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransientPolicy {
    /// Every store failure except concurrency conflicts.
    #[default]
    AllExceptConflicts,
    /// Only `SQLITE_BUSY` / `SQLITE_LOCKED`.
    SqliteBusy,
}

/// Retry strategy applied to each commit as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionStrategy {
    max_retry_count: u32,
    max_retry_time: Duration,
    base_delay: Duration,
    max_delay: Duration,
    policy: TransientPolicy,
}

impl ExecutionStrategy {
    pub const DEFAULT_MAX_RETRY_COUNT: u32 = 6;
    pub const DEFAULT_MAX_RETRY_TIME: Duration = Duration::from_secs(30);
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

    pub fn new(max_retry_count: u32, max_retry_time: Duration) -> Self {
        Self {
            max_retry_count,
            max_retry_time,
            base_delay: Self::DEFAULT_BASE_DELAY,
            max_delay: Self::DEFAULT_MAX_DELAY,
            policy: TransientPolicy::default(),
        }
    }

    /// Strategy that executes exactly once and never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Sets the first backoff delay; later delays double from it.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Caps individual backoff delays.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_policy(mut self, policy: TransientPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }

    pub fn max_retry_time(&self) -> Duration {
        self.max_retry_time
    }

    /// Returns whether `error` is transient under this strategy's policy.
    pub fn should_retry(&self, error: &RepoError) -> bool {
        match error {
            RepoError::Concurrency(_)
            | RepoError::RetryLimitExceeded { .. }
            | RepoError::NotTracked(_)
            | RepoError::AlreadyTracked(_)
            | RepoError::InvalidTransition { .. }
            | RepoError::Validation(_)
            | RepoError::Disposed => false,
            RepoError::Db(err) => match self.policy {
                TransientPolicy::AllExceptConflicts => true,
                TransientPolicy::SqliteBusy => err.is_busy(),
            },
            RepoError::InvalidData(_) => self.policy == TransientPolicy::AllExceptConflicts,
        }
    }

    /// Delay before the given retry (1-based): `base * 2^(retry-1)`, capped at `max_delay`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1_u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Runs `operation`, retrying transient failures within the budget.
    ///
    /// # Errors
    /// - Non-transient errors are returned unchanged after the failing attempt.
    /// - `RetryLimitExceeded` once `max_retry_count` retries were spent or the
    ///   next delay would overrun `max_retry_time`.
    pub fn execute<T, F>(&self, mut operation: F) -> RepoResult<T>
    where
        F: FnMut() -> RepoResult<T>,
    {
        let started_at = Instant::now();
        let mut retries = 0_u32;

        loop {
            let err = match operation() {
                Ok(value) => {
                    if retries > 0 {
                        info!(
                            "event=execution_retry module=context status=recovered retries={} duration_ms={}",
                            retries,
                            started_at.elapsed().as_millis()
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !self.should_retry(&err) {
                return Err(err);
            }

            let delay = self.delay_for_retry(retries + 1);
            let elapsed = started_at.elapsed();
            if retries >= self.max_retry_count || elapsed + delay > self.max_retry_time {
                warn!(
                    "event=execution_retry module=context status=error error_code=retry_limit_exceeded attempts={} duration_ms={} error={}",
                    retries + 1,
                    elapsed.as_millis(),
                    err
                );
                return Err(RepoError::RetryLimitExceeded {
                    attempts: retries + 1,
                    elapsed,
                    last_error: Box::new(err),
                });
            }

            retries += 1;
            warn!(
                "event=execution_retry module=context status=retrying retry={} max_retry_count={} delay_ms={} error_code={} error={}",
                retries,
                self.max_retry_count,
                delay.as_millis(),
                err.code(),
                err
            );
            std::thread::sleep(delay);
        }
    }
}

impl Default for ExecutionStrategy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_RETRY_COUNT, Self::DEFAULT_MAX_RETRY_TIME)
    }
}
