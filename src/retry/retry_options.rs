use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Backoff, Clock, ExecutionError, Handler, Jitter, MaxAttempts, Notify, SystemClock};

/// Callback invoked before waiting for the next attempt, with the number of the
/// attempt that just failed.
pub type RetryHandler<E> = Arc<dyn Fn(u32, &ExecutionError<E>) + Send + Sync>;

/// Configuration for [`AsyncRetryer`](crate::AsyncRetryer).
pub struct RetryOptions<T, E> {
    /// Attempts including the first one. Defaults to `3`.
    pub max_attempts: MaxAttempts,
    /// Delay shape. Defaults to [`Backoff::Exponential`].
    pub backoff: Backoff,
    /// Base delay fed into the backoff. Defaults to one second.
    pub base_wait: Duration,
    /// Multiplicative jitter. Defaults to none.
    pub jitter: Jitter,
    /// Per-attempt timeout. An attempt running longer is dropped and fails with
    /// [`TimeoutError::Attempt`](crate::TimeoutError::Attempt).
    pub max_execution_time: Option<Duration>,
    /// No new attempt starts once this much time has passed since the first.
    pub max_total_execution_time: Option<Duration>,
    /// Called before each backoff wait.
    pub on_retry: Option<RetryHandler<E>>,
    /// Called on every failed attempt.
    pub on_error: Option<Handler<ExecutionError<E>>>,
    /// Called once with the error that ends the execution.
    pub on_last_error: Option<Handler<ExecutionError<E>>>,
    /// Called with the value of the successful attempt.
    pub on_success: Option<Handler<T>>,
    /// Called once when the execution ends, either way.
    pub on_settled: Option<Notify>,
    /// Time source for elapsed-time checks, backoff waits and timeouts.
    pub clock: Arc<dyn Clock>,
}

impl<T, E> RetryOptions<T, E> {
    /// Options with `max_attempts`, `backoff` and `base_wait`, defaults elsewhere.
    pub fn new(max_attempts: MaxAttempts, backoff: Backoff, base_wait: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            base_wait,
            ..Self::default()
        }
    }
}

impl<T, E> Default for RetryOptions<T, E> {
    fn default() -> Self {
        Self {
            max_attempts: MaxAttempts::default(),
            backoff: Backoff::default(),
            base_wait: Duration::from_secs(1),
            jitter: Jitter::default(),
            max_execution_time: None,
            max_total_execution_time: None,
            on_retry: None,
            on_error: None,
            on_last_error: None,
            on_success: None,
            on_settled: None,
            clock: SystemClock::shared(),
        }
    }
}

impl<T, E> Clone for RetryOptions<T, E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            base_wait: self.base_wait,
            jitter: self.jitter,
            max_execution_time: self.max_execution_time,
            max_total_execution_time: self.max_total_execution_time,
            on_retry: self.on_retry.clone(),
            on_error: self.on_error.clone(),
            on_last_error: self.on_last_error.clone(),
            on_success: self.on_success.clone(),
            on_settled: self.on_settled.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<T, E> fmt::Debug for RetryOptions<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("base_wait", &self.base_wait)
            .field("jitter", &self.jitter)
            .field("max_execution_time", &self.max_execution_time)
            .field("max_total_execution_time", &self.max_total_execution_time)
            .finish_non_exhaustive()
    }
}

/// Phase of the most recent execution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    /// No execution in progress.
    #[default]
    Idle,
    /// An attempt is running.
    Executing,
    /// Waiting out a backoff delay.
    Retrying,
}

/// Snapshot of a retryer.
///
/// Attempt fields describe the most recent call to `execute`; each call keeps
/// its own attempt state, so concurrent calls overwrite each other here.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryerState {
    /// Phase of the most recent execution.
    pub status: RetryStatus,
    /// 1-indexed attempt of the most recent execution; `0` before any.
    pub current_attempt: u32,
    /// Attempts started over the retryer's lifetime.
    pub execution_count: u64,
    /// Milliseconds spent in the most recent execution so far.
    pub total_execution_time_ms: u64,
    /// Clock reading when the most recent attempt started.
    pub last_execution_time: Option<u64>,
    /// Rendered error of the most recent failed attempt.
    pub last_error: Option<String>,
}
