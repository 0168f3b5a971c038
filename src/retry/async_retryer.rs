use std::{fmt::Display, future::Future, sync::Arc, time::Duration};

use futures::future::{BoxFuture, Either};

use crate::{ExecutionError, RetryOptions, RetryStatus, RetryerState, Store, TimeoutError};

pub(crate) type RetryFn<A, T, E> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// Re-runs an async operation with backoff until it succeeds or a limit is hit.
///
/// # Algorithm
///
/// For attempt `n` (1-indexed):
///
/// 1. If more than `max_total_execution_time` has passed since the first
///    attempt started, stop with the last error
/// 2. Run the operation, raced against `max_execution_time` when set
/// 3. On success, call `on_success` and `on_settled` and return the value
/// 4. On failure, call `on_error`; if `n == max_attempts`, call `on_last_error`
///    and `on_settled` and return the error
/// 5. Otherwise compute the backoff delay with jitter, call `on_retry`, wait and
///    continue with `n + 1`
///
/// Every call to [`execute`](Self::execute) keeps its own attempt counter and
/// start time. Callers that need a quota shared across calls should compose the
/// retryer with a [`RateLimiter`](crate::RateLimiter).
///
/// # Timeouts
///
/// The per-attempt timeout drops the attempt's future, which cancels it. The
/// total limit is only checked between attempts: it never interrupts an attempt
/// that is already running.
pub struct AsyncRetryer<A, T, E> {
    func: RetryFn<A, T, E>,
    options: RetryOptions<T, E>,
    store: Arc<Store<RetryerState>>,
}

impl<A, T, E> AsyncRetryer<A, T, E>
where
    A: Clone,
    E: Display,
{
    /// Create a retryer around `func`.
    pub fn new<F, Fut>(func: F, options: RetryOptions<T, E>) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let func: RetryFn<A, T, E> = Arc::new(move |args| -> BoxFuture<'static, Result<T, E>> {
            Box::pin(func(args))
        });
        Self::with_function(func, options, Arc::new(Store::new(RetryerState::default())))
    }

    pub(crate) fn with_function(
        func: RetryFn<A, T, E>,
        options: RetryOptions<T, E>,
        store: Arc<Store<RetryerState>>,
    ) -> Self {
        Self {
            func,
            options,
            store,
        }
    }

    /// Run the operation with retries.
    ///
    /// Returns the first successful value, or the error that ended the
    /// execution: the last attempt's error, or a timeout.
    pub async fn execute(&self, args: A) -> Result<T, ExecutionError<E>> {
        let clock = &self.options.clock;
        let started_at = clock.now_ms();
        let mut last_error: Option<ExecutionError<E>> = None;
        let mut attempt: u32 = 1;

        self.store.update(|state| {
            state.current_attempt = 0;
            state.total_execution_time_ms = 0;
            state.last_error = None;
        });

        loop {
            let elapsed_ms = clock.now_ms().saturating_sub(started_at);

            if let Some(limit) = self.options.max_total_execution_time
                && u128::from(elapsed_ms) > limit.as_millis()
            {
                let error = last_error.take().unwrap_or_else(|| {
                    ExecutionError::Timeout(TimeoutError::Total {
                        elapsed: Duration::from_millis(elapsed_ms),
                        limit,
                    })
                });

                tracing::warn!(
                    attempt,
                    elapsed_ms,
                    "retry aborted, total execution time exceeded"
                );
                return Err(self.finish_with_error(error, started_at));
            }

            self.store.update(|state| {
                state.status = RetryStatus::Executing;
                state.current_attempt = attempt;
                state.execution_count += 1;
                state.last_execution_time = Some(clock.now_ms());
            });

            match self.run_attempt(args.clone(), attempt).await {
                Ok(value) => {
                    self.store.update(|state| {
                        state.status = RetryStatus::Idle;
                        state.total_execution_time_ms = clock.now_ms().saturating_sub(started_at);
                    });

                    if let Some(on_success) = &self.options.on_success {
                        on_success(&value);
                    }
                    if let Some(on_settled) = &self.options.on_settled {
                        on_settled();
                    }

                    return Ok(value);
                }
                Err(error) => {
                    let message = error.to_string();
                    self.store.update(|state| state.last_error = Some(message));

                    if let Some(on_error) = &self.options.on_error {
                        on_error(&error);
                    }

                    if attempt >= *self.options.max_attempts {
                        tracing::warn!(attempt, %error, "retry attempts exhausted");
                        return Err(self.finish_with_error(error, started_at));
                    }

                    let delay = self.options.backoff.jittered_delay(
                        attempt,
                        self.options.base_wait,
                        self.options.jitter,
                    );

                    tracing::debug!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        %error,
                        "attempt failed, retrying"
                    );

                    if let Some(on_retry) = &self.options.on_retry {
                        on_retry(attempt, &error);
                    }

                    last_error = Some(error);
                    self.store.update(|state| {
                        state.status = RetryStatus::Retrying;
                        state.total_execution_time_ms = clock.now_ms().saturating_sub(started_at);
                    });

                    clock.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    } // end method execute

    /// Run the operation with retries, reporting failure only through callbacks.
    pub async fn execute_or_none(&self, args: A) -> Option<T> {
        self.execute(args).await.ok()
    }

    /// Current snapshot.
    pub fn state(&self) -> RetryerState {
        self.store.state()
    }

    /// Store publishing a snapshot on every attempt transition.
    pub fn store(&self) -> &Store<RetryerState> {
        &self.store
    }

    /// The options this retryer was created with.
    pub fn options(&self) -> &RetryOptions<T, E> {
        &self.options
    }

    async fn run_attempt(&self, args: A, attempt: u32) -> Result<T, ExecutionError<E>> {
        let operation = (self.func)(args);

        let Some(limit) = self.options.max_execution_time else {
            return operation.await.map_err(ExecutionError::Failed);
        };

        let timer = self.options.clock.sleep(limit);
        match futures::future::select(operation, timer).await {
            Either::Left((result, _)) => result.map_err(ExecutionError::Failed),
            Either::Right(((), _)) => {
                tracing::debug!(attempt, limit_ms = limit.as_millis() as u64, "attempt timed out");
                Err(TimeoutError::Attempt { attempt, limit }.into())
            }
        }
    } // end method run_attempt

    fn finish_with_error(&self, error: ExecutionError<E>, started_at: u64) -> ExecutionError<E> {
        let clock = &self.options.clock;
        self.store.update(|state| {
            state.status = RetryStatus::Idle;
            state.total_execution_time_ms = clock.now_ms().saturating_sub(started_at);
        });

        if let Some(on_last_error) = &self.options.on_last_error {
            on_last_error(&error);
        }
        if let Some(on_settled) = &self.options.on_settled {
            on_settled();
        }

        error
    }
}
