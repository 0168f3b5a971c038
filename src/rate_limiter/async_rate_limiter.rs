use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;

use crate::{
    AsyncRateLimiterOptions, AsyncRateLimiterState, PacingError, RateLimitDecision,
    RejectionError, Store, rate_limiter::execution_window::AdmissionControl,
};

type AsyncFn<A, T, E> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// Windowed rate limiter wrapping an asynchronous function.
///
/// Admission is decided synchronously before the wrapped future is created; the
/// only suspension point is the wrapped function itself. The admission
/// timestamp is recorded at admission time, not at completion.
pub struct AsyncRateLimiter<A, T, E> {
    func: AsyncFn<A, T, E>,
    options: AsyncRateLimiterOptions<T, E>,
    control: AdmissionControl,
    success_count: AtomicU64,
    error_count: AtomicU64,
    settle_count: AtomicU64,
    in_flight: AtomicU64,
    store: Store<AsyncRateLimiterState>,
}

impl<A, T, E> AsyncRateLimiter<A, T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Create a limiter around `func`.
    pub fn new<F, Fut>(func: F, options: AsyncRateLimiterOptions<T, E>) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let limits = &options.limits;
        let saved = options.initial_state.as_ref();
        let control = AdmissionControl::new(
            limits.limit,
            limits.window,
            limits.window_type,
            limits.enabled.clone(),
            limits.clock.clone(),
            saved
                .map(|state| &state.window)
                .or(limits.initial_state.as_ref()),
        );
        let [success, error, settle] = saved.map_or([0; 3], |state| {
            [state.success_count, state.error_count, state.settle_count]
        });
        let store = Store::new(AsyncRateLimiterState {
            window: control.snapshot(),
            success_count: success,
            error_count: error,
            settle_count: settle,
            is_executing: false,
        });

        Self {
            func: Arc::new(move |args| -> BoxFuture<'static, Result<T, E>> {
                Box::pin(func(args))
            }),
            options,
            control,
            success_count: AtomicU64::new(success),
            error_count: AtomicU64::new(error),
            settle_count: AtomicU64::new(settle),
            in_flight: AtomicU64::new(0),
            store,
        }
    } // end constructor

    /// Execute the wrapped function if the window allows it.
    ///
    /// # Returns
    ///
    /// - `Ok(value)`: admitted and the function succeeded
    /// - `Err(PacingError::Rejected(_))`: not admitted; nothing ran
    /// - `Err(PacingError::Execution(e))`: admitted and the function failed
    pub async fn maybe_execute(&self, args: A) -> Result<T, PacingError<E>> {
        match self.control.try_admit() {
            RateLimitDecision::Allowed => {}
            RateLimitDecision::Rejected { retry_after_ms, .. } => {
                self.publish();

                let retry_after = Duration::from_millis(retry_after_ms);
                if let Some(on_reject) = &self.options.limits.on_reject {
                    on_reject(&retry_after);
                }

                return Err(RejectionError::RateLimited { retry_after }.into());
            }
            RateLimitDecision::Disabled => return Err(RejectionError::Disabled.into()),
        }

        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.publish();
        if let Some(on_execute) = &self.options.limits.on_execute {
            on_execute(&self.control.snapshot());
        }

        let result = (self.func)(args).await;

        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        match &result {
            Ok(value) => {
                self.success_count.fetch_add(1, Ordering::Relaxed);
                if let Some(on_success) = &self.options.on_success {
                    on_success(value);
                }
            }
            Err(error) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("rate limited execution failed");
                if let Some(on_error) = &self.options.on_error {
                    on_error(error);
                }
            }
        }
        self.settle_count.fetch_add(1, Ordering::Relaxed);
        self.publish();

        if let Some(on_settled) = &self.options.on_settled {
            on_settled();
        }

        result.map_err(PacingError::Execution)
    } // end method maybe_execute

    /// Preview the admission decision without recording anything.
    pub fn check(&self) -> RateLimitDecision {
        self.control.check()
    }

    /// Admissions left in the current window.
    pub fn remaining_in_window(&self) -> u64 {
        self.control.remaining_in_window()
    }

    /// Milliseconds until the next call would be admitted.
    pub fn ms_until_next_window(&self) -> u64 {
        self.control.ms_until_next_window()
    }

    /// Admitted calls.
    pub fn execution_count(&self) -> u64 {
        self.control.execution_count()
    }

    /// Rejected calls.
    pub fn rejection_count(&self) -> u64 {
        self.control.rejection_count()
    }

    /// Executions that returned `Ok`.
    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    /// Executions that returned `Err`.
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Executions that finished.
    pub fn settle_count(&self) -> u64 {
        self.settle_count.load(Ordering::Relaxed)
    }

    /// Clear timestamps and all counters. In-flight executions still settle and
    /// are counted after the reset.
    pub fn reset(&self) {
        self.control.reset();
        self.success_count.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        self.settle_count.store(0, Ordering::Relaxed);
        self.publish();
    }

    /// Current snapshot.
    pub fn state(&self) -> AsyncRateLimiterState {
        AsyncRateLimiterState {
            window: self.control.snapshot(),
            success_count: self.success_count(),
            error_count: self.error_count(),
            settle_count: self.settle_count(),
            is_executing: self.in_flight.load(Ordering::Relaxed) > 0,
        }
    }

    /// Store publishing a snapshot after every state change.
    pub fn store(&self) -> &Store<AsyncRateLimiterState> {
        &self.store
    }

    fn publish(&self) {
        self.store.replace_with(|| self.state());
    }
}
