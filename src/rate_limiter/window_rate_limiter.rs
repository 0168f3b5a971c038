use std::{marker::PhantomData, sync::Arc, time::Duration};

use crate::{
    RateLimitDecision, RateLimiterOptions, RateLimiterState, RejectionError, Store,
    rate_limiter::execution_window::AdmissionControl,
};

/// Windowed rate limiter wrapping a synchronous function.
///
/// Each [`maybe_execute`](Self::maybe_execute) call is admitted or rejected
/// against the timestamps of past admissions; admitted calls invoke the wrapped
/// function immediately.
///
/// # Semantics & Limitations
///
/// - **Fixed windows** are anchored at the first admission (not at an epoch), so
///   a `limit` of 2 per 1000ms admits `t=0`, `t=100`, rejects `t=200` and admits
///   again from `t=1000`.
/// - **Sliding windows** expire admissions individually; there is no reset cliff.
/// - State is process-local and in-memory.
/// - The wrapped function runs on the caller's thread, after the limiter has
///   released its lock, so it may call back into the limiter.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, atomic::{AtomicU32, Ordering}};
/// use tempora::{Limit, ManualClock, RateLimiter, RateLimiterOptions, WindowMs, WindowType};
///
/// let clock = Arc::new(ManualClock::new());
/// let calls = Arc::new(AtomicU32::new(0));
/// let counter = calls.clone();
///
/// let limiter = RateLimiter::new(
///     move |n: u32| {
///         counter.fetch_add(n, Ordering::Relaxed);
///     },
///     RateLimiterOptions::new(Limit::try_from(2u64).unwrap(), WindowMs::try_from(1000u64).unwrap())
///         .with_window_type(WindowType::Fixed)
///         .with_clock(clock.clone()),
/// );
///
/// assert!(limiter.maybe_execute(1));
/// assert!(limiter.maybe_execute(1));
/// assert!(!limiter.maybe_execute(1));
///
/// clock.advance_ms(1000);
/// assert!(limiter.maybe_execute(1));
/// assert_eq!(calls.load(Ordering::Relaxed), 3);
/// ```
pub struct RateLimiter<A> {
    func: Arc<dyn Fn(A) + Send + Sync>,
    options: RateLimiterOptions,
    control: AdmissionControl,
    store: Store<RateLimiterState>,
    _args: PhantomData<fn(A)>,
}

impl<A> RateLimiter<A> {
    /// Create a limiter around `func`.
    pub fn new<F>(func: F, options: RateLimiterOptions) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        let control = AdmissionControl::new(
            options.limit,
            options.window,
            options.window_type,
            options.enabled.clone(),
            options.clock.clone(),
            options.initial_state.as_ref(),
        );
        let store = Store::new(control.snapshot());

        Self {
            func: Arc::new(func),
            options,
            control,
            store,
            _args: PhantomData,
        }
    } // end constructor

    /// Execute the wrapped function if the window allows it.
    ///
    /// Returns `true` if the function ran. On rejection the rejection counter is
    /// incremented, `on_reject` receives the time until the next admission and
    /// `false` is returned. A disabled limiter returns `false` without counting.
    pub fn maybe_execute(&self, args: A) -> bool {
        self.try_execute(args).is_ok()
    }

    /// Like [`maybe_execute`](Self::maybe_execute), but reports why a call was
    /// not executed.
    pub fn try_execute(&self, args: A) -> Result<(), RejectionError> {
        match self.control.try_admit() {
            RateLimitDecision::Allowed => {
                let state = self.store.replace_with(|| self.control.snapshot());

                (self.func)(args);

                if let Some(on_execute) = &self.options.on_execute {
                    on_execute(&state);
                }

                Ok(())
            }
            RateLimitDecision::Rejected { retry_after_ms, .. } => {
                self.store.replace_with(|| self.control.snapshot());

                let retry_after = Duration::from_millis(retry_after_ms);
                if let Some(on_reject) = &self.options.on_reject {
                    on_reject(&retry_after);
                }

                Err(RejectionError::RateLimited { retry_after })
            }
            RateLimitDecision::Disabled => Err(RejectionError::Disabled),
        }
    } // end method try_execute

    /// Preview the admission decision without recording anything.
    pub fn check(&self) -> RateLimitDecision {
        self.control.check()
    }

    /// Admissions left in the current window.
    pub fn remaining_in_window(&self) -> u64 {
        self.control.remaining_in_window()
    }

    /// Milliseconds until the next call would be admitted; `0` if one would be
    /// admitted now.
    pub fn ms_until_next_window(&self) -> u64 {
        self.control.ms_until_next_window()
    }

    /// Admitted calls since creation or the last reset.
    pub fn execution_count(&self) -> u64 {
        self.control.execution_count()
    }

    /// Rejected calls since creation or the last reset.
    pub fn rejection_count(&self) -> u64 {
        self.control.rejection_count()
    }

    /// Clear timestamps and counters. Configuration is kept.
    pub fn reset(&self) {
        self.control.reset();
        self.store.replace_with(|| self.control.snapshot());
    }

    /// Current snapshot.
    pub fn state(&self) -> RateLimiterState {
        self.control.snapshot()
    }

    /// Store publishing a snapshot after every state change.
    pub fn store(&self) -> &Store<RateLimiterState> {
        &self.store
    }

    /// The options this limiter was created with.
    pub fn options(&self) -> &RateLimiterOptions {
        &self.options
    }
}
