use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Clock, Enabled, Handler, Limit, Notify, SystemClock, WindowMs, WindowType};

/// Configuration for [`RateLimiter`](crate::RateLimiter).
#[derive(Clone)]
pub struct RateLimiterOptions {
    /// Maximum admissions per window.
    pub limit: Limit,
    /// Window duration.
    pub window: WindowMs,
    /// Fixed buckets or a trailing window. Defaults to [`WindowType::Fixed`].
    pub window_type: WindowType,
    /// When disabled, calls are neither executed nor counted.
    pub enabled: Enabled,
    /// Called with the new state after every admitted execution.
    pub on_execute: Option<Handler<RateLimiterState>>,
    /// Called on rejection with the time until the next admission.
    pub on_reject: Option<Handler<Duration>>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Rehydrated state, typically from a [`Persister`](crate::Persister).
    pub initial_state: Option<RateLimiterState>,
}

impl RateLimiterOptions {
    /// Options with the given limit and window and defaults for everything else.
    pub fn new(limit: Limit, window: WindowMs) -> Self {
        Self {
            limit,
            window,
            window_type: WindowType::default(),
            enabled: Enabled::default(),
            on_execute: None,
            on_reject: None,
            clock: SystemClock::shared(),
            initial_state: None,
        }
    }

    /// Use `window_type`.
    pub fn with_window_type(mut self, window_type: WindowType) -> Self {
        self.window_type = window_type;
        self
    }

    /// Use `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl fmt::Debug for RateLimiterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiterOptions")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("window_type", &self.window_type)
            .field("enabled", &self.enabled)
            .field("initial_state", &self.initial_state)
            .finish_non_exhaustive()
    }
}

/// Configuration for [`AsyncRateLimiter`](crate::AsyncRateLimiter).
pub struct AsyncRateLimiterOptions<T, E> {
    /// Window and admission settings shared with the sync limiter.
    pub limits: RateLimiterOptions,
    /// Called with the value of every successful execution.
    pub on_success: Option<Handler<T>>,
    /// Called with the error of every failed execution.
    pub on_error: Option<Handler<E>>,
    /// Called after every execution, successful or not.
    pub on_settled: Option<Notify>,
    /// Rehydrated state, typically from a [`Persister`](crate::Persister).
    ///
    /// Restores the window and every counter. Takes precedence over
    /// `limits.initial_state`.
    pub initial_state: Option<AsyncRateLimiterState>,
}

impl<T, E> AsyncRateLimiterOptions<T, E> {
    /// Options without callbacks.
    pub fn new(limits: RateLimiterOptions) -> Self {
        Self {
            limits,
            on_success: None,
            on_error: None,
            on_settled: None,
            initial_state: None,
        }
    }
}

impl<T, E> Clone for AsyncRateLimiterOptions<T, E> {
    fn clone(&self) -> Self {
        Self {
            limits: self.limits.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_settled: self.on_settled.clone(),
            initial_state: self.initial_state.clone(),
        }
    }
}

impl<T, E> fmt::Debug for AsyncRateLimiterOptions<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRateLimiterOptions")
            .field("limits", &self.limits)
            .field("initial_state", &self.initial_state)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a rate limiter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterState {
    /// Admissions still inside the current window, oldest first.
    pub execution_timestamps: Vec<u64>,
    /// Start of the current fixed-window bucket.
    pub window_anchor: Option<u64>,
    /// Admitted calls since creation or the last reset.
    pub execution_count: u64,
    /// Rejected calls since creation or the last reset.
    pub rejection_count: u64,
    /// Whether the current window is exhausted.
    pub is_exceeded: bool,
}

/// Snapshot of an async rate limiter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncRateLimiterState {
    /// Window state and admission counters.
    #[serde(flatten)]
    pub window: RateLimiterState,
    /// Executions that returned `Ok`.
    pub success_count: u64,
    /// Executions that returned `Err`.
    pub error_count: u64,
    /// Executions that finished either way.
    pub settle_count: u64,
    /// Executions currently in flight.
    pub is_executing: bool,
}
