use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;

use crate::{
    Clock, Limit, RateLimitDecision, SystemClock, WindowMs, WindowType,
    rate_limiter::execution_window::ExecutionWindow, runtime,
};

/// Configuration for [`KeyedRateLimiter`].
#[derive(Clone)]
pub struct KeyedRateLimiterOptions {
    /// Maximum admissions per window, per key.
    pub limit: Limit,
    /// Window duration.
    pub window: WindowMs,
    /// Fixed buckets or a trailing window.
    pub window_type: WindowType,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl KeyedRateLimiterOptions {
    /// Options with the given limit and window, a fixed window and the system clock.
    pub fn new(limit: Limit, window: WindowMs) -> Self {
        Self {
            limit,
            window,
            window_type: WindowType::default(),
            clock: SystemClock::shared(),
        }
    }
}

impl fmt::Debug for KeyedRateLimiterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedRateLimiterOptions")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("window_type", &self.window_type)
            .finish_non_exhaustive()
    }
}

/// Admission control with one independent window per string key.
///
/// Useful when the same limit applies per user, per endpoint or per tenant.
/// Unlike [`RateLimiter`](crate::RateLimiter) it does not wrap a function:
/// callers ask for a decision and act on it.
///
/// # Thread Safety
///
/// - Uses [`DashMap`](dashmap::DashMap) for concurrent key access
/// - The decision and the recording happen under the key's shard lock, so two
///   callers can never both take the last slot of a window
///
/// # Memory growth
///
/// - Keys are not removed automatically
/// - Call [`cleanup`](Self::cleanup) or start
///   [`run_cleanup_loop`](Self::run_cleanup_loop) to drop idle keys
pub struct KeyedRateLimiter {
    options: KeyedRateLimiterOptions,
    windows: DashMap<String, ExecutionWindow>,
    cleanup_generation: AtomicU64,
}

impl KeyedRateLimiter {
    /// Create an empty keyed limiter.
    pub fn new(options: KeyedRateLimiterOptions) -> Self {
        Self {
            options,
            windows: DashMap::new(),
            cleanup_generation: AtomicU64::new(0),
        }
    } // end constructor

    /// Check admission for `key` and, if allowed, record it.
    pub fn try_acquire(&self, key: &str) -> RateLimitDecision {
        let now = self.options.clock.now_ms();
        let mut window = self.windows.entry(key.to_string()).or_default();

        let decision = window.decide(
            now,
            self.options.limit,
            self.options.window,
            self.options.window_type,
        );
        if decision.is_allowed() {
            window.record(now);
        }

        tracing::trace!(key, ?decision, "keyed rate limiter decision");
        decision
    } // end method try_acquire

    /// Check admission for `key` without recording anything.
    ///
    /// Unknown keys are allowed.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        let now = self.options.clock.now_ms();
        let Some(mut window) = self.windows.get_mut(key) else {
            return RateLimitDecision::Allowed;
        };

        window.decide(
            now,
            self.options.limit,
            self.options.window,
            self.options.window_type,
        )
    }

    /// Admissions left in the current window of `key`.
    pub fn remaining_in_window(&self, key: &str) -> u64 {
        let now = self.options.clock.now_ms();
        match self.windows.get_mut(key) {
            None => *self.options.limit,
            Some(mut window) => window.remaining(
                now,
                self.options.limit,
                self.options.window,
                self.options.window_type,
            ),
        }
    }

    /// Milliseconds until `key` would be admitted again.
    pub fn ms_until_next_window(&self, key: &str) -> u64 {
        let now = self.options.clock.now_ms();
        match self.windows.get_mut(key) {
            None => 0,
            Some(mut window) => window.ms_until_next(
                now,
                self.options.limit,
                self.options.window,
                self.options.window_type,
            ),
        }
    }

    /// Forget everything recorded for `key`.
    pub fn reset(&self, key: &str) {
        self.windows.remove(key);
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop keys whose last admission is older than `stale_after`, or whose
    /// window has fully expired.
    pub fn cleanup(&self, stale_after: Duration) {
        let now = self.options.clock.now_ms();
        let stale_after_ms = u64::try_from(stale_after.as_millis()).unwrap_or(u64::MAX);

        self.windows.retain(|_, window| {
            window.prune(now, self.options.window, self.options.window_type);
            match window.last_execution() {
                None => false,
                Some(last) if now.saturating_sub(last) > stale_after_ms => false,
                Some(_) => !window.is_empty(),
            }
        });
    } // end method cleanup

    /// Periodically run [`cleanup`](Self::cleanup) on the async runtime.
    ///
    /// The loop holds a weak reference and ends on its own once the limiter is
    /// dropped. Starting a new loop replaces any loop already running.
    pub fn run_cleanup_loop(self: &Arc<Self>, interval: Duration, stale_after: Duration) {
        let generation = self.cleanup_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let limiter: Weak<Self> = Arc::downgrade(self);

        runtime::spawn_task(async move {
            let mut interval = runtime::new_interval(interval);

            loop {
                runtime::tick(&mut interval).await;

                let Some(limiter) = limiter.upgrade() else {
                    break;
                };

                if limiter.cleanup_generation.load(Ordering::SeqCst) != generation {
                    break;
                }

                limiter.cleanup(stale_after);
                tracing::trace!(keys = limiter.len(), "keyed rate limiter cleanup tick");
            }
        });
    } // end method run_cleanup_loop

    /// Stop the loop started by [`run_cleanup_loop`](Self::run_cleanup_loop).
    ///
    /// Idempotent.
    pub fn stop_cleanup_loop(&self) {
        self.cleanup_generation.fetch_add(1, Ordering::SeqCst);
    }
}
