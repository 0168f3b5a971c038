use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    Clock, Enabled, Limit, RateLimitDecision, RateLimiterState, WindowMs, WindowType, store::lock,
};

/// Admission timestamps for one limiter (or one key of a keyed limiter).
///
/// # Algorithm
///
/// - **Sliding:** timestamps `<= now - window` are dropped; a call is admitted
///   iff fewer than `limit` remain.
/// - **Fixed:** time is cut into buckets of `window` anchored at the first
///   admission. Crossing into a later bucket clears every timestamp; a call is
///   admitted iff the current bucket holds fewer than `limit`.
///
/// Every query prunes first, so `remaining` and `ms_until_next` always agree
/// with `decide`.
#[derive(Clone, Debug, Default)]
pub(crate) struct ExecutionWindow {
    timestamps: VecDeque<u64>,
    anchor: Option<u64>,
}

impl ExecutionWindow {
    pub(crate) fn from_state(state: &RateLimiterState) -> Self {
        let mut timestamps: Vec<u64> = state.execution_timestamps.clone();
        timestamps.sort_unstable();

        Self {
            timestamps: timestamps.into(),
            anchor: state.window_anchor,
        }
    }

    pub(crate) fn prune(&mut self, now: u64, window: WindowMs, window_type: WindowType) {
        match window_type {
            WindowType::Sliding => {
                let Some(window_start) = now.checked_sub(*window) else {
                    return;
                };

                while let Some(&oldest) = self.timestamps.front()
                    && oldest <= window_start
                {
                    self.timestamps.pop_front();
                }
            }
            WindowType::Fixed => {
                let Some(anchor) = self.anchor else {
                    return;
                };

                if now >= anchor.saturating_add(*window) {
                    let buckets_passed = (now - anchor) / *window;
                    self.anchor = Some(anchor + buckets_passed * *window);
                    self.timestamps.clear();
                }
            }
        }
    } // end method prune

    pub(crate) fn decide(
        &mut self,
        now: u64,
        limit: Limit,
        window: WindowMs,
        window_type: WindowType,
    ) -> RateLimitDecision {
        self.prune(now, window, window_type);

        if (self.timestamps.len() as u64) < *limit {
            return RateLimitDecision::Allowed;
        }

        let remaining_after_waiting = match window_type {
            WindowType::Fixed => *limit,
            WindowType::Sliding => {
                let oldest = self.timestamps.front().copied();
                let expiring = self
                    .timestamps
                    .iter()
                    .take_while(|&&timestamp| Some(timestamp) == oldest)
                    .count() as u64;
                let still_counted = (self.timestamps.len() as u64).saturating_sub(expiring);
                limit.saturating_sub(still_counted)
            }
        };

        RateLimitDecision::Rejected {
            window_ms: *window,
            retry_after_ms: self.ms_until_next(now, limit, window, window_type),
            remaining_after_waiting,
        }
    } // end method decide

    pub(crate) fn record(&mut self, now: u64) {
        if self.anchor.is_none() {
            self.anchor = Some(now);
        }

        // Timestamps stay sorted even if a caller-driven clock is set backwards.
        match self.timestamps.back() {
            Some(&last) if last > now => {
                let index = self.timestamps.partition_point(|&timestamp| timestamp <= now);
                self.timestamps.insert(index, now);
            }
            _ => self.timestamps.push_back(now),
        }
    }

    pub(crate) fn remaining(
        &mut self,
        now: u64,
        limit: Limit,
        window: WindowMs,
        window_type: WindowType,
    ) -> u64 {
        self.prune(now, window, window_type);
        limit.saturating_sub(self.timestamps.len() as u64)
    }

    pub(crate) fn ms_until_next(
        &mut self,
        now: u64,
        limit: Limit,
        window: WindowMs,
        window_type: WindowType,
    ) -> u64 {
        if self.remaining(now, limit, window, window_type) > 0 {
            return 0;
        }

        let window_end = match window_type {
            WindowType::Sliding => self.timestamps.front().copied(),
            WindowType::Fixed => self.anchor,
        };

        window_end
            .map(|start| start.saturating_add(*window).saturating_sub(now))
            .unwrap_or(0)
    }

    pub(crate) fn last_execution(&self) -> Option<u64> {
        self.timestamps.back().copied()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub(crate) fn timestamps(&self) -> Vec<u64> {
        self.timestamps.iter().copied().collect()
    }

    pub(crate) fn anchor(&self) -> Option<u64> {
        self.anchor
    }
}

/// Window configuration plus admission counters shared by the sync and async
/// limiters.
pub(crate) struct AdmissionControl {
    limit: Limit,
    window_ms: WindowMs,
    window_type: WindowType,
    enabled: Enabled,
    clock: Arc<dyn Clock>,
    window: Mutex<ExecutionWindow>,
    execution_count: AtomicU64,
    rejection_count: AtomicU64,
}

impl AdmissionControl {
    pub(crate) fn new(
        limit: Limit,
        window_ms: WindowMs,
        window_type: WindowType,
        enabled: Enabled,
        clock: Arc<dyn Clock>,
        initial_state: Option<&RateLimiterState>,
    ) -> Self {
        let (window, execution_count, rejection_count) = match initial_state {
            Some(state) => (
                ExecutionWindow::from_state(state),
                state.execution_count,
                state.rejection_count,
            ),
            None => (ExecutionWindow::default(), 0, 0),
        };

        Self {
            limit,
            window_ms,
            window_type,
            enabled,
            clock,
            window: Mutex::new(window),
            execution_count: AtomicU64::new(execution_count),
            rejection_count: AtomicU64::new(rejection_count),
        }
    }

    /// Decide and, if admitted, record the admission. Counts rejections.
    pub(crate) fn try_admit(&self) -> RateLimitDecision {
        if !self.enabled.get() {
            tracing::trace!("rate limiter disabled, skipping execution");
            return RateLimitDecision::Disabled;
        }

        let now = self.clock.now_ms();
        let decision = {
            let mut window = lock(&self.window);
            let decision = window.decide(now, self.limit, self.window_ms, self.window_type);
            if decision.is_allowed() {
                window.record(now);
            }
            decision
        };

        match decision {
            RateLimitDecision::Allowed => {
                self.execution_count.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(now, "rate limiter admitted call");
            }
            RateLimitDecision::Rejected { retry_after_ms, .. } => {
                self.rejection_count.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(now, retry_after_ms, "rate limiter rejected call");
            }
            RateLimitDecision::Disabled => {}
        }

        decision
    } // end method try_admit

    /// Decide without recording or counting.
    pub(crate) fn check(&self) -> RateLimitDecision {
        if !self.enabled.get() {
            return RateLimitDecision::Disabled;
        }

        let now = self.clock.now_ms();
        lock(&self.window).decide(now, self.limit, self.window_ms, self.window_type)
    }

    pub(crate) fn remaining_in_window(&self) -> u64 {
        let now = self.clock.now_ms();
        lock(&self.window).remaining(now, self.limit, self.window_ms, self.window_type)
    }

    pub(crate) fn ms_until_next_window(&self) -> u64 {
        let now = self.clock.now_ms();
        lock(&self.window).ms_until_next(now, self.limit, self.window_ms, self.window_type)
    }

    pub(crate) fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::Relaxed)
    }

    pub(crate) fn rejection_count(&self) -> u64 {
        self.rejection_count.load(Ordering::Relaxed)
    }

    pub(crate) fn reset(&self) {
        *lock(&self.window) = ExecutionWindow::default();
        self.execution_count.store(0, Ordering::Relaxed);
        self.rejection_count.store(0, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RateLimiterState {
        let now = self.clock.now_ms();
        let mut window = lock(&self.window);
        window.prune(now, self.window_ms, self.window_type);

        RateLimiterState {
            execution_timestamps: window.timestamps(),
            window_anchor: window.anchor(),
            execution_count: self.execution_count(),
            rejection_count: self.rejection_count(),
            is_exceeded: window.remaining(now, self.limit, self.window_ms, self.window_type) == 0,
        }
    }
}
