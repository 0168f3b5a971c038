use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    Clock, Concurrency, ExecutionError, Handler, QueueItem, QueueOrder, RetryOptions, SystemClock,
};

/// Callback invoked with an execution error and the item that produced it.
pub type ItemErrorHandler<T, E> = Arc<dyn Fn(&ExecutionError<E>, &T) + Send + Sync>;

/// Callback invoked with an execution result and the item that produced it.
pub type ItemSuccessHandler<T, R> = Arc<dyn Fn(&R, &T) + Send + Sync>;

/// Configuration for [`AsyncQueuer`](crate::AsyncQueuer).
pub struct AsyncQueuerOptions<T, R, E> {
    /// Pending capacity. `None` is unbounded. In-flight items do not count.
    pub max_size: Option<usize>,
    /// Items executing at the same time. Adjustable later with `throttle`.
    pub concurrency: Concurrency,
    /// Delay between consecutive claims. Zero claims as fast as slots free up.
    pub wait: Duration,
    /// Whether the queuer dispatches as soon as it is created.
    pub started: bool,
    /// Items queued at construction, in order. Items beyond `max_size` are
    /// rejected the same way `add_item` rejects them.
    pub initial_items: Vec<T>,
    /// Dispatch discipline.
    pub order: QueueOrder<T>,
    /// Pending items older than this are dropped instead of executed.
    pub expiration: Option<Duration>,
    /// When set, every item is executed through a fresh retryer.
    pub retry: Option<RetryOptions<R, E>>,
    /// Called with an item refused because the queue was full.
    pub on_reject: Option<Handler<T>>,
    /// Called when an item's execution fails.
    pub on_error: Option<ItemErrorHandler<T, E>>,
    /// Called when an item's execution succeeds.
    pub on_success: Option<ItemSuccessHandler<T, R>>,
    /// Called after an item's execution ends, either way.
    pub on_settled: Option<Handler<T>>,
    /// Called with an item dropped by `expiration`.
    pub on_expire: Option<Handler<T>>,
    /// Time source for `wait`, expiration and enqueue timestamps.
    pub clock: Arc<dyn Clock>,
    /// Rehydrated state, typically from a [`Persister`](crate::Persister).
    ///
    /// Pending and previously active items are queued again ahead of
    /// `initial_items`, subject to `max_size`, and the counters resume from the
    /// saved values.
    pub initial_state: Option<AsyncQueuerState<T>>,
}

impl<T, R, E> Default for AsyncQueuerOptions<T, R, E> {
    fn default() -> Self {
        Self {
            max_size: None,
            concurrency: Concurrency::default(),
            wait: Duration::ZERO,
            started: true,
            initial_items: Vec::new(),
            order: QueueOrder::default(),
            expiration: None,
            retry: None,
            on_reject: None,
            on_error: None,
            on_success: None,
            on_settled: None,
            on_expire: None,
            clock: SystemClock::shared(),
            initial_state: None,
        }
    }
}

impl<T, R, E> fmt::Debug for AsyncQueuerOptions<T, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncQueuerOptions")
            .field("max_size", &self.max_size)
            .field("concurrency", &self.concurrency)
            .field("wait", &self.wait)
            .field("started", &self.started)
            .field("initial_items", &self.initial_items.len())
            .field("order", &self.order)
            .field("expiration", &self.expiration)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of a queuer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuerStatus {
    /// Started, with nothing pending and nothing executing.
    #[default]
    Idle,
    /// Started, with work pending or executing.
    Running,
    /// Not dispatching. In-flight items still finish.
    Stopped,
}

/// Snapshot of an async queuer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncQueuerState<T> {
    /// Pending items in dispatch order.
    pub items: Vec<QueueItem<T>>,
    /// Items currently executing, in dispatch order.
    pub active_items: Vec<QueueItem<T>>,
    /// Lifecycle status.
    pub status: QueuerStatus,
    /// Current concurrency ceiling.
    pub concurrency: usize,
    /// Executions that succeeded.
    pub success_count: u64,
    /// Executions that failed.
    pub error_count: u64,
    /// Items refused because the queue was full.
    pub rejection_count: u64,
    /// Executions that finished either way.
    pub settle_count: u64,
    /// Items dropped by expiration.
    pub expiration_count: u64,
    /// Pending item count.
    pub size: usize,
    /// Whether nothing is pending.
    pub is_empty: bool,
    /// Whether pending items reached `max_size`.
    pub is_full: bool,
    /// Whether nothing is pending or executing.
    pub is_idle: bool,
    /// Whether dispatch is started.
    pub is_running: bool,
}
