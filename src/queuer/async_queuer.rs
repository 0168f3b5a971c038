use std::{
    any::Any,
    fmt::Display,
    future::Future,
    mem,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::{
    FutureExt,
    channel::oneshot,
    future::BoxFuture,
};

use crate::{
    AsyncQueuerOptions, AsyncQueuerState, AsyncRetryer, Concurrency, ExecutionError, QueueItem,
    QueuePosition, QueuerStatus, RejectionError, RetryerState, Store,
    queuer::PendingItems,
    retry::RetryFn,
    runtime,
    store::lock,
};

/// Concurrency-bounded queue of async work.
///
/// Items are added with [`add_item`](Self::add_item) and dispatched, in the
/// order set by [`QueueOrder`](crate::QueueOrder), to up to `concurrency`
/// workers at a time. Each worker runs the processor on one item (through a
/// fresh [`AsyncRetryer`] when retry options are set), records the outcome and
/// immediately claims the next item.
///
/// # Semantics & Limitations
///
/// - **Backpressure:** `add_item` returns `false` once `max_size` items are
///   pending. Executing items do not count toward `max_size`.
/// - **Dispatch order only:** items are *started* in queue order; with
///   `concurrency > 1` they may *finish* in any order.
/// - **No forced cancellation:** [`stop`](Self::stop) and
///   [`clear`](Self::clear) never abort executing items; they only affect what
///   is dispatched next.
/// - **Error isolation:** a failing or panicking item is counted and reported,
///   and never blocks the items after it.
/// - **Runtime:** dispatch spawns tasks, so items must be added from within the
///   async runtime selected by the crate features.
///
/// Dropping the queuer stops dispatch; items already executing still finish.
pub struct AsyncQueuer<T, R, E> {
    inner: Arc<QueuerInner<T, R, E>>,
}

struct QueuerInner<T, R, E> {
    process: RetryFn<T, R, E>,
    options: AsyncQueuerOptions<T, R, E>,
    state: Mutex<QueueState<T>>,
    concurrency: AtomicUsize,
    wait_ms: AtomicU64,
    success_count: AtomicU64,
    error_count: AtomicU64,
    rejection_count: AtomicU64,
    settle_count: AtomicU64,
    expiration_count: AtomicU64,
    retry_store: Arc<Store<RetryerState>>,
    store: Store<AsyncQueuerState<T>>,
}

struct QueueState<T> {
    pending: PendingItems<T>,
    active: Vec<(u64, QueueItem<T>)>,
    started: bool,
    shut_down: bool,
    /// A delayed claim is scheduled; nothing else may claim until it runs.
    pending_tick: bool,
    flushing: usize,
    idle_waiters: Vec<oneshot::Sender<()>>,
    next_id: u64,
}

impl<T> QueueState<T> {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    fn claim(&mut self, position: QueuePosition, prioritized: bool) -> Option<(u64, QueueItem<T>)>
    where
        T: Clone,
    {
        let item = self.pending.take(position, prioritized)?;
        let id = self.next_id;
        self.next_id += 1;
        self.active.push((id, item.clone()));
        Some((id, item))
    }
}

impl<T, R, E> AsyncQueuer<T, R, E>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    E: Display + Send + 'static,
{
    /// Create a queuer that runs `process` on every dispatched item.
    ///
    /// If `started` is set and there are initial items, dispatch begins
    /// immediately, which requires a running async runtime.
    pub fn new<F, Fut>(process: F, mut options: AsyncQueuerOptions<T, R, E>) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let process: RetryFn<T, R, E> =
            Arc::new(move |value| -> BoxFuture<'static, Result<R, E>> { Box::pin(process(value)) });

        let now = options.clock.now_ms();
        let initial_state = options.initial_state.take();
        let initial_items = mem::take(&mut options.initial_items);

        let (saved_items, counters): (Vec<QueueItem<T>>, [u64; 5]) = match initial_state {
            Some(saved) => (
                saved.active_items.into_iter().chain(saved.items).collect(),
                [
                    saved.success_count,
                    saved.error_count,
                    saved.rejection_count,
                    saved.settle_count,
                    saved.expiration_count,
                ],
            ),
            None => (Vec::new(), [0u64; 5]),
        };
        let fresh_items = initial_items.into_iter().map(|value| QueueItem {
            value,
            enqueued_at: now,
            priority: None,
        });

        let mut pending = PendingItems::new();
        let mut rejected = Vec::new();
        for item in saved_items.into_iter().chain(fresh_items) {
            if options
                .max_size
                .is_some_and(|max_size| pending.len() >= max_size)
            {
                rejected.push(item.value);
                continue;
            }

            let priority = options.order.priority_of(&item.value);
            pending.insert(QueueItem { priority, ..item }, options.order.add_position());
        }
        let started = options.started;
        let has_items = !pending.is_empty();
        let [success, error, rejection, settle, expiration] = counters;
        let rejection = rejection + rejected.len() as u64;

        let inner = Arc::new(QueuerInner {
            process,
            concurrency: AtomicUsize::new(*options.concurrency),
            wait_ms: AtomicU64::new(duration_ms(options.wait)),
            state: Mutex::new(QueueState {
                pending,
                active: Vec::new(),
                started,
                shut_down: false,
                pending_tick: false,
                flushing: 0,
                idle_waiters: Vec::new(),
                next_id: 0,
            }),
            options,
            success_count: AtomicU64::new(success),
            error_count: AtomicU64::new(error),
            rejection_count: AtomicU64::new(rejection),
            settle_count: AtomicU64::new(settle),
            expiration_count: AtomicU64::new(expiration),
            retry_store: Arc::new(Store::new(RetryerState::default())),
            store: Store::new(AsyncQueuerState {
                items: Vec::new(),
                active_items: Vec::new(),
                status: QueuerStatus::Stopped,
                concurrency: 1,
                success_count: 0,
                error_count: 0,
                rejection_count: 0,
                settle_count: 0,
                expiration_count: 0,
                size: 0,
                is_empty: true,
                is_full: false,
                is_idle: true,
                is_running: false,
            }),
        });

        inner.publish();
        if !rejected.is_empty() {
            tracing::debug!(
                rejected = rejected.len(),
                max_size = ?inner.options.max_size,
                "initial items over capacity rejected"
            );
            if let Some(on_reject) = &inner.options.on_reject {
                for item in &rejected {
                    on_reject(item);
                }
            }
        }
        if started && has_items {
            inner.tick();
        }

        Self { inner }
    } // end constructor

    /// Add `item` at the position given by the queue order.
    ///
    /// Returns `false` (and calls `on_reject`) if `max_size` items are already
    /// pending; the pending items are left untouched.
    pub fn add_item(&self, item: T) -> bool {
        let position = self.inner.options.order.add_position();
        self.add_item_at(item, position)
    }

    /// Add `item` at `position`. The position is ignored under a priority order.
    pub fn add_item_at(&self, item: T, position: QueuePosition) -> bool {
        self.try_add_item_at(item, position).is_ok()
    }

    /// Like [`add_item`](Self::add_item), but reports why an item was refused.
    pub fn try_add_item(&self, item: T) -> Result<(), RejectionError> {
        let position = self.inner.options.order.add_position();
        self.try_add_item_at(item, position)
    }

    /// Like [`add_item_at`](Self::add_item_at), but reports why an item was
    /// refused.
    pub fn try_add_item_at(&self, item: T, position: QueuePosition) -> Result<(), RejectionError> {
        let inner = &self.inner;
        let now = inner.options.clock.now_ms();
        let priority = inner.options.order.priority_of(&item);

        {
            let mut state = lock(&inner.state);
            let is_full = inner
                .options
                .max_size
                .is_some_and(|max_size| state.pending.len() >= max_size);

            if !is_full {
                state.pending.insert(
                    QueueItem {
                        value: item,
                        enqueued_at: now,
                        priority,
                    },
                    position,
                );
                drop(state);

                inner.publish();
                inner.tick();
                return Ok(());
            }
        }

        inner.rejection_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(max_size = ?inner.options.max_size, "queue full, item rejected");
        inner.publish();

        if let Some(on_reject) = &inner.options.on_reject {
            on_reject(&item);
        }

        Err(RejectionError::QueueFull {
            max_size: inner.options.max_size.unwrap_or_default(),
        })
    } // end method try_add_item_at

    /// Remove and return the next pending item without executing it.
    pub fn get_next_item(&self, position: Option<QueuePosition>) -> Option<T> {
        let position = position.unwrap_or_else(|| self.inner.options.order.take_position());
        let item = lock(&self.inner.state)
            .pending
            .take(position, self.inner.is_prioritized())?;

        self.inner.publish();
        self.inner.tick();
        Some(item.value)
    }

    /// Claim the next pending item and execute it in the caller's task.
    ///
    /// The item occupies a concurrency slot while it runs. Returns `None` when
    /// nothing is pending or every slot is busy.
    pub async fn execute_next(
        &self,
        position: Option<QueuePosition>,
    ) -> Option<Result<R, ExecutionError<E>>> {
        let inner = &self.inner;
        let position = position.unwrap_or_else(|| inner.options.order.take_position());

        let (id, item) = {
            let mut state = lock(&inner.state);
            if state.active.len() >= inner.concurrency.load(Ordering::Relaxed) {
                return None;
            }
            state.claim(position, inner.is_prioritized())?
        };

        inner.publish();
        let result = inner.execute_value(item.value.clone()).await;
        inner.settle(id, &item.value, &result);
        inner.tick();

        Some(result)
    } // end method execute_next

    /// Resume dispatch.
    pub fn start(&self) {
        lock(&self.inner.state).started = true;
        self.inner.publish();
        self.inner.tick();
    }

    /// Stop dispatching new items. Executing items run to completion.
    pub fn stop(&self) {
        lock(&self.inner.state).started = false;
        self.inner.publish();
    }

    /// Drop every pending item. Executing items are not affected.
    pub fn clear(&self) {
        let cleared = lock(&self.inner.state).pending.clear();
        tracing::debug!(cleared, "queue cleared");
        self.inner.publish();
        self.inner.tick();
    }

    /// Drop pending items and zero every counter. Configuration is kept and
    /// executing items are not affected.
    pub fn reset(&self) {
        let inner = &self.inner;
        lock(&inner.state).pending.clear();

        for counter in [
            &inner.success_count,
            &inner.error_count,
            &inner.rejection_count,
            &inner.settle_count,
            &inner.expiration_count,
        ] {
            counter.store(0, Ordering::Relaxed);
        }

        inner.publish();
        inner.tick();
    }

    /// Dispatch everything pending, even while stopped and ignoring `wait`, and
    /// resolve once nothing is pending or executing.
    ///
    /// Concurrency still applies. The queuer's started/stopped status is left
    /// unchanged.
    pub async fn flush(&self) {
        let inner = &self.inner;
        let idle = {
            let mut state = lock(&inner.state);
            if state.is_idle() || state.shut_down {
                return;
            }

            state.flushing += 1;
            state.idle_waiters.retain(|waiter| !waiter.is_canceled());
            let (sender, receiver) = oneshot::channel();
            state.idle_waiters.push(sender);
            receiver
        };

        let _flushing = FlushGuard {
            state: &inner.state,
        };
        inner.tick();

        let _ = idle.await;
    } // end method flush

    /// Change the concurrency ceiling. Executing items are not disturbed; new
    /// slots are filled right away.
    pub fn throttle(&self, concurrency: Concurrency) {
        self.inner
            .concurrency
            .store(*concurrency, Ordering::Relaxed);
        tracing::debug!(concurrency = *concurrency, "queue concurrency changed");
        self.inner.publish();
        self.inner.tick();
    }

    /// Change the delay between consecutive claims.
    pub fn set_wait(&self, wait: Duration) {
        self.inner.wait_ms.store(duration_ms(wait), Ordering::Relaxed);
        self.inner.publish();
    }

    /// The next item that would be dispatched.
    pub fn peek_next_item(&self, position: Option<QueuePosition>) -> Option<T> {
        let position = position.unwrap_or_else(|| self.inner.options.order.take_position());
        lock(&self.inner.state)
            .pending
            .peek(position, self.inner.is_prioritized())
            .map(|item| item.value.clone())
    }

    /// All pending items in dispatch order.
    pub fn peek_all_items(&self) -> Vec<T> {
        lock(&self.inner.state)
            .pending
            .iter()
            .map(|item| item.value.clone())
            .collect()
    }

    /// Items currently executing.
    pub fn peek_active_items(&self) -> Vec<T> {
        lock(&self.inner.state)
            .active
            .iter()
            .map(|(_, item)| item.value.clone())
            .collect()
    }

    /// Lifecycle status.
    pub fn status(&self) -> QueuerStatus {
        self.inner.status(&lock(&self.inner.state))
    }

    /// Pending item count.
    pub fn size(&self) -> usize {
        lock(&self.inner.state).pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        lock(&self.inner.state).pending.is_empty()
    }

    /// Whether `max_size` items are pending.
    pub fn is_full(&self) -> bool {
        self.inner.is_full(&lock(&self.inner.state))
    }

    /// Whether nothing is pending or executing.
    pub fn is_idle(&self) -> bool {
        lock(&self.inner.state).is_idle()
    }

    /// Whether dispatch is started.
    pub fn is_running(&self) -> bool {
        lock(&self.inner.state).started
    }

    /// Current concurrency ceiling.
    pub fn concurrency(&self) -> usize {
        self.inner.concurrency.load(Ordering::Relaxed)
    }

    /// Executions that succeeded.
    pub fn success_count(&self) -> u64 {
        self.inner.success_count.load(Ordering::Relaxed)
    }

    /// Executions that failed.
    pub fn error_count(&self) -> u64 {
        self.inner.error_count.load(Ordering::Relaxed)
    }

    /// Items refused because the queue was full.
    pub fn rejection_count(&self) -> u64 {
        self.inner.rejection_count.load(Ordering::Relaxed)
    }

    /// Executions that finished either way.
    pub fn settle_count(&self) -> u64 {
        self.inner.settle_count.load(Ordering::Relaxed)
    }

    /// Items dropped by expiration.
    pub fn expiration_count(&self) -> u64 {
        self.inner.expiration_count.load(Ordering::Relaxed)
    }

    /// Current snapshot.
    pub fn state(&self) -> AsyncQueuerState<T> {
        self.inner.snapshot()
    }

    /// Store publishing a snapshot after every state change.
    pub fn store(&self) -> &Store<AsyncQueuerState<T>> {
        &self.inner.store
    }

    /// Store of the retryer state shared by every item's retryer.
    pub fn retry_store(&self) -> &Store<RetryerState> {
        &self.inner.retry_store
    }

    #[cfg(test)]
    pub(crate) fn idle_waiter_count(&self) -> usize {
        lock(&self.inner.state).idle_waiters.len()
    }
}

impl<T, R, E> Drop for AsyncQueuer<T, R, E> {
    fn drop(&mut self) {
        let mut state = lock(&self.inner.state);
        state.shut_down = true;
        state.started = false;
        state.idle_waiters.clear();
    }
}

impl<T, R, E> QueuerInner<T, R, E>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    E: Display + Send + 'static,
{
    /// Expire stale items and fill free slots.
    fn tick(self: &Arc<Self>) {
        let now = self.options.clock.now_ms();
        let concurrency = self.concurrency.load(Ordering::Relaxed);
        let wait = Duration::from_millis(self.wait_ms.load(Ordering::Relaxed));
        let position = self.options.order.take_position();
        let prioritized = self.is_prioritized();

        let (expired, dispatched, schedule_claim, idle_waiters) = {
            let mut state = lock(&self.state);

            let expired = match self.options.expiration {
                Some(expiration) => match now.checked_sub(duration_ms(expiration)) {
                    Some(cutoff) => state.pending.drain_expired(cutoff),
                    None => Vec::new(),
                },
                None => Vec::new(),
            };

            let flushing = state.flushing > 0;
            let mut dispatched = Vec::new();
            let mut schedule_claim = false;

            if !state.shut_down && (flushing || !state.pending_tick) {
                while (state.started || flushing) && state.active.len() < concurrency {
                    let Some(claimed) = state.claim(position, prioritized) else {
                        break;
                    };
                    dispatched.push(claimed);

                    if !wait.is_zero() && !flushing {
                        state.pending_tick = true;
                        schedule_claim = true;
                        break;
                    }
                }
            }

            let idle_waiters = if state.is_idle() {
                mem::take(&mut state.idle_waiters)
            } else {
                Vec::new()
            };

            (expired, dispatched, schedule_claim, idle_waiters)
        };

        if !expired.is_empty() {
            self.expiration_count
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            tracing::debug!(expired = expired.len(), "expired queued items dropped");
        }

        if !expired.is_empty() || !dispatched.is_empty() {
            self.publish();
        }

        if let Some(on_expire) = &self.options.on_expire {
            for item in &expired {
                on_expire(&item.value);
            }
        }

        for (id, item) in dispatched {
            tracing::debug!(id, concurrency, "dispatching queued item");
            let inner = self.clone();
            runtime::spawn_task(async move {
                let result = inner.execute_value(item.value.clone()).await;
                inner.settle(id, &item.value, &result);
                inner.tick();
            });
        }

        if schedule_claim {
            let inner = self.clone();
            let delay = inner.options.clock.sleep(wait);
            runtime::spawn_task(async move {
                delay.await;
                lock(&inner.state).pending_tick = false;
                inner.tick();
            });
        }

        for waiter in idle_waiters {
            let _ = waiter.send(());
        }
    } // end method tick

    async fn execute_value(&self, value: T) -> Result<R, ExecutionError<E>> {
        let execution = async {
            match &self.options.retry {
                Some(retry) => {
                    AsyncRetryer::with_function(
                        self.process.clone(),
                        retry.clone(),
                        self.retry_store.clone(),
                    )
                    .execute(value)
                    .await
                }
                None => (self.process)(value).await.map_err(ExecutionError::Failed),
            }
        };

        match AssertUnwindSafe(execution).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(%message, "queued item panicked");
                Err(ExecutionError::Panicked { message })
            }
        }
    } // end method execute_value

    /// Record the outcome of the active item `id`.
    fn settle(&self, id: u64, value: &T, result: &Result<R, ExecutionError<E>>) {
        lock(&self.state)
            .active
            .retain(|(active_id, _)| *active_id != id);

        match result {
            Ok(_) => {
                self.success_count.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(id, %error, "queued item failed");
            }
        }
        self.settle_count.fetch_add(1, Ordering::Relaxed);
        self.publish();

        match result {
            Ok(output) => {
                if let Some(on_success) = &self.options.on_success {
                    on_success(output, value);
                }
            }
            Err(error) => {
                if let Some(on_error) = &self.options.on_error {
                    on_error(error, value);
                }
            }
        }

        if let Some(on_settled) = &self.options.on_settled {
            on_settled(value);
        }
    } // end method settle
}

impl<T, R, E> QueuerInner<T, R, E>
where
    T: Clone,
{
    fn is_prioritized(&self) -> bool {
        matches!(self.options.order, crate::QueueOrder::Priority(_))
    }

    fn is_full(&self, state: &QueueState<T>) -> bool {
        self.options
            .max_size
            .is_some_and(|max_size| state.pending.len() >= max_size)
    }

    fn status(&self, state: &QueueState<T>) -> QueuerStatus {
        if !state.started {
            QueuerStatus::Stopped
        } else if state.is_idle() {
            QueuerStatus::Idle
        } else {
            QueuerStatus::Running
        }
    }

    fn snapshot(&self) -> AsyncQueuerState<T> {
        let state = lock(&self.state);

        AsyncQueuerState {
            items: state.pending.iter().cloned().collect(),
            active_items: state.active.iter().map(|(_, item)| item.clone()).collect(),
            status: self.status(&state),
            concurrency: self.concurrency.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            rejection_count: self.rejection_count.load(Ordering::Relaxed),
            settle_count: self.settle_count.load(Ordering::Relaxed),
            expiration_count: self.expiration_count.load(Ordering::Relaxed),
            size: state.pending.len(),
            is_empty: state.pending.is_empty(),
            is_full: self.is_full(&state),
            is_idle: state.is_idle(),
            is_running: state.started,
        }
    }

    fn publish(&self) {
        self.store.replace_with(|| self.snapshot());
    }
}

struct FlushGuard<'a, T> {
    state: &'a Mutex<QueueState<T>>,
}

impl<T> Drop for FlushGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = lock(self.state);
        state.flushing = state.flushing.saturating_sub(1);
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
