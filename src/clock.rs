//! Time source injected into every component.
//!
//! Components never read ambient time directly. They ask their [`Clock`] for the
//! current instant (in milliseconds since the clock's epoch) and for delays, so
//! tests can substitute a [`ManualClock`] or run under a paused runtime.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::{
    FutureExt,
    channel::oneshot,
    future::{self, BoxFuture},
};

use crate::{runtime, store::lock};

/// Source of "now" and of delayed wake-ups.
pub trait Clock: Send + Sync + 'static {
    /// Milliseconds elapsed since this clock's epoch. Monotonic.
    fn now_ms(&self) -> u64;

    /// A future that completes after `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Clock backed by the async runtime's timer.
///
/// Under the `tokio` feature this follows tokio's clock, so
/// `#[tokio::test(start_paused = true)]` makes it deterministic.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: runtime::Instant,
}

impl SystemClock {
    /// Create a clock whose epoch is the current instant.
    pub fn new() -> Self {
        Self {
            epoch: runtime::Instant::now(),
        }
    }

    /// A shared handle to a fresh system clock.
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(runtime::sleep(duration))
    }
}

/// Virtual clock that only moves when told to.
///
/// `sleep` on a manual clock registers a sleeper that stays pending until
/// [`advance`](Self::advance), [`advance_ms`](Self::advance_ms) or
/// [`set_ms`](Self::set_ms) moves the reading to or past its deadline. Creating
/// a sleeper never moves the clock.
///
/// [`advance_to_next_deadline`](Self::advance_to_next_deadline) jumps straight
/// to the earliest pending deadline, which lets a test step through backoff
/// delays without knowing them in advance.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
    /// Deadline and wake-up of every pending sleeper. Also serializes moves of
    /// the reading so no sleeper is registered against a stale `now`.
    sleepers: Mutex<Vec<(u64, oneshot::Sender<()>)>>,
}

impl ManualClock {
    /// Create a clock reading `0`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock reading `now_ms`.
    pub fn starting_at(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
            sleepers: Mutex::new(Vec::new()),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.advance_ms(millis);
    }

    /// Move the clock forward by `millis`.
    pub fn advance_ms(&self, millis: u64) {
        let mut sleepers = lock(&self.sleepers);
        let now = self.now_ms.load(Ordering::SeqCst).saturating_add(millis);
        self.now_ms.store(now, Ordering::SeqCst);
        wake_due(&mut sleepers, now);
    }

    /// Set the absolute reading. Moving backwards wakes nobody.
    pub fn set_ms(&self, now_ms: u64) {
        let mut sleepers = lock(&self.sleepers);
        self.now_ms.store(now_ms, Ordering::SeqCst);
        wake_due(&mut sleepers, now_ms);
    }

    /// Move the reading to the earliest pending sleeper's deadline and wake it.
    ///
    /// Returns `false`, leaving the clock untouched, when nobody is sleeping.
    pub fn advance_to_next_deadline(&self) -> bool {
        let mut sleepers = lock(&self.sleepers);
        sleepers.retain(|(_, waker)| !waker.is_canceled());

        let Some(deadline) = sleepers.iter().map(|(deadline, _)| *deadline).min() else {
            return false;
        };

        let now = self.now_ms.load(Ordering::SeqCst).max(deadline);
        self.now_ms.store(now, Ordering::SeqCst);
        wake_due(&mut sleepers, now);
        true
    }

    /// Sleepers still waiting for the clock to reach their deadline.
    pub fn sleeper_count(&self) -> usize {
        let mut sleepers = lock(&self.sleepers);
        sleepers.retain(|(_, waker)| !waker.is_canceled());
        sleepers.len()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Box::pin(future::ready(()));
        }

        let mut sleepers = lock(&self.sleepers);
        let deadline = self.now_ms.load(Ordering::SeqCst).saturating_add(millis);
        sleepers.retain(|(_, waker)| !waker.is_canceled());
        let (waker, woken) = oneshot::channel();
        sleepers.push((deadline, waker));

        // A dropped clock cancels the channel, which also ends the sleep.
        Box::pin(woken.map(|_| ()))
    }
}

fn wake_due(sleepers: &mut Vec<(u64, oneshot::Sender<()>)>, now: u64) {
    let mut index = 0;
    while index < sleepers.len() {
        if sleepers[index].0 <= now {
            let (_, waker) = sleepers.swap_remove(index);
            let _ = waker.send(());
        } else {
            index += 1;
        }
    }
}
