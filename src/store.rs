//! Observable state snapshots.
//!
//! Every component publishes a plain, `serde`-serializable snapshot of its state
//! to a [`Store`]. Observers (framework bindings, devtools, persistence) subscribe
//! to the store; components never depend on who is listening.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    thread,
};

type Listener<S> = Arc<dyn Fn(&S) + Send + Sync>;

/// Handle returned by [`Store::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Loads and saves component state across sessions.
///
/// Implemented outside this crate (local storage, files, databases...). Pair
/// [`Persister::load_state`] with a component's `initial_state` option and
/// [`Store::attach_persister`] to keep the saved copy current.
pub trait Persister<S>: Send + Sync {
    /// Previously saved state, if any.
    fn load_state(&self) -> Option<S>;

    /// Save the latest state.
    fn save_state(&self, state: &S);
}

/// Holds the latest snapshot and notifies subscribers when it changes.
///
/// Snapshots are committed one at a time and reach listeners in commit order,
/// so the last snapshot a listener (or an attached [`Persister`]) sees is always
/// the store's current state.
pub struct Store<S> {
    state: Mutex<Published<S>>,
    listeners: Mutex<Vec<(SubscriptionId, Listener<S>)>>,
    next_id: AtomicU64,
}

struct Published<S> {
    current: S,
    /// Committed snapshots not yet handed to listeners, oldest first.
    undelivered: VecDeque<S>,
    /// Some thread is draining `undelivered`.
    delivering: bool,
}

impl<S: Clone> Store<S> {
    pub(crate) fn new(initial: S) -> Self {
        Self {
            state: Mutex::new(Published {
                current: initial,
                undelivered: VecDeque::new(),
                delivering: false,
            }),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// A copy of the current snapshot.
    pub fn state(&self) -> S {
        lock(&self.state).current.clone()
    }

    /// Register `listener`, called with every new snapshot.
    ///
    /// Listeners run synchronously, without any lock held, on a thread that
    /// changed the state. When several threads publish at once, one of them
    /// delivers every snapshot in commit order.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.listeners).push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Save every new snapshot through `persister`.
    pub fn attach_persister(&self, persister: Arc<dyn Persister<S>>) -> SubscriptionId
    where
        S: 'static,
    {
        self.subscribe(move |state| persister.save_state(state))
    }

    /// Replace the snapshot and notify listeners.
    #[cfg(test)]
    pub(crate) fn set(&self, state: S) {
        self.replace_with(|| state);
    }

    /// Replace the snapshot with the one `snapshot` builds and notify
    /// listeners. Returns the new snapshot.
    ///
    /// `snapshot` runs inside the commit lock, so snapshots built by concurrent
    /// publishers are committed in the order they were taken.
    pub(crate) fn replace_with(&self, snapshot: impl FnOnce() -> S) -> S {
        self.commit(|published| {
            published.current = snapshot();
        })
    }

    /// Mutate the snapshot in place and notify listeners.
    pub(crate) fn update(&self, f: impl FnOnce(&mut S)) {
        self.commit(|published| f(&mut published.current));
    }

    fn commit(&self, change: impl FnOnce(&mut Published<S>)) -> S {
        let (committed, deliver) = {
            let mut published = lock(&self.state);
            change(&mut published);

            let committed = published.current.clone();
            published.undelivered.push_back(committed.clone());
            let deliver = !published.delivering;
            published.delivering = true;
            (committed, deliver)
        };

        if deliver {
            self.deliver();
        }
        committed
    }

    fn deliver(&self) {
        let _delivering = DeliveryGuard { store: self };

        loop {
            let next = {
                let mut published = lock(&self.state);
                let next = published.undelivered.pop_front();
                if next.is_none() {
                    published.delivering = false;
                }
                next
            };
            let Some(state) = next else {
                return;
            };

            let listeners: Vec<Listener<S>> = lock(&self.listeners)
                .iter()
                .map(|(_, listener)| listener.clone())
                .collect();

            for listener in listeners {
                listener(&state);
            }
        }
    }
}

/// Hands delivery back if a listener panics, so later snapshots still go out.
struct DeliveryGuard<'a, S> {
    store: &'a Store<S>,
}

impl<S> Drop for DeliveryGuard<'_, S> {
    fn drop(&mut self) {
        if thread::panicking() {
            let mut published = lock(&self.store.state);
            published.undelivered.clear();
            published.delivering = false;
        }
    }
}

/// Lock a mutex, recovering the guard if a panicking thread poisoned it.
///
/// Guarded state in this crate is consistent between statements, so a poisoned
/// lock carries no broken invariant.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
