use std::{collections::VecDeque, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

/// End of the queue an item is added to or taken from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePosition {
    /// The head of the queue.
    Front,
    /// The tail of the queue.
    Back,
}

/// Dispatch discipline, fixed at construction.
pub enum QueueOrder<T> {
    /// First in, first out. Items are added at the back and taken from the front.
    Fifo,
    /// Last in, first out. Items are added at the back and taken from the back.
    Lifo,
    /// Ascending priority. Items with equal priority keep insertion order.
    ///
    /// Positions passed to `add_item_at` / `get_next_item` are ignored.
    Priority(Arc<dyn Fn(&T) -> i64 + Send + Sync>),
}

impl<T> QueueOrder<T> {
    /// Priority discipline keyed by `get_priority`.
    pub fn priority<F>(get_priority: F) -> Self
    where
        F: Fn(&T) -> i64 + Send + Sync + 'static,
    {
        QueueOrder::Priority(Arc::new(get_priority))
    }

    pub(crate) fn add_position(&self) -> QueuePosition {
        QueuePosition::Back
    }

    pub(crate) fn take_position(&self) -> QueuePosition {
        match self {
            QueueOrder::Lifo => QueuePosition::Back,
            QueueOrder::Fifo | QueueOrder::Priority(_) => QueuePosition::Front,
        }
    }

    pub(crate) fn priority_of(&self, value: &T) -> Option<i64> {
        match self {
            QueueOrder::Priority(get_priority) => Some(get_priority(value)),
            QueueOrder::Fifo | QueueOrder::Lifo => None,
        }
    }
}

impl<T> Default for QueueOrder<T> {
    fn default() -> Self {
        QueueOrder::Fifo
    }
}

impl<T> Clone for QueueOrder<T> {
    fn clone(&self) -> Self {
        match self {
            QueueOrder::Fifo => QueueOrder::Fifo,
            QueueOrder::Lifo => QueueOrder::Lifo,
            QueueOrder::Priority(get_priority) => QueueOrder::Priority(get_priority.clone()),
        }
    }
}

impl<T> fmt::Debug for QueueOrder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueOrder::Fifo => f.write_str("Fifo"),
            QueueOrder::Lifo => f.write_str("Lifo"),
            QueueOrder::Priority(_) => f.write_str("Priority"),
        }
    }
}

/// A value waiting in (or claimed from) a queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem<T> {
    /// The queued value.
    pub value: T,
    /// Clock reading when the item was added.
    pub enqueued_at: u64,
    /// Priority under [`QueueOrder::Priority`].
    pub priority: Option<i64>,
}

/// Pending items kept in dispatch order.
pub(crate) struct PendingItems<T> {
    items: VecDeque<QueueItem<T>>,
}

impl<T> PendingItems<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub(crate) fn insert(&mut self, item: QueueItem<T>, position: QueuePosition) {
        if let Some(priority) = item.priority {
            // Stable: an equal priority goes after every existing one.
            let index = self
                .items
                .partition_point(|queued| queued.priority.unwrap_or(i64::MIN) <= priority);
            self.items.insert(index, item);
            return;
        }

        match position {
            QueuePosition::Front => self.items.push_front(item),
            QueuePosition::Back => self.items.push_back(item),
        }
    }

    pub(crate) fn take(&mut self, position: QueuePosition, prioritized: bool) -> Option<QueueItem<T>> {
        match (prioritized, position) {
            (true, _) | (false, QueuePosition::Front) => self.items.pop_front(),
            (false, QueuePosition::Back) => self.items.pop_back(),
        }
    }

    pub(crate) fn peek(&self, position: QueuePosition, prioritized: bool) -> Option<&QueueItem<T>> {
        match (prioritized, position) {
            (true, _) | (false, QueuePosition::Front) => self.items.front(),
            (false, QueuePosition::Back) => self.items.back(),
        }
    }

    /// Remove items added before `cutoff`, returning them in dispatch order.
    pub(crate) fn drain_expired(&mut self, cutoff: u64) -> Vec<QueueItem<T>> {
        if !self.items.iter().any(|item| item.enqueued_at < cutoff) {
            return Vec::new();
        }

        let (expired, kept): (Vec<_>, Vec<_>) = self
            .items
            .drain(..)
            .partition(|item| item.enqueued_at < cutoff);
        self.items = kept.into();
        expired
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &QueueItem<T>> {
        self.items.iter()
    }

    pub(crate) fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        cleared
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
