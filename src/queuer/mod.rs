//! Concurrency-bounded async work queue.
//!
//! [`AsyncQueuer`] holds pending items in FIFO, LIFO or priority order and
//! runs at most `concurrency` of them at a time. A bounded queue refuses new
//! items once full instead of growing without limit.
//!
//! Queued work can be paced further with `wait` (a delay between claims),
//! dropped after `expiration`, or retried through a per-item
//! [`AsyncRetryer`](crate::AsyncRetryer).

mod async_queuer;
pub use async_queuer::*;

mod queue_item;
pub use queue_item::{QueueItem, QueueOrder, QueuePosition};
pub(crate) use queue_item::PendingItems;

mod queuer_options;
pub use queuer_options::*;
