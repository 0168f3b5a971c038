//! Retry with backoff.
//!
//! [`AsyncRetryer`] wraps one async operation and re-runs it after failures,
//! waiting according to a [`Backoff`] schedule with optional jitter, under
//! per-attempt and total time limits.

mod async_retryer;
pub use async_retryer::*;

mod backoff;
pub use backoff::*;

mod retry_options;
pub use retry_options::*;
