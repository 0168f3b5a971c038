//! Windowed rate limiting.
//!
//! Admission control over the timestamps of past admissions. Every limiter in
//! this module shares the same window logic, so the admission decision and the
//! `remaining_in_window` / `ms_until_next_window` queries always agree.
//!
//! # Limiters
//!
//! - [`RateLimiter`]: wraps a synchronous function, returns `bool`
//! - [`AsyncRateLimiter`]: wraps an async function, returns a `Result`
//! - [`KeyedRateLimiter`]: one window per key, decision only
//!
//! # Window types
//!
//! - [`WindowType::Fixed`](crate::WindowType::Fixed): burst-then-silence buckets
//!   anchored at the first admission
//! - [`WindowType::Sliding`](crate::WindowType::Sliding): a rolling window with
//!   no reset cliff
//!
//! # When to Use
//!
//! ✅ **Use these limiters when:**
//! - Protecting a downstream API or render path within one process
//! - Deterministic tests need an injected clock
//!
//! ❌ **Don't use them when:**
//! - Several processes must share one limit (state is in-memory only)
//! - Limits must survive restarts without a [`Persister`](crate::Persister)

mod async_rate_limiter;
pub use async_rate_limiter::*;

pub(crate) mod execution_window;

mod keyed_rate_limiter;
pub use keyed_rate_limiter::*;

mod rate_limiter_options;
pub use rate_limiter_options::*;

mod window_rate_limiter;
pub use window_rate_limiter::*;
