use std::{fmt, ops::Deref, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

/// Callback invoked with a borrowed value.
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Callback invoked without arguments.
pub type Notify = Arc<dyn Fn() + Send + Sync>;

/// Maximum number of admissions allowed per window.
///
/// Validated to be at least `1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Limit(u64);

impl Deref for Limit {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for Limit {
    type Error = &'static str;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value < 1 {
            Err("Limit must be at least 1")
        } else {
            Ok(Self(value))
        }
    }
}

/// Window duration in milliseconds.
///
/// Validated to be greater than `0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowMs(u64);

impl WindowMs {
    /// The window as a [`Duration`].
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl Deref for WindowMs {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for WindowMs {
    type Error = &'static str;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err("Window must be greater than 0")
        } else {
            Ok(Self(value))
        }
    }
}

/// Ceiling on the number of items a queuer executes at the same time.
///
/// Validated to be at least `1`. Defaults to `1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Concurrency(usize);

impl Default for Concurrency {
    fn default() -> Self {
        Self(1)
    }
}

impl Deref for Concurrency {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<usize> for Concurrency {
    type Error = &'static str;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        if value < 1 {
            Err("Concurrency must be at least 1")
        } else {
            Ok(Self(value))
        }
    }
}

/// Upper bound on attempts made by a retryer, including the first one.
///
/// Validated to be at least `1`. Defaults to `3`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaxAttempts(u32);

impl Default for MaxAttempts {
    fn default() -> Self {
        Self(3)
    }
}

impl Deref for MaxAttempts {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u32> for MaxAttempts {
    type Error = &'static str;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value < 1 {
            Err("Max attempts must be at least 1")
        } else {
            Ok(Self(value))
        }
    }
}

/// Multiplicative jitter fraction applied to backoff delays.
///
/// A jitter of `0.25` scales each delay by a uniform factor in `[0.75, 1.25]`.
/// Validated to lie within `[0, 1]`. Defaults to `0`.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Jitter(f64);

impl Deref for Jitter {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<f64> for Jitter {
    type Error = &'static str;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !(0f64..=1f64).contains(&value) {
            Err("Jitter must be between 0 and 1")
        } else {
            Ok(Self(value))
        }
    }
}

/// How past admissions are counted against the limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    /// Buckets of `window` milliseconds anchored at the first admission.
    ///
    /// The count resets entirely when a call lands in a new bucket.
    #[default]
    Fixed,
    /// A trailing window of `window` milliseconds that expires admissions one by one.
    Sliding,
}

/// Whether a component currently accepts work.
#[derive(Clone)]
pub enum Enabled {
    /// Fixed flag.
    Static(bool),
    /// Evaluated on every call.
    Dynamic(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl Enabled {
    /// Evaluate the flag.
    pub fn get(&self) -> bool {
        match self {
            Enabled::Static(enabled) => *enabled,
            Enabled::Dynamic(predicate) => predicate(),
        }
    }
}

impl Default for Enabled {
    fn default() -> Self {
        Enabled::Static(true)
    }
}

impl From<bool> for Enabled {
    fn from(value: bool) -> Self {
        Enabled::Static(value)
    }
}

impl fmt::Debug for Enabled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Enabled::Static(enabled) => f.debug_tuple("Static").field(enabled).finish(),
            Enabled::Dynamic(_) => f.debug_tuple("Dynamic").finish_non_exhaustive(),
        }
    }
}

/// Result of an admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The call is admitted.
    Allowed,
    /// The call is rejected.
    ///
    /// Includes best-effort hints for callers that want to communicate backoff.
    Rejected {
        /// Window size used for the decision.
        window_ms: u64,
        /// Milliseconds until the next call would be admitted.
        retry_after_ms: u64,
        /// Admissions available once `retry_after_ms` has elapsed.
        remaining_after_waiting: u64,
    },
    /// The limiter is disabled; nothing was executed or counted.
    Disabled,
}

impl RateLimitDecision {
    /// Whether the decision admits the call.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed)
    }
}
