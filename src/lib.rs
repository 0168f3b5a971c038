#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod clock;
pub use clock::*;

mod common;
pub use common::*;

mod error;
pub use error::*;

mod queuer;
pub use queuer::*;

mod rate_limiter;
pub use rate_limiter::*;

mod retry;
pub use retry::*;

pub(crate) mod runtime;

mod store;
pub use store::{Persister, Store, SubscriptionId};

#[cfg(test)]
mod tests;
