mod test_execution_window;
mod test_rate_limiter;

#[cfg(feature = "tokio")]
mod support;
#[cfg(feature = "tokio")]
mod test_async_rate_limiter;
#[cfg(feature = "tokio")]
mod test_keyed_rate_limiter;
