use std::{future::Future, time::Duration};

#[cfg(not(any(feature = "tokio", feature = "smol")))]
compile_error!("tempora requires either the `tokio` or the `smol` feature");

#[cfg(feature = "tokio")]
pub(crate) type Instant = tokio::time::Instant;

#[cfg(all(feature = "smol", not(feature = "tokio")))]
pub(crate) type Instant = std::time::Instant;

#[cfg(feature = "tokio")]
pub(crate) type Interval = tokio::time::Interval;

#[cfg(all(feature = "smol", not(feature = "tokio")))]
pub(crate) type Interval = smol::Timer;

#[cfg(feature = "tokio")]
pub(crate) fn new_interval(period: Duration) -> Interval {
    tokio::time::interval(period)
}

#[cfg(all(feature = "smol", not(feature = "tokio")))]
pub(crate) fn new_interval(period: Duration) -> Interval {
    smol::Timer::interval(period)
}

#[cfg(feature = "tokio")]
pub(crate) async fn tick(interval: &mut Interval) {
    interval.tick().await;
}

#[cfg(all(feature = "smol", not(feature = "tokio")))]
pub(crate) async fn tick(interval: &mut Interval) {
    use futures::StreamExt;
    interval.next().await;
}

/// Spawn a detached task. Must be called from within the runtime.
#[cfg(feature = "tokio")]
pub(crate) fn spawn_task<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(fut);
}

#[cfg(all(feature = "smol", not(feature = "tokio")))]
pub(crate) fn spawn_task<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    smol::spawn(fut).detach();
}

#[cfg(feature = "tokio")]
pub(crate) async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[cfg(all(feature = "smol", not(feature = "tokio")))]
pub(crate) async fn sleep(duration: Duration) {
    smol::Timer::after(duration).await;
}
