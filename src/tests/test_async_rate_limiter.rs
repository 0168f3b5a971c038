use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use crate::{
    AsyncRateLimiter, AsyncRateLimiterOptions, Limit, ManualClock, PacingError, RateLimiterOptions,
    RejectionError, WindowMs, WindowType,
};

fn limiter(
    limit: u64,
    clock: &Arc<ManualClock>,
    settled: &Arc<AtomicU32>,
) -> AsyncRateLimiter<u32, u32, String> {
    let limits = RateLimiterOptions::new(
        Limit::try_from(limit).unwrap(),
        WindowMs::try_from(1000u64).unwrap(),
    )
    .with_window_type(WindowType::Sliding)
    .with_clock(clock.clone());

    let counter = settled.clone();
    let mut options = AsyncRateLimiterOptions::new(limits);
    options.on_settled = Some(Arc::new(move || {
        counter.fetch_add(1, Ordering::Relaxed);
    }));

    AsyncRateLimiter::new(
        |n: u32| async move {
            if n == 0 {
                Err("zero".to_string())
            } else {
                Ok(n * 2)
            }
        },
        options,
    )
}

#[tokio::test]
async fn admitted_calls_return_the_function_result() {
    let clock = Arc::new(ManualClock::new());
    let settled = Arc::new(AtomicU32::new(0));
    let limiter = limiter(3, &clock, &settled);

    assert_eq!(limiter.maybe_execute(21).await.unwrap(), 42);

    let error = limiter.maybe_execute(0).await.unwrap_err();
    assert!(matches!(error, PacingError::Execution(ref message) if message == "zero"));
    assert!(!error.is_rejected());

    assert_eq!(limiter.success_count(), 1);
    assert_eq!(limiter.error_count(), 1);
    assert_eq!(limiter.settle_count(), 2);
    assert_eq!(settled.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn rejected_calls_do_not_run_or_settle() {
    let clock = Arc::new(ManualClock::new());
    let settled = Arc::new(AtomicU32::new(0));
    let limiter = limiter(1, &clock, &settled);

    assert!(limiter.maybe_execute(1).await.is_ok());
    clock.advance_ms(400);

    let error = limiter.maybe_execute(1).await.unwrap_err();
    assert!(error.is_rejected());
    assert!(matches!(
        error,
        PacingError::Rejected(RejectionError::RateLimited { retry_after })
            if retry_after.as_millis() == 600
    ));

    assert_eq!(limiter.execution_count(), 1);
    assert_eq!(limiter.rejection_count(), 1);
    assert_eq!(limiter.settle_count(), 1);
    assert_eq!(settled.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn failed_executions_still_consume_the_window() {
    let clock = Arc::new(ManualClock::new());
    let settled = Arc::new(AtomicU32::new(0));
    let limiter = limiter(2, &clock, &settled);

    assert!(limiter.maybe_execute(0).await.is_err());
    assert!(limiter.maybe_execute(0).await.is_err());
    assert_eq!(limiter.remaining_in_window(), 0);
    assert!(limiter.maybe_execute(5).await.unwrap_err().is_rejected());
}

#[tokio::test]
async fn state_and_reset() {
    let clock = Arc::new(ManualClock::new());
    let settled = Arc::new(AtomicU32::new(0));
    let limiter = limiter(2, &clock, &settled);

    limiter.maybe_execute(1).await.unwrap();
    let state = limiter.state();
    assert_eq!(state.window.execution_count, 1);
    assert_eq!(state.success_count, 1);
    assert!(!state.is_executing);
    assert_eq!(limiter.store().state(), state);

    limiter.reset();
    let state = limiter.state();
    assert_eq!(state.window.execution_count, 0);
    assert_eq!(state.success_count, 0);
    assert_eq!(state.settle_count, 0);
    assert_eq!(limiter.remaining_in_window(), 2);
}

#[tokio::test]
async fn saved_state_restores_window_and_outcome_counters() {
    let clock = Arc::new(ManualClock::new());
    let settled = Arc::new(AtomicU32::new(0));
    let first = limiter(2, &clock, &settled);

    first.maybe_execute(1).await.unwrap();
    assert!(first.maybe_execute(0).await.is_err());
    let saved = first.state();

    let limits = RateLimiterOptions::new(
        Limit::try_from(2u64).unwrap(),
        WindowMs::try_from(1000u64).unwrap(),
    )
    .with_window_type(WindowType::Sliding)
    .with_clock(clock.clone());
    let restored: AsyncRateLimiter<u32, u32, String> = AsyncRateLimiter::new(
        |n: u32| async move { Ok(n) },
        AsyncRateLimiterOptions {
            initial_state: Some(saved.clone()),
            ..AsyncRateLimiterOptions::new(limits)
        },
    );

    assert_eq!(restored.state(), saved);
    assert_eq!(restored.store().state(), saved);
    assert_eq!(restored.success_count(), 1);
    assert_eq!(restored.error_count(), 1);
    assert_eq!(restored.settle_count(), 2);
    assert_eq!(restored.remaining_in_window(), 0);
    assert!(restored.maybe_execute(3).await.unwrap_err().is_rejected());
}
