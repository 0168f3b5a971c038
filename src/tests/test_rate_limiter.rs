use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use crate::{
    Enabled, Limit, ManualClock, RateLimitDecision, RateLimiter, RateLimiterOptions,
    RateLimiterState, RejectionError, WindowMs, WindowType,
};

fn options(
    limit: u64,
    window_ms: u64,
    window_type: WindowType,
    clock: &Arc<ManualClock>,
) -> RateLimiterOptions {
    RateLimiterOptions::new(
        Limit::try_from(limit).unwrap(),
        WindowMs::try_from(window_ms).unwrap(),
    )
    .with_window_type(window_type)
    .with_clock(clock.clone())
}

fn counting_limiter(options: RateLimiterOptions) -> (RateLimiter<()>, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let limiter = RateLimiter::new(
        move |()| {
            counter.fetch_add(1, Ordering::Relaxed);
        },
        options,
    );
    (limiter, calls)
}

#[test]
fn fixed_window_admits_until_limit_then_rejects_until_next_bucket() {
    let clock = Arc::new(ManualClock::new());
    let (limiter, calls) = counting_limiter(options(2, 1000, WindowType::Fixed, &clock));

    assert!(limiter.maybe_execute(()));
    clock.set_ms(100);
    assert!(limiter.maybe_execute(()));
    clock.set_ms(200);
    assert!(!limiter.maybe_execute(()));
    clock.set_ms(1001);
    assert!(limiter.maybe_execute(()));

    assert_eq!(calls.load(Ordering::Relaxed), 3);
    assert_eq!(limiter.execution_count(), 3);
    assert_eq!(limiter.rejection_count(), 1);
}

#[test]
fn sliding_window_admits_as_old_executions_expire() {
    let clock = Arc::new(ManualClock::new());
    let (limiter, calls) = counting_limiter(options(2, 1000, WindowType::Sliding, &clock));

    assert!(limiter.maybe_execute(()));
    clock.set_ms(600);
    assert!(limiter.maybe_execute(()));
    clock.set_ms(900);
    assert!(!limiter.maybe_execute(()));
    assert_eq!(limiter.ms_until_next_window(), 100);

    clock.set_ms(1000);
    assert!(limiter.maybe_execute(()));
    clock.set_ms(1100);
    assert!(!limiter.maybe_execute(()));

    assert_eq!(calls.load(Ordering::Relaxed), 3);
}

#[test]
fn on_reject_receives_wait_until_next_admission() {
    let clock = Arc::new(ManualClock::new());
    let waits = Arc::new(Mutex::new(Vec::new()));
    let sink = waits.clone();

    let mut opts = options(1, 500, WindowType::Fixed, &clock);
    opts.on_reject = Some(Arc::new(move |wait: &Duration| {
        sink.lock().unwrap().push(*wait);
    }));
    let (limiter, _) = counting_limiter(opts);

    assert!(limiter.maybe_execute(()));
    clock.advance_ms(200);
    assert!(!limiter.maybe_execute(()));

    assert_eq!(*waits.lock().unwrap(), vec![Duration::from_millis(300)]);
}

#[test]
fn on_execute_sees_state_including_the_admission() {
    let clock = Arc::new(ManualClock::starting_at(42));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let mut opts = options(3, 1000, WindowType::Sliding, &clock);
    opts.on_execute = Some(Arc::new(move |state: &RateLimiterState| {
        sink.lock().unwrap().push(state.execution_count);
    }));
    let (limiter, _) = counting_limiter(opts);

    limiter.maybe_execute(());
    limiter.maybe_execute(());

    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    assert_eq!(limiter.state().execution_timestamps, vec![42, 42]);
}

#[test]
fn try_execute_reports_rejection_reason() {
    let clock = Arc::new(ManualClock::new());
    let (limiter, _) = counting_limiter(options(1, 1000, WindowType::Fixed, &clock));

    assert_eq!(limiter.try_execute(()), Ok(()));
    clock.advance_ms(250);
    assert_eq!(
        limiter.try_execute(()),
        Err(RejectionError::RateLimited {
            retry_after: Duration::from_millis(750)
        })
    );
}

#[test]
fn disabled_limiter_neither_executes_nor_counts() {
    let clock = Arc::new(ManualClock::new());
    let mut opts = options(5, 1000, WindowType::Fixed, &clock);
    opts.enabled = Enabled::from(false);
    let (limiter, calls) = counting_limiter(opts);

    assert!(!limiter.maybe_execute(()));
    assert_eq!(limiter.try_execute(()), Err(RejectionError::Disabled));
    assert_eq!(limiter.check(), RateLimitDecision::Disabled);

    assert_eq!(calls.load(Ordering::Relaxed), 0);
    assert_eq!(limiter.execution_count(), 0);
    assert_eq!(limiter.rejection_count(), 0);
}

#[test]
fn dynamic_enabled_is_evaluated_per_call() {
    let clock = Arc::new(ManualClock::new());
    let enabled = Arc::new(AtomicBool::new(false));
    let flag = enabled.clone();

    let mut opts = options(5, 1000, WindowType::Fixed, &clock);
    opts.enabled = Enabled::Dynamic(Arc::new(move || flag.load(Ordering::Relaxed)));
    let (limiter, calls) = counting_limiter(opts);

    assert!(!limiter.maybe_execute(()));
    enabled.store(true, Ordering::Relaxed);
    assert!(limiter.maybe_execute(()));
    assert_eq!(calls.load(Ordering::Relaxed), 1);
}

#[test]
fn check_does_not_record() {
    let clock = Arc::new(ManualClock::new());
    let (limiter, _) = counting_limiter(options(1, 1000, WindowType::Fixed, &clock));

    assert!(limiter.check().is_allowed());
    assert!(limiter.check().is_allowed());
    assert_eq!(limiter.remaining_in_window(), 1);

    assert!(limiter.maybe_execute(()));
    assert!(matches!(
        limiter.check(),
        RateLimitDecision::Rejected {
            window_ms: 1000,
            retry_after_ms: 1000,
            ..
        }
    ));
    assert_eq!(limiter.rejection_count(), 0);
}

#[test]
fn reset_clears_window_and_counters() {
    let clock = Arc::new(ManualClock::new());
    let (limiter, _) = counting_limiter(options(1, 1000, WindowType::Fixed, &clock));

    limiter.maybe_execute(());
    limiter.maybe_execute(());
    assert_eq!(limiter.rejection_count(), 1);

    limiter.reset();
    assert_eq!(limiter.execution_count(), 0);
    assert_eq!(limiter.rejection_count(), 0);
    assert_eq!(limiter.remaining_in_window(), 1);
    assert_eq!(limiter.state().window_anchor, None);
    assert!(limiter.maybe_execute(()));
}

#[test]
fn store_publishes_on_admission_and_rejection() {
    let clock = Arc::new(ManualClock::new());
    let (limiter, _) = counting_limiter(options(1, 1000, WindowType::Fixed, &clock));

    let published = Arc::new(Mutex::new(Vec::new()));
    let sink = published.clone();
    limiter.store().subscribe(move |state| {
        sink.lock().unwrap().push((
            state.execution_count,
            state.rejection_count,
            state.is_exceeded,
        ));
    });

    limiter.maybe_execute(());
    limiter.maybe_execute(());

    assert_eq!(*published.lock().unwrap(), vec![(1, 0, true), (1, 1, true)]);
    assert_eq!(limiter.store().state(), limiter.state());
}
