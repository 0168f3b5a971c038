use std::{sync::Arc, time::Duration};

use crate::{
    KeyedRateLimiter, KeyedRateLimiterOptions, Limit, ManualClock, RateLimitDecision, WindowMs,
    WindowType,
};

fn limiter(limit: u64, window_type: WindowType, clock: &Arc<ManualClock>) -> KeyedRateLimiter {
    let mut options = KeyedRateLimiterOptions::new(
        Limit::try_from(limit).unwrap(),
        WindowMs::try_from(1000u64).unwrap(),
    );
    options.window_type = window_type;
    options.clock = clock.clone();
    KeyedRateLimiter::new(options)
}

#[test]
fn unknown_key_is_allowed_and_untracked() {
    let clock = Arc::new(ManualClock::new());
    let limiter = limiter(1, WindowType::Fixed, &clock);

    assert_eq!(limiter.check("missing"), RateLimitDecision::Allowed);
    assert_eq!(limiter.remaining_in_window("missing"), 1);
    assert_eq!(limiter.ms_until_next_window("missing"), 0);
    assert!(limiter.is_empty());
}

#[test]
fn keys_have_independent_windows() {
    let clock = Arc::new(ManualClock::new());
    let limiter = limiter(2, WindowType::Fixed, &clock);

    assert!(limiter.try_acquire("a").is_allowed());
    assert!(limiter.try_acquire("a").is_allowed());
    assert!(matches!(
        limiter.try_acquire("a"),
        RateLimitDecision::Rejected { .. }
    ));

    assert!(limiter.try_acquire("b").is_allowed());
    assert_eq!(limiter.remaining_in_window("b"), 1);
    assert_eq!(limiter.len(), 2);

    clock.advance_ms(1000);
    assert!(limiter.try_acquire("a").is_allowed());
}

#[test]
fn reset_forgets_one_key() {
    let clock = Arc::new(ManualClock::new());
    let limiter = limiter(1, WindowType::Sliding, &clock);

    limiter.try_acquire("a");
    limiter.try_acquire("b");
    assert!(!limiter.check("a").is_allowed());

    limiter.reset("a");
    assert!(limiter.check("a").is_allowed());
    assert!(!limiter.check("b").is_allowed());
    assert_eq!(limiter.len(), 1);
}

#[test]
fn cleanup_drops_expired_and_stale_keys() {
    let clock = Arc::new(ManualClock::new());
    let limiter = limiter(5, WindowType::Sliding, &clock);

    limiter.try_acquire("old");
    clock.advance_ms(900);
    limiter.try_acquire("recent");
    clock.advance_ms(200);

    // "old" slid out of its window; "recent" is still inside.
    limiter.cleanup(Duration::from_secs(60));
    assert_eq!(limiter.len(), 1);
    assert_eq!(limiter.remaining_in_window("recent"), 4);

    limiter.cleanup(Duration::from_millis(100));
    assert!(limiter.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cleanup_loop_runs_until_stopped() {
    let clock = Arc::new(ManualClock::new());
    let limiter = Arc::new(limiter(5, WindowType::Fixed, &clock));

    limiter.try_acquire("a");
    limiter.run_cleanup_loop(Duration::from_millis(100), Duration::from_millis(500));

    clock.advance_ms(2000);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(limiter.is_empty());

    limiter.stop_cleanup_loop();
    limiter.stop_cleanup_loop();
    tokio::time::sleep(Duration::from_millis(150)).await;

    limiter.try_acquire("b");
    clock.advance_ms(2000);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(limiter.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cleanup_loop_ends_when_limiter_is_dropped() {
    let clock = Arc::new(ManualClock::new());
    let limiter = Arc::new(limiter(5, WindowType::Fixed, &clock));
    let weak = Arc::downgrade(&limiter);

    limiter.run_cleanup_loop(Duration::from_millis(50), Duration::from_millis(50));
    drop(limiter);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(weak.upgrade().is_none());
}
