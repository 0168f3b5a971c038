use crate::{
    Limit, RateLimitDecision, RateLimiterState, WindowMs, WindowType,
    rate_limiter::execution_window::ExecutionWindow,
};

fn limit(n: u64) -> Limit {
    Limit::try_from(n).unwrap()
}

fn window(ms: u64) -> WindowMs {
    WindowMs::try_from(ms).unwrap()
}

#[test]
fn fixed_window_is_anchored_at_first_admission() {
    let mut w = ExecutionWindow::default();
    let (limit, window) = (limit(2), window(1000));

    for now in [0, 100] {
        assert!(w.decide(now, limit, window, WindowType::Fixed).is_allowed());
        w.record(now);
    }

    assert_eq!(
        w.decide(200, limit, window, WindowType::Fixed),
        RateLimitDecision::Rejected {
            window_ms: 1000,
            retry_after_ms: 800,
            remaining_after_waiting: 2,
        }
    );

    assert!(w.decide(1001, limit, window, WindowType::Fixed).is_allowed());
    assert_eq!(w.anchor(), Some(1000));
    assert!(w.is_empty());
}

#[test]
fn fixed_window_skips_empty_buckets_on_the_grid() {
    let mut w = ExecutionWindow::default();
    let (limit, window) = (limit(1), window(100));

    w.record(50);
    assert!(!w.decide(149, limit, window, WindowType::Fixed).is_allowed());

    assert!(w.decide(420, limit, window, WindowType::Fixed).is_allowed());
    assert_eq!(w.anchor(), Some(350));

    w.record(420);
    assert_eq!(w.ms_until_next(430, limit, window, WindowType::Fixed), 20);
}

#[test]
fn sliding_window_expires_timestamps_individually() {
    let mut w = ExecutionWindow::default();
    let (limit, window) = (limit(2), window(1000));

    w.record(0);
    w.record(500);

    assert_eq!(
        w.decide(999, limit, window, WindowType::Sliding),
        RateLimitDecision::Rejected {
            window_ms: 1000,
            retry_after_ms: 1,
            remaining_after_waiting: 1,
        }
    );

    // A timestamp exactly one window old no longer counts.
    assert!(w.decide(1000, limit, window, WindowType::Sliding).is_allowed());
    assert_eq!(w.timestamps(), vec![500]);
}

#[test]
fn sliding_window_never_admits_more_than_limit_in_any_window() {
    let mut w = ExecutionWindow::default();
    let (limit, window) = (limit(3), window(100));
    let mut admitted = Vec::new();

    for now in (0..1000).step_by(7) {
        if w.decide(now, limit, window, WindowType::Sliding).is_allowed() {
            w.record(now);
            admitted.push(now);
        }
    }

    for &start in &admitted {
        let in_window = admitted
            .iter()
            .filter(|&&t| t >= start && t < start + 100)
            .count();
        assert!(in_window <= 3, "{in_window} admissions in window at {start}");
    }
}

#[test]
fn remaining_and_ms_until_next_agree_with_decide() {
    let mut w = ExecutionWindow::default();
    let (limit, window) = (limit(2), window(1000));

    assert_eq!(w.remaining(0, limit, window, WindowType::Sliding), 2);
    assert_eq!(w.ms_until_next(0, limit, window, WindowType::Sliding), 0);

    w.record(10);
    assert_eq!(w.remaining(20, limit, window, WindowType::Sliding), 1);
    assert_eq!(w.ms_until_next(20, limit, window, WindowType::Sliding), 0);

    w.record(30);
    assert_eq!(w.remaining(40, limit, window, WindowType::Sliding), 0);
    assert_eq!(w.ms_until_next(40, limit, window, WindowType::Sliding), 970);
    assert!(!w.decide(40, limit, window, WindowType::Sliding).is_allowed());
}

#[test]
fn record_keeps_timestamps_sorted() {
    let mut w = ExecutionWindow::default();
    w.record(100);
    w.record(300);
    w.record(200);

    assert_eq!(w.timestamps(), vec![100, 200, 300]);
    assert_eq!(w.last_execution(), Some(300));
}

#[test]
fn from_state_restores_timestamps_and_anchor() {
    let state = RateLimiterState {
        execution_timestamps: vec![20, 10],
        window_anchor: Some(10),
        ..Default::default()
    };

    let mut w = ExecutionWindow::from_state(&state);
    assert_eq!(w.timestamps(), vec![10, 20]);
    assert!(!w.decide(30, limit(2), window(100), WindowType::Fixed).is_allowed());
}
