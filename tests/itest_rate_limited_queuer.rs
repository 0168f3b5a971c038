#![cfg(feature = "tokio")]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tempora::{
    AsyncQueuer, AsyncQueuerOptions, AsyncRateLimiter, AsyncRateLimiterOptions, Backoff,
    Concurrency, Limit, MaxAttempts, PacingError, RateLimiterOptions, RetryOptions, WindowMs,
    WindowType,
};

type Limiter = AsyncRateLimiter<u32, u32, String>;

fn limiter(
    limit: u64,
    window_ms: u64,
    window_type: WindowType,
    log: Arc<Mutex<Vec<u128>>>,
) -> Arc<Limiter> {
    let origin = tokio::time::Instant::now();
    let limits = RateLimiterOptions::new(
        Limit::try_from(limit).unwrap(),
        WindowMs::try_from(window_ms).unwrap(),
    )
    .with_window_type(window_type);

    Arc::new(AsyncRateLimiter::new(
        move |n: u32| {
            log.lock().unwrap().push(origin.elapsed().as_millis());
            async move { Ok::<u32, String>(n) }
        },
        AsyncRateLimiterOptions::new(limits),
    ))
}

fn max_in_any_window(log: &[u128], window_ms: u128) -> usize {
    log.iter()
        .map(|&start| {
            log.iter()
                .filter(|&&t| t >= start && t < start + window_ms)
                .count()
        })
        .max()
        .unwrap_or(0)
}

#[tokio::test(start_paused = true)]
async fn queued_work_waits_for_the_rate_limiter() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let limiter = limiter(3, 1000, WindowType::Sliding, log.clone());

    let pacer = limiter.clone();
    let queuer: AsyncQueuer<u32, u32, String> = AsyncQueuer::new(
        move |n: u32| {
            let limiter = pacer.clone();
            async move {
                loop {
                    match limiter.maybe_execute(n).await {
                        Ok(value) => return Ok(value),
                        Err(PacingError::Rejected(_)) => {
                            let wait = limiter.ms_until_next_window().max(1);
                            tokio::time::sleep(Duration::from_millis(wait)).await;
                        }
                        Err(PacingError::Execution(error)) => return Err(error),
                    }
                }
            }
        },
        AsyncQueuerOptions {
            concurrency: Concurrency::try_from(2usize).unwrap(),
            ..Default::default()
        },
    );

    for n in 0..10 {
        assert!(queuer.add_item(n));
    }
    queuer.flush().await;

    let log = log.lock().unwrap();
    assert_eq!(queuer.success_count(), 10);
    assert_eq!(log.len(), 10);
    assert!(max_in_any_window(&log, 1000) <= 3);
    assert!(*log.last().unwrap() >= 3000);
}

#[tokio::test(start_paused = true)]
async fn rejections_are_retried_with_backoff() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let limiter = limiter(2, 500, WindowType::Fixed, log.clone());

    let pacer = limiter.clone();
    let queuer: AsyncQueuer<u32, u32, String> = AsyncQueuer::new(
        move |n: u32| {
            let limiter = pacer.clone();
            async move { limiter.maybe_execute(n).await.map_err(|error| error.to_string()) }
        },
        AsyncQueuerOptions {
            concurrency: Concurrency::try_from(4usize).unwrap(),
            retry: Some(RetryOptions::new(
                MaxAttempts::try_from(20u32).unwrap(),
                Backoff::Fixed,
                Duration::from_millis(100),
            )),
            ..Default::default()
        },
    );

    for n in 0..6 {
        queuer.add_item(n);
    }
    queuer.flush().await;

    let log = log.lock().unwrap();
    assert_eq!(queuer.success_count(), 6);
    assert_eq!(queuer.error_count(), 0);
    assert!(max_in_any_window(&log, 500) <= 2);
    assert!(limiter.rejection_count() > 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_as_queue_errors() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let limiter = limiter(1, 60_000, WindowType::Fixed, log.clone());
    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();

    let pacer = limiter.clone();
    let queuer: AsyncQueuer<u32, u32, String> = AsyncQueuer::new(
        move |n: u32| {
            let limiter = pacer.clone();
            async move { limiter.maybe_execute(n).await.map_err(|error| error.to_string()) }
        },
        AsyncQueuerOptions {
            retry: Some(RetryOptions::new(
                MaxAttempts::try_from(2u32).unwrap(),
                Backoff::Exponential,
                Duration::from_millis(10),
            )),
            on_error: Some(Arc::new(move |_: &tempora::ExecutionError<String>, item: &u32| {
                sink.lock().unwrap().push(*item);
            })),
            ..Default::default()
        },
    );

    queuer.add_item(1);
    queuer.add_item(2);
    queuer.flush().await;

    assert_eq!(queuer.success_count(), 1);
    assert_eq!(queuer.error_count(), 1);
    assert_eq!(*failures.lock().unwrap(), vec![2]);
    assert_eq!(limiter.rejection_count(), 2);
}
