use std::{future::Future, pin::pin, task::Poll};

use crate::ManualClock;

/// Poll `future` to completion, jumping `clock` to the next sleeper's deadline
/// whenever the future is blocked.
///
/// Work that suspends on anything other than `clock` gets one scheduler turn to
/// make progress before the clock moves.
pub(crate) async fn drive<F: Future>(clock: &ManualClock, future: F) -> F::Output {
    let mut future = pin!(future);
    loop {
        if let Poll::Ready(output) = futures::poll!(future.as_mut()) {
            return output;
        }
        tokio::task::yield_now().await;
        if let Poll::Ready(output) = futures::poll!(future.as_mut()) {
            return output;
        }
        clock.advance_to_next_deadline();
    }
}
