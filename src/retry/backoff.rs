use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Jitter;

/// Shape of the delay between consecutive attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `base_wait * 2^(attempt - 1)`
    #[default]
    Exponential,
    /// `base_wait * attempt`
    Linear,
    /// `base_wait`
    Fixed,
}

impl Backoff {
    /// Delay to wait after the failed 1-indexed `attempt`, before jitter.
    pub fn delay(&self, attempt: u32, base_wait: Duration) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Backoff::Exponential => {
                let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
                base_wait.saturating_mul(factor)
            }
            Backoff::Linear => base_wait.saturating_mul(attempt),
            Backoff::Fixed => base_wait,
        }
    }

    /// Delay after `attempt` with jitter drawn from the thread RNG.
    pub fn jittered_delay(&self, attempt: u32, base_wait: Duration, jitter: Jitter) -> Duration {
        let mut sample = || rand::random_range(-1f64..=1f64);
        self.jittered_delay_with_rng(attempt, base_wait, jitter, &mut sample)
    }

    /// Delay after `attempt`, scaled by `1 + jitter * sample()` and clamped at zero.
    ///
    /// `sample` must return values in `[-1, 1]`.
    pub(crate) fn jittered_delay_with_rng(
        &self,
        attempt: u32,
        base_wait: Duration,
        jitter: Jitter,
        sample: &mut impl FnMut() -> f64,
    ) -> Duration {
        let delay = self.delay(attempt, base_wait);
        if *jitter <= 0f64 {
            return delay;
        }

        let factor = (1f64 + *jitter * sample().clamp(-1f64, 1f64)).max(0f64);
        Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }
}
