//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Produces growing delays: `initial`, `initial * multiplier`, ... capped at `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    multiplier: f64,
    max: Duration,
    jitter: bool,
    current: Option<Duration>,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            initial,
            multiplier: multiplier.max(1.0),
            max,
            jitter: true,
            current: None,
        }
    }

    /// Disable the 0-10% random jitter (deterministic delays).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let base = match self.current {
            None => self.initial,
            Some(prev) => prev.mul_f64(self.multiplier),
        }
        .min(self.max);
        self.current = Some(base);

        // Apply jitter (0 to 10% of the delay), without exceeding the cap
        if self.jitter {
            let jitter_range = base.as_millis() as u64 / 10;
            if jitter_range > 0 {
                let jitter = rand::thread_rng().gen_range(0..jitter_range);
                return (base + Duration::from_millis(jitter)).min(self.max);
            }
        }
        base
    }

    /// Start over from the initial delay (after a successful connect).
    pub fn reset(&mut self) {
        self.current = None;
    }
}
