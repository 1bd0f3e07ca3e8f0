use std::cmp;
use std::time::Duration;

/// Exponential reconnect delay: floor, 2x floor, 4x floor ... capped at ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let ceiling = cmp::max(floor, ceiling);
        Self {
            floor,
            ceiling,
            current: floor,
        }
    }

    /// Delay to wait before the next attempt; doubles the one after it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = cmp::min(self.current.saturating_mul(2), self.ceiling);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

/// Closed form of the sequence: the delay after `prior` earlier consecutive failures.
pub fn delay_after(prior: u32, floor: Duration, ceiling: Duration) -> Duration {
    let factor = 2u32.checked_pow(prior).unwrap_or(u32::MAX);
    cmp::min(floor.saturating_mul(factor), cmp::max(floor, ceiling))
}
