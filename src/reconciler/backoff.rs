//! Injectable retry backoff policies.

use std::sync::Arc;
use std::time::Duration;

/// Stateful delay sequence for one retrying operation. `None` means give up.
pub trait Backoff: Send {
    fn next_delay(&mut self) -> Option<Duration>;
}

/// Produces a fresh backoff for each operation attempt sequence.
pub type BackoffFactory = Arc<dyn Fn() -> Box<dyn Backoff> + Send + Sync>;

/// Exponential backoff: `base * 2^n`, capped at `max`, never giving up —
/// cancellation is what ends the retry loop.
#[derive(Debug, Clone)]
pub struct Exponential {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Exponential {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }
}

impl Backoff for Exponential {
    fn next_delay(&mut self) -> Option<Duration> {
        let delay = self
            .base
            .checked_mul(2u32.saturating_pow(self.attempt))
            .unwrap_or(self.max)
            .min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }
}

/// Fixed delay with a bounded number of retries. Tests use this with a zero
/// delay for deterministic, sleep-free runs.
#[derive(Debug, Clone)]
pub struct Fixed {
    delay: Duration,
    remaining: u32,
}

impl Fixed {
    pub fn new(delay: Duration, retries: u32) -> Self {
        Self {
            delay,
            remaining: retries,
        }
    }
}

impl Backoff for Fixed {
    fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.delay)
    }
}

/// The default policy: 500 ms doubling up to 30 s.
pub fn default_backoff() -> BackoffFactory {
    Arc::new(|| Box::new(Exponential::new(Duration::from_millis(500), Duration::from_secs(30))))
}

/// A factory for [`Fixed`] policies.
pub fn fixed_backoff(delay: Duration, retries: u32) -> BackoffFactory {
    Arc::new(move || Box::new(Fixed::new(delay, retries)))
}
