//! Jittered exponential backoff for idle polling
//!
//! The ceiling doubles from `base` up to `cap` with every consecutive empty
//! poll; the actual wait is drawn uniformly from `[ceiling / 2, ceiling]`
//! (equal jitter) so many idle workers do not poll in lockstep and none of
//! them spins on a zero wait.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
            failures: 0,
        }
    }

    /// Upper bound of the next wait
    pub fn ceiling(&self) -> Duration {
        let factor = 1u32.checked_shl(self.failures.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Draws the next wait and advances the ceiling
    pub fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let ceiling = self.ceiling();
        self.failures = self.failures.saturating_add(1);
        let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rng.gen_range(millis / 2..=millis))
    }

    /// Like `next_delay`, but never waits longer than the coordinator's
    /// `retry_after` hint
    pub fn next_delay_with_hint<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        retry_after: Option<Duration>,
    ) -> Duration {
        let delay = self.next_delay(rng);
        match retry_after {
            Some(hint) => delay.min(hint.max(Duration::from_millis(1))),
            None => delay,
        }
    }

    /// Resets after useful work was received
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}
