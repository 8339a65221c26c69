//! Retry schedules and the clock they are evaluated against.
//!
//! Backoff delays are computed by a pure function so schedules can be
//! tested without sleeping; waiting goes through [`Clock`] so callers run
//! on virtual time under `tokio::time::pause`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: u32,
}

impl Backoff {
    /// Doubling backoff between `initial` and `max`.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: 2,
        }
    }

    /// Delay to wait after the `attempt`-th failure (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).checked_pow(attempt);
        match factor.and_then(|f| self.initial.checked_mul(f)) {
            Some(d) => d.min(self.max),
            None => self.max,
        }
    }

    /// Iterator over the successive delays, starting at attempt zero.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0u32..).map(move |attempt| self.delay(attempt))
    }
}

/// Time source used by retry loops.
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug + 'static {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Suspend for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Clock`] backed by the tokio timer (honours `tokio::time::pause`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_schedule_is_capped() {
        let backoff = Backoff::exponential(Duration::from_millis(50), Duration::from_secs(1));
        let delays: Vec<u64> = backoff
            .delays()
            .take(7)
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![50, 100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let backoff = Backoff::exponential(Duration::from_millis(50), Duration::from_secs(1));
        assert_eq!(backoff.delay(200), Duration::from_secs(1));
    }

    #[test]
    fn test_multiplier_one_is_constant() {
        let backoff = Backoff {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(1),
            multiplier: 1,
        };
        assert_eq!(backoff.delay(0), backoff.delay(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_sleeps_on_virtual_time() {
        let clock = TokioClock;
        let start = clock.now();
        clock.sleep(Duration::from_secs(5)).await;
        assert!(clock.now() - start >= Duration::from_secs(5));
    }
}
