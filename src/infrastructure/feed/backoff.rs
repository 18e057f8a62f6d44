//! Reconnection backoff policy.

use std::time::Duration;

use crate::infrastructure::config::ReconnectionConfig;

/// What to do before reconnection attempt `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Wait this long, then try.
    Wait(Duration),
    /// The attempt budget is spent.
    GiveUp,
}

/// Exponential backoff: `initial * multiplier^(attempt - 1)`, capped at
/// `max_delay`, for at most `max_attempts` attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectionConfig,
}

impl Backoff {
    pub fn new(config: ReconnectionConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Step for the 1-based `attempt`.
    #[must_use]
    pub fn step(&self, attempt: u32) -> RetryStep {
        if attempt == 0 || attempt > self.config.max_attempts {
            return RetryStep::GiveUp;
        }
        RetryStep::Wait(self.delay(attempt))
    }

    fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let raw = self.config.initial_delay_ms as f64 * self.config.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.config.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(ReconnectionConfig {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            max_attempts: 10,
        })
    }

    #[test]
    fn doubles_from_initial_delay() {
        let backoff = backoff();
        assert_eq!(backoff.step(1), RetryStep::Wait(Duration::from_secs(1)));
        assert_eq!(backoff.step(2), RetryStep::Wait(Duration::from_secs(2)));
        assert_eq!(backoff.step(3), RetryStep::Wait(Duration::from_secs(4)));
        assert_eq!(backoff.step(5), RetryStep::Wait(Duration::from_secs(16)));
    }

    #[test]
    fn caps_at_max_delay() {
        let backoff = backoff();
        assert_eq!(backoff.step(6), RetryStep::Wait(Duration::from_secs(30)));
        assert_eq!(backoff.step(10), RetryStep::Wait(Duration::from_secs(30)));
    }

    #[test]
    fn gives_up_past_max_attempts() {
        assert_eq!(backoff().step(11), RetryStep::GiveUp);
    }

    #[test]
    fn multiplier_of_one_is_constant() {
        let backoff = Backoff::new(ReconnectionConfig {
            initial_delay_ms: 250,
            max_delay_ms: 1_000,
            backoff_multiplier: 1.0,
            max_attempts: 3,
        });
        assert_eq!(backoff.step(3), RetryStep::Wait(Duration::from_millis(250)));
    }
}
