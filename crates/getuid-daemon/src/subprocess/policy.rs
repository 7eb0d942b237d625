//! Restart back-off for the token source.

use std::time::Duration;

/// Exponential back-off between generations.
///
/// There is no attempt cap: the supervisor keeps restarting for the life of
/// the daemon.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Delay before the first restart after a stable generation.
    pub initial_delay: Duration,
    /// Maximum delay between restarts.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each consecutive failure.
    pub multiplier: f64,
    /// A generation alive at least this long resets the back-off.
    pub stable_after: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            stable_after: Duration::from_secs(10),
        }
    }
}

impl RestartPolicy {
    /// Set the initial and maximum delays.
    #[must_use]
    pub const fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt.min(64) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Whether a generation that ran for `uptime` counts as stable.
    pub fn is_stable(&self, uptime: Duration) -> bool {
        uptime >= self.stable_after
    }

    /// Attempt number to back off with after a generation exits.
    ///
    /// A generation that served at least one token, or ran long enough to be
    /// stable, starts the back-off over.
    pub fn attempt_after_exit(&self, attempt: u32, uptime: Duration, tokens_produced: u64) -> u32 {
        if tokens_produced > 0 || self.is_stable(uptime) {
            0
        } else {
            attempt
        }
    }
}
