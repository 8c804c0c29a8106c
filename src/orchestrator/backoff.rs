//! Bounded exponential reconnect backoff with proportional jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Delay policy for reconnect attempts.
///
/// The pre-jitter delay for attempt `n` is `min(base * 2^n, cap)`; a random
/// jitter of up to `jitter_ratio` of that capped value is added on top.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    base: Duration,
    cap: Duration,
    jitter_ratio: f64,
}

impl ReconnectPolicy {
    /// Construct a policy. `jitter_ratio` is clamped to `0.0..=1.0`.
    #[must_use]
    pub fn new(base: Duration, cap: Duration, jitter_ratio: f64) -> Self {
        let jitter_ratio = if jitter_ratio.is_finite() {
            jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            base,
            cap: cap.max(base),
            jitter_ratio,
        }
    }

    /// Build from the `[reconnect]` config section.
    #[must_use]
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.jitter_ratio,
        )
    }

    /// Pre-jitter delay for `attempt`: `min(base * 2^attempt, cap)`.
    #[must_use]
    pub fn capped(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Largest delay this policy can produce.
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        self.cap.mul_f64(1.0 + self.jitter_ratio)
    }

    /// Jittered delay for `attempt`, rounded to whole milliseconds.
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let capped = self.capped(attempt);
        let jitter = capped.mul_f64(rng.gen::<f64>() * self.jitter_ratio);
        let total = capped + jitter;
        Duration::from_millis(u64::try_from(total.as_millis()).unwrap_or(u64::MAX))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}
