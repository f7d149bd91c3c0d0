//! Reconnection Policy
//!
//! Bounded exponential backoff for upstream reconnection. Each unexpected
//! closure counts as one failure. The n-th consecutive failure waits
//! `initial_delay * multiplier^(n-1)`, capped at `max_delay`, and the
//! failure that reaches `max_attempts` is terminal.

use std::time::Duration;

use rand::Rng;

/// Backoff parameters shared by every connection in a pool.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Wait after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on any single wait.
    pub max_delay: Duration,
    /// Growth factor between consecutive waits.
    pub multiplier: f64,
    /// Random spread applied to each wait, as a fraction of it (0 disables).
    pub jitter_factor: f64,
    /// Consecutive failures after which the connection gives up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Un-jittered wait after the given number of consecutive failures.
    ///
    /// `failures` is 1-based; zero is treated as the first failure.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let cap_ms = self.max_delay.as_millis();

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent)).round();

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = if scaled.is_finite() && scaled >= 0.0 {
            (scaled as u128).min(cap_ms)
        } else {
            cap_ms
        };
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Whether `failures` consecutive failures end the connection.
    #[must_use]
    pub const fn is_terminal(&self, failures: u32) -> bool {
        self.max_attempts > 0 && failures >= self.max_attempts
    }
}

/// Consecutive-failure counter for one connection.
///
/// # Example
///
/// ```rust
/// use market_stream::application::services::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig {
///     initial_delay: Duration::from_millis(100),
///     max_attempts: 3,
///     ..ReconnectConfig::default()
/// });
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
/// assert_eq!(policy.next_delay(), None);
///
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    failures: u32,
}

impl ReconnectPolicy {
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Count one failure and return the wait before the next attempt.
    ///
    /// `None` means the failure was terminal.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);

        if self.config.is_terminal(self.failures) {
            return None;
        }

        let delay = self.config.delay_for(self.failures);
        Some(jitter(delay, self.config.jitter_factor))
    }

    /// Forget past failures after a successful open.
    pub const fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures since the last successful open.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.failures
    }
}

fn jitter(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || delay.is_zero() {
        return delay;
    }

    let base = delay.as_secs_f64();
    let spread = base * factor;
    let offset: f64 = rand::rng().random_range(-spread..=spread);
    Duration::from_secs_f64((base + offset).max(0.001))
}
