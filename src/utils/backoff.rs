// src/utils/backoff.rs
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff settings, as they appear in the `node` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
    /// Total budget across all attempts and waits
    pub max_elapsed_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 500,
            multiplier: 1.5,
            max_interval_ms: 5_000,
            max_elapsed_secs: 30 * 60,
        }
    }
}

impl BackoffConfig {
    pub fn max_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_elapsed_secs)
    }
}

/// Interval generator; knows nothing about clocks, the caller passes the
/// time already spent.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    multiplier: f64,
    max_interval: Duration,
    max_elapsed: Duration,
}

impl ExponentialBackoff {
    pub fn new(
        initial: Duration,
        multiplier: f64,
        max_interval: Duration,
        max_elapsed: Duration,
    ) -> Self {
        Self {
            current: initial.min(max_interval),
            multiplier: multiplier.max(1.0),
            max_interval,
            max_elapsed,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_interval_ms),
            config.multiplier,
            Duration::from_millis(config.max_interval_ms),
            config.max_elapsed(),
        )
    }

    /// Wait before the next attempt, or `None` once waiting would overrun
    /// the elapsed budget.
    pub fn next_interval(&mut self, elapsed: Duration) -> Option<Duration> {
        let interval = self.current;
        if elapsed.saturating_add(interval) > self.max_elapsed {
            return None;
        }
        self.current = self.current.mul_f64(self.multiplier).min(self.max_interval);
        Some(interval)
    }
}
