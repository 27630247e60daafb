//! Capped exponential backoff for delivery retries.
//!
//! Attempts are unbounded; only the wait between them grows.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Upper bound on any wait, whatever the configured ceiling
pub const LONGEST_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failure in milliseconds (0 = retry every cycle)
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Ceiling for the delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each failure)
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_initial_delay() -> u64 {
    2000
}
fn default_max_delay() -> u64 {
    60_000
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl BackoffPolicy {
    /// Retry on every poll cycle
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
        }
    }

    /// Delay after the `failures`-th consecutive failure (1-indexed)
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        if failures <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let exponent = (failures - 1).min(64) as i32;
        let delay = self.initial_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }
}

#[derive(Debug, Clone, Copy)]
struct BackoffEntry {
    failures: u32,
    next_attempt: Instant,
}

/// Per-key failure tracking (keys are chunk filenames)
#[derive(Debug)]
pub struct BackoffTracker {
    policy: BackoffPolicy,
    entries: HashMap<String, BackoffEntry>,
}

impl BackoffTracker {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    /// Whether `key` may be attempted at `now`
    pub fn ready(&self, key: &str, now: Instant) -> bool {
        self.entries
            .get(key)
            .map(|e| now >= e.next_attempt)
            .unwrap_or(true)
    }

    /// Record a failure and return the wait before the next attempt
    pub fn record_failure(&mut self, key: &str, now: Instant) -> Duration {
        let failures = self.entries.get(key).map(|e| e.failures).unwrap_or(0) + 1;
        let mut delay = self.policy.delay_for_attempt(failures).min(LONGEST_DELAY);
        let next_attempt = match now.checked_add(delay) {
            Some(at) => at,
            None => {
                delay = Duration::ZERO;
                now
            }
        };
        self.entries.insert(key.to_string(), BackoffEntry { failures, next_attempt });
        delay
    }

    pub fn record_success(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn failures(&self, key: &str) -> u32 {
        self.entries.get(key).map(|e| e.failures).unwrap_or(0)
    }

    /// Drop entries for keys no longer present
    pub fn retain_keys(&mut self, present: &HashSet<String>) {
        self.entries.retain(|k, _| present.contains(k));
    }
}
