//! Exponential retry backoff for failed sends
//!
//! ```text
//! Attempt    Delay (base=1s)    With jitter (±10%)
//! ─────────────────────────────────────────────────
//!    0             1s            0.9s - 1.1s
//!    1             2s            1.8s - 2.2s
//!    2             4s            3.6s - 4.4s
//!   ...           ...            capped at max_delay
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 300_000;
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Fraction of the delay applied as random jitter (0.0-1.0)
    #[serde(default = "default_jitter")]
    pub jitter_factor: f64,
}

fn default_base_delay() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_max_delay() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

fn default_jitter() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl fmt::Display for BackoffConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BackoffConfig(base_delay={}ms, max_delay={}ms, jitter={:.1}%)",
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor * 100.0
        )
    }
}

impl BackoffConfig {
    /// 1s base, 5 minute cap, 10% jitter
    pub fn standard() -> Self {
        Self::default()
    }

    /// 100ms base, 10s cap, 20% jitter
    pub fn aggressive() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter_factor: 0.2,
        }
    }

    /// No delay: a failed row is claimable again on the next sweep
    pub fn immediate() -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }

    pub fn new(base_delay_ms: u64, max_delay_ms: u64, jitter_factor: f64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// `min(base * 2^attempt, max)` plus or minus jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);

        let jitter_range = (delay as f64 * self.jitter_factor) as i64;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0
        };

        Duration::from_millis((delay as i64 + jitter).max(0) as u64)
    }

    pub fn next_attempt_at(&self, attempt: u32) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for(attempt))
            .unwrap_or_else(|_| chrono::Duration::milliseconds(self.max_delay_ms as i64));
        Utc::now() + delay
    }
}
