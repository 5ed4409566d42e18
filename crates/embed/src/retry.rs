use semsearch_common::AppConfig;
use std::time::Duration;

use crate::embedder::EmbedError;

/// Exponential backoff for transient embedding failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first call included
    pub max_attempts: u32,

    /// Delay after the first failure
    pub base_delay: Duration,

    /// Upper bound for the computed backoff
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.embed_max_attempts.max(1),
            base_delay: Duration::from_millis(config.embed_base_delay_ms),
            max_delay: Duration::from_millis(config.embed_max_delay_ms),
        }
    }

    /// Policy that never sleeps (tests, local backends)
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based)
    ///
    /// A `Retry-After` hint wins over a shorter computed backoff.
    pub fn delay_after(&self, attempt: u32, error: &EmbedError) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        match error {
            EmbedError::RateLimited {
                retry_after: Some(hint),
            } => backoff.max(*hint),
            _ => backoff,
        }
    }
}
