use std::time::Duration;

use serde::Deserialize;

use crate::{CdnError, Result};

/// Retry budget and exponential backoff for the fetch path.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay in milliseconds after the first failed attempt.
    pub base_delay_ms: u64,
    /// Factor applied to the delay after each further failed attempt.
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            backoff_multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis().try_into().unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    pub fn with_backoff_multiplier(mut self, multiplier: u32) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(CdnError::Config(format!(
                "max_attempts must be at least 1, got {}",
                self.max_attempts
            )));
        }
        if self.backoff_multiplier < 1 {
            return Err(CdnError::Config(format!(
                "backoff_multiplier must be at least 1, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }

    /// Delay to wait after failed attempt `attempt` (1-based) before the next
    /// one: `base_delay * backoff_multiplier^(attempt - 1)`, saturating.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let factor = u64::from(self.backoff_multiplier).saturating_pow(exp);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}
