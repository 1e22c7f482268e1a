use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with a cap and an attempt limit.
///
/// `next_delay(n) = min(base * 2^n, cap)`; give up once `n >= max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub cap_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            cap_delay_ms: 10_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn next_delay_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.cap_delay_ms)
    }

    pub fn next_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.next_delay_ms(attempt))
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
