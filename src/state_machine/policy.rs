use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RetrySection;

/// Bounds for driving one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Fixed pause before every attempt after the first.
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 50,
        }
    }
}

impl From<&RetrySection> for RetryPolicy {
    fn from(section: &RetrySection) -> Self {
        Self {
            max_attempts: section.max_attempts.max(1),
            delay_ms: section.delay_ms,
        }
    }
}

impl RetryPolicy {
    /// Pause to take before the given 1-based attempt. No pause before the first.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        (attempt > 1).then(|| Duration::from_millis(self.delay_ms))
    }
}
