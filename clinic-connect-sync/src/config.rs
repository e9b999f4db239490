//! Polling configuration
//!
//! ```toml
//! [polling]
//! intensive_interval_ms = 1000   # Interval right after user activity
//! normal_interval_ms = 5000      # Interval once the user is idle
//! idle_timeout_ms = 30000        # Inactivity before dropping to normal mode
//! max_retries = 3                # Consecutive failures before disconnecting
//! ```

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default interval while the user is active
pub const DEFAULT_INTENSIVE_INTERVAL_MS: u64 = 1_000;

/// Default interval while the user is idle
pub const DEFAULT_NORMAL_INTERVAL_MS: u64 = 5_000;

/// Default inactivity period before switching to normal mode
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Default number of consecutive failed fetches before disconnecting
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Poll scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Interval between polls in intensive mode
    #[serde(default = "default_intensive_interval_ms")]
    pub intensive_interval_ms: u64,

    /// Interval between polls in normal mode
    #[serde(default = "default_normal_interval_ms")]
    pub normal_interval_ms: u64,

    /// Time since last activity after which polling slows down
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Consecutive fetch failures tolerated before the scheduler halts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_intensive_interval_ms() -> u64 {
    DEFAULT_INTENSIVE_INTERVAL_MS
}

fn default_normal_interval_ms() -> u64 {
    DEFAULT_NORMAL_INTERVAL_MS
}

fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            intensive_interval_ms: DEFAULT_INTENSIVE_INTERVAL_MS,
            normal_interval_ms: DEFAULT_NORMAL_INTERVAL_MS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl PollingConfig {
    pub fn intensive_interval(&self) -> Duration {
        Duration::from_millis(self.intensive_interval_ms)
    }

    pub fn normal_interval(&self) -> Duration {
        Duration::from_millis(self.normal_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Reject values that would busy-loop or never poll
    pub fn validate(&self) -> Result<()> {
        if self.intensive_interval_ms == 0 {
            return Err(SyncError::Configuration(
                "intensive_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.normal_interval_ms == 0 {
            return Err(SyncError::Configuration(
                "normal_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(SyncError::Configuration(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
