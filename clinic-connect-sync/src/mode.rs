//! Polling Mode Selector
//!
//! Pure function of the time since the last activity and the configured idle
//! timeout. Evaluated when the next cycle is scheduled, never by a timer of
//! its own.

use crate::config::PollingConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Polling frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingMode {
    /// High frequency, shortly after user activity
    Intensive,
    /// Low frequency, user idle
    Normal,
}

impl PollingMode {
    /// Interval this mode polls at
    pub fn interval(self, config: &PollingConfig) -> Duration {
        match self {
            PollingMode::Intensive => config.intensive_interval(),
            PollingMode::Normal => config.normal_interval(),
        }
    }
}

impl fmt::Display for PollingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollingMode::Intensive => write!(f, "intensive"),
            PollingMode::Normal => write!(f, "normal"),
        }
    }
}

/// Intensive while `elapsed_ms < idle_timeout_ms`, normal otherwise
pub fn select_mode(elapsed_ms: u64, config: &PollingConfig) -> PollingMode {
    if elapsed_ms < config.idle_timeout_ms {
        PollingMode::Intensive
    } else {
        PollingMode::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_boundaries() {
        let config = PollingConfig::default();
        assert_eq!(select_mode(0, &config), PollingMode::Intensive);
        assert_eq!(select_mode(29_999, &config), PollingMode::Intensive);
        assert_eq!(select_mode(30_000, &config), PollingMode::Normal);
        assert_eq!(select_mode(30_001, &config), PollingMode::Normal);
    }

    #[test]
    fn test_mode_intervals() {
        let config = PollingConfig {
            intensive_interval_ms: 250,
            normal_interval_ms: 4_000,
            ..Default::default()
        };
        assert_eq!(
            PollingMode::Intensive.interval(&config),
            Duration::from_millis(250)
        );
        assert_eq!(
            PollingMode::Normal.interval(&config),
            Duration::from_millis(4_000)
        );
    }

    #[test]
    fn test_zero_idle_timeout_is_always_normal() {
        let config = PollingConfig {
            idle_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(select_mode(0, &config), PollingMode::Normal);
    }
}
