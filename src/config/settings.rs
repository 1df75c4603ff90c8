// Configuration structs

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::constants::{DEFAULT_LOG_LEVEL, DEFAULT_QUEUE_SIZE, DEFAULT_SUBMIT_TIMEOUT_MS};
use crate::scheduling::{DEFAULT_PREFIX_LEN, MAX_PREFIX_LEN};

/// Lane pool sizing and submission behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Number of lanes (each gets one forwarder and one worker)
    pub lanes: usize,

    /// Capacity of each lane's intake queue; 0 means submit hands off directly
    pub queue_size: usize,

    /// How long a submission waits for intake capacity before timing out
    pub submit_timeout_ms: u64,
}

impl SchedulerSettings {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            lanes: default_lanes(),
            queue_size: DEFAULT_QUEUE_SIZE,
            submit_timeout_ms: DEFAULT_SUBMIT_TIMEOUT_MS,
        }
    }
}

fn default_lanes() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

/// Sequence ID generator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceSettings {
    /// Number of random base-32 characters before the counter
    pub prefix_len: usize,
}

impl Default for SequenceSettings {
    fn default() -> Self {
        Self {
            prefix_len: DEFAULT_PREFIX_LEN,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when RUST_LOG is unset (e.g. "info", "lanes=debug")
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerSettings,
    pub sequence: SequenceSettings,
    pub logging: LoggingSettings,
}

impl Config {
    /// Validate configuration and return helpful errors
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.lanes == 0 {
            bail!("scheduler.lanes must be greater than 0");
        }

        if self.scheduler.submit_timeout_ms == 0 {
            bail!("scheduler.submit_timeout_ms must be greater than 0");
        }

        if !(1..=MAX_PREFIX_LEN).contains(&self.sequence.prefix_len) {
            bail!(
                "sequence.prefix_len must be between 1 and {} (got {})",
                MAX_PREFIX_LEN,
                self.sequence.prefix_len
            );
        }

        if self.logging.level.trim().is_empty() {
            bail!("logging.level must not be empty");
        }

        Ok(())
    }

    /// Render as TOML, in the same shape `load_config` reads
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.scheduler.lanes >= 1);
        assert_eq!(config.scheduler.queue_size, DEFAULT_QUEUE_SIZE);
        assert_eq!(config.scheduler.submit_timeout(), Duration::from_secs(1));
        assert_eq!(config.sequence.prefix_len, DEFAULT_PREFIX_LEN);
    }

    #[test]
    fn test_zero_lanes_invalid() {
        let mut config = Config::default();
        config.scheduler.lanes = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scheduler.lanes"));
    }

    #[test]
    fn test_zero_timeout_invalid() {
        let mut config = Config::default();
        config.scheduler.submit_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_prefix_len_bounds() {
        let mut config = Config::default();
        config.sequence.prefix_len = MAX_PREFIX_LEN + 1;
        assert!(config.validate().is_err());
        config.sequence.prefix_len = MAX_PREFIX_LEN;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_queue_size_zero_is_allowed() {
        let mut config = Config::default();
        config.scheduler.queue_size = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = Config::default();
        config.scheduler.lanes = 3;
        config.logging.level = "lanes=debug".to_string();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[scheduler]"));
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: Config = toml::from_str("[scheduler]\nqueue_size = 4\n").unwrap();
        assert_eq!(parsed.scheduler.queue_size, 4);
        assert_eq!(parsed.scheduler.submit_timeout_ms, DEFAULT_SUBMIT_TIMEOUT_MS);
        assert_eq!(parsed.logging, LoggingSettings::default());
    }
}
