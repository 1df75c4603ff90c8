// Tracing setup for the lanes binary
//
// Library code only emits events through `tracing`; installing a subscriber
// is left to the application.

use anyhow::{anyhow, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;

/// Build the filter: RUST_LOG wins, otherwise the configured level.
pub fn env_filter(settings: &LoggingSettings) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&settings.level)
            .map_err(|e| anyhow!("Invalid log level '{}': {}", settings.level, e)),
    }
}

/// Install the global tracing subscriber (fmt layer on stderr).
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(settings)?)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_level_parses() {
        let settings = LoggingSettings {
            level: "lanes=debug,warn".to_string(),
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(env_filter(&settings).is_ok());
        }
    }

    #[test]
    fn test_garbage_level_rejected() {
        let settings = LoggingSettings {
            level: "lanes=notalevel".to_string(),
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(env_filter(&settings).is_err());
        }
    }
}
