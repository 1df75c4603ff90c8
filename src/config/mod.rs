// Configuration module
// Public interface for configuration loading

pub mod constants;
mod loader;
mod settings;

pub use loader::{default_config_path, load_config, load_config_with_env};
pub use settings::{Config, LoggingSettings, SchedulerSettings, SequenceSettings};
