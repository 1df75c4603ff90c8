// Project-wide constants
//
// Centralised here so defaults have one source of truth.

/// Directory under the home directory holding `config.toml`.
pub const CONFIG_DIR: &str = ".lanes";

/// Config file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// Prefix for environment overrides, e.g. `LANES_SCHEDULER__LANES=8`.
pub const ENV_PREFIX: &str = "LANES";

/// Separator between nested keys in environment overrides.
pub const ENV_SEPARATOR: &str = "__";

/// Default capacity of each lane's intake queue.
pub const DEFAULT_QUEUE_SIZE: usize = 64;

/// Default time a submission waits for intake capacity.
pub const DEFAULT_SUBMIT_TIMEOUT_MS: u64 = 1000;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "info";
