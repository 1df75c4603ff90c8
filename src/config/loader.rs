// Configuration loader
// Layers built-in defaults, ~/.lanes/config.toml (or an explicit file), and
// LANES_* environment variables, in that order.

use anyhow::{bail, Context, Result};
use config::{Environment, File, FileFormat, Map};
use std::path::{Path, PathBuf};

use super::constants::{CONFIG_DIR, CONFIG_FILE, ENV_PREFIX, ENV_SEPARATOR};
use super::settings::Config;

/// `~/.lanes/config.toml`, if a home directory can be determined
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Load configuration from `path` (or the default location) and the process
/// environment.
///
/// An explicit `path` must exist; the default file is optional.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    load(path, None)
}

/// Like [`load_config`], but reads overrides from `vars` instead of the
/// process environment. Keys use the same `LANES_SECTION__KEY` form.
pub fn load_config_with_env(path: Option<&Path>, vars: Map<String, String>) -> Result<Config> {
    load(path, Some(vars))
}

fn load(path: Option<&Path>, vars: Option<Map<String, String>>) -> Result<Config> {
    let (file, required) = match path {
        Some(path) => {
            if !path.exists() {
                bail!("Configuration file not found: {}", path.display());
            }
            (Some(path.to_path_buf()), true)
        }
        None => (default_config_path(), false),
    };

    let mut builder = config::Config::builder();
    if let Some(file) = &file {
        tracing::debug!(path = %file.display(), required, "Reading configuration file");
        builder = builder.add_source(
            File::from(file.as_path())
                .format(FileFormat::Toml)
                .required(required),
        );
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(vars),
    );

    let config: Config = builder
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Failed to parse configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    Ok(config)
}
