//! Initialize the configuration: write the bundled `config.yml` (from `crates/lib/config/`)
//! next to the chosen path.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

static DEFAULT_CONFIG: &str = include_str!("../config/config.yml");

/// The bundled default configuration.
pub fn default_config() -> &'static str {
    DEFAULT_CONFIG
}

/// Create the parent directory and write the default config if the file does not exist.
/// An existing file is left untouched. Returns the config path.
pub fn init_config(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if config_path.exists() {
        log::debug!("config already exists at {}, skipping", config_path.display());
    } else {
        std::fs::write(config_path, DEFAULT_CONFIG)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    Ok(config_path.to_path_buf())
}
