use anyhow::{Context, Result};
use std::path::PathBuf;

/// Centralized path management for crashcap

/// Get the crashcap config directory
pub fn crashcap_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Unable to determine user config directory")?
        .join("crashcap");

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating config directory at {}", config_dir.display()))?;

    Ok(config_dir)
}

/// Default location of the config file
pub fn default_config_path() -> Result<PathBuf> {
    Ok(crashcap_config_dir()?.join("config.toml"))
}
