// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::Config;
use crate::config::validate::validate_config;
use crate::errors::{Result, ShflowError};

/// Load a configuration file from a given path and return the raw `Config`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        ShflowError::ConfigError(format!("reading config file at {:?}: {e}", path))
    })?;

    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

/// Load a configuration file from path and run basic validation.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Config> {
    let config = load_from_path(&path)?;
    validate_config(&config)?;
    Ok(config)
}

/// Config used when `--config` is not given: `shflow.toml` in the current
/// directory if it exists, built-in defaults otherwise.
pub fn load_default() -> Result<Config> {
    let path = default_config_path();
    if path.is_file() {
        load_and_validate(path)
    } else {
        Ok(Config::default())
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("shflow.toml")
}
