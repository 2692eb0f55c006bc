// src/errors.rs

//! Crate-wide error type and `Result` alias.

use thiserror::Error;

use crate::types::ExecutionerType;

#[derive(Error, Debug)]
pub enum ShflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Executioner '{0}' has no hosts")]
    NoHosts(ExecutionerType),

    #[error("Executioner '{0}' is not running")]
    ExecutionerStopped(ExecutionerType),

    #[error("Executioner registry already initialized; only one instance is allowed")]
    RegistryAlreadyInitialized,

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Compile error:\n{0}")]
    Compile(String),

    #[error("Engine invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ShflowError>;
