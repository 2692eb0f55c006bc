// src/config/mod.rs

//! Configuration loading and validation for shflow.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate basic invariants like non-zero limits (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_default, load_from_path};
pub use model::{ClusterSection, Config, ConfigSection, LocalSection, SshSection, TaskDefaults};
pub use validate::validate_config;
