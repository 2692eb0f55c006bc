// src/config/validate.rs

use regex::Regex;

use crate::config::model::Config;
use crate::errors::{Result, ShflowError};

/// Run basic semantic validation against a loaded configuration.
///
/// This checks:
/// - `poll_interval_ms` values are non-zero
/// - `[local].max_concurrent >= 1` when given
/// - `[ssh]` has a command and no empty host names
/// - `[cluster]` command templates are non-empty and the job id regex compiles
///
/// It does **not** check that hosts are reachable or that the scheduler
/// commands exist; those surface as task failures at run time.
pub fn validate_config(cfg: &Config) -> Result<()> {
    validate_global_config(cfg)?;
    validate_local(cfg)?;
    validate_ssh(cfg)?;
    validate_cluster(cfg)?;
    Ok(())
}

fn validate_global_config(cfg: &Config) -> Result<()> {
    if cfg.config.poll_interval_ms == 0 {
        return Err(ShflowError::ConfigError(
            "[config].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.task.cpus == 0 {
        return Err(ShflowError::ConfigError(
            "[task].cpus must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_local(cfg: &Config) -> Result<()> {
    if cfg.local.max_concurrent == Some(0) {
        return Err(ShflowError::ConfigError(
            "[local].max_concurrent must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_ssh(cfg: &Config) -> Result<()> {
    if cfg.ssh.command.trim().is_empty() {
        return Err(ShflowError::ConfigError(
            "[ssh].command must not be empty".to_string(),
        ));
    }
    if let Some(pos) = cfg.ssh.hosts.iter().position(|h| h.trim().is_empty()) {
        return Err(ShflowError::ConfigError(format!(
            "[ssh].hosts[{pos}] is empty"
        )));
    }
    Ok(())
}

fn validate_cluster(cfg: &Config) -> Result<()> {
    for (name, cmd) in [
        ("submit", &cfg.cluster.submit),
        ("stat", &cfg.cluster.stat),
        ("kill", &cfg.cluster.kill),
    ] {
        if cmd.is_empty() {
            return Err(ShflowError::ConfigError(format!(
                "[cluster].{name} must name a command"
            )));
        }
    }

    Regex::new(&cfg.cluster.job_id_regex).map_err(|e| {
        ShflowError::ConfigError(format!("[cluster].job_id_regex is invalid: {e}"))
    })?;

    if cfg.cluster.poll_interval_ms == 0 {
        return Err(ShflowError::ConfigError(
            "[cluster].poll_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}
