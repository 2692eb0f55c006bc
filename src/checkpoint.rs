// src/checkpoint.rs

//! Checkpoint files.
//!
//! A checkpoint is everything a fresh process needs to continue a program:
//! the program itself, the resume path, the scope and value stack as they
//! were at the resume point, and a snapshot of every task. It is written as
//! JSON through the [`FileSystem`] capability.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::errors::{Result, ShflowError};
use crate::fs::FileSystem;
use crate::lang::{NodeId, Program, Value};
use crate::run::RunMode;
use crate::scope::Scope;
use crate::task::TaskSnapshot;

/// Bumped whenever the file layout changes.
pub const CHECKPOINT_VERSION: u32 = 1;

pub const CHECKPOINT_EXTENSION: &str = "chp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    /// A `checkpoint` statement.
    Explicit,
    /// A `wait` (or the end-of-program join) found failed tasks.
    WaitFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub program: Program,
    pub resume_path: Vec<NodeId>,
    pub scope: Scope,
    pub stack: Vec<Value>,
    pub tasks: Vec<TaskSnapshot>,
    pub task_counter: u64,
    pub mode: RunMode,
    pub reason: CheckpointReason,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

impl Checkpoint {
    pub fn save(&self, fs: &dyn FileSystem, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs.write(path, &json)?;
        info!(
            path = %path.display(),
            reason = ?self.reason,
            tasks = self.tasks.len(),
            "checkpoint written"
        );
        Ok(())
    }

    /// Read a checkpoint. Files written by another format version are
    /// rejected before the rest of the document is looked at.
    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        let bytes = fs.read(path)?;
        let probe: VersionProbe = serde_json::from_slice(&bytes).map_err(|e| {
            ShflowError::Checkpoint(format!("{} is not a checkpoint file: {e}", path.display()))
        })?;
        if probe.version != CHECKPOINT_VERSION {
            return Err(ShflowError::Checkpoint(format!(
                "{} has version {}, expected {CHECKPOINT_VERSION}",
                path.display(),
                probe.version
            )));
        }

        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        if checkpoint.resume_path.is_empty() {
            return Err(ShflowError::Checkpoint(format!(
                "{} has an empty resume path",
                path.display()
            )));
        }
        debug!(path = %path.display(), program = %checkpoint.program.name, "checkpoint loaded");
        Ok(checkpoint)
    }
}

/// `<checkpoint_dir>/<program>.chp`, or in the current directory when no
/// checkpoint directory is configured.
pub fn default_path(config: &Config, program: &str) -> PathBuf {
    let dir = config
        .config
        .checkpoint_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    dir.join(format!("{program}.{CHECKPOINT_EXTENSION}"))
}
