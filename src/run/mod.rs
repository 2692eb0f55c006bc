// src/run/mod.rs

//! Run-state interpreter.
//!
//! A [`ProgramThread`] walks the AST sequentially. Every statement returns a
//! [`RunState`] that enclosing constructs inspect: loops consume `Break` and
//! `Continue`, function calls consume `Return`, and the program root
//! consumes everything else.
//!
//! - [`thread`] owns the thread state, the program root and checkpoint
//!   save/recover.
//! - [`stmt`] executes statements, including their recovery variants.
//! - [`expr`] evaluates expressions, task launches and natives.
//! - [`wait`] implements `wait`, `kill` and the end-of-program join.

mod error;
mod expr;
mod stmt;
mod thread;
mod wait;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::lang::{NodeId, Value};
use crate::task::Task;

pub use error::{EvalResult, Interrupt, RuntimeError};
pub use thread::{ProgramThread, ThreadContext};

/// Control signal returned by every statement.
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Ok,
    Break,
    Continue,
    Return(Value),
    Exit(i64),
    FatalError,
    /// The statement was skipped because it does not lead to the resume
    /// point of the checkpoint being recovered.
    CheckpointRecover,
}

/// Whether the thread is executing normally or replaying its way back to a
/// checkpoint's resume point.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Normal,
    /// `path` holds the active call-site ids followed by the resume
    /// statement id.
    Recover { path: Vec<NodeId> },
}

/// The error that ended the program, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    pub line: u32,
    pub message: String,
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Result of running a program to the end.
#[derive(Debug)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub fatal: Option<FatalError>,
    /// Tasks that failed without `can_fail`.
    pub failed_tasks: Vec<Arc<Task>>,
    /// The last checkpoint written during the run.
    pub checkpoint: Option<PathBuf>,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
