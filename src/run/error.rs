// src/run/error.rs

//! Script-level errors raised while evaluating statements and expressions.

use thiserror::Error;

use crate::errors::ShflowError;

/// An error in the running script. It ends the program with a fatal error
/// at the statement that raised it; it never aborts the engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("symbol '{0}' cannot be resolved")]
    UndefinedVariable(String),

    #[error("function '{0}' cannot be resolved")]
    UnknownFunction(String),

    #[error("function '{name}' expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("command failed with exit code {code}: {command}")]
    SysFailed { command: String, code: i32 },

    #[error("task-launching expression re-evaluated while recovering from a checkpoint")]
    LaunchDuringRecovery,

    #[error("{0}")]
    Message(String),
}

impl RuntimeError {
    pub fn type_mismatch(expected: impl ToString, found: impl ToString) -> Self {
        RuntimeError::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

/// Why expression evaluation stopped before producing a value.
#[derive(Debug)]
pub enum Interrupt {
    /// Script error; becomes a fatal error at the enclosing statement.
    Error(RuntimeError),
    /// `exit` executed inside a called function.
    Exit(i64),
    /// A fatal error already recorded by the thread (e.g. a failed wait
    /// inside a called function).
    Fatal,
    /// The engine itself failed; aborts the run.
    Engine(ShflowError),
}

impl From<RuntimeError> for Interrupt {
    fn from(e: RuntimeError) -> Self {
        Interrupt::Error(e)
    }
}

impl From<ShflowError> for Interrupt {
    fn from(e: ShflowError) -> Self {
        Interrupt::Engine(e)
    }
}

pub type EvalResult<T> = std::result::Result<T, Interrupt>;
