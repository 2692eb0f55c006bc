// src/lang/mod.rs

//! Script language model: the AST handed over by the front-end, runtime
//! values, and the symbol resolution pass.

pub mod ast;
pub mod check;
pub mod value;

pub use ast::{
    BinaryOp, Case, Expr, ExprKind, FunctionDecl, NativeFn, NodeId, Param, Program, Stmt,
    StmtKind, TaskOptions, UnaryOp, PROGRAM_END,
};
pub use check::{check_program, CompilerMessage, ARGS_VAR};
pub use value::{Type, Value};

use crate::errors::{Result, ShflowError};

/// Number the program's nodes and run the symbol resolution pass.
///
/// Errors are joined into a single [`ShflowError::Compile`], one message
/// per line.
pub fn prepare(program: &mut Program) -> Result<()> {
    program.assign_ids();
    check_program(program).map_err(|messages| {
        ShflowError::Compile(
            messages
                .iter()
                .map(|m| m.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })
}
