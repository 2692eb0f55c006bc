// src/lang/check.rs

//! Symbol resolution pass run before a program starts.
//!
//! Reports references to undeclared variables, redeclarations in the same
//! frame, calls to unknown functions (or with the wrong number of
//! arguments) and `break`/`continue` outside of a loop. Frames are pushed
//! exactly where the interpreter pushes them, so a program that passes the
//! check never hits an unresolved name at run time unless a function reads
//! a global declared after the call.

use std::collections::HashMap;
use std::fmt;

use crate::lang::ast::{Expr, ExprKind, FunctionDecl, Program, Stmt, StmtKind};
use crate::lang::value::Type;
use crate::scope::Scope;

/// Name of the builtin global holding the script's command-line arguments.
pub const ARGS_VAR: &str = "args";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerMessage {
    pub line: u32,
    pub message: String,
}

impl fmt::Display for CompilerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Check the whole program. Top-level statements are checked first so that
/// function bodies can see every global.
pub fn check_program(program: &Program) -> Result<(), Vec<CompilerMessage>> {
    let mut checker = Checker {
        functions: HashMap::new(),
        scope: Scope::new(),
        messages: Vec::new(),
        loops: 0,
        switches: 0,
    };

    for function in &program.functions {
        if checker
            .functions
            .insert(function.name.as_str(), function.params.len())
            .is_some()
        {
            checker.error(
                function.line,
                format!("Duplicate function '{}'", function.name),
            );
        }
    }

    checker
        .scope
        .declare(ARGS_VAR, Type::list_of(Type::String), Type::list_of(Type::String).default_value());
    checker.stmts(&program.body);
    for function in &program.functions {
        checker.function(function);
    }

    if checker.messages.is_empty() {
        Ok(())
    } else {
        Err(checker.messages)
    }
}

struct Checker<'a> {
    functions: HashMap<&'a str, usize>,
    scope: Scope,
    messages: Vec<CompilerMessage>,
    loops: u32,
    switches: u32,
}

impl<'a> Checker<'a> {
    fn error(&mut self, line: u32, message: String) {
        self.messages.push(CompilerMessage { line, message });
    }

    fn function(&mut self, function: &FunctionDecl) {
        let (loops, switches) = (self.loops, self.switches);
        self.loops = 0;
        self.switches = 0;

        self.scope.push_function_frame();
        for param in &function.params {
            if self.scope.has_symbol(&param.name, true) {
                self.error(
                    function.line,
                    format!("Duplicate parameter '{}' in function '{}'", param.name, function.name),
                );
            }
            self.scope
                .declare(param.name.clone(), param.ty.clone(), param.ty.default_value());
        }
        self.stmts(&function.body);
        self.scope.pop_frame();

        self.loops = loops;
        self.switches = switches;
    }

    fn stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn block(&mut self, stmts: &[Stmt]) {
        self.scope.push_frame();
        self.stmts(stmts);
        self.scope.pop_frame();
    }

    fn in_loop(&mut self, f: impl FnOnce(&mut Self)) {
        self.loops += 1;
        f(self);
        self.loops -= 1;
    }

    fn stmt(&mut self, stmt: &Stmt) {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::VarDecl { name, ty, init } => {
                if let Some(init) = init {
                    self.expr(line, init);
                }
                if self.scope.has_symbol(name, true) {
                    self.error(line, format!("Duplicate local name '{name}'"));
                }
                self.scope.declare(name.clone(), ty.clone(), ty.default_value());
            }
            StmtKind::Assign { name, value } => {
                self.expr(line, value);
                self.resolve(line, name);
            }
            StmtKind::Expr { expr } | StmtKind::Print { expr, .. } => self.expr(line, expr),
            StmtKind::Block { body } => self.block(body),
            StmtKind::If { cond, then, else_ } => {
                self.expr(line, cond);
                self.block(then);
                if let Some(body) = else_ {
                    self.block(body);
                }
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                self.scope.push_frame();
                if let Some(init) = init {
                    self.stmt(init);
                }
                if let Some(cond) = cond {
                    self.expr(line, cond);
                }
                if let Some(update) = update {
                    self.stmt(update);
                }
                self.in_loop(|c| c.block(body));
                self.scope.pop_frame();
            }
            StmtKind::ForEach {
                var,
                ty,
                iterable,
                body,
            } => {
                self.expr(line, iterable);
                self.scope.push_frame();
                self.scope.declare(var.clone(), ty.clone(), ty.default_value());
                self.in_loop(|c| c.stmts(body));
                self.scope.pop_frame();
            }
            StmtKind::While { cond, body } => {
                self.expr(line, cond);
                self.in_loop(|c| c.block(body));
            }
            StmtKind::Switch {
                expr,
                cases,
                default,
            } => {
                self.expr(line, expr);
                self.switches += 1;
                for case in cases {
                    self.expr(line, &case.value);
                    self.block(&case.body);
                }
                if let Some(body) = default {
                    self.block(body);
                }
                self.switches -= 1;
            }
            StmtKind::Break => {
                if self.loops == 0 && self.switches == 0 {
                    self.error(line, "'break' outside of a loop or switch".to_string());
                }
            }
            StmtKind::Continue => {
                if self.loops == 0 {
                    self.error(line, "'continue' outside of a loop".to_string());
                }
            }
            StmtKind::Return { value: e }
            | StmtKind::Exit { code: e }
            | StmtKind::Wait { target: e }
            | StmtKind::Checkpoint { path: e } => {
                if let Some(e) = e {
                    self.expr(line, e);
                }
            }
            StmtKind::Kill { target } => self.expr(line, target),
        }
    }

    fn resolve(&mut self, line: u32, name: &str) {
        if !self.scope.has_symbol(name, false) {
            self.error(line, format!("Symbol '{name}' cannot be resolved"));
        }
    }

    fn expr(&mut self, line: u32, expr: &Expr) {
        match &expr.kind {
            ExprKind::Bool { .. } | ExprKind::Int { .. } | ExprKind::Real { .. } | ExprKind::Str { .. } => {}
            ExprKind::Var { name } => self.resolve(line, name),
            ExprKind::List { items } => {
                for item in items {
                    self.expr(line, item);
                }
            }
            ExprKind::Index { target, index } => {
                self.expr(line, target);
                self.expr(line, index);
            }
            ExprKind::Unary { operand, .. } => self.expr(line, operand),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.expr(line, lhs);
                self.expr(line, rhs);
            }
            ExprKind::Call { name, args } => {
                for arg in args {
                    self.expr(line, arg);
                }
                match self.functions.get(name.as_str()) {
                    None => self.error(line, format!("Function '{name}' cannot be resolved")),
                    Some(&arity) if arity != args.len() => self.error(
                        line,
                        format!(
                            "Function '{name}' expects {arity} argument(s), got {}",
                            args.len()
                        ),
                    ),
                    Some(_) => {}
                }
            }
            ExprKind::Task { command, options } => {
                self.expr(line, command);
                for e in options.exprs() {
                    self.expr(line, e);
                }
            }
            ExprKind::Sys { command } => self.expr(line, command),
            ExprKind::Native { arg, .. } => self.expr(line, arg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::ast::{BinaryOp, Case, Param};

    fn messages(program: &Program) -> Vec<String> {
        match check_program(program) {
            Ok(()) => Vec::new(),
            Err(msgs) => msgs.into_iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn undeclared_symbol_is_reported() {
        let program = Program::new("p", vec![Stmt::print(4, Expr::var("missing"))]);
        assert_eq!(
            messages(&program),
            vec!["line 4: Symbol 'missing' cannot be resolved"]
        );
    }

    #[test]
    fn builtin_args_is_declared() {
        let program = Program::new("p", vec![Stmt::print(1, Expr::var(ARGS_VAR))]);
        assert!(check_program(&program).is_ok());
    }

    #[test]
    fn redeclaration_in_same_frame_is_reported_but_shadowing_is_not() {
        let program = Program::new(
            "p",
            vec![
                Stmt::var_decl(1, "x", Type::Int, None),
                Stmt::new(
                    2,
                    StmtKind::Block {
                        body: vec![Stmt::var_decl(3, "x", Type::Int, None)],
                    },
                ),
                Stmt::var_decl(4, "x", Type::Int, None),
            ],
        );
        assert_eq!(messages(&program), vec!["line 4: Duplicate local name 'x'"]);
    }

    #[test]
    fn block_locals_are_not_visible_after_the_block() {
        let program = Program::new(
            "p",
            vec![
                Stmt::new(
                    1,
                    StmtKind::Block {
                        body: vec![Stmt::var_decl(2, "inner", Type::Int, None)],
                    },
                ),
                Stmt::print(3, Expr::var("inner")),
            ],
        );
        assert_eq!(
            messages(&program),
            vec!["line 3: Symbol 'inner' cannot be resolved"]
        );
    }

    #[test]
    fn functions_see_params_and_globals_but_not_caller_locals() {
        let program = Program::new(
            "p",
            vec![
                Stmt::var_decl(1, "g", Type::Int, Some(Expr::int(1))),
                Stmt::expr(2, Expr::call("f", vec![Expr::int(2)])),
            ],
        )
        .with_function(FunctionDecl::new(
            "f",
            vec![Param::new("n", Type::Int)],
            Type::Int,
            vec![Stmt::new(
                10,
                StmtKind::Return {
                    value: Some(Expr::binary(BinaryOp::Add, Expr::var("n"), Expr::var("g"))),
                },
            )],
        ));
        assert!(check_program(&program).is_ok());
    }

    #[test]
    fn unknown_function_and_bad_arity_are_reported() {
        let program = Program::new(
            "p",
            vec![
                Stmt::expr(1, Expr::call("nope", vec![])),
                Stmt::expr(2, Expr::call("f", vec![])),
            ],
        )
        .with_function(FunctionDecl::new(
            "f",
            vec![Param::new("n", Type::Int)],
            Type::Void,
            vec![],
        ));
        assert_eq!(
            messages(&program),
            vec![
                "line 1: Function 'nope' cannot be resolved",
                "line 2: Function 'f' expects 1 argument(s), got 0",
            ]
        );
    }

    #[test]
    fn break_is_allowed_in_switch_but_continue_is_not() {
        let program = Program::new(
            "p",
            vec![Stmt::new(
                1,
                StmtKind::Switch {
                    expr: Expr::int(1),
                    cases: vec![Case {
                        value: Expr::int(1),
                        body: vec![
                            Stmt::new(2, StmtKind::Break),
                            Stmt::new(3, StmtKind::Continue),
                        ],
                    }],
                    default: None,
                },
            )],
        );
        assert_eq!(
            messages(&program),
            vec!["line 3: 'continue' outside of a loop"]
        );
    }
}
