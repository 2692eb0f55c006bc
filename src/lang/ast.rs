// src/lang/ast.rs

//! Abstract syntax tree consumed by the interpreter.
//!
//! The tree is produced by an external front-end and loaded from JSON.
//! Every statement and expression carries a node id assigned in preorder by
//! [`Program::assign_ids`]; a node's subtree covers the id range
//! `[id, end)`. Checkpoints refer to resume points by these ids.

use serde::{Deserialize, Serialize};

use crate::lang::value::Type;

pub type NodeId = u32;

/// Resume point used for the implicit wait at the end of the program.
pub const PROGRAM_END: NodeId = NodeId::MAX;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    #[serde(default)]
    pub functions: Vec<FunctionDecl>,
    #[serde(default)]
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default = "void_type")]
    pub returns: Type,
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub line: u32,
}

fn void_type() -> Type {
    Type::Void
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    #[serde(default)]
    pub id: NodeId,
    #[serde(default)]
    pub end: NodeId,
    #[serde(default)]
    pub line: u32,
    #[serde(flatten)]
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stmt", rename_all = "snake_case")]
pub enum StmtKind {
    VarDecl {
        name: String,
        #[serde(rename = "type")]
        ty: Type,
        #[serde(default)]
        init: Option<Expr>,
    },
    Assign {
        name: String,
        value: Expr,
    },
    Expr {
        expr: Expr,
    },
    Block {
        body: Vec<Stmt>,
    },
    If {
        cond: Expr,
        then: Vec<Stmt>,
        #[serde(default, rename = "else")]
        else_: Option<Vec<Stmt>>,
    },
    For {
        #[serde(default)]
        init: Option<Box<Stmt>>,
        #[serde(default)]
        cond: Option<Expr>,
        #[serde(default)]
        update: Option<Box<Stmt>>,
        body: Vec<Stmt>,
    },
    ForEach {
        var: String,
        #[serde(rename = "type")]
        ty: Type,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Switch {
        expr: Expr,
        #[serde(default)]
        cases: Vec<Case>,
        #[serde(default)]
        default: Option<Vec<Stmt>>,
    },
    Break,
    Continue,
    Return {
        #[serde(default)]
        value: Option<Expr>,
    },
    Exit {
        #[serde(default)]
        code: Option<Expr>,
    },
    Wait {
        #[serde(default)]
        target: Option<Expr>,
    },
    Kill {
        target: Expr,
    },
    Checkpoint {
        #[serde(default)]
        path: Option<Expr>,
    },
    Print {
        expr: Expr,
        #[serde(default)]
        newline: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub value: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(default)]
    pub id: NodeId,
    #[serde(default)]
    pub end: NodeId,
    #[serde(flatten)]
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "expr", rename_all = "snake_case")]
pub enum ExprKind {
    Bool {
        value: bool,
    },
    Int {
        value: i64,
    },
    Real {
        value: f64,
    },
    Str {
        value: String,
    },
    List {
        items: Vec<Expr>,
    },
    Var {
        name: String,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    /// Launch a task; evaluates to the task id.
    Task {
        command: Box<Expr>,
        #[serde(default)]
        options: TaskOptions,
    },
    /// Run a command synchronously; evaluates to its stdout.
    Sys {
        command: Box<Expr>,
    },
    Native {
        func: NativeFn,
        arg: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Built-in functions that read task state. Each takes a task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NativeFn {
    Stdout,
    Stderr,
    ExitCode,
    IsDone,
    IsDoneOk,
    TaskState,
}

/// Options of a `task` expression. Missing options take the `[task]`
/// defaults from the configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOptions {
    #[serde(default)]
    pub cpus: Option<Box<Expr>>,
    /// Memory limit in bytes.
    #[serde(default)]
    pub mem: Option<Box<Expr>>,
    /// Wall-time limit in seconds.
    #[serde(default)]
    pub timeout: Option<Box<Expr>>,
    #[serde(default)]
    pub can_fail: Option<Box<Expr>>,
    /// Executioner name, e.g. `"ssh"`.
    #[serde(default)]
    pub system: Option<Box<Expr>>,
    /// Task id or list of task ids that must finish first.
    #[serde(default)]
    pub after: Option<Box<Expr>>,
    /// The task is not launched when this is false; the expression then
    /// evaluates to an empty id.
    #[serde(default)]
    pub when: Option<Box<Expr>>,
}

impl TaskOptions {
    fn exprs_mut(&mut self) -> impl Iterator<Item = &mut Box<Expr>> {
        [
            &mut self.cpus,
            &mut self.mem,
            &mut self.timeout,
            &mut self.can_fail,
            &mut self.system,
            &mut self.after,
            &mut self.when,
        ]
        .into_iter()
        .flatten()
    }

    pub fn exprs(&self) -> impl Iterator<Item = &Expr> {
        [
            &self.cpus,
            &self.mem,
            &self.timeout,
            &self.can_fail,
            &self.system,
            &self.after,
            &self.when,
        ]
        .into_iter()
        .flatten()
        .map(|e| e.as_ref())
    }
}

impl Program {
    pub fn new(name: impl Into<String>, body: Vec<Stmt>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            body,
        }
    }

    pub fn with_function(mut self, function: FunctionDecl) -> Self {
        self.functions.push(function);
        self
    }

    /// Number every node in preorder, functions first. Ids start at 1.
    ///
    /// The numbering only depends on the tree shape, so a program loaded
    /// back from a checkpoint gets the same ids.
    pub fn assign_ids(&mut self) {
        let mut next: NodeId = 1;
        for function in &mut self.functions {
            number_stmts(&mut function.body, &mut next);
        }
        number_stmts(&mut self.body, &mut next);
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>, params: Vec<Param>, returns: Type, body: Vec<Stmt>) -> Self {
        Self {
            name: name.into(),
            params,
            returns,
            body,
            line: 0,
        }
    }
}

impl Param {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

fn number_stmts(stmts: &mut [Stmt], next: &mut NodeId) {
    for stmt in stmts {
        stmt.number(next);
    }
}

/// True when `id` lies inside one of `stmts`.
pub fn stmts_contain(stmts: &[Stmt], id: NodeId) -> bool {
    stmts.iter().any(|s| s.contains(id))
}

impl Stmt {
    pub fn new(line: u32, kind: StmtKind) -> Self {
        Self {
            id: 0,
            end: 0,
            line,
            kind,
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.id <= id && id < self.end
    }

    fn number(&mut self, next: &mut NodeId) {
        self.id = *next;
        *next += 1;
        match &mut self.kind {
            StmtKind::VarDecl { init, .. } => {
                if let Some(e) = init {
                    e.number(next);
                }
            }
            StmtKind::Assign { value, .. } => value.number(next),
            StmtKind::Expr { expr } | StmtKind::Print { expr, .. } => expr.number(next),
            StmtKind::Block { body } => number_stmts(body, next),
            StmtKind::If { cond, then, else_ } => {
                cond.number(next);
                number_stmts(then, next);
                if let Some(body) = else_ {
                    number_stmts(body, next);
                }
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                if let Some(s) = init {
                    s.number(next);
                }
                if let Some(e) = cond {
                    e.number(next);
                }
                if let Some(s) = update {
                    s.number(next);
                }
                number_stmts(body, next);
            }
            StmtKind::ForEach { iterable, body, .. } => {
                iterable.number(next);
                number_stmts(body, next);
            }
            StmtKind::While { cond, body } => {
                cond.number(next);
                number_stmts(body, next);
            }
            StmtKind::Switch {
                expr,
                cases,
                default,
            } => {
                expr.number(next);
                for case in cases {
                    case.value.number(next);
                    number_stmts(&mut case.body, next);
                }
                if let Some(body) = default {
                    number_stmts(body, next);
                }
            }
            StmtKind::Break | StmtKind::Continue => {}
            StmtKind::Return { value: e }
            | StmtKind::Exit { code: e }
            | StmtKind::Wait { target: e }
            | StmtKind::Checkpoint { path: e } => {
                if let Some(e) = e {
                    e.number(next);
                }
            }
            StmtKind::Kill { target } => target.number(next),
        }
        self.end = *next;
    }

    pub fn var_decl(line: u32, name: impl Into<String>, ty: Type, init: Option<Expr>) -> Self {
        Self::new(
            line,
            StmtKind::VarDecl {
                name: name.into(),
                ty,
                init,
            },
        )
    }

    pub fn assign(line: u32, name: impl Into<String>, value: Expr) -> Self {
        Self::new(
            line,
            StmtKind::Assign {
                name: name.into(),
                value,
            },
        )
    }

    pub fn expr(line: u32, expr: Expr) -> Self {
        Self::new(line, StmtKind::Expr { expr })
    }

    pub fn print(line: u32, expr: Expr) -> Self {
        Self::new(
            line,
            StmtKind::Print {
                expr,
                newline: true,
            },
        )
    }

    pub fn wait(line: u32, target: Option<Expr>) -> Self {
        Self::new(line, StmtKind::Wait { target })
    }

    pub fn checkpoint(line: u32, path: Option<Expr>) -> Self {
        Self::new(line, StmtKind::Checkpoint { path })
    }
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self { id: 0, end: 0, kind }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.id <= id && id < self.end
    }

    fn number(&mut self, next: &mut NodeId) {
        self.id = *next;
        *next += 1;
        match &mut self.kind {
            ExprKind::Bool { .. }
            | ExprKind::Int { .. }
            | ExprKind::Real { .. }
            | ExprKind::Str { .. }
            | ExprKind::Var { .. } => {}
            ExprKind::List { items } | ExprKind::Call { args: items, .. } => {
                for item in items {
                    item.number(next);
                }
            }
            ExprKind::Index { target, index } => {
                target.number(next);
                index.number(next);
            }
            ExprKind::Unary { operand, .. } => operand.number(next),
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.number(next);
                rhs.number(next);
            }
            ExprKind::Task { command, options } => {
                command.number(next);
                for e in options.exprs_mut() {
                    e.number(next);
                }
            }
            ExprKind::Sys { command } => command.number(next),
            ExprKind::Native { arg, .. } => arg.number(next),
        }
        self.end = *next;
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ExprKind::Bool { value })
    }

    pub fn int(value: i64) -> Self {
        Self::new(ExprKind::Int { value })
    }

    pub fn real(value: f64) -> Self {
        Self::new(ExprKind::Real { value })
    }

    pub fn str(value: impl Into<String>) -> Self {
        Self::new(ExprKind::Str {
            value: value.into(),
        })
    }

    pub fn list(items: Vec<Expr>) -> Self {
        Self::new(ExprKind::List { items })
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Var { name: name.into() })
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::new(ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            name: name.into(),
            args,
        })
    }

    pub fn task(command: Expr, options: TaskOptions) -> Self {
        Self::new(ExprKind::Task {
            command: Box::new(command),
            options,
        })
    }

    pub fn sys(command: Expr) -> Self {
        Self::new(ExprKind::Sys {
            command: Box::new(command),
        })
    }

    pub fn native(func: NativeFn, arg: Expr) -> Self {
        Self::new(ExprKind::Native {
            func,
            arg: Box::new(arg),
        })
    }
}
