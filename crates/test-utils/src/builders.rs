#![allow(dead_code)]

use std::path::Path;

use shflow::config::{ClusterSection, Config};
use shflow::lang::{
    BinaryOp, Case, Expr, FunctionDecl, Param, Program, Stmt, StmtKind, TaskOptions, Type,
};
use shflow::types::ExecutionerType;

/// Builder for `Config` to simplify test setup.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Task output under `<dir>/out`, checkpoints under `<dir>/ckpt`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new()
            .output_dir(&dir.join("out"))
            .checkpoint_dir(&dir.join("ckpt"))
    }

    pub fn output_dir(mut self, dir: &Path) -> Self {
        self.config.config.output_dir = dir.to_path_buf();
        self
    }

    pub fn checkpoint_dir(mut self, dir: &Path) -> Self {
        self.config.config.checkpoint_dir = Some(dir.to_path_buf());
        self
    }

    pub fn checkpoint_on_failure(mut self, val: bool) -> Self {
        self.config.config.checkpoint_on_failure = val;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.config.poll_interval_ms = ms;
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.local.max_concurrent = Some(n);
        self
    }

    pub fn default_system(mut self, system: ExecutionerType) -> Self {
        self.config.task.system = system;
        self
    }

    pub fn ssh(mut self, command: &str, options: &[&str], hosts: &[&str]) -> Self {
        self.config.ssh.command = command.to_string();
        self.config.ssh.options = options.iter().map(|s| s.to_string()).collect();
        self.config.ssh.hosts = hosts.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn cluster(mut self, cluster: ClusterSection) -> Self {
        self.config.cluster = cluster;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Terse constructors for program trees. Line numbers are passed
/// explicitly; task ids are derived from them.
pub mod ast {
    use super::*;

    pub fn program(name: &str, body: Vec<Stmt>) -> Program {
        Program::new(name, body)
    }

    pub fn function(name: &str, params: &[(&str, Type)], returns: Type, body: Vec<Stmt>) -> FunctionDecl {
        FunctionDecl::new(
            name,
            params.iter().map(|(n, t)| Param::new(*n, t.clone())).collect(),
            returns,
            body,
        )
    }

    // ---- expressions ----------------------------------------------------

    pub fn int(v: i64) -> Expr {
        Expr::int(v)
    }

    pub fn s(v: &str) -> Expr {
        Expr::str(v)
    }

    pub fn var(name: &str) -> Expr {
        Expr::var(name)
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::call(name, args)
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, lhs, rhs)
    }

    pub fn lt(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Lt, lhs, rhs)
    }

    /// `task(command)` with default options.
    pub fn task(command: &str) -> Expr {
        Expr::task(Expr::str(command), TaskOptions::default())
    }

    pub fn task_can_fail(command: &str) -> Expr {
        Expr::task(
            Expr::str(command),
            TaskOptions {
                can_fail: Some(Box::new(Expr::bool(true))),
                ..TaskOptions::default()
            },
        )
    }

    pub fn task_on(command: &str, system: ExecutionerType) -> Expr {
        Expr::task(
            Expr::str(command),
            TaskOptions {
                system: Some(Box::new(Expr::str(system.as_str()))),
                ..TaskOptions::default()
            },
        )
    }

    // ---- statements -----------------------------------------------------

    pub fn decl(line: u32, name: &str, ty: Type, init: Expr) -> Stmt {
        Stmt::var_decl(line, name, ty, Some(init))
    }

    pub fn assign(line: u32, name: &str, value: Expr) -> Stmt {
        Stmt::assign(line, name, value)
    }

    pub fn expr(line: u32, e: Expr) -> Stmt {
        Stmt::expr(line, e)
    }

    pub fn print(line: u32, e: Expr) -> Stmt {
        Stmt::print(line, e)
    }

    pub fn wait_all(line: u32) -> Stmt {
        Stmt::wait(line, None)
    }

    pub fn wait_on(line: u32, target: Expr) -> Stmt {
        Stmt::wait(line, Some(target))
    }

    pub fn kill(line: u32, target: Expr) -> Stmt {
        Stmt::new(line, StmtKind::Kill { target })
    }

    pub fn checkpoint(line: u32) -> Stmt {
        Stmt::checkpoint(line, None)
    }

    pub fn brk(line: u32) -> Stmt {
        Stmt::new(line, StmtKind::Break)
    }

    pub fn ret(line: u32, value: Expr) -> Stmt {
        Stmt::new(line, StmtKind::Return { value: Some(value) })
    }

    pub fn exit(line: u32, code: i64) -> Stmt {
        Stmt::new(line, StmtKind::Exit { code: Some(Expr::int(code)) })
    }

    pub fn if_then(line: u32, cond: Expr, then: Vec<Stmt>) -> Stmt {
        Stmt::new(line, StmtKind::If { cond, then, else_: None })
    }

    /// `for (var <name> int = from; <name> < to; <name> = <name> + 1) { body }`
    pub fn for_range(line: u32, name: &str, from: i64, to: i64, body: Vec<Stmt>) -> Stmt {
        Stmt::new(
            line,
            StmtKind::For {
                init: Some(Box::new(decl(line, name, Type::Int, int(from)))),
                cond: Some(lt(var(name), int(to))),
                update: Some(Box::new(assign(line, name, add(var(name), int(1))))),
                body,
            },
        )
    }

    pub fn for_each(line: u32, name: &str, ty: Type, iterable: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::new(
            line,
            StmtKind::ForEach {
                var: name.to_string(),
                ty,
                iterable,
                body,
            },
        )
    }

    pub fn switch(line: u32, value: Expr, cases: Vec<(Expr, Vec<Stmt>)>, default: Option<Vec<Stmt>>) -> Stmt {
        Stmt::new(
            line,
            StmtKind::Switch {
                expr: value,
                cases: cases
                    .into_iter()
                    .map(|(value, body)| Case { value, body })
                    .collect(),
                default,
            },
        )
    }
}
