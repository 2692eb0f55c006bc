// src/run/expr.rs

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{Result, ShflowError};
use crate::exec::process::{run_captured, shell};
use crate::lang::{BinaryOp, Expr, ExprKind, FunctionDecl, NativeFn, NodeId, TaskOptions, UnaryOp, Value};
use crate::run::RunState;
use crate::run::error::{EvalResult, Interrupt, RuntimeError};
use crate::run::thread::ProgramThread;
use crate::task::{Resources, Task, TaskState, task_id};
use crate::types::ExecutionerType;

/// Nested user function calls allowed before the program is stopped.
const MAX_CALL_DEPTH: usize = 512;

impl ProgramThread {
    /// Evaluate `expr`.
    ///
    /// While recovering, sub-expressions that do not lead to the resume
    /// point are replayed and the call on the resume path is re-entered
    /// without evaluating its arguments again.
    pub(super) fn eval(&mut self, expr: &Expr) -> EvalResult<Value> {
        if let Some(target) = self.target() {
            if !expr.contains(target) {
                return self.replay(|t| t.eval_kind(expr));
            }
            if expr.id == target {
                return match &expr.kind {
                    ExprKind::Call { name, .. } => self.resume_call(expr.id, name),
                    _ => Err(self.misplaced_resume_point(target)),
                };
            }
        }
        self.eval_kind(expr)
    }

    fn eval_kind(&mut self, expr: &Expr) -> EvalResult<Value> {
        match &expr.kind {
            ExprKind::Bool { value } => Ok(Value::Bool(*value)),
            ExprKind::Int { value } => Ok(Value::Int(*value)),
            ExprKind::Real { value } => Ok(Value::Real(*value)),
            ExprKind::Str { value } => Ok(Value::Str(value.clone())),
            ExprKind::List { items } => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::List(values))
            }
            ExprKind::Var { name } => self
                .scope
                .get_symbol(name)
                .map(|s| s.value.clone())
                .ok_or_else(|| RuntimeError::UndefinedVariable(name.clone()).into()),
            ExprKind::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?.as_int()?;
                let items = target.as_list()?;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(|| {
                        RuntimeError::IndexOutOfBounds {
                            index,
                            len: items.len(),
                        }
                        .into()
                    })
            }
            ExprKind::Unary { op, operand } => {
                let value = self.eval(operand)?;
                Ok(unary(*op, value)?)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                // Short-circuit before touching the right-hand side.
                match (op, &lhs) {
                    (BinaryOp::And, Value::Bool(false)) => return Ok(Value::Bool(false)),
                    (BinaryOp::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
                    _ => {}
                }
                let rhs = self.eval(rhs)?;
                Ok(binary(*op, lhs, rhs)?)
            }
            ExprKind::Call { name, args } => {
                let function = self.function(name)?;
                if function.params.len() != args.len() {
                    return Err(RuntimeError::Arity {
                        name: name.clone(),
                        expected: function.params.len(),
                        found: args.len(),
                    }
                    .into());
                }
                let mut values = Vec::with_capacity(args.len());
                for (arg, param) in args.iter().zip(&function.params) {
                    values.push(param.ty.coerce(self.eval(arg)?)?);
                }
                self.invoke(expr.id, &function, Some(values))
            }
            ExprKind::Task { command, options } => self.launch_task(command, options),
            ExprKind::Sys { command } => self.run_sys(command),
            ExprKind::Native { func, arg } => {
                let id = self.eval(arg)?.to_string();
                self.native(*func, &id)
            }
        }
    }

    fn function(&self, name: &str) -> EvalResult<Arc<FunctionDecl>> {
        self.program
            .function(name)
            .cloned()
            .map(Arc::new)
            .ok_or_else(|| RuntimeError::UnknownFunction(name.to_string()).into())
    }

    /// Re-enter the call the checkpoint was taken in. Its arguments are
    /// already bound in the restored function frame.
    fn resume_call(&mut self, id: NodeId, name: &str) -> EvalResult<Value> {
        let function = self.function(name)?;
        self.advance_resume_path();
        debug!(function = %name, call = id, "re-entering function on the resume path");
        self.invoke(id, &function, None)
    }

    /// Run a function body in a function frame. `args` is `None` when the
    /// frame comes from a checkpoint.
    fn invoke(&mut self, call: NodeId, function: &FunctionDecl, args: Option<Vec<Value>>) -> EvalResult<Value> {
        if self.call_sites.len() >= MAX_CALL_DEPTH {
            return Err(RuntimeError::Message(format!(
                "call depth limit ({MAX_CALL_DEPTH}) exceeded in '{}'",
                function.name
            ))
            .into());
        }

        let caller_line = self.line;
        self.enter_frame(true)?;
        if let Some(args) = args {
            for (param, value) in function.params.iter().zip(args) {
                self.scope.declare(param.name.clone(), param.ty.clone(), value);
            }
        }
        self.call_sites.push(call);
        let result = self.run_stmts(&function.body);
        self.call_sites.pop();
        self.scope.pop_frame();
        self.line = caller_line;

        match result? {
            RunState::Return(value) => Ok(function.returns.coerce(value)?),
            RunState::Ok | RunState::CheckpointRecover => Ok(function.returns.default_value()),
            RunState::Exit(code) => Err(Interrupt::Exit(code)),
            RunState::FatalError => Err(Interrupt::Fatal),
            state @ (RunState::Break | RunState::Continue) => Err(ShflowError::Invariant(format!(
                "{state:?} escaped function '{}'",
                function.name
            ))
            .into()),
        }
    }

    fn launch_guard(&self) -> EvalResult<()> {
        if self.recovering() || self.replaying() {
            return Err(RuntimeError::LaunchDuringRecovery.into());
        }
        Ok(())
    }

    /// Evaluate a `task` expression: build the task from its options (or
    /// the `[task]` defaults), register it and submit it.
    fn launch_task(&mut self, command: &Expr, options: &TaskOptions) -> EvalResult<Value> {
        let line = self.line;
        let command = self.eval(command)?.to_string();
        let defaults = self.ctx.config().task.clone();

        let cpus = match &options.cpus {
            Some(e) => positive(self.eval(e)?.as_int()?, "cpus")?,
            None => u64::from(defaults.cpus),
        };
        let mem = match &options.mem {
            Some(e) => Some(positive(self.eval(e)?.as_int()?, "mem")?),
            None => defaults.mem,
        };
        let timeout = match &options.timeout {
            Some(e) => Some(seconds(self.eval(e)?.as_real()?)?),
            None => defaults.timeout_secs.map(Duration::from_secs),
        };
        let can_fail = match &options.can_fail {
            Some(e) => self.eval(e)?.as_bool()?,
            None => defaults.can_fail,
        };
        let system = match &options.system {
            Some(e) => ExecutionerType::parse_safe(&self.eval(e)?.to_string()),
            None => defaults.system,
        };
        let dependencies = match &options.after {
            Some(e) => {
                let ids = match self.eval(e)? {
                    Value::List(items) => items.iter().map(|v| v.to_string()).collect(),
                    other => vec![other.to_string()],
                };
                ids.iter()
                    .filter(|id| !id.is_empty())
                    .map(|id| {
                        self.tasks
                            .get(id)
                            .cloned()
                            .ok_or_else(|| RuntimeError::UnknownTask(id.clone()))
                    })
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => Vec::new(),
        };
        let when = match &options.when {
            Some(e) => self.eval(e)?.as_bool()?,
            None => true,
        };
        if !when {
            debug!(line, "task condition is false; not launching");
            return Ok(Value::Str(String::new()));
        }

        self.launch_guard()?;

        self.task_counter += 1;
        let id = task_id(&self.program.name, line, self.task_counter);
        let task = Arc::new(
            Task::new(id.clone(), command)
                .with_output_dir(&self.ctx.config().config.output_dir)
                .with_resources(Resources {
                    cpus: u32::try_from(cpus).unwrap_or(u32::MAX),
                    mem,
                    timeout,
                })
                .with_dependencies(dependencies)
                .with_can_fail(can_fail)
                .with_executioner(system)
                .with_line(line),
        );
        self.tasks.add(Arc::clone(&task));
        self.submit(&task)?;
        Ok(Value::Str(id))
    }

    /// Hand `task` to the executioner of its type. In a dry run the task is
    /// recorded as finished without running.
    pub(super) fn submit(&self, task: &Arc<Task>) -> Result<()> {
        if self.ctx.dry_run {
            info!(task = %task.id(), cmd = %task.command(), "dry run; task not executed");
            task.finish(TaskState::FinishedOk, Some(0), None);
            return Ok(());
        }

        match self.ctx.executioners.get(task.executioner()) {
            Ok(executioner) => task.submit(executioner.as_ref()),
            Err(e) => {
                // Not being able to build a backend fails the task, not the run.
                warn!(task = %task.id(), executioner = %task.executioner(), error = %e, "no executioner for task");
                task.finish(TaskState::Failed, None, Some(e.to_string()));
                Ok(())
            }
        }
    }

    /// Run a command synchronously and return its stdout.
    fn run_sys(&mut self, command: &Expr) -> EvalResult<Value> {
        let command = self.eval(command)?.to_string();
        self.launch_guard()?;
        if self.ctx.dry_run {
            info!(cmd = %command, "dry run; sys command not executed");
            return Ok(Value::Str(String::new()));
        }

        debug!(cmd = %command, "running sys command");
        let output = self
            .ctx
            .executioners
            .handle()
            .block_on(run_captured(shell(&command)))
            .map_err(|e| RuntimeError::Message(format!("{e:#}")))?;
        if !output.success() {
            return Err(RuntimeError::SysFailed {
                command,
                code: output.code,
            }
            .into());
        }
        Ok(Value::Str(output.stdout))
    }

    fn native(&mut self, func: NativeFn, id: &str) -> EvalResult<Value> {
        match func {
            NativeFn::Stdout | NativeFn::Stderr => {
                let Some(task) = self.tasks.get(id) else {
                    return Ok(Value::Str(String::new()));
                };
                let path = match func {
                    NativeFn::Stdout => task.stdout_path(),
                    _ => task.stderr_path(),
                };
                Ok(Value::Str(self.read_output(path)))
            }
            _ => {
                let task = self
                    .tasks
                    .get(id)
                    .ok_or_else(|| RuntimeError::UnknownTask(id.to_string()))?;
                Ok(match func {
                    NativeFn::ExitCode => Value::Int(task.exit_code().map_or(-1, i64::from)),
                    NativeFn::IsDone => Value::Bool(task.is_done()),
                    NativeFn::IsDoneOk => Value::Bool(task.is_done_ok()),
                    _ => Value::Str(task.state().as_str().to_string()),
                })
            }
        }
    }

    /// Task output read through the data-source capability; missing output
    /// reads as empty.
    fn read_output(&self, path: &Path) -> String {
        let fs = &self.ctx.fs;
        if !fs.exists(path) {
            return String::new();
        }
        if !fs.is_downloaded(path) {
            if let Err(e) = fs.download(path) {
                warn!(path = %path.display(), error = %e, "failed to download task output");
                return String::new();
            }
        }
        fs.read_to_string(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "failed to read task output");
            String::new()
        })
    }
}

fn positive(value: i64, option: &str) -> std::result::Result<u64, RuntimeError> {
    u64::try_from(value)
        .map_err(|_| RuntimeError::Message(format!("task option '{option}' must not be negative, got {value}")))
}

fn seconds(value: f64) -> std::result::Result<Duration, RuntimeError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| RuntimeError::Message(format!("invalid task timeout {value}")))
}

fn unary(op: UnaryOp, value: Value) -> std::result::Result<Value, RuntimeError> {
    match (op, value) {
        (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(i.wrapping_neg())),
        (UnaryOp::Neg, Value::Real(r)) => Ok(Value::Real(-r)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, other) => Err(RuntimeError::type_mismatch("number", other.type_name())),
        (UnaryOp::Not, other) => Err(RuntimeError::type_mismatch("bool", other.type_name())),
    }
}

pub(crate) fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> std::result::Result<Value, RuntimeError> {
    use BinaryOp::*;

    match op {
        Eq => Ok(Value::Bool(lhs.loose_eq(&rhs))),
        Ne => Ok(Value::Bool(!lhs.loose_eq(&rhs))),
        And | Or => {
            let (a, b) = (lhs.as_bool()?, rhs.as_bool()?);
            Ok(Value::Bool(if op == And { a && b } else { a || b }))
        }
        Lt | Le | Gt | Ge => {
            let ordering = compare(&lhs, &rhs)?;
            Ok(Value::Bool(match op {
                Lt => ordering == Ordering::Less,
                Le => ordering != Ordering::Greater,
                Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        Add => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(b))),
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (Value::List(mut a), item) => {
                a.push(item);
                Ok(Value::List(a))
            }
            (a @ Value::Str(_), b) | (a, b @ Value::Str(_)) => Ok(Value::Str(format!("{a}{b}"))),
            (a, b) => Ok(Value::Real(a.as_real()? + b.as_real()?)),
        },
        Sub | Mul | Div | Mod => match (lhs, rhs) {
            (Value::Int(a), Value::Int(b)) => match op {
                Sub => Ok(Value::Int(a.wrapping_sub(b))),
                Mul => Ok(Value::Int(a.wrapping_mul(b))),
                _ if b == 0 => Err(RuntimeError::DivisionByZero),
                Div => Ok(Value::Int(a.wrapping_div(b))),
                _ => Ok(Value::Int(a.wrapping_rem(b))),
            },
            (a, b) => {
                let (a, b) = (a.as_real()?, b.as_real()?);
                match op {
                    Sub => Ok(Value::Real(a - b)),
                    Mul => Ok(Value::Real(a * b)),
                    _ if b == 0.0 => Err(RuntimeError::DivisionByZero),
                    Div => Ok(Value::Real(a / b)),
                    _ => Ok(Value::Real(a % b)),
                }
            }
        },
    }
}

fn compare(lhs: &Value, rhs: &Value) -> std::result::Result<Ordering, RuntimeError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (a, b) => {
            let (a, b) = (a.as_real()?, b.as_real()?);
            a.partial_cmp(&b)
                .ok_or_else(|| RuntimeError::Message("cannot compare NaN".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_concatenate_with_anything() {
        assert_eq!(
            binary(BinaryOp::Add, Value::from("n="), Value::Int(3)),
            Ok(Value::from("n=3"))
        );
        assert_eq!(
            binary(BinaryOp::Add, Value::Int(3), Value::from("x")),
            Ok(Value::from("3x"))
        );
    }

    #[test]
    fn integer_division_by_zero_is_an_error() {
        assert_eq!(
            binary(BinaryOp::Div, Value::Int(1), Value::Int(0)),
            Err(RuntimeError::DivisionByZero)
        );
        assert_eq!(
            binary(BinaryOp::Mod, Value::Int(7), Value::Int(4)),
            Ok(Value::Int(3))
        );
    }

    #[test]
    fn mixed_arithmetic_widens_to_real() {
        assert_eq!(
            binary(BinaryOp::Mul, Value::Int(2), Value::Real(1.5)),
            Ok(Value::Real(3.0))
        );
        assert_eq!(
            binary(BinaryOp::Lt, Value::Int(2), Value::Real(2.5)),
            Ok(Value::Bool(true))
        );
    }

    #[test]
    fn lists_concatenate_and_append() {
        let joined = binary(
            BinaryOp::Add,
            Value::List(vec![Value::Int(1)]),
            Value::List(vec![Value::Int(2)]),
        );
        assert_eq!(joined, Ok(Value::List(vec![Value::Int(1), Value::Int(2)])));

        let appended = binary(BinaryOp::Add, Value::List(vec![]), Value::from("a"));
        assert_eq!(appended, Ok(Value::List(vec![Value::from("a")])));
    }

    #[test]
    fn negation_and_not() {
        assert_eq!(unary(UnaryOp::Neg, Value::Int(4)), Ok(Value::Int(-4)));
        assert_eq!(unary(UnaryOp::Not, Value::Bool(true)), Ok(Value::Bool(false)));
        assert!(unary(UnaryOp::Not, Value::Int(1)).is_err());
    }
}
