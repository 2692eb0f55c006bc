// src/run/stmt.rs

//! Statement execution.
//!
//! Each construct pushes frames and stack values in one fixed order. While
//! recovering, a construct on the resume path re-enters at the phase that
//! holds the resume point and takes the pushed frames and values from the
//! checkpoint instead of creating them.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointReason;
use crate::lang::ast::stmts_contain;
use crate::lang::{Case, Expr, NodeId, Stmt, StmtKind, Type, Value};
use crate::run::RunState;
use crate::run::error::{EvalResult, Interrupt, RuntimeError};
use crate::run::thread::ProgramThread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForPhase {
    Init,
    Cond,
    Body,
    Update,
}

impl ProgramThread {
    /// Run `stmts` in order, stopping at the first state other than `Ok`
    /// or `CheckpointRecover`.
    pub(super) fn run_stmts(&mut self, stmts: &[Stmt]) -> EvalResult<RunState> {
        for stmt in stmts {
            match self.run_stmt(stmt)? {
                RunState::Ok | RunState::CheckpointRecover => {}
                other => return Ok(other),
            }
        }
        Ok(RunState::Ok)
    }

    /// Run one statement. Script errors become `FatalError` here; only
    /// engine errors are returned as `Err`.
    pub(super) fn run_stmt(&mut self, stmt: &Stmt) -> EvalResult<RunState> {
        if let Some(target) = self.target() {
            if !stmt.contains(target) {
                return Ok(RunState::CheckpointRecover);
            }
        }
        self.line = stmt.line;

        match self.exec(stmt) {
            Ok(state) => Ok(state),
            Err(Interrupt::Error(e)) => Ok(self.fatal(stmt.line, e.to_string())),
            Err(Interrupt::Exit(code)) => Ok(RunState::Exit(code)),
            Err(Interrupt::Fatal) => Ok(RunState::FatalError),
            Err(engine @ Interrupt::Engine(_)) => Err(engine),
        }
    }

    fn exec(&mut self, stmt: &Stmt) -> EvalResult<RunState> {
        match &stmt.kind {
            StmtKind::VarDecl { name, ty, init } => {
                let value = match init {
                    Some(init) => ty.coerce(self.eval(init)?)?,
                    None => ty.default_value(),
                };
                self.scope.declare(name.clone(), ty.clone(), value);
                Ok(RunState::Ok)
            }
            StmtKind::Assign { name, value } => {
                let value = self.eval(value)?;
                let ty = self
                    .scope
                    .get_symbol(name)
                    .map(|s| s.ty.clone())
                    .ok_or_else(|| RuntimeError::UndefinedVariable(name.clone()))?;
                let value = ty.coerce(value)?;
                self.scope.set(name, value);
                Ok(RunState::Ok)
            }
            StmtKind::Expr { expr } => {
                self.eval(expr)?;
                Ok(RunState::Ok)
            }
            StmtKind::Print { expr, newline } => {
                let value = self.eval(expr)?;
                if self.replaying() {
                    return Ok(RunState::Ok);
                }
                let mut text = value.to_string();
                if *newline {
                    text.push('\n');
                }
                self.write_output(&text)?;
                Ok(RunState::Ok)
            }
            StmtKind::Block { body } => self.in_frame(|t| t.run_stmts(body)),
            StmtKind::If { cond, then, else_ } => self.exec_if(cond, then, else_.as_deref()),
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => self.exec_for(init.as_deref(), cond.as_ref(), update.as_deref(), body),
            StmtKind::ForEach {
                var,
                ty,
                iterable,
                body,
            } => self.exec_for_each(var, ty, iterable, body),
            StmtKind::While { cond, body } => self.exec_while(cond, body),
            StmtKind::Switch {
                expr,
                cases,
                default,
            } => self.exec_switch(expr, cases, default.as_deref()),
            StmtKind::Break => Ok(RunState::Break),
            StmtKind::Continue => Ok(RunState::Continue),
            StmtKind::Return { value } => {
                let value = match value {
                    Some(e) => self.eval(e)?,
                    None => Value::Void,
                };
                Ok(RunState::Return(value))
            }
            StmtKind::Exit { code } => {
                let code = match code {
                    Some(e) => self.eval(e)?.as_int()?,
                    None => 0,
                };
                info!(program = %self.program.name, code, "exit requested");
                Ok(RunState::Exit(code))
            }
            StmtKind::Wait { target } => self.exec_wait(stmt, target.as_ref()),
            StmtKind::Kill { target } => self.exec_kill(target),
            StmtKind::Checkpoint { path } => self.exec_checkpoint(stmt, path.as_ref()),
        }
    }

    fn target_in(&self, stmts: &[Stmt]) -> bool {
        self.target().is_some_and(|t| stmts_contain(stmts, t))
    }

    fn target_in_expr(&self, expr: &Expr) -> bool {
        self.target().is_some_and(|t| expr.contains(t))
    }

    fn exec_if(&mut self, cond: &Expr, then: &[Stmt], else_: Option<&[Stmt]>) -> EvalResult<RunState> {
        let take_then = if self.target_in(then) {
            true
        } else if else_.is_some_and(|body| self.target_in(body)) {
            false
        } else {
            self.eval(cond)?.as_bool()?
        };

        match (take_then, else_) {
            (true, _) => self.in_frame(|t| t.run_stmts(then)),
            (false, Some(body)) => self.in_frame(|t| t.run_stmts(body)),
            (false, None) => Ok(RunState::Ok),
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        update: Option<&Stmt>,
        body: &[Stmt],
    ) -> EvalResult<RunState> {
        let start = match self.target() {
            None => ForPhase::Init,
            Some(t) if init.is_some_and(|s| s.contains(t)) => ForPhase::Init,
            Some(t) if cond.is_some_and(|e| e.contains(t)) => ForPhase::Cond,
            Some(t) if stmts_contain(body, t) => ForPhase::Body,
            Some(t) if update.is_some_and(|s| s.contains(t)) => ForPhase::Update,
            Some(t) => return Err(self.misplaced_resume_point(t)),
        };

        self.in_frame(|t| t.for_loop(start, init, cond, update, body))
    }

    fn for_loop(
        &mut self,
        mut phase: ForPhase,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        update: Option<&Stmt>,
        body: &[Stmt],
    ) -> EvalResult<RunState> {
        loop {
            match phase {
                ForPhase::Init => {
                    if let Some(init) = init {
                        match self.run_stmt(init)? {
                            RunState::Ok | RunState::CheckpointRecover => {}
                            other => return Ok(other),
                        }
                    }
                    phase = ForPhase::Cond;
                }
                ForPhase::Cond => {
                    if let Some(cond) = cond {
                        if !self.eval(cond)?.as_bool()? {
                            return Ok(RunState::Ok);
                        }
                    }
                    phase = ForPhase::Body;
                }
                ForPhase::Body => {
                    match self.in_frame(|t| t.run_stmts(body))? {
                        RunState::Break => return Ok(RunState::Ok),
                        RunState::Ok | RunState::Continue | RunState::CheckpointRecover => {}
                        other => return Ok(other),
                    }
                    phase = ForPhase::Update;
                }
                ForPhase::Update => {
                    if let Some(update) = update {
                        match self.run_stmt(update)? {
                            RunState::Ok | RunState::CheckpointRecover => {}
                            other => return Ok(other),
                        }
                    }
                    phase = ForPhase::Cond;
                }
            }
        }
    }

    /// The list and the current index are kept on the value stack so a
    /// checkpoint taken inside the body resumes at the same element.
    fn exec_for_each(&mut self, var: &str, ty: &Type, iterable: &Expr, body: &[Stmt]) -> EvalResult<RunState> {
        let resume_in_body = self.recovering() && !self.target_in_expr(iterable);
        if resume_in_body && !self.target_in(body) {
            return Err(self.resume_target_lost());
        }
        let items = if resume_in_body {
            Value::Void
        } else {
            self.eval(iterable)?
        };

        let items = self.push_value(items)?;
        let result = match self.push_value(Value::Int(0)) {
            Ok(index) => {
                let result = self.for_each_iterations(var, ty, &items, &index, body);
                self.pop_values(1);
                result
            }
            Err(e) => Err(e),
        };
        self.pop_values(1);
        result
    }

    fn for_each_iterations(
        &mut self,
        var: &str,
        ty: &Type,
        items: &Value,
        index: &Value,
        body: &[Stmt],
    ) -> EvalResult<RunState> {
        let items = items.as_list()?;
        let mut i = usize::try_from(index.as_int()?).unwrap_or(0);

        while i < items.len() {
            self.set_top(Value::Int(i as i64))?;
            let item = &items[i];
            let state = self.in_frame(|t| {
                if !t.recovering() {
                    let value = ty.coerce(item.clone())?;
                    t.scope.declare(var, ty.clone(), value);
                }
                t.run_stmts(body)
            })?;

            match state {
                RunState::Break => return Ok(RunState::Ok),
                RunState::Ok | RunState::Continue | RunState::CheckpointRecover => {}
                other => return Ok(other),
            }
            i += 1;
        }
        Ok(RunState::Ok)
    }

    fn exec_while(&mut self, cond: &Expr, body: &[Stmt]) -> EvalResult<RunState> {
        let mut skip_cond = self.target_in(body);
        if self.recovering() && !skip_cond && !self.target_in_expr(cond) {
            return Err(self.resume_target_lost());
        }
        loop {
            if !skip_cond && !self.eval(cond)?.as_bool()? {
                return Ok(RunState::Ok);
            }
            skip_cond = false;

            match self.in_frame(|t| t.run_stmts(body))? {
                RunState::Break => return Ok(RunState::Ok),
                RunState::Ok | RunState::Continue | RunState::CheckpointRecover => {}
                other => return Ok(other),
            }
        }
    }

    /// The switch value and the fall-through flag live on the value stack
    /// for the duration of the switch.
    fn exec_switch(&mut self, expr: &Expr, cases: &[Case], default: Option<&[Stmt]>) -> EvalResult<RunState> {
        let resume_in_cases = self.recovering() && !self.target_in_expr(expr);
        let value = if resume_in_cases {
            Value::Void
        } else {
            self.eval(expr)?
        };

        let value = self.push_value(value)?;
        let result = match self.push_value(Value::Bool(false)) {
            Ok(_) => {
                let result = self.switch_cases(&value, cases, default);
                self.pop_values(1);
                result
            }
            Err(e) => Err(e),
        };
        self.pop_values(1);
        result
    }

    fn switch_cases(&mut self, value: &Value, cases: &[Case], default: Option<&[Stmt]>) -> EvalResult<RunState> {
        // While recovering, jump straight to the case (or default) holding
        // the resume point.
        let (start, resume_body) = match self.target() {
            None => (0, false),
            Some(t) => match cases
                .iter()
                .position(|c| c.value.contains(t) || stmts_contain(&c.body, t))
            {
                Some(i) => (i, stmts_contain(&cases[i].body, t)),
                None => (cases.len(), false),
            },
        };

        for (i, case) in cases.iter().enumerate().skip(start) {
            let fall_through = self.peek_value(0)?.as_bool()?;
            let selected = fall_through
                || (resume_body && i == start)
                || value.loose_eq(&self.eval(&case.value)?);
            if !selected {
                continue;
            }

            self.set_top(Value::Bool(true))?;
            match self.in_frame(|t| t.run_stmts(&case.body))? {
                RunState::Break => return Ok(RunState::Ok),
                RunState::Ok | RunState::CheckpointRecover => {}
                other => return Ok(other),
            }
        }

        match default {
            Some(body) => match self.in_frame(|t| t.run_stmts(body))? {
                RunState::Break => Ok(RunState::Ok),
                RunState::CheckpointRecover => Ok(RunState::Ok),
                other => Ok(other),
            },
            None => Ok(RunState::Ok),
        }
    }

    fn exec_checkpoint(&mut self, stmt: &Stmt, path: Option<&Expr>) -> EvalResult<RunState> {
        if self.at_resume_point(stmt.id) {
            self.resume_normal();
            return Ok(RunState::Ok);
        }
        if self.target() == Some(stmt.id) {
            return Err(self.misplaced_resume_point(stmt.id));
        }

        let file = match path {
            Some(e) => Some(PathBuf::from(self.eval(e)?.to_string())),
            None => None,
        };
        if self.replaying() {
            debug!(line = stmt.line, "checkpoint skipped while replaying");
            return Ok(RunState::Ok);
        }
        if !self.ctx.checkpoints {
            info!(line = stmt.line, "checkpoints disabled; not saving");
            return Ok(RunState::Ok);
        }

        let resume = self.resume_path(stmt.id);
        match self.save_checkpoint(resume, file, CheckpointReason::Explicit) {
            Ok(written) => {
                info!(line = stmt.line, path = %written.display(), "checkpoint saved");
                Ok(RunState::Ok)
            }
            Err(e) => {
                warn!(line = stmt.line, error = %e, "checkpoint failed");
                Err(RuntimeError::Message(format!("cannot write checkpoint: {e}")).into())
            }
        }
    }

    /// Record a failed wait: optionally checkpoint so the wait is retried
    /// on recovery, then fail the program.
    pub(super) fn wait_failed(&mut self, line: u32, resume_at: NodeId) -> RunState {
        let failed: Vec<String> = self
            .tasks
            .fatal_failures()
            .iter()
            .map(|t| t.to_string())
            .collect();
        warn!(line, failed = ?failed, "wait failed");

        let enabled = self.ctx.checkpoints && self.ctx.config().config.checkpoint_on_failure;
        if enabled && !self.replaying() {
            let resume = self.resume_path(resume_at);
            if let Err(e) = self.save_checkpoint(resume, None, CheckpointReason::WaitFailed) {
                warn!(line, error = %e, "failed to write checkpoint after failed wait");
            }
        }
        self.fatal(line, "Task/s failed.")
    }
}
