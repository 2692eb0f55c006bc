// src/run/thread.rs

use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::checkpoint::{self, CHECKPOINT_VERSION, Checkpoint, CheckpointReason};
use crate::config::Config;
use crate::errors::{Result, ShflowError};
use crate::exec::Executioners;
use crate::fs::FileSystem;
use crate::lang::{self, ARGS_VAR, NodeId, PROGRAM_END, Program, Type, Value};
use crate::run::error::{EvalResult, Interrupt};
use crate::run::{FatalError, RunMode, RunOutcome, RunState};
use crate::scope::{Frame, Scope};
use crate::task::{TaskRegistry, TaskState};

/// Everything a program thread needs from the outside world.
pub struct ThreadContext {
    pub executioners: Arc<Executioners>,
    pub fs: Arc<dyn FileSystem>,
    /// Destination of `print`.
    pub output: Box<dyn Write + Send>,
    /// Write checkpoint files at all.
    pub checkpoints: bool,
    /// Record tasks as finished without running them; `sys` returns "".
    pub dry_run: bool,
}

impl ThreadContext {
    pub fn new(executioners: Arc<Executioners>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            executioners,
            fs,
            output: Box::new(std::io::stdout()),
            checkpoints: true,
            dry_run: false,
        }
    }

    pub fn with_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = output;
        self
    }

    pub fn with_checkpoints(mut self, enabled: bool) -> Self {
        self.checkpoints = enabled;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &Config {
        self.executioners.config()
    }
}

/// One sequential thread of a running program.
pub struct ProgramThread {
    pub(super) program: Arc<Program>,
    pub(super) ctx: ThreadContext,
    pub(super) scope: Scope,
    /// Values pushed by `switch` and `for-each`; saved with checkpoints.
    pub(super) stack: Vec<Value>,
    pub(super) tasks: TaskRegistry,
    pub(super) task_counter: u64,
    pub(super) mode: RunMode,
    /// Position in the resume path while recovering.
    pub(super) pos: usize,
    pub(super) restored_frames: VecDeque<Frame>,
    pub(super) restored_stack: VecDeque<Value>,
    /// Ids of the call expressions currently executing, outermost first.
    pub(super) call_sites: Vec<NodeId>,
    /// Non-zero while off-path expressions are re-evaluated during recovery.
    pub(super) replay_depth: usize,
    pub(super) line: u32,
    pub(super) fatal: Option<FatalError>,
    pub(super) last_checkpoint: Option<PathBuf>,
}

impl ProgramThread {
    /// Prepare `program` for a fresh run. Symbol resolution errors are
    /// returned here; the program never starts.
    pub fn new(mut program: Program, args: Vec<String>, ctx: ThreadContext) -> Result<Self> {
        lang::prepare(&mut program)?;

        let mut scope = Scope::new();
        scope.declare(
            ARGS_VAR,
            Type::list_of(Type::String),
            Value::List(args.into_iter().map(Value::Str).collect()),
        );

        Ok(Self::with_state(program, ctx, scope, RunMode::Normal))
    }

    /// Rebuild a thread from a checkpoint and put it in recovery mode.
    ///
    /// Tasks that finished OK, and failed tasks that may fail, are kept.
    /// Every other task is reset and submitted again to the executioner type it
    /// was launched on.
    pub fn recover(checkpoint: Checkpoint, ctx: ThreadContext) -> Result<Self> {
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(ShflowError::Checkpoint(format!(
                "unsupported checkpoint version {}",
                checkpoint.version
            )));
        }
        if checkpoint.resume_path.is_empty() {
            return Err(ShflowError::Checkpoint("empty resume path".to_string()));
        }

        let mut program = checkpoint.program;
        lang::prepare(&mut program)?;

        let mut scope = checkpoint.scope;
        let frames = scope.take_nested_frames();
        let mut thread = Self::with_state(
            program,
            ctx,
            scope,
            RunMode::Recover {
                path: checkpoint.resume_path,
            },
        );
        thread.restored_frames = frames.into();
        thread.restored_stack = checkpoint.stack.into();
        thread.task_counter = checkpoint.task_counter;
        thread.tasks = TaskRegistry::from_snapshots(checkpoint.tasks)?;

        info!(
            program = %thread.program.name,
            tasks = thread.tasks.len(),
            mode = ?thread.mode,
            "recovering from checkpoint"
        );
        thread.resubmit_unfinished()?;
        Ok(thread)
    }

    fn with_state(program: Program, ctx: ThreadContext, scope: Scope, mode: RunMode) -> Self {
        Self {
            program: Arc::new(program),
            ctx,
            scope,
            stack: Vec::new(),
            tasks: TaskRegistry::new(),
            task_counter: 0,
            mode,
            pos: 0,
            restored_frames: VecDeque::new(),
            restored_stack: VecDeque::new(),
            call_sites: Vec::new(),
            replay_depth: 0,
            line: 0,
            fatal: None,
            last_checkpoint: None,
        }
    }

    fn resubmit_unfinished(&mut self) -> Result<()> {
        let tasks: Vec<_> = self.tasks.iter().cloned().collect();
        for task in tasks {
            let keep = match task.state() {
                TaskState::FinishedOk => true,
                TaskState::Failed | TaskState::Killed => task.can_fail(),
                TaskState::NotStarted | TaskState::Running => false,
            };
            if keep {
                debug!(task = %task.id(), state = %task.state(), "keeping task result");
                continue;
            }

            info!(task = %task.id(), state = %task.state(), "re-submitting task");
            task.reset_for_retry();
            self.submit(&task)?;
        }
        Ok(())
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn mode(&self) -> &RunMode {
        &self.mode
    }

    /// Run the program to the end.
    ///
    /// Script failures are reported through the outcome; only engine
    /// failures (broken invariants, an unusable checkpoint) are errors.
    pub fn run(&mut self) -> Result<RunOutcome> {
        let program = Arc::clone(&self.program);
        info!(program = %program.name, "program started");

        let state = match self.run_stmts(&program.body) {
            Ok(state) => state,
            Err(Interrupt::Engine(e)) => return Err(e),
            Err(other) => {
                return Err(ShflowError::Invariant(format!(
                    "interrupt {other:?} escaped the program root"
                )));
            }
        };

        let exit_code = match state {
            RunState::Ok | RunState::CheckpointRecover | RunState::Return(_) => {
                if let Some(target) = self.target() {
                    if target != PROGRAM_END {
                        return Err(ShflowError::Checkpoint(format!(
                            "resume point {target} not found in program '{}'",
                            program.name
                        )));
                    }
                    self.resume_normal();
                }
                if self.join_all() { 0 } else { 1 }
            }
            RunState::Exit(code) => {
                self.cancel_unfinished();
                i32::try_from(code).unwrap_or(1)
            }
            RunState::FatalError => {
                self.cancel_unfinished();
                1
            }
            RunState::Break | RunState::Continue => {
                return Err(ShflowError::Invariant(format!(
                    "unhandled {state:?} at the program root"
                )));
            }
        };

        if let Err(e) = self.ctx.output.flush() {
            warn!(error = %e, "failed to flush program output");
        }

        let outcome = RunOutcome {
            exit_code,
            fatal: self.fatal.clone(),
            failed_tasks: self.tasks.fatal_failures(),
            checkpoint: self.last_checkpoint.clone(),
        };
        info!(program = %program.name, exit_code, "program finished");
        Ok(outcome)
    }

    // ---- recovery bookkeeping -------------------------------------------

    /// Node the thread is looking for while recovering.
    pub(super) fn target(&self) -> Option<NodeId> {
        match &self.mode {
            RunMode::Recover { path } => path.get(self.pos).copied(),
            RunMode::Normal => None,
        }
    }

    pub(super) fn recovering(&self) -> bool {
        matches!(self.mode, RunMode::Recover { .. })
    }

    /// True when `id` is the last element of the resume path.
    pub(super) fn at_resume_point(&self, id: NodeId) -> bool {
        match &self.mode {
            RunMode::Recover { path } => self.pos + 1 == path.len() && path.get(self.pos) == Some(&id),
            RunMode::Normal => false,
        }
    }

    pub(super) fn resume_normal(&mut self) {
        if !self.restored_frames.is_empty() || !self.restored_stack.is_empty() {
            warn!(
                frames = self.restored_frames.len(),
                values = self.restored_stack.len(),
                "checkpoint state left over at the resume point"
            );
        }
        self.restored_frames.clear();
        self.restored_stack.clear();
        self.mode = RunMode::Normal;
        self.pos = 0;
        info!(program = %self.program.name, "resume point reached; continuing normally");
    }

    /// Step into the call at the current position of the resume path.
    pub(super) fn advance_resume_path(&mut self) {
        self.pos += 1;
    }

    /// Evaluate something that is not on the resume path.
    ///
    /// It runs in normal mode; tasks and `sys` commands are refused, and
    /// prints and checkpoints are suppressed.
    pub(super) fn replay<T>(&mut self, f: impl FnOnce(&mut Self) -> EvalResult<T>) -> EvalResult<T> {
        let mode = std::mem::take(&mut self.mode);
        self.replay_depth += 1;
        let result = f(self);
        self.replay_depth -= 1;
        self.mode = mode;
        result
    }

    pub(super) fn replaying(&self) -> bool {
        self.replay_depth > 0
    }

    pub(super) fn misplaced_resume_point(&self, id: NodeId) -> Interrupt {
        Interrupt::Engine(ShflowError::Checkpoint(format!(
            "node {id} is not a valid resume point"
        )))
    }

    pub(super) fn resume_target_lost(&self) -> Interrupt {
        let target = self.target().unwrap_or(PROGRAM_END);
        self.misplaced_resume_point(target)
    }

    // ---- frames and value stack ------------------------------------------

    pub(super) fn enter_frame(&mut self, function: bool) -> EvalResult<()> {
        if self.recovering() {
            let frame = self.restored_frames.pop_front().ok_or_else(|| {
                ShflowError::Checkpoint("checkpoint has fewer scope frames than the resume path needs".to_string())
            })?;
            if frame.function != function {
                return Err(ShflowError::Checkpoint(
                    "checkpoint scope frames do not match the resume path".to_string(),
                )
                .into());
            }
            self.scope.push(frame);
        } else if function {
            self.scope.push_function_frame();
        } else {
            self.scope.push_frame();
        }
        Ok(())
    }

    /// Run `f` inside a new (or, while recovering, restored) block frame.
    pub(super) fn in_frame<T>(&mut self, f: impl FnOnce(&mut Self) -> EvalResult<T>) -> EvalResult<T> {
        self.enter_frame(false)?;
        let result = f(self);
        self.scope.pop_frame();
        result
    }

    /// Push `value`, or while recovering the next restored value. Returns
    /// what was pushed.
    pub(super) fn push_value(&mut self, value: Value) -> EvalResult<Value> {
        let value = if self.recovering() {
            self.restored_stack.pop_front().ok_or_else(|| {
                ShflowError::Checkpoint("checkpoint has fewer stack values than the resume path needs".to_string())
            })?
        } else {
            value
        };
        self.stack.push(value.clone());
        Ok(value)
    }

    pub(super) fn pop_values(&mut self, n: usize) {
        let len = self.stack.len().saturating_sub(n);
        self.stack.truncate(len);
    }

    /// Value `depth` slots below the top of the stack (0 is the top).
    pub(super) fn peek_value(&self, depth: usize) -> EvalResult<Value> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.stack.get(i))
            .cloned()
            .ok_or_else(|| Interrupt::Engine(ShflowError::Invariant("value stack underflow".to_string())))
    }

    pub(super) fn set_top(&mut self, value: Value) -> EvalResult<()> {
        match self.stack.last_mut() {
            Some(top) => {
                *top = value;
                Ok(())
            }
            None => Err(ShflowError::Invariant("value stack underflow".to_string()).into()),
        }
    }

    // ---- errors and checkpoints -----------------------------------------

    /// Record a fatal error at `line` and return the matching state.
    pub(super) fn fatal(&mut self, line: u32, message: impl Into<String>) -> RunState {
        let message = message.into();
        error!(program = %self.program.name, line, message = %message, "fatal error");
        if self.fatal.is_none() {
            self.fatal = Some(FatalError { line, message });
        }
        RunState::FatalError
    }

    pub(super) fn resume_path(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = self.call_sites.clone();
        path.push(id);
        path
    }

    /// Write a checkpoint that resumes at `path`. `file` defaults to the
    /// configured checkpoint location.
    pub(super) fn save_checkpoint(
        &mut self,
        path: Vec<NodeId>,
        file: Option<PathBuf>,
        reason: CheckpointReason,
    ) -> Result<PathBuf> {
        let file =
            file.unwrap_or_else(|| checkpoint::default_path(self.ctx.config(), &self.program.name));
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            program: (*self.program).clone(),
            resume_path: path,
            scope: self.scope.clone(),
            stack: self.stack.clone(),
            tasks: self.tasks.snapshot(),
            task_counter: self.task_counter,
            mode: self.mode.clone(),
            reason,
        };
        checkpoint.save(self.ctx.fs.as_ref(), &file)?;
        self.last_checkpoint = Some(file.clone());
        Ok(file)
    }

    pub(super) fn write_output(&mut self, text: &str) -> EvalResult<()> {
        self.ctx
            .output
            .write_all(text.as_bytes())
            .map_err(|e| Interrupt::Engine(ShflowError::IoError(e)))
    }
}
