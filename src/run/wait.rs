// src/run/wait.rs

//! `wait`, `kill` and the joins done at the end of a program.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::lang::{Expr, PROGRAM_END, Stmt, Value};
use crate::run::RunState;
use crate::run::error::{EvalResult, RuntimeError};
use crate::run::thread::ProgramThread;
use crate::task::Task;

/// How long a cancelled task gets to report its terminal state.
const KILL_GRACE: Duration = Duration::from_secs(2);

impl ProgramThread {
    pub(super) fn exec_wait(&mut self, stmt: &Stmt, target: Option<&Expr>) -> EvalResult<RunState> {
        if self.at_resume_point(stmt.id) {
            self.resume_normal();
        } else if self.target() == Some(stmt.id) {
            return Err(self.misplaced_resume_point(stmt.id));
        }

        let ids = match target {
            None => None,
            Some(e) => Some(task_ids(self.eval(e)?)?),
        };

        if self.wait_tasks(ids.as_deref()) {
            Ok(RunState::Ok)
        } else {
            Ok(self.wait_failed(stmt.line, stmt.id))
        }
    }

    /// Block until the given tasks (all tasks when `None`) are done.
    ///
    /// Returns `true` when none of them failed fatally. An id that names
    /// no task counts as a failure; empty ids (from tasks whose `when`
    /// option was false) are skipped.
    pub(super) fn wait_tasks(&self, ids: Option<&[String]>) -> bool {
        let tasks: Vec<Option<Arc<Task>>> = match ids {
            None => self.tasks.iter().cloned().map(Some).collect(),
            Some(ids) => ids
                .iter()
                .filter(|id| !id.is_empty())
                .map(|id| {
                    let task = self.tasks.get(id).cloned();
                    if task.is_none() {
                        warn!(task = %id, "wait on unknown task");
                    }
                    task
                })
                .collect(),
        };

        debug!(count = tasks.len(), "waiting for tasks");
        let mut ok = true;
        for task in tasks {
            match task {
                Some(task) => {
                    task.wait_done();
                    if task.is_fatal_failure() {
                        ok = false;
                    }
                }
                None => ok = false,
            }
        }
        ok
    }

    /// The implicit wait on every task when the program body is done.
    pub(super) fn join_all(&mut self) -> bool {
        if self.wait_tasks(None) {
            return true;
        }
        self.wait_failed(0, PROGRAM_END);
        false
    }

    pub(super) fn exec_kill(&mut self, target: &Expr) -> EvalResult<RunState> {
        let ids = task_ids(self.eval(target)?)?;
        for id in ids.iter().filter(|id| !id.is_empty()) {
            let task = self
                .tasks
                .get(id)
                .cloned()
                .ok_or_else(|| RuntimeError::UnknownTask(id.clone()))?;
            self.kill_task(&task);
        }
        Ok(RunState::Ok)
    }

    /// Ask the task's executioner to kill it. Returns whether the request
    /// was delivered.
    fn kill_task(&self, task: &Task) -> bool {
        if task.is_done() {
            debug!(task = %task.id(), "kill on finished task ignored");
            return false;
        }
        let result = self
            .ctx
            .executioners
            .get(task.executioner())
            .and_then(|executioner| executioner.kill(task.id()));
        match result {
            Ok(()) => {
                info!(task = %task.id(), "kill requested");
                true
            }
            Err(e) => {
                warn!(task = %task.id(), error = %e, "failed to kill task");
                false
            }
        }
    }

    /// Best-effort cancellation of everything still running, used when the
    /// program exits or fails. Waits up to [`KILL_GRACE`] for each killed
    /// task to report.
    pub(super) fn cancel_unfinished(&self) {
        let killed: Vec<_> = self
            .tasks
            .unfinished()
            .into_iter()
            .filter(|task| self.kill_task(task))
            .collect();
        for task in killed {
            if !task.wait_done_for(KILL_GRACE) {
                warn!(task = %task.id(), "task did not stop after kill");
            }
        }
    }
}

/// A task id or a list of task ids.
fn task_ids(value: Value) -> Result<Vec<String>, RuntimeError> {
    match value {
        Value::Str(id) => Ok(vec![id]),
        Value::List(items) => Ok(items.into_iter().map(|v| v.to_string()).collect()),
        other => Err(RuntimeError::type_mismatch("task id or list of task ids", other.type_name())),
    }
}
