// src/task/mod.rs

//! Tasks: one shell command plus its resources, state and output files.
//!
//! A [`Task`] is shared between the program thread that created it and the
//! executioner running it. The status is behind a mutex and a condition
//! variable so the interpreter can block in `wait` while the worker loop
//! reports completion.

pub mod registry;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{Result, ShflowError};
use crate::exec::Executioner;
use crate::types::ExecutionerType;

pub use registry::TaskRegistry;

pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    NotStarted,
    Running,
    FinishedOk,
    Failed,
    Killed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::FinishedOk | TaskState::Failed | TaskState::Killed
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskState::Failed | TaskState::Killed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::NotStarted => "not_started",
            TaskState::Running => "running",
            TaskState::FinishedOk => "finished_ok",
            TaskState::Failed => "failed",
            TaskState::Killed => "killed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpus: u32,
    /// Bytes.
    pub mem: Option<u64>,
    pub timeout: Option<Duration>,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            cpus: 1,
            mem: None,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub attempts: u32,
}

impl Default for TaskState {
    fn default() -> Self {
        TaskState::NotStarted
    }
}

#[derive(Debug)]
pub struct Task {
    id: TaskId,
    command: String,
    resources: Resources,
    dependencies: Vec<Arc<Task>>,
    can_fail: bool,
    executioner: ExecutionerType,
    stdout: PathBuf,
    stderr: PathBuf,
    line: u32,
    status: Mutex<TaskStatus>,
    done: Condvar,
}

impl Task {
    /// A task whose output files live in the current directory. Use
    /// [`Task::with_output_dir`] to place them elsewhere.
    pub fn new(id: impl Into<TaskId>, command: impl Into<String>) -> Self {
        let id = id.into();
        let (stdout, stderr) = output_paths(Path::new("."), &id);
        Self {
            id,
            command: command.into(),
            resources: Resources::default(),
            dependencies: Vec::new(),
            can_fail: false,
            executioner: ExecutionerType::default(),
            stdout,
            stderr,
            line: 0,
            status: Mutex::new(TaskStatus::default()),
            done: Condvar::new(),
        }
    }

    pub fn with_output_dir(mut self, dir: &Path) -> Self {
        let (stdout, stderr) = output_paths(dir, &self.id);
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    pub fn with_resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<Arc<Task>>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_can_fail(mut self, can_fail: bool) -> Self {
        self.can_fail = can_fail;
        self
    }

    pub fn with_executioner(mut self, executioner: ExecutionerType) -> Self {
        self.executioner = executioner;
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn dependencies(&self) -> &[Arc<Task>] {
        &self.dependencies
    }

    pub fn can_fail(&self) -> bool {
        self.can_fail
    }

    pub fn executioner(&self) -> ExecutionerType {
        self.executioner
    }

    pub fn stdout_path(&self) -> &Path {
        &self.stdout
    }

    pub fn stderr_path(&self) -> &Path {
        &self.stderr
    }

    /// File the cluster backend's job script writes the exit code to.
    pub fn exit_code_path(&self) -> PathBuf {
        self.stdout.with_extension("exit")
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn status(&self) -> TaskStatus {
        self.status.lock().clone()
    }

    pub fn state(&self) -> TaskState {
        self.status.lock().state
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.lock().exit_code
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_done_ok(&self) -> bool {
        self.state() == TaskState::FinishedOk
    }

    /// True only for `Failed` and `Killed`.
    pub fn is_failed(&self) -> bool {
        self.state().is_failed()
    }

    /// A failure that should make the enclosing wait fail.
    pub fn is_fatal_failure(&self) -> bool {
        self.is_failed() && !self.can_fail
    }

    /// Hand the task to `executioner`.
    ///
    /// The task moves from `NotStarted` to `Running` before the executioner
    /// sees it. If the executioner refuses the task it is finished as
    /// `Failed`; that is a task failure, not an error of the caller.
    pub fn submit(self: &Arc<Self>, executioner: &dyn Executioner) -> Result<()> {
        {
            let mut status = self.status.lock();
            if status.state != TaskState::NotStarted {
                return Err(ShflowError::Invariant(format!(
                    "task '{}' submitted in state {}",
                    self.id, status.state
                )));
            }
            status.state = TaskState::Running;
            status.attempts += 1;
        }

        debug!(
            task = %self.id,
            executioner = %executioner.kind(),
            "submitting task"
        );

        if let Err(e) = executioner.add(Arc::clone(self)) {
            self.finish(TaskState::Failed, None, Some(e.to_string()));
        }
        Ok(())
    }

    /// Record the terminal state. Only the first report counts; later ones
    /// are ignored. Returns whether this call changed the state.
    pub fn finish(&self, state: TaskState, exit_code: Option<i32>, error: Option<String>) -> bool {
        let mut status = self.status.lock();
        if status.state.is_terminal() {
            warn!(
                task = %self.id,
                current = %status.state,
                reported = %state,
                "ignoring second terminal state report"
            );
            return false;
        }
        status.state = state;
        status.exit_code = exit_code;
        status.error = error;
        self.done.notify_all();
        true
    }

    /// Block the calling thread until the task reaches a terminal state.
    pub fn wait_done(&self) {
        let mut status = self.status.lock();
        while !status.state.is_terminal() {
            self.done.wait(&mut status);
        }
    }

    /// Like [`Task::wait_done`] but gives up after `timeout`. Returns whether
    /// the task is done.
    pub fn wait_done_for(&self, timeout: Duration) -> bool {
        let mut status = self.status.lock();
        if !status.state.is_terminal() {
            self.done.wait_while_for(&mut status, |s| !s.state.is_terminal(), timeout);
        }
        status.state.is_terminal()
    }

    /// Put the task back to `NotStarted` so it can be submitted again.
    /// The attempt counter is kept.
    pub fn reset_for_retry(&self) {
        let mut status = self.status.lock();
        status.state = TaskState::NotStarted;
        status.exit_code = None;
        status.error = None;
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            command: self.command.clone(),
            resources: self.resources.clone(),
            dependencies: self.dependencies.iter().map(|d| d.id.clone()).collect(),
            can_fail: self.can_fail,
            executioner: self.executioner,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            line: self.line,
            status: self.status(),
        }
    }

    /// Rebuild a task from its snapshot. `dependencies` must already be
    /// resolved, in the snapshot's order.
    pub fn from_snapshot(snapshot: TaskSnapshot, dependencies: Vec<Arc<Task>>) -> Self {
        Self {
            id: snapshot.id,
            command: snapshot.command,
            resources: snapshot.resources,
            dependencies,
            can_fail: snapshot.can_fail,
            executioner: snapshot.executioner,
            stdout: snapshot.stdout,
            stderr: snapshot.stderr,
            line: snapshot.line,
            status: Mutex::new(snapshot.status),
            done: Condvar::new(),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.status();
        write!(f, "{} [{}]", self.id, status.state)?;
        if let Some(code) = status.exit_code {
            write!(f, " exit code {code}")?;
        }
        if let Some(error) = &status.error {
            write!(f, ": {error}")?;
        }
        Ok(())
    }
}

/// Serializable form of a [`Task`]; dependencies are stored by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub command: String,
    pub resources: Resources,
    pub dependencies: Vec<TaskId>,
    pub can_fail: bool,
    pub executioner: ExecutionerType,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub line: u32,
    pub status: TaskStatus,
}

/// `<program>.line_<n>.id_<k>`
pub fn task_id(program: &str, line: u32, counter: u64) -> TaskId {
    format!("{program}.line_{line}.id_{counter}")
}

fn output_paths(dir: &Path, id: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{id}.stdout")),
        dir.join(format!("{id}.stderr")),
    )
}
