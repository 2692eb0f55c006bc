// src/exec/executioner.rs

//! The executioner contract and the shared worker loop.
//!
//! Every backend is wrapped in a [`QueueExecutioner`]: `add` pushes the task
//! over an mpsc channel to a background worker loop, which keeps a FIFO of
//! pending tasks, holds tasks until their dependencies are done, admits at
//! most `max_concurrent` of them at a time and runs each one in its own
//! Tokio task. A backend error or panic fails only the affected task.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::errors::{Result, ShflowError};
use crate::exec::backend::{Backend, Completion};
use crate::exec::host::Cluster;
use crate::task::{Task, TaskId, TaskState};
use crate::types::ExecutionerType;

/// Abstract execution backend as seen by the interpreter and the registry.
pub trait Executioner: Send + Sync + fmt::Debug {
    fn kind(&self) -> ExecutionerType;

    fn cluster(&self) -> &Cluster;

    /// Spawn the worker loop on `handle` and return immediately.
    fn start(&self, handle: &Handle) -> Result<()>;

    /// Enqueue a task and return immediately.
    fn add(&self, task: Arc<Task>) -> Result<()>;

    /// Best-effort cancellation of a pending or running task.
    fn kill(&self, id: &str) -> Result<()>;

    /// Kill everything and stop accepting work.
    fn stop(&self);

    /// Whether the executioner can still accept work.
    fn is_valid(&self) -> bool;
}

/// Per-executioner settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct ExecutionerOptions {
    /// Log task start and finish at info level.
    pub verbose: bool,
    /// Log the command and host of every dispatched task.
    pub debug: bool,
    /// Keep a `<task id>.cmd` file next to the task's output.
    pub log: bool,
    /// `None` means unbounded.
    pub max_concurrent: Option<usize>,
    /// How often pending tasks are re-checked.
    pub poll_interval: Duration,
}

impl ExecutionerOptions {
    pub fn from_config(config: &Config, max_concurrent: Option<usize>) -> Self {
        Self {
            verbose: config.config.verbose,
            debug: config.config.debug,
            log: config.config.log,
            max_concurrent,
            poll_interval: config.config.poll_interval(),
        }
    }
}

impl Default for ExecutionerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default(), None)
    }
}

enum Command {
    Add(Arc<Task>),
    Kill(TaskId),
    Stop,
}

/// Executioner that runs tasks through a [`Backend`].
pub struct QueueExecutioner<B: Backend> {
    kind: ExecutionerType,
    cluster: Cluster,
    options: ExecutionerOptions,
    backend: Arc<B>,
    tx: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl<B: Backend> fmt::Debug for QueueExecutioner<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueExecutioner")
            .field("kind", &self.kind)
            .field("cluster", &self.cluster)
            .field("options", &self.options)
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish()
    }
}

impl<B: Backend> QueueExecutioner<B> {
    pub fn new(kind: ExecutionerType, cluster: Cluster, options: ExecutionerOptions, backend: B) -> Self {
        Self {
            kind,
            cluster,
            options,
            backend: Arc::new(backend),
            tx: Mutex::new(None),
            worker: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &ExecutionerOptions {
        &self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn send(&self, command: Command) -> Result<()> {
        let tx = self.tx.lock();
        match tx.as_ref() {
            Some(tx) if !self.stopped.load(Ordering::SeqCst) => tx
                .send(command)
                .map_err(|_| ShflowError::ExecutionerStopped(self.kind)),
            _ => Err(ShflowError::ExecutionerStopped(self.kind)),
        }
    }
}

impl<B: Backend> Executioner for QueueExecutioner<B> {
    fn kind(&self) -> ExecutionerType {
        self.kind
    }

    fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    fn start(&self, handle: &Handle) -> Result<()> {
        let mut tx_slot = self.tx.lock();
        if tx_slot.is_some() {
            return Err(ShflowError::Invariant(format!(
                "executioner '{}' started twice",
                self.kind
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            kind: self.kind,
            cluster: self.cluster.clone(),
            options: self.options.clone(),
            backend: Arc::clone(&self.backend),
            pending: VecDeque::new(),
            running: HashMap::new(),
            jobs: JoinSet::new(),
            dispatched: 0,
        };
        let join = handle.spawn(worker.run(rx));

        *tx_slot = Some(tx);
        *self.worker.lock() = Some(join);
        debug!(executioner = %self.kind, hosts = self.cluster.len(), "executioner started");
        Ok(())
    }

    fn add(&self, task: Arc<Task>) -> Result<()> {
        self.send(Command::Add(task))
    }

    fn kill(&self, id: &str) -> Result<()> {
        self.send(Command::Kill(id.to_string()))
    }

    fn stop(&self) {
        // Under the sender lock no `add` can slip in behind the `Stop`.
        let mut tx_slot = self.tx.lock();
        self.stopped.store(true, Ordering::SeqCst);
        match tx_slot.take() {
            Some(tx) => {
                if tx.send(Command::Stop).is_err() {
                    debug!(executioner = %self.kind, "worker loop already gone");
                }
            }
            None => debug!(executioner = %self.kind, "stop requested on idle executioner"),
        }
    }

    fn is_valid(&self) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        match self.worker.lock().as_ref() {
            Some(worker) => !worker.is_finished(),
            None => false,
        }
    }
}

/// Internal handle for a running job.
struct RunningJob {
    task: Arc<Task>,
    cancel: Option<oneshot::Sender<()>>,
}

enum Readiness {
    Ready,
    Blocked,
    DependencyFailed(String),
}

struct Worker<B: Backend> {
    kind: ExecutionerType,
    cluster: Cluster,
    options: ExecutionerOptions,
    backend: Arc<B>,
    pending: VecDeque<Arc<Task>>,
    running: HashMap<TaskId, RunningJob>,
    jobs: JoinSet<(TaskId, anyhow::Result<Completion>)>,
    dispatched: usize,
}

impl<B: Backend> Worker<B> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!(executioner = %self.kind, "executioner loop started");
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Add(task)) => {
                        self.pending.push_back(task);
                        self.dispatch();
                    }
                    Some(Command::Kill(id)) => self.kill(&id),
                    Some(Command::Stop) | None => break,
                },

                Some(joined) = self.jobs.join_next(), if !self.jobs.is_empty() => {
                    match joined {
                        Ok((id, result)) => self.complete(&id, result),
                        Err(e) => error!(executioner = %self.kind, error = %e, "job wrapper failed"),
                    }
                    self.dispatch();
                }

                _ = ticker.tick() => self.dispatch(),
            }
        }

        rx.close();
        while let Ok(command) = rx.try_recv() {
            if let Command::Add(task) = command {
                self.pending.push_back(task);
            }
        }
        self.shutdown().await;
        info!(executioner = %self.kind, "executioner loop finished");
    }

    fn at_capacity(&self) -> bool {
        self.options
            .max_concurrent
            .is_some_and(|max| self.running.len() >= max)
    }

    fn readiness(task: &Task) -> Readiness {
        for dep in task.dependencies() {
            match dep.state() {
                TaskState::FinishedOk => {}
                state if state.is_failed() => {
                    return Readiness::DependencyFailed(dep.id().to_string());
                }
                _ => return Readiness::Blocked,
            }
        }
        Readiness::Ready
    }

    /// Start pending tasks in FIFO order while there is room. Tasks whose
    /// dependencies are not done yet keep their place in the queue.
    fn dispatch(&mut self) {
        let mut i = 0;
        while i < self.pending.len() && !self.at_capacity() {
            match Self::readiness(&self.pending[i]) {
                Readiness::Blocked => i += 1,
                Readiness::Ready => {
                    if let Some(task) = self.pending.remove(i) {
                        self.launch(task);
                    }
                }
                Readiness::DependencyFailed(dep) => {
                    if let Some(task) = self.pending.remove(i) {
                        warn!(task = %task.id(), dependency = %dep, "dependency failed; task not run");
                        task.finish(
                            TaskState::Failed,
                            None,
                            Some(format!("dependency '{dep}' failed")),
                        );
                    }
                }
            }
        }
    }

    fn launch(&mut self, task: Arc<Task>) {
        let host = self.cluster.host_for(self.dispatched).clone();
        self.dispatched += 1;

        if self.options.verbose {
            info!(task = %task.id(), executioner = %self.kind, "task started");
        }
        if self.options.debug {
            info!(task = %task.id(), host = %host, cmd = %task.command(), "dispatching task");
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let id = task.id().to_string();
        let backend = Arc::clone(&self.backend);
        let job_task = Arc::clone(&task);
        let log_command = self.options.log;

        self.jobs.spawn(async move {
            // Inner spawn so a panicking backend fails only this task.
            let inner = tokio::spawn(async move {
                if log_command {
                    let cmd_file = job_task.stdout_path().with_extension("cmd");
                    if let Err(e) = tokio::fs::write(&cmd_file, job_task.command()).await {
                        warn!(task = %job_task.id(), error = %e, "failed to write command file");
                    }
                }
                backend.run(&job_task, &host, cancel_rx).await
            });
            let result = match inner.await {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("backend panicked: {e}")),
            };
            (id, result)
        });

        self.running.insert(
            task.id().to_string(),
            RunningJob {
                task,
                cancel: Some(cancel_tx),
            },
        );
    }

    fn complete(&mut self, id: &str, result: anyhow::Result<Completion>) {
        let Some(job) = self.running.remove(id) else {
            warn!(task = %id, "completion for unknown job");
            return;
        };
        let task = job.task;

        let (state, exit_code, error) = match result {
            Ok(Completion::Exited(0)) => (TaskState::FinishedOk, Some(0), None),
            Ok(Completion::Exited(code)) => {
                (TaskState::Failed, Some(code), Some(format!("exit code {code}")))
            }
            Ok(Completion::Killed) => (TaskState::Killed, None, Some("killed".to_string())),
            Ok(Completion::TimedOut) => (
                TaskState::Failed,
                None,
                Some("wall-time limit exceeded".to_string()),
            ),
            Err(e) => {
                warn!(task = %id, error = %e, "task execution error");
                (TaskState::Failed, None, Some(format!("{e:#}")))
            }
        };

        if self.options.verbose {
            info!(task = %id, state = %state, exit_code = ?exit_code, "task finished");
        } else {
            debug!(task = %id, state = %state, exit_code = ?exit_code, "task finished");
        }
        task.finish(state, exit_code, error);
    }

    fn kill(&mut self, id: &str) {
        if let Some(job) = self.running.get_mut(id) {
            info!(task = %id, "killing running task");
            if let Some(cancel) = job.cancel.take() {
                if cancel.send(()).is_err() {
                    debug!(task = %id, "job already finished while cancelling");
                }
            }
            return;
        }

        if let Some(pos) = self.pending.iter().position(|t| t.id() == id) {
            if let Some(task) = self.pending.remove(pos) {
                info!(task = %id, "killing pending task");
                task.finish(TaskState::Killed, None, Some("killed before start".to_string()));
            }
            return;
        }

        debug!(task = %id, "kill requested for task not held by this executioner");
    }

    /// Kill pending and running tasks and wait for the jobs to report.
    async fn shutdown(&mut self) {
        for task in self.pending.drain(..) {
            task.finish(TaskState::Killed, None, Some("executioner stopped".to_string()));
        }

        let ids: Vec<TaskId> = self.running.keys().cloned().collect();
        for id in &ids {
            self.kill(id);
        }

        while let Some(joined) = self.jobs.join_next().await {
            match joined {
                Ok((id, result)) => self.complete(&id, result),
                Err(e) => error!(executioner = %self.kind, error = %e, "job wrapper failed"),
            }
        }

        // Jobs whose wrapper failed never reported; do not leave them running.
        for (_, job) in self.running.drain() {
            job.task
                .finish(TaskState::Killed, None, Some("executioner stopped".to_string()));
        }
    }
}
