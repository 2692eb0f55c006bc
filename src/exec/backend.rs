// src/exec/backend.rs

//! Pluggable backend abstraction.
//!
//! A [`Backend`] turns one task into one OS-level job and reports how it
//! ended. The queueing, admission control and state bookkeeping live in
//! [`QueueExecutioner`](super::QueueExecutioner); backends only run
//! commands. Tests can provide their own implementation that doesn't spawn
//! real processes.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::oneshot;

use crate::exec::host::Host;
use crate::task::Task;

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The command ran to completion with this exit code.
    Exited(i32),
    /// Cancelled, or terminated by a signal.
    Killed,
    /// Stopped after exceeding the task's wall-time limit.
    TimedOut,
}

pub type BackendFuture<'a> =
    Pin<Box<dyn Future<Output = anyhow::Result<Completion>> + Send + 'a>>;

/// Trait abstracting how a single task is executed.
pub trait Backend: Send + Sync + 'static {
    /// Run `task` on `host` until it ends.
    ///
    /// - If `cancel` fires, the job must be stopped and `Completion::Killed`
    ///   returned.
    /// - The task's wall-time limit must be enforced (`Completion::TimedOut`).
    /// - Errors (cannot spawn, cannot connect) become task failures.
    fn run<'a>(
        &'a self,
        task: &'a Task,
        host: &'a Host,
        cancel: oneshot::Receiver<()>,
    ) -> BackendFuture<'a>;
}
