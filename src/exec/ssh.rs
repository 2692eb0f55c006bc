// src/exec/ssh.rs

//! Remote execution over ssh: `<command> <options...> <host> <script>`.
//!
//! Exit status 255 is how ssh reports that it could not connect; that, and
//! failing to spawn the ssh client at all, are task failures with a
//! message naming the host.

use anyhow::anyhow;
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::config::SshSection;
use crate::exec::backend::{Backend, BackendFuture, Completion};
use crate::exec::host::Host;
use crate::exec::local::task_script;
use crate::exec::process::run_to_files;
use crate::task::Task;

/// Exit status ssh uses for connection errors.
pub const SSH_CONNECTION_FAILED: i32 = 255;

#[derive(Debug, Clone)]
pub struct SshBackend {
    command: String,
    options: Vec<String>,
}

impl SshBackend {
    pub fn new(command: impl Into<String>, options: Vec<String>) -> Self {
        Self {
            command: command.into(),
            options,
        }
    }

    pub fn from_config(cfg: &SshSection) -> Self {
        Self::new(cfg.command.clone(), cfg.options.clone())
    }

    fn command_for(&self, task: &Task, host: &Host) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.options).arg(&host.name).arg(task_script(task));
        cmd
    }
}

impl Backend for SshBackend {
    fn run<'a>(
        &'a self,
        task: &'a Task,
        host: &'a Host,
        cancel: oneshot::Receiver<()>,
    ) -> BackendFuture<'a> {
        Box::pin(async move {
            let completion = run_to_files(
                self.command_for(task, host),
                task.id(),
                task.stdout_path(),
                task.stderr_path(),
                task.resources().timeout,
                cancel,
            )
            .await
            .map_err(|e| e.context(format!("ssh to host '{host}'")))?;

            match completion {
                Completion::Exited(SSH_CONNECTION_FAILED) => Err(anyhow!(
                    "ssh connection to host '{host}' failed (exit code {SSH_CONNECTION_FAILED})"
                )),
                other => Ok(other),
            }
        })
    }
}
