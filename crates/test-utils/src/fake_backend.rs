use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::oneshot;

use shflow::config::Config;
use shflow::errors::Result;
use shflow::exec::{
    Backend, BackendFuture, Cluster, Completion, Executioner, ExecutionerFactory,
    ExecutionerOptions, Host, QueueExecutioner,
};
use shflow::task::Task;
use shflow::types::ExecutionerType;

/// A fake backend that:
/// - records which commands were started, in order
/// - writes canned stdout to the task's output file
/// - finishes each job with a configured exit code (0 by default)
///
/// Clones share the recorded state.
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    started: Arc<Mutex<Vec<String>>>,
    exit_codes: HashMap<String, i32>,
    stdout: HashMap<String, String>,
    unreachable: HashSet<String>,
    delay: Duration,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exit_code(mut self, command: &str, code: i32) -> Self {
        self.exit_codes.insert(command.to_string(), code);
        self
    }

    pub fn stdout(mut self, command: &str, text: &str) -> Self {
        self.stdout.insert(command.to_string(), text.to_string());
        self
    }

    /// Running `command` fails the way an unreachable host does.
    pub fn unreachable(mut self, command: &str) -> Self {
        self.unreachable.insert(command.to_string());
        self
    }

    /// How long every job "runs".
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Commands started so far, in start order.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

impl Backend for FakeBackend {
    fn run<'a>(
        &'a self,
        task: &'a Task,
        host: &'a Host,
        mut cancel: oneshot::Receiver<()>,
    ) -> BackendFuture<'a> {
        Box::pin(async move {
            let command = task.command().to_string();
            self.started.lock().unwrap().push(command.clone());

            if self.unreachable.contains(&command) {
                return Err(anyhow!("connection to host '{host}' failed"));
            }

            if let Some(text) = self.stdout.get(&command) {
                if let Some(parent) = task.stdout_path().parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(task.stdout_path(), text).await?;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                Ok(()) = &mut cancel => return Ok(Completion::Killed),
            }

            Ok(Completion::Exited(
                self.exit_codes.get(&command).copied().unwrap_or(0),
            ))
        })
    }
}

/// Builds every executioner type around one shared [`FakeBackend`], with
/// the same concurrency limits as the production factory.
#[derive(Debug, Clone, Default)]
pub struct FakeFactory {
    backend: FakeBackend,
}

impl FakeFactory {
    pub fn new(backend: FakeBackend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &FakeBackend {
        &self.backend
    }
}

impl ExecutionerFactory for FakeFactory {
    fn build(&self, kind: ExecutionerType, config: &Config) -> Result<Arc<dyn Executioner>> {
        let max = match kind {
            ExecutionerType::Local => Some(config.local.effective_max_concurrent()),
            _ => None,
        };
        Ok(Arc::new(QueueExecutioner::new(
            kind,
            Cluster::local(),
            ExecutionerOptions::from_config(config, max),
            self.backend.clone(),
        )))
    }
}
