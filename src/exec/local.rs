// src/exec/local.rs

//! Local process backend, used by both the `sys` executioner (unbounded)
//! and the `local` queue (bounded by `max_concurrent`).

use tokio::sync::oneshot;

use crate::exec::backend::{Backend, BackendFuture};
use crate::exec::host::Host;
use crate::exec::process::{run_to_files, shell};
use crate::task::Task;

#[derive(Debug, Clone, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Shell script for a task; applies the memory limit with `ulimit -v`
/// (kilobytes).
pub fn task_script(task: &Task) -> String {
    match task.resources().mem {
        Some(bytes) => format!("ulimit -v {} && {}", bytes.div_ceil(1024), task.command()),
        None => task.command().to_string(),
    }
}

impl Backend for LocalBackend {
    fn run<'a>(
        &'a self,
        task: &'a Task,
        _host: &'a Host,
        cancel: oneshot::Receiver<()>,
    ) -> BackendFuture<'a> {
        Box::pin(async move {
            run_to_files(
                shell(&task_script(task)),
                task.id(),
                task.stdout_path(),
                task.stderr_path(),
                task.resources().timeout,
                cancel,
            )
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::backend::Completion;
    use crate::task::Resources;

    #[test]
    fn memory_limit_is_applied_in_kilobytes() {
        let task = Task::new("t", "make").with_resources(Resources {
            mem: Some(2048 * 1024),
            ..Resources::default()
        });
        assert_eq!(task_script(&task), "ulimit -v 2048 && make");
        assert_eq!(task_script(&Task::new("u", "make")), "make");
    }

    #[tokio::test]
    async fn runs_command_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new("t", "echo hello").with_output_dir(dir.path());
        let (_tx, rx) = oneshot::channel();

        let completion = LocalBackend::new()
            .run(&task, &Host::local(), rx)
            .await
            .unwrap();

        assert_eq!(completion, Completion::Exited(0));
        assert_eq!(
            std::fs::read_to_string(task.stdout_path()).unwrap(),
            "hello\n"
        );
    }
}
