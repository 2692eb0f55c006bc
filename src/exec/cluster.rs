// src/exec/cluster.rs

//! Batch scheduler backend.
//!
//! For each task a job script is written next to the task's output. The
//! script runs the command in a subshell and records its exit code in
//! `<task id>.exit`. The configured submit command queues the script and
//! prints a job id; the stat command is polled until it stops recognising
//! the job. A missing exit file means the scheduler killed the job, and so
//! does an exit code above 128 (signal).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, anyhow};
use regex::Regex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::ClusterSection;
use crate::errors::{Result, ShflowError};
use crate::exec::backend::{Backend, BackendFuture, Completion};
use crate::exec::host::Host;
use crate::exec::local::task_script;
use crate::exec::process::{CapturedOutput, deadline, from_argv, run_captured};
use crate::task::Task;

#[derive(Debug, Clone)]
pub struct ClusterBackend {
    cfg: ClusterSection,
    job_id: Regex,
}

impl ClusterBackend {
    pub fn new(cfg: &ClusterSection) -> Result<Self> {
        let job_id = Regex::new(&cfg.job_id_regex).map_err(|e| {
            ShflowError::ConfigError(format!("[cluster].job_id_regex is invalid: {e}"))
        })?;
        Ok(Self {
            cfg: cfg.clone(),
            job_id,
        })
    }

    fn parse_job_id(&self, stdout: &str) -> Option<String> {
        let caps = self.job_id.captures(stdout)?;
        caps.get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().to_string())
    }

    async fn run_template(
        &self,
        template: &[String],
        vars: &HashMap<&str, String>,
    ) -> anyhow::Result<CapturedOutput> {
        let argv = expand(template, vars);
        debug!(argv = ?argv, "running scheduler command");
        run_captured(from_argv(&argv)?).await
    }

    async fn kill_job(&self, vars: &HashMap<&str, String>) {
        match self.run_template(&self.cfg.kill, vars).await {
            Ok(out) if out.success() => {}
            Ok(out) => warn!(
                code = out.code,
                stderr = %out.stderr.trim(),
                "scheduler kill command failed"
            ),
            Err(e) => warn!(error = %e, "scheduler kill command failed"),
        }
    }

    async fn run_job(
        &self,
        task: &Task,
        mut cancel: oneshot::Receiver<()>,
    ) -> anyhow::Result<Completion> {
        let script = task.stdout_path().with_extension("sh");
        let exit_file = task.exit_code_path();
        write_job_script(&script, &task_script(task), &exit_file).await?;
        // Stale exit files from a previous attempt would be read as this one's.
        match tokio::fs::remove_file(&exit_file).await {
            Ok(()) => debug!(task = %task.id(), "removed stale exit file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    task = %task.id(),
                    path = %exit_file.display(),
                    error = %e,
                    "cannot remove stale exit file"
                );
                return Err(anyhow::Error::new(e).context(format!(
                    "removing stale exit file {}",
                    exit_file.display()
                )));
            }
        }

        let mut vars = HashMap::new();
        vars.insert("script", script.display().to_string());
        vars.insert("stdout", task.stdout_path().display().to_string());
        vars.insert("stderr", task.stderr_path().display().to_string());
        vars.insert("name", task.id().to_string());
        vars.insert("cpus", task.resources().cpus.to_string());
        vars.insert(
            "mem",
            task.resources().mem.map(|m| m.to_string()).unwrap_or_default(),
        );

        let submitted = self.run_template(&self.cfg.submit, &vars).await?;
        if !submitted.success() {
            return Err(anyhow!(
                "submit command failed with exit code {}: {}",
                submitted.code,
                submitted.stderr.trim()
            ));
        }
        let job_id = self
            .parse_job_id(&submitted.stdout)
            .with_context(|| format!("no job id in submit output {:?}", submitted.stdout))?;
        debug!(task = %task.id(), job_id = %job_id, "job submitted");
        vars.insert("job_id", job_id);

        let limit = deadline(task.resources().timeout);
        tokio::pin!(limit);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.cfg.poll_interval()) => {
                    let stat = self.run_template(&self.cfg.stat, &vars).await?;
                    if !stat.success() {
                        break;
                    }
                }

                Ok(()) = &mut cancel => {
                    self.kill_job(&vars).await;
                    return Ok(Completion::Killed);
                }

                _ = &mut limit => {
                    self.kill_job(&vars).await;
                    return Ok(Completion::TimedOut);
                }
            }
        }

        Ok(read_exit_file(&exit_file).await)
    }
}

impl Backend for ClusterBackend {
    fn run<'a>(
        &'a self,
        task: &'a Task,
        _host: &'a Host,
        cancel: oneshot::Receiver<()>,
    ) -> BackendFuture<'a> {
        Box::pin(self.run_job(task, cancel))
    }
}

/// Replace `{name}` placeholders in each argument.
pub fn expand(template: &[String], vars: &HashMap<&str, String>) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{key}}}"), value)
            })
        })
        .collect()
}

async fn write_job_script(script: &Path, command: &str, exit_file: &Path) -> anyhow::Result<()> {
    if let Some(parent) = script.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating dir {:?}", parent))?;
    }
    let body = format!(
        "#!/bin/sh\n(\n{command}\n)\necho $? > '{}'\n",
        exit_file.display()
    );
    tokio::fs::write(script, body)
        .await
        .with_context(|| format!("writing job script {:?}", script))
}

/// Translate the job's exit file into a completion.
pub async fn read_exit_file(path: &Path) -> Completion {
    let Ok(contents) = tokio::fs::read_to_string(path).await else {
        return Completion::Killed;
    };
    match contents.trim().parse::<i32>() {
        Ok(code) if code > 128 => Completion::Killed,
        Ok(code) => Completion::Exited(code),
        Err(_) => Completion::Killed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    /// Scheduler that runs the job synchronously at submit time and
    /// forgets it immediately.
    fn inline_scheduler() -> ClusterSection {
        ClusterSection {
            submit: sh("sh {script} > {stdout} 2> {stderr}; echo 'job 42 queued'"),
            stat: sh("exit 1"),
            kill: sh("true"),
            job_id_regex: r"job (\d+)".to_string(),
            poll_interval_ms: 10,
        }
    }

    #[test]
    fn placeholders_are_expanded() {
        let mut vars = HashMap::new();
        vars.insert("job_id", "42".to_string());
        vars.insert("name", "t1".to_string());
        let argv = expand(&["qdel".into(), "{job_id}".into(), "-N{name}".into()], &vars);
        assert_eq!(argv, vec!["qdel", "42", "-Nt1"]);
    }

    #[test]
    fn job_id_uses_first_capture_group() {
        let backend = ClusterBackend::new(&inline_scheduler()).unwrap();
        assert_eq!(backend.parse_job_id("job 42 queued"), Some("42".to_string()));
        assert_eq!(backend.parse_job_id("nothing"), None);
    }

    #[tokio::test]
    async fn exit_codes_translate_to_completions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.exit");

        assert_eq!(read_exit_file(&path).await, Completion::Killed);

        std::fs::write(&path, "0\n").unwrap();
        assert_eq!(read_exit_file(&path).await, Completion::Exited(0));

        std::fs::write(&path, "3\n").unwrap();
        assert_eq!(read_exit_file(&path).await, Completion::Exited(3));

        std::fs::write(&path, "137\n").unwrap();
        assert_eq!(read_exit_file(&path).await, Completion::Killed);
    }

    #[tokio::test]
    async fn job_runs_through_scheduler_commands() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new("t", "echo on-cluster; exit 4").with_output_dir(dir.path());
        let backend = ClusterBackend::new(&inline_scheduler()).unwrap();
        let (_tx, rx) = oneshot::channel();

        let completion = backend
            .run(&task, &Host::scheduler("test"), rx)
            .await
            .unwrap();

        assert_eq!(completion, Completion::Exited(4));
        assert_eq!(std::fs::read_to_string(task.stdout_path()).unwrap(), "on-cluster\n");
    }

    #[tokio::test]
    async fn failed_submit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new("t", "true").with_output_dir(dir.path());
        let mut cfg = inline_scheduler();
        cfg.submit = sh("echo 'queue full' >&2; exit 1");
        let backend = ClusterBackend::new(&cfg).unwrap();
        let (_tx, rx) = oneshot::channel();

        let err = backend
            .run(&task, &Host::scheduler("test"), rx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("queue full"));
    }

    #[tokio::test]
    async fn stale_exit_file_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new("t", "true").with_output_dir(dir.path());
        std::fs::write(task.exit_code_path(), "0\n").unwrap();

        // Accepts the job but never runs it.
        let mut cfg = inline_scheduler();
        cfg.submit = sh("echo 'job 9 queued'");
        let backend = ClusterBackend::new(&cfg).unwrap();
        let (_tx, rx) = oneshot::channel();

        let completion = backend
            .run(&task, &Host::scheduler("test"), rx)
            .await
            .unwrap();
        assert_eq!(completion, Completion::Killed);
    }

    #[tokio::test]
    async fn unremovable_exit_file_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let task = Task::new("t", "true").with_output_dir(dir.path());
        let blocker = task.exit_code_path();
        std::fs::create_dir_all(blocker.join("inner")).unwrap();

        let backend = ClusterBackend::new(&inline_scheduler()).unwrap();
        let (_tx, rx) = oneshot::channel();

        let err = backend
            .run(&task, &Host::scheduler("test"), rx)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("stale exit file"), "{err:#}");
    }
}
