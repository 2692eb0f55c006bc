// src/exec/process.rs

//! Child process helpers shared by the backends.

use std::fs::File;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::exec::backend::Completion;

/// Output of a command run to completion.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// `sh -c <script>`.
pub fn shell(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

/// Build a command from an argument vector; the first element is the
/// program.
pub fn from_argv(argv: &[String]) -> Result<Command> {
    let (program, args) = argv.split_first().context("empty command line")?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Resolves after `timeout`, or never when there is no limit.
pub async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}

pub fn completion_from_status(status: ExitStatus) -> Completion {
    match status.code() {
        Some(code) => Completion::Exited(code),
        // Terminated by a signal.
        None => Completion::Killed,
    }
}

fn create_output_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating output dir {:?}", parent))?;
    }
    File::create(path).with_context(|| format!("creating output file {:?}", path))
}

/// SIGKILL every process in the group led by `pid`.
#[cfg(unix)]
fn kill_group(pid: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::other(format!("pid {pid} out of range")))?;
    // SAFETY: killpg only sends a signal; `pgid` is a group we created at spawn.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) -> std::io::Result<()> {
    Ok(())
}

/// Kill the child's process group, then the child itself, and reap it.
async fn terminate(child: &mut Child, label: &str) {
    if let Some(pid) = child.id() {
        if let Err(e) = kill_group(pid) {
            warn!(task = %label, pid, error = %e, "failed to kill process group");
        }
    }
    if let Err(e) = child.kill().await {
        warn!(task = %label, error = %e, "failed to kill child process");
    }
}

/// Spawn `cmd` with stdout/stderr redirected to files and wait for it.
///
/// The child leads its own process group. Either it exits on its own, the
/// cancel channel fires, or the wall-time limit is reached; in the last two
/// cases the whole group is killed so forked commands stop as well. A
/// dropped cancel sender is not a cancellation.
pub async fn run_to_files(
    mut cmd: Command,
    label: &str,
    stdout: &Path,
    stderr: &Path,
    timeout: Option<Duration>,
    mut cancel: oneshot::Receiver<()>,
) -> Result<Completion> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(create_output_file(stdout)?))
        .stderr(Stdio::from(create_output_file(stderr)?))
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{label}'"))?;

    let limit = deadline(timeout);
    tokio::pin!(limit);

    tokio::select! {
        status = child.wait() => {
            let status = status
                .with_context(|| format!("waiting for process of task '{label}'"))?;
            Ok(completion_from_status(status))
        }

        Ok(()) = &mut cancel => {
            debug!(task = %label, "cancellation requested; killing process group");
            terminate(&mut child, label).await;
            Ok(Completion::Killed)
        }

        _ = &mut limit => {
            debug!(task = %label, "wall-time limit exceeded; killing process group");
            terminate(&mut child, label).await;
            Ok(Completion::TimedOut)
        }
    }
}

/// Run `cmd` to completion and capture its output.
pub async fn run_captured(mut cmd: Command) -> Result<CapturedOutput> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    let output = cmd.output().await.context("running command")?;
    Ok(CapturedOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn output_goes_to_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/t.stdout");
        let err = dir.path().join("nested/t.stderr");
        let (_tx, rx) = oneshot::channel();

        let completion = run_to_files(shell("echo out; echo err >&2; exit 3"), "t", &out, &err, None, rx)
            .await
            .unwrap();

        assert_eq!(completion, Completion::Exited(3));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "out\n");
        assert_eq!(std::fs::read_to_string(&err).unwrap(), "err\n");
    }

    #[tokio::test]
    async fn cancel_kills_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = oneshot::channel();
        let run = tokio::spawn({
            let out = dir.path().join("t.stdout");
            let err = dir.path().join("t.stderr");
            async move { run_to_files(shell("sleep 30"), "t", &out, &err, None, rx).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        let completion = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(completion, Completion::Killed);
    }

    #[tokio::test]
    async fn wall_time_limit_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = oneshot::channel();

        let completion = run_to_files(
            shell("sleep 30"),
            "t",
            &dir.path().join("t.stdout"),
            &dir.path().join("t.stderr"),
            Some(Duration::from_millis(50)),
            rx,
        )
        .await
        .unwrap();

        assert_eq!(completion, Completion::TimedOut);
    }

    #[tokio::test]
    async fn timeout_also_stops_forked_commands() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let (_tx, rx) = oneshot::channel();
        let script = format!("(sleep 1; touch {}); true", marker.display());

        let completion = run_to_files(
            shell(&script),
            "t",
            &dir.path().join("t.stdout"),
            &dir.path().join("t.stderr"),
            Some(Duration::from_millis(100)),
            rx,
        )
        .await
        .unwrap();
        assert_eq!(completion, Completion::TimedOut);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "forked subshell outlived the timeout");
    }

    #[tokio::test]
    async fn cancel_also_stops_forked_commands() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let (tx, rx) = oneshot::channel();
        let script = format!("ulimit -v 4194304 && sh -c 'sleep 1; touch {}'", marker.display());
        let run = tokio::spawn({
            let out = dir.path().join("t.stdout");
            let err = dir.path().join("t.stderr");
            async move { run_to_files(shell(&script), "t", &out, &err, None, rx).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        let completion = run.await.unwrap().unwrap();
        assert_eq!(completion, Completion::Killed);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "forked command outlived the cancellation");
    }

    #[tokio::test]
    async fn captured_output_keeps_exit_code() {
        let out = run_captured(shell("printf job-7; exit 2")).await.unwrap();
        assert_eq!(out.code, 2);
        assert_eq!(out.stdout, "job-7");
        assert!(!out.success());
    }

    #[test]
    fn empty_argv_is_an_error() {
        assert!(from_argv(&[]).is_err());
    }
}
