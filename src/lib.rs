// src/lib.rs

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod lang;
pub mod logging;
pub mod run;
pub mod scope;
pub mod task;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::checkpoint::Checkpoint;
use crate::cli::CliArgs;
use crate::config::loader::{load_and_validate, load_default};
use crate::exec::Executioners;
use crate::fs::{FileSystem, RealFileSystem};
use crate::lang::Program;
use crate::run::{ProgramThread, RunOutcome, ThreadContext};

/// High-level entry point used by `main.rs`. Returns the process exit
/// status.
///
/// This wires together:
/// - config loading
/// - the executioner registry
/// - the program thread (fresh or recovered from a checkpoint)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let config = match &args.config {
        Some(path) => load_and_validate(path)?,
        None => load_default()?,
    };

    let registry = Executioners::new(config, Handle::current()).install()?;
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem::new());
    let ctx = ThreadContext::new(Arc::clone(&registry), Arc::clone(&fs))
        .with_checkpoints(!args.no_checkpoint)
        .with_dry_run(args.dry_run);

    let mut thread = match (&args.recover, &args.program) {
        (Some(path), _) => {
            let checkpoint = Checkpoint::load(fs.as_ref(), path)?;
            info!(
                path = %path.display(),
                program = %checkpoint.program.name,
                "recovering from checkpoint"
            );
            ProgramThread::recover(checkpoint, ctx)?
        }
        (None, Some(path)) => {
            let program = load_program(fs.as_ref(), path)?;
            ProgramThread::new(program, args.args.clone(), ctx)?
        }
        (None, None) => bail!("no program given; pass a program file or --recover"),
    };

    // Ctrl-C → stop every executioner; the pending wait then fails and
    // writes a checkpoint.
    {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("interrupted; stopping executioners");
            registry.shutdown();
        });
    }

    // The interpreter blocks on task completion; keep it off the runtime's
    // worker threads.
    let outcome = tokio::task::spawn_blocking(move || thread.run())
        .await
        .context("program thread panicked")??;

    registry.shutdown();
    fs.cleanup();
    report(&outcome);
    Ok(outcome.exit_code)
}

/// Read a compiled program from JSON.
pub fn load_program(fs: &dyn FileSystem, path: &Path) -> Result<Program> {
    let text = fs
        .read_to_string(path)
        .with_context(|| format!("reading program {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing program {}", path.display()))
}

fn report(outcome: &RunOutcome) {
    for task in &outcome.failed_tasks {
        error!(
            task = %task.id(),
            line = task.line(),
            state = task.state().as_str(),
            exit_code = ?task.exit_code(),
            cmd = %task.command(),
            "task failed"
        );
    }
    if let Some(fatal) = &outcome.fatal {
        error!("program stopped: {fatal}");
    }
    if let Some(path) = &outcome.checkpoint {
        info!(
            path = %path.display(),
            "checkpoint written; continue with `shflow --recover {}`",
            path.display()
        );
    }
}
