use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;

use shflow::checkpoint::Checkpoint;
use shflow::config::Config;
use shflow::exec::{ExecutionerFactory, Executioners};
use shflow::fs::{FileSystem, RealFileSystem};
use shflow::lang::Program;
use shflow::run::{ProgramThread, RunOutcome, ThreadContext};

/// `print` destination that can be read back after the run.
#[derive(Debug, Clone, Default)]
pub struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Runs programs against a private (not installed) executioner registry.
///
/// Programs run on a blocking thread, as they do in the binary; use a
/// multi-threaded runtime so the executioner workers keep running.
pub struct Harness {
    pub registry: Arc<Executioners>,
    pub fs: Arc<dyn FileSystem>,
    pub output: SharedOutput,
    checkpoints: bool,
    dry_run: bool,
}

impl Harness {
    /// Production backends.
    pub fn new(config: Config) -> Self {
        Self::from_registry(Executioners::new(config, Handle::current()))
    }

    pub fn with_factory(config: Config, factory: impl ExecutionerFactory + 'static) -> Self {
        Self::from_registry(Executioners::with_factory(
            config,
            Handle::current(),
            Box::new(factory),
        ))
    }

    fn from_registry(registry: Executioners) -> Self {
        Self {
            registry: Arc::new(registry),
            fs: Arc::new(RealFileSystem::new()),
            output: SharedOutput::default(),
            checkpoints: true,
            dry_run: false,
        }
    }

    pub fn checkpoints(mut self, enabled: bool) -> Self {
        self.checkpoints = enabled;
        self
    }

    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    fn context(&self) -> ThreadContext {
        ThreadContext::new(Arc::clone(&self.registry), Arc::clone(&self.fs))
            .with_output(Box::new(self.output.clone()))
            .with_checkpoints(self.checkpoints)
            .with_dry_run(self.dry_run)
    }

    /// Run `program` to the end; returns the finished thread for inspection.
    pub async fn run(&self, program: Program) -> anyhow::Result<(ProgramThread, RunOutcome)> {
        self.run_with_args(program, Vec::new()).await
    }

    pub async fn run_with_args(
        &self,
        program: Program,
        args: Vec<String>,
    ) -> anyhow::Result<(ProgramThread, RunOutcome)> {
        let ctx = self.context();
        let result = tokio::task::spawn_blocking(move || {
            let mut thread = ProgramThread::new(program, args, ctx)?;
            let outcome = thread.run()?;
            Ok::<_, shflow::errors::ShflowError>((thread, outcome))
        })
        .await?;
        Ok(result?)
    }

    /// Continue a program from `checkpoint`.
    pub async fn recover(&self, checkpoint: Checkpoint) -> anyhow::Result<(ProgramThread, RunOutcome)> {
        let ctx = self.context();
        let result = tokio::task::spawn_blocking(move || {
            let mut thread = ProgramThread::recover(checkpoint, ctx)?;
            let outcome = thread.run()?;
            Ok::<_, shflow::errors::ShflowError>((thread, outcome))
        })
        .await?;
        Ok(result?)
    }

    /// Load a checkpoint file through the harness's file system.
    pub fn load_checkpoint(&self, path: &std::path::Path) -> anyhow::Result<Checkpoint> {
        Ok(Checkpoint::load(self.fs.as_ref(), path)?)
    }
}
