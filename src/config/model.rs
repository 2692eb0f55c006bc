// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::ExecutionerType;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// verbose = true
/// output_dir = ".shflow"
///
/// [task]
/// cpus = 2
/// system = "local"
///
/// [local]
/// max_concurrent = 4
///
/// [ssh]
/// hosts = ["node1", "user@node2"]
///
/// [cluster]
/// submit = ["qsub", "-o", "{stdout}", "-e", "{stderr}", "{script}"]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Global behaviour from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Defaults for task options not given in the script, from `[task]`.
    #[serde(default)]
    pub task: TaskDefaults,

    /// Local queue settings from `[local]`.
    #[serde(default)]
    pub local: LocalSection,

    /// Remote execution settings from `[ssh]`.
    #[serde(default)]
    pub ssh: SshSection,

    /// Batch scheduler settings from `[cluster]`.
    #[serde(default)]
    pub cluster: ClusterSection,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Log each task start/finish at info level.
    #[serde(default)]
    pub verbose: bool,

    /// Log commands and hosts for every dispatched task.
    #[serde(default)]
    pub debug: bool,

    /// Keep a `<task id>.cmd` file with the command next to its output.
    #[serde(default)]
    pub log: bool,

    /// How often pending tasks are re-checked for satisfied dependencies.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Directory receiving task stdout/stderr/exit files.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Directory for checkpoint files written on failure. Defaults to the
    /// current directory.
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Write a checkpoint when a wait fails.
    #[serde(default = "default_true")]
    pub checkpoint_on_failure: bool,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".shflow")
}

fn default_true() -> bool {
    true
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            verbose: false,
            debug: false,
            log: false,
            poll_interval_ms: default_poll_interval_ms(),
            output_dir: default_output_dir(),
            checkpoint_dir: None,
            checkpoint_on_failure: true,
        }
    }
}

impl ConfigSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// `[task]` section: values used when a `task` expression omits an option.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDefaults {
    #[serde(default = "default_cpus")]
    pub cpus: u32,

    /// Memory limit in bytes.
    #[serde(default)]
    pub mem: Option<u64>,

    /// Wall-time limit in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub can_fail: bool,

    #[serde(default)]
    pub system: ExecutionerType,
}

fn default_cpus() -> u32 {
    1
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            cpus: default_cpus(),
            mem: None,
            timeout_secs: None,
            can_fail: false,
            system: ExecutionerType::default(),
        }
    }
}

/// `[local]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocalSection {
    /// Maximum number of tasks the local queue runs at once.
    ///
    /// If `None`, the number of available CPUs is used.
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

impl LocalSection {
    pub fn effective_max_concurrent(&self) -> usize {
        self.max_concurrent.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// `[ssh]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SshSection {
    /// Program used to open the remote shell.
    #[serde(default = "default_ssh_command")]
    pub command: String,

    /// Extra arguments placed before the host name.
    #[serde(default = "default_ssh_options")]
    pub options: Vec<String>,

    /// Hosts tasks are dispatched to, round-robin.
    #[serde(default)]
    pub hosts: Vec<String>,
}

fn default_ssh_command() -> String {
    "ssh".to_string()
}

fn default_ssh_options() -> Vec<String> {
    vec!["-o".to_string(), "BatchMode=yes".to_string()]
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            command: default_ssh_command(),
            options: default_ssh_options(),
            hosts: Vec::new(),
        }
    }
}

/// `[cluster]` section.
///
/// Command lines are argument templates. The placeholders `{script}`,
/// `{stdout}`, `{stderr}`, `{name}`, `{cpus}`, `{mem}` and `{job_id}` are
/// replaced per task.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSection {
    #[serde(default = "default_submit")]
    pub submit: Vec<String>,

    /// Exits with status 0 while the scheduler still knows the job.
    #[serde(default = "default_stat")]
    pub stat: Vec<String>,

    #[serde(default = "default_kill")]
    pub kill: Vec<String>,

    /// Regex applied to the submit command's stdout. The first capture group
    /// (or the whole match) is the job id.
    #[serde(default = "default_job_id_regex")]
    pub job_id_regex: String,

    #[serde(default = "default_cluster_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_submit() -> Vec<String> {
    ["qsub", "-N", "{name}", "-o", "{stdout}", "-e", "{stderr}", "{script}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_stat() -> Vec<String> {
    vec!["qstat".to_string(), "{job_id}".to_string()]
}

fn default_kill() -> Vec<String> {
    vec!["qdel".to_string(), "{job_id}".to_string()]
}

fn default_job_id_regex() -> String {
    r"^\s*(\S+)".to_string()
}

fn default_cluster_poll_interval_ms() -> u64 {
    1000
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            submit: default_submit(),
            stat: default_stat(),
            kill: default_kill(),
            job_id_regex: default_job_id_regex(),
            poll_interval_ms: default_cluster_poll_interval_ms(),
        }
    }
}

impl ClusterSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
