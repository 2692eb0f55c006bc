use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of backend a task is dispatched to.
///
/// - `Sys`: direct child process on the local host, no admission control.
/// - `Local`: local queue with a bounded number of concurrent tasks
///   (default).
/// - `Ssh`: remote command over `ssh` on one of the configured hosts.
/// - `Cluster`: job submitted to an external batch scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionerType {
    Sys,
    Local,
    Ssh,
    Cluster,
}

impl ExecutionerType {
    /// Parse an executioner name, falling back to `Local` for anything that
    /// is not recognised.
    pub fn parse_safe(name: &str) -> Self {
        name.parse().unwrap_or(ExecutionerType::Local)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionerType::Sys => "sys",
            ExecutionerType::Local => "local",
            ExecutionerType::Ssh => "ssh",
            ExecutionerType::Cluster => "cluster",
        }
    }
}

impl Default for ExecutionerType {
    fn default() -> Self {
        ExecutionerType::Local
    }
}

impl fmt::Display for ExecutionerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sys" => Ok(ExecutionerType::Sys),
            "local" => Ok(ExecutionerType::Local),
            "ssh" => Ok(ExecutionerType::Ssh),
            "cluster" => Ok(ExecutionerType::Cluster),
            other => Err(format!(
                "invalid executioner type: {other} (expected \"sys\", \"local\", \"ssh\" or \"cluster\")"
            )),
        }
    }
}
