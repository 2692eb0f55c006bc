// src/exec/host.rs

use std::fmt;

use crate::errors::{Result, ShflowError};
use crate::types::ExecutionerType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    /// This machine.
    Local,
    /// Reached over ssh; the name is the ssh destination.
    Remote,
    /// Front-end of a batch scheduler.
    Scheduler,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub name: String,
    pub kind: HostKind,
}

impl Host {
    pub fn local() -> Self {
        Self {
            name: "localhost".to_string(),
            kind: HostKind::Local,
        }
    }

    pub fn remote(address: impl Into<String>) -> Self {
        Self {
            name: address.into(),
            kind: HostKind::Remote,
        }
    }

    pub fn scheduler(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: HostKind::Scheduler,
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Ordered, non-empty set of hosts an executioner dispatches onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    hosts: Vec<Host>,
}

impl Cluster {
    pub fn new(kind: ExecutionerType, hosts: Vec<Host>) -> Result<Self> {
        if hosts.is_empty() {
            return Err(ShflowError::NoHosts(kind));
        }
        Ok(Self { hosts })
    }

    /// A cluster made of this machine only.
    pub fn local() -> Self {
        Self {
            hosts: vec![Host::local()],
        }
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Host for the `n`-th dispatched task, round-robin.
    pub fn host_for(&self, n: usize) -> &Host {
        &self.hosts[n % self.hosts.len()]
    }
}
