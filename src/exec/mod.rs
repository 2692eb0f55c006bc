// src/exec/mod.rs

//! Execution backends.
//!
//! - [`executioner`] defines the [`Executioner`] contract and the shared
//!   worker loop ([`QueueExecutioner`]) every variant is built on.
//! - [`backend`] is the per-job seam: a [`Backend`] turns one task into a
//!   running job and reports how it ended. Tests replace it with a fake.
//! - [`local`], [`ssh`] and [`cluster`] are the concrete backends.
//! - [`host`] holds the cluster/host model.
//! - [`process`] has the child-process helpers the backends share.
//! - [`registry`] maps executioner types to running instances.

pub mod backend;
pub mod cluster;
pub mod executioner;
pub mod host;
pub mod local;
pub mod process;
pub mod registry;
pub mod ssh;

pub use backend::{Backend, BackendFuture, Completion};
pub use executioner::{Executioner, ExecutionerOptions, QueueExecutioner};
pub use host::{Cluster, Host, HostKind};
pub use registry::{DefaultFactory, ExecutionerFactory, Executioners};
