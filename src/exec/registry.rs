// src/exec/registry.rs

//! Process-wide registry of running executioners.
//!
//! [`Executioners`] is an explicit context object: it is built once at
//! program start and handed to whatever needs an executioner. `install`
//! additionally publishes it process-wide and refuses a second
//! installation with an error instead of panicking.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::config::Config;
use crate::errors::{Result, ShflowError};
use crate::exec::cluster::ClusterBackend;
use crate::exec::executioner::{Executioner, ExecutionerOptions, QueueExecutioner};
use crate::exec::host::{Cluster, Host};
use crate::exec::local::LocalBackend;
use crate::exec::ssh::SshBackend;
use crate::types::ExecutionerType;

static REGISTRY: OnceLock<Arc<Executioners>> = OnceLock::new();

/// Builds (but does not start) executioners. Tests inject their own.
pub trait ExecutionerFactory: Send + Sync {
    fn build(&self, kind: ExecutionerType, config: &Config) -> Result<Arc<dyn Executioner>>;
}

/// Production factory: local processes, ssh and the batch scheduler.
#[derive(Debug, Default)]
pub struct DefaultFactory;

impl ExecutionerFactory for DefaultFactory {
    fn build(&self, kind: ExecutionerType, config: &Config) -> Result<Arc<dyn Executioner>> {
        let executioner: Arc<dyn Executioner> = match kind {
            ExecutionerType::Sys => Arc::new(QueueExecutioner::new(
                kind,
                Cluster::local(),
                ExecutionerOptions::from_config(config, None),
                LocalBackend::new(),
            )),
            ExecutionerType::Local => Arc::new(QueueExecutioner::new(
                kind,
                Cluster::local(),
                ExecutionerOptions::from_config(config, Some(config.local.effective_max_concurrent())),
                LocalBackend::new(),
            )),
            ExecutionerType::Ssh => {
                let hosts = config.ssh.hosts.iter().map(Host::remote).collect();
                Arc::new(QueueExecutioner::new(
                    kind,
                    Cluster::new(kind, hosts)?,
                    ExecutionerOptions::from_config(config, None),
                    SshBackend::from_config(&config.ssh),
                ))
            }
            ExecutionerType::Cluster => Arc::new(QueueExecutioner::new(
                kind,
                Cluster::new(kind, vec![Host::scheduler("scheduler")])?,
                ExecutionerOptions::from_config(config, None),
                ClusterBackend::new(&config.cluster)?,
            )),
        };
        Ok(executioner)
    }
}

pub struct Executioners {
    config: Config,
    handle: Handle,
    factory: Box<dyn ExecutionerFactory>,
    cache: Mutex<HashMap<ExecutionerType, Arc<dyn Executioner>>>,
    closed: AtomicBool,
}

impl fmt::Debug for Executioners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executioners")
            .field("cached", &self.cache.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Executioners {
    /// Registry with the production factory. Worker loops are spawned on
    /// `handle`.
    pub fn new(config: Config, handle: Handle) -> Self {
        Self::with_factory(config, handle, Box::new(DefaultFactory))
    }

    pub fn with_factory(config: Config, handle: Handle, factory: Box<dyn ExecutionerFactory>) -> Self {
        Self {
            config,
            handle,
            factory,
            cache: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Publish this registry as the process-wide instance.
    ///
    /// Only one registry may be installed per process; a second call
    /// returns [`ShflowError::RegistryAlreadyInitialized`].
    pub fn install(self) -> Result<Arc<Self>> {
        let registry = Arc::new(self);
        REGISTRY
            .set(Arc::clone(&registry))
            .map_err(|_| ShflowError::RegistryAlreadyInitialized)?;
        Ok(registry)
    }

    /// The installed registry, if any.
    pub fn global() -> Option<Arc<Self>> {
        REGISTRY.get().cloned()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Build and start a new executioner. Never returns one that is not
    /// started.
    pub fn factory(&self, kind: ExecutionerType) -> Result<Arc<dyn Executioner>> {
        let executioner = self.factory.build(kind, &self.config)?;
        executioner.start(&self.handle)?;
        info!(executioner = %kind, "executioner created");
        Ok(executioner)
    }

    /// Running executioner for `kind`, created on first use and recreated
    /// when the cached one is no longer valid.
    ///
    /// After [`Executioners::shutdown`] nothing is handed out any more.
    pub fn get(&self, kind: ExecutionerType) -> Result<Arc<dyn Executioner>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ShflowError::ExecutionerStopped(kind));
        }
        let mut cache = self.cache.lock();
        if let Some(existing) = cache.get(&kind) {
            if existing.is_valid() {
                return Ok(Arc::clone(existing));
            }
            debug!(executioner = %kind, "cached executioner is no longer valid; replacing it");
        }

        let executioner = self.factory(kind)?;
        cache.insert(kind, Arc::clone(&executioner));
        Ok(executioner)
    }

    /// Like [`Executioners::get`], falling back to `local` for unknown names.
    pub fn get_by_name(&self, name: &str) -> Result<Arc<dyn Executioner>> {
        self.get(ExecutionerType::parse_safe(name))
    }

    /// Snapshot of the cached executioners.
    pub fn get_all(&self) -> Vec<Arc<dyn Executioner>> {
        self.cache.lock().values().cloned().collect()
    }

    /// Stop every cached executioner. Their running tasks are killed.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        for executioner in self.get_all() {
            debug!(executioner = %executioner.kind(), "stopping executioner");
            executioner.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_caches_by_type() {
        let registry = Executioners::new(Config::default(), Handle::current());

        let a = registry.get(ExecutionerType::Sys).unwrap();
        let b = registry.get(ExecutionerType::Sys).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_valid());

        let local = registry.get_by_name("no-such-system").unwrap();
        assert_eq!(local.kind(), ExecutionerType::Local);
        assert_eq!(registry.get_all().len(), 2);
    }

    #[tokio::test]
    async fn invalid_executioner_is_replaced() {
        let registry = Executioners::new(Config::default(), Handle::current());

        let first = registry.get(ExecutionerType::Local).unwrap();
        first.stop();
        assert!(!first.is_valid());

        let second = registry.get(ExecutionerType::Local).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_valid());
    }

    #[tokio::test]
    async fn shutdown_closes_the_registry() {
        let registry = Executioners::new(Config::default(), Handle::current());
        let local = registry.get(ExecutionerType::Local).unwrap();

        registry.shutdown();
        assert!(!local.is_valid());
        assert!(matches!(
            registry.get(ExecutionerType::Local),
            Err(ShflowError::ExecutionerStopped(ExecutionerType::Local))
        ));
    }

    #[tokio::test]
    async fn ssh_without_hosts_is_an_error() {
        let registry = Executioners::new(Config::default(), Handle::current());
        assert!(matches!(
            registry.get(ExecutionerType::Ssh),
            Err(ShflowError::NoHosts(ExecutionerType::Ssh))
        ));
    }
}
