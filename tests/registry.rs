// tests/registry.rs

mod common;
use crate::common::{init_tracing, FakeBackend, FakeFactory};

use std::sync::Arc;

use tokio::runtime::Handle;

use shflow::config::Config;
use shflow::errors::ShflowError;
use shflow::exec::{Executioner, Executioners};
use shflow::types::ExecutionerType;

fn registry() -> Executioners {
    Executioners::with_factory(
        Config::default(),
        Handle::current(),
        Box::new(FakeFactory::new(FakeBackend::new())),
    )
}

#[tokio::test]
async fn valid_executioner_is_reused() {
    init_tracing();
    let registry = registry();

    let first = registry.get(ExecutionerType::Local).unwrap();
    let second = registry.get(ExecutionerType::Local).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let ssh = registry.get(ExecutionerType::Ssh).unwrap();
    assert!(!Arc::ptr_eq(&first, &ssh));
    assert_eq!(ssh.kind(), ExecutionerType::Ssh);
}

#[tokio::test]
async fn invalid_executioner_is_rebuilt() {
    init_tracing();
    let registry = registry();

    let first = registry.get(ExecutionerType::Cluster).unwrap();
    first.stop();

    let second = registry.get(ExecutionerType::Cluster).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.is_valid());
    assert_eq!(registry.get_all().len(), 1);
}

#[tokio::test]
async fn shutdown_refuses_new_work() {
    init_tracing();
    let registry = registry();
    registry.get(ExecutionerType::Sys).unwrap();

    registry.shutdown();
    assert!(matches!(
        registry.get(ExecutionerType::Sys),
        Err(ShflowError::ExecutionerStopped(ExecutionerType::Sys))
    ));
}
