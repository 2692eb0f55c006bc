#![allow(dead_code)]

pub use shflow_test_utils::builders;
pub use shflow_test_utils::fake_backend::{FakeBackend, FakeFactory};
pub use shflow_test_utils::harness::Harness;
pub use shflow_test_utils::{init_tracing, with_timeout};
