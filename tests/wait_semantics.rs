// tests/wait_semantics.rs

mod common;
use crate::common::builders::ast::*;
use crate::common::builders::ConfigBuilder;
use crate::common::{init_tracing, with_timeout, FakeBackend, FakeFactory, Harness};

use std::error::Error;

use shflow::lang::{NativeFn, Type, Expr};
use shflow::task::TaskState;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test(flavor = "multi_thread")]
async fn wait_without_tasks_returns_immediately() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let program = program("idle", vec![wait_all(1), print(2, s("ok"))]);
    let harness = Harness::with_factory(ConfigBuilder::in_dir(dir.path()).build(), FakeFactory::default());
    let (_, outcome) = with_timeout(harness.run(program)).await?;

    assert!(outcome.success());
    assert_eq!(harness.output.contents(), "ok\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn wait_on_unknown_task_is_a_failure() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;

    let program = program(
        "unknown",
        vec![wait_on(1, s("no.such.task")), print(2, s("unreachable"))],
    );
    let config = ConfigBuilder::in_dir(dir.path()).checkpoint_on_failure(false).build();
    let harness = Harness::with_factory(config, FakeFactory::default());
    let (_, outcome) = with_timeout(harness.run(program)).await?;

    assert_eq!(outcome.exit_code, 1);
    let fatal = outcome.fatal.expect("fatal error recorded");
    assert_eq!(fatal.line, 1);
    assert_eq!(harness.output.contents(), "");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_is_tolerated_only_with_can_fail() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let backend = FakeBackend::new().exit_code("false", 1);

    // can_fail = true: the wait succeeds.
    let tolerated = program(
        "tolerated",
        vec![
            decl(1, "t", Type::String, task_can_fail("false")),
            wait_on(2, var("t")),
            print(3, Expr::native(NativeFn::ExitCode, var("t"))),
        ],
    );
    let harness = Harness::with_factory(
        ConfigBuilder::in_dir(dir.path()).build(),
        FakeFactory::new(backend.clone()),
    );
    let (_, outcome) = with_timeout(harness.run(tolerated)).await?;
    assert!(outcome.success());
    assert!(outcome.failed_tasks.is_empty());
    assert_eq!(harness.output.contents(), "1\n");

    // Same task without can_fail: the wait fails.
    let fatal = program(
        "fatal",
        vec![
            decl(1, "t", Type::String, task("false")),
            wait_on(2, var("t")),
            print(3, s("unreachable")),
        ],
    );
    let harness = Harness::with_factory(
        ConfigBuilder::in_dir(dir.path()).checkpoint_on_failure(false).build(),
        FakeFactory::new(backend),
    );
    let (thread, outcome) = with_timeout(harness.run(fatal)).await?;
    assert_eq!(outcome.exit_code, 1);
    assert_eq!(outcome.failed_tasks.len(), 1);
    assert_eq!(outcome.fatal.map(|f| f.line), Some(2));
    assert_eq!(harness.output.contents(), "");

    let task = thread.tasks().iter().next().expect("one task");
    assert_eq!(task.state(), TaskState::Failed);
    assert_eq!(task.exit_code(), Some(1));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn task_output_is_readable_after_wait() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let backend = FakeBackend::new().stdout("hello", "hi there");

    let program = program(
        "output",
        vec![
            decl(1, "t", Type::String, task("hello")),
            wait_on(2, var("t")),
            print(3, Expr::native(NativeFn::Stdout, var("t"))),
            print(4, Expr::native(NativeFn::TaskState, var("t"))),
        ],
    );
    let harness = Harness::with_factory(
        ConfigBuilder::in_dir(dir.path()).build(),
        FakeFactory::new(backend),
    );
    let (_, outcome) = with_timeout(harness.run(program)).await?;

    assert!(outcome.success());
    assert_eq!(
        harness.output.contents(),
        format!("hi there\n{}\n", TaskState::FinishedOk.as_str())
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn end_of_program_joins_outstanding_tasks() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let backend = FakeBackend::new().exit_code("bad", 3);

    let program = program("join", vec![expr(1, task("good")), expr(2, task("bad"))]);
    let harness = Harness::with_factory(
        ConfigBuilder::in_dir(dir.path()).build(),
        FakeFactory::new(backend.clone()),
    );
    let (_, outcome) = with_timeout(harness.run(program)).await?;

    assert_eq!(outcome.exit_code, 1);
    assert_eq!(outcome.failed_tasks.len(), 1);
    assert_eq!(outcome.failed_tasks[0].command(), "bad");
    // The implicit join writes a checkpoint so the run can be retried.
    let checkpoint = outcome.checkpoint.expect("checkpoint after failed join");
    assert!(checkpoint.starts_with(dir.path().join("ckpt")));
    Ok(())
}
