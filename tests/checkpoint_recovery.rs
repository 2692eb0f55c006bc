// tests/checkpoint_recovery.rs

mod common;
use crate::common::builders::ast::*;
use crate::common::builders::ConfigBuilder;
use crate::common::{init_tracing, with_timeout, FakeBackend, FakeFactory, Harness};

use std::error::Error;

use shflow::checkpoint::CheckpointReason;
use shflow::lang::{Expr, Program, Type};
use shflow::task::TaskState;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test(flavor = "multi_thread")]
async fn failed_wait_resumes_without_rerunning_finished_tasks() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = ConfigBuilder::in_dir(dir.path()).build();

    let program = program(
        "retry",
        vec![
            decl(1, "a", Type::String, task("A")),
            decl(2, "b", Type::String, task("B")),
            wait_all(3),
            print(4, s("done")),
        ],
    );

    // First run: B fails, the wait fails and leaves a checkpoint.
    let failing = FakeBackend::new().exit_code("B", 1);
    let harness = Harness::with_factory(config.clone(), FakeFactory::new(failing.clone()));
    let (_, outcome) = with_timeout(harness.run(program)).await?;

    assert_eq!(outcome.exit_code, 1);
    assert_eq!(harness.output.contents(), "");
    let path = outcome.checkpoint.expect("checkpoint written after failed wait");
    assert_eq!(path, dir.path().join("ckpt").join("retry.chp"));

    let checkpoint = harness.load_checkpoint(&path)?;
    assert_eq!(checkpoint.reason, CheckpointReason::WaitFailed);
    assert_eq!(checkpoint.tasks.len(), 2);

    // Second run, "fresh process": only B is submitted again.
    let healthy = FakeBackend::new();
    let harness = Harness::with_factory(config, FakeFactory::new(healthy.clone()));
    let (thread, outcome) = with_timeout(harness.recover(checkpoint)).await?;

    assert!(outcome.success(), "recovered run failed: {:?}", outcome.fatal);
    assert_eq!(healthy.started(), vec!["B"]);
    assert_eq!(harness.output.contents(), "done\n");
    assert!(thread.tasks().iter().all(|t| t.state() == TaskState::FinishedOk));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn tolerated_failures_are_not_retried() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = ConfigBuilder::in_dir(dir.path()).build();

    let program = program(
        "tolerant",
        vec![
            expr(1, task_can_fail("optional")),
            expr(2, task("required")),
            wait_all(3),
        ],
    );

    let failing = FakeBackend::new()
        .exit_code("optional", 1)
        .exit_code("required", 1);
    let harness = Harness::with_factory(config.clone(), FakeFactory::new(failing));
    let (_, outcome) = with_timeout(harness.run(program)).await?;
    let checkpoint = harness.load_checkpoint(&outcome.checkpoint.expect("checkpoint"))?;

    let healthy = FakeBackend::new();
    let harness = Harness::with_factory(config, FakeFactory::new(healthy.clone()));
    let (_, outcome) = with_timeout(harness.recover(checkpoint)).await?;

    assert!(outcome.success());
    assert_eq!(healthy.started(), vec!["required"]);
    Ok(())
}

/// for (var i int = 0; i < 3; i = i + 1) {
///     print i
///     if (i == 1) { checkpoint }
///     print "after " + i
/// }
/// print "end"
fn loop_program() -> Program {
    program(
        "loop",
        vec![
            for_range(
                1,
                "i",
                0,
                3,
                vec![
                    print(2, var("i")),
                    if_then(3, eq(var("i"), int(1)), vec![checkpoint(3)]),
                    print(4, add(s("after "), var("i"))),
                ],
            ),
            print(5, s("end")),
        ],
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn checkpoint_in_a_loop_resumes_at_the_same_iteration() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = ConfigBuilder::in_dir(dir.path()).build();

    let harness = Harness::with_factory(config.clone(), FakeFactory::default());
    let (_, outcome) = with_timeout(harness.run(loop_program())).await?;
    assert!(outcome.success());
    assert_eq!(
        harness.output.contents(),
        "0\nafter 0\n1\nafter 1\n2\nafter 2\nend\n"
    );

    let checkpoint = harness.load_checkpoint(&outcome.checkpoint.expect("checkpoint"))?;
    assert_eq!(checkpoint.reason, CheckpointReason::Explicit);

    let harness = Harness::with_factory(config, FakeFactory::default());
    let (_, outcome) = with_timeout(harness.recover(checkpoint)).await?;
    assert!(outcome.success());
    assert_eq!(harness.output.contents(), "after 1\n2\nafter 2\nend\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn checkpoint_in_for_each_resumes_at_the_same_element() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = ConfigBuilder::in_dir(dir.path()).build();

    let program = program(
        "each",
        vec![for_each(
            1,
            "item",
            Type::String,
            Expr::list(vec![s("x"), s("y"), s("z")]),
            vec![
                print(2, var("item")),
                if_then(3, eq(var("item"), s("y")), vec![checkpoint(3)]),
                print(4, add(s("done "), var("item"))),
            ],
        )],
    );

    let harness = Harness::with_factory(config.clone(), FakeFactory::default());
    let (_, outcome) = with_timeout(harness.run(program)).await?;
    let checkpoint = harness.load_checkpoint(&outcome.checkpoint.expect("checkpoint"))?;
    assert_eq!(checkpoint.stack.len(), 2, "list and index are on the stack");

    let harness = Harness::with_factory(config, FakeFactory::default());
    let (_, outcome) = with_timeout(harness.recover(checkpoint)).await?;
    assert!(outcome.success());
    assert_eq!(harness.output.contents(), "done y\nz\ndone z\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn checkpoint_in_a_recursive_function_resumes_inside_the_calls() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = ConfigBuilder::in_dir(dir.path()).build();

    // int depth(int n) {
    //     print "enter " + n
    //     if (n == 0) { checkpoint; return 0 }
    //     return depth(n - 1) + 1
    // }
    let depth = function(
        "depth",
        &[("n", Type::Int)],
        Type::Int,
        vec![
            print(1, add(s("enter "), var("n"))),
            if_then(2, eq(var("n"), int(0)), vec![checkpoint(2), ret(2, int(0))]),
            ret(3, add(call("depth", vec![sub(var("n"), int(1))]), int(1))),
        ],
    );
    let program = program(
        "recursive",
        vec![
            decl(10, "r", Type::Int, call("depth", vec![int(3)])),
            print(11, var("r")),
        ],
    )
    .with_function(depth);

    let harness = Harness::with_factory(config.clone(), FakeFactory::default());
    let (_, outcome) = with_timeout(harness.run(program)).await?;
    assert_eq!(
        harness.output.contents(),
        "enter 3\nenter 2\nenter 1\nenter 0\n3\n"
    );

    let checkpoint = harness.load_checkpoint(&outcome.checkpoint.expect("checkpoint"))?;
    // Call sites of depth(3), depth(2), depth(1) and depth(0), then the
    // checkpoint statement.
    assert_eq!(checkpoint.resume_path.len(), 5);

    let harness = Harness::with_factory(config, FakeFactory::default());
    let (thread, outcome) = with_timeout(harness.recover(checkpoint)).await?;
    assert!(outcome.success());
    assert_eq!(harness.output.contents(), "3\n");
    assert_eq!(
        thread.scope().get_symbol("r").map(|s| s.value.clone()),
        Some(shflow::lang::Value::Int(3))
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_checkpoints_write_nothing() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = ConfigBuilder::in_dir(dir.path()).build();

    let harness = Harness::with_factory(config, FakeFactory::default()).checkpoints(false);
    let (_, outcome) = with_timeout(harness.run(loop_program())).await?;

    assert!(outcome.success());
    assert!(outcome.checkpoint.is_none());
    assert!(!dir.path().join("ckpt").exists());
    Ok(())
}
