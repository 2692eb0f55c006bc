// tests/backend_failures.rs

mod common;
use crate::common::builders::ast::*;
use crate::common::builders::ConfigBuilder;
use crate::common::{init_tracing, with_timeout, Harness};

use std::error::Error;

use shflow::config::ClusterSection;
use shflow::lang::{Expr, NativeFn, TaskOptions, Type};
use shflow::task::TaskState;
use shflow::types::ExecutionerType;

type TestResult = Result<(), Box<dyn Error>>;

fn sh(script: &str) -> Vec<String> {
    vec!["sh".into(), "-c".into(), script.into()]
}

#[tokio::test(flavor = "multi_thread")]
async fn ssh_connection_failure_fails_the_task() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = ConfigBuilder::in_dir(dir.path())
        .ssh("/nonexistent/ssh-client", &[], &["node1"])
        .checkpoint_on_failure(false)
        .build();

    let program = program(
        "remote",
        vec![
            decl(1, "t", Type::String, task_on("hostname", ExecutionerType::Ssh)),
            wait_on(2, var("t")),
        ],
    );
    let harness = Harness::new(config);
    let (thread, outcome) = with_timeout(harness.run(program)).await?;

    assert_eq!(outcome.exit_code, 1);
    assert_eq!(outcome.fatal.map(|f| f.line), Some(2));

    let task = thread.tasks().iter().next().expect("one task");
    assert_eq!(task.state(), TaskState::Failed);
    assert_eq!(task.exit_code(), None);
    let error = task.status().error.unwrap_or_default();
    assert!(error.contains("node1"), "unexpected error: {error}");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn ssh_without_hosts_fails_the_task_not_the_run() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = ConfigBuilder::in_dir(dir.path()).build();

    let options = TaskOptions {
        system: Some(Box::new(s("ssh"))),
        can_fail: Some(Box::new(Expr::bool(true))),
        ..TaskOptions::default()
    };
    let program = program(
        "no_hosts",
        vec![
            decl(1, "t", Type::String, Expr::task(s("hostname"), options)),
            wait_on(2, var("t")),
            print(3, Expr::native(NativeFn::TaskState, var("t"))),
        ],
    );
    let harness = Harness::new(config);
    let (_, outcome) = with_timeout(harness.run(program)).await?;

    assert!(outcome.success());
    assert_eq!(harness.output.contents(), "failed\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn cluster_exit_codes_are_translated() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    // Runs the job synchronously at submit time and forgets it at once.
    let scheduler = ClusterSection {
        submit: sh("sh {script} > {stdout} 2> {stderr}; echo 'job 7 queued'"),
        stat: sh("exit 1"),
        kill: sh("true"),
        job_id_regex: r"job (\d+)".to_string(),
        poll_interval_ms: 10,
    };
    let config = ConfigBuilder::in_dir(dir.path()).cluster(scheduler).build();

    let on_cluster = |command: &str| {
        Expr::task(
            s(command),
            TaskOptions {
                system: Some(Box::new(s("cluster"))),
                can_fail: Some(Box::new(Expr::bool(true))),
                ..TaskOptions::default()
            },
        )
    };
    let program = program(
        "batch",
        vec![
            decl(1, "ok", Type::String, on_cluster("echo done")),
            decl(2, "bad", Type::String, on_cluster("exit 3")),
            decl(3, "signalled", Type::String, on_cluster("exit 137")),
            wait_all(4),
            print(5, Expr::native(NativeFn::Stdout, var("ok"))),
            print(6, Expr::native(NativeFn::ExitCode, var("bad"))),
            print(7, Expr::native(NativeFn::TaskState, var("bad"))),
            print(8, Expr::native(NativeFn::TaskState, var("signalled"))),
        ],
    );
    let harness = Harness::new(config);
    let (_, outcome) = with_timeout(harness.run(program)).await?;

    assert!(outcome.success());
    assert_eq!(harness.output.contents(), "done\n\n3\nfailed\nkilled\n");
    Ok(())
}
