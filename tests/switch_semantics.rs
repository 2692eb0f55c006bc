// tests/switch_semantics.rs

mod common;
use crate::common::builders::ast::*;
use crate::common::{init_tracing, with_timeout, Harness};

use std::error::Error;

use shflow::config::Config;
use shflow::lang::Type;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test(flavor = "multi_thread")]
async fn matching_case_with_break_skips_default() -> TestResult {
    init_tracing();

    let program = program(
        "switch_two",
        vec![
            switch(
                1,
                int(2),
                vec![
                    (int(1), vec![print(2, s("one"))]),
                    (int(2), vec![print(3, s("two")), brk(3)]),
                ],
                Some(vec![print(4, s("default"))]),
            ),
            print(5, s("after")),
        ],
    );

    let harness = Harness::new(Config::default());
    let (_, outcome) = with_timeout(harness.run(program)).await?;

    assert!(outcome.success());
    assert_eq!(harness.output.contents(), "two\nafter\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn cases_fall_through_into_default() -> TestResult {
    init_tracing();

    let program = program(
        "fall_through",
        vec![switch(
            1,
            int(1),
            vec![
                (int(1), vec![print(2, s("one"))]),
                (int(2), vec![print(3, s("two"))]),
            ],
            Some(vec![print(4, s("default"))]),
        )],
    );

    let harness = Harness::new(Config::default());
    with_timeout(harness.run(program)).await?;

    assert_eq!(harness.output.contents(), "one\ntwo\ndefault\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn break_in_default_stays_inside_the_switch() -> TestResult {
    init_tracing();

    // A `break` at the top of `default` must not end the enclosing loop.
    let program = program(
        "default_break",
        vec![
            for_range(
                1,
                "i",
                0,
                2,
                vec![switch(
                    2,
                    var("i"),
                    vec![(int(7), vec![print(3, s("seven"))])],
                    Some(vec![print(4, var("i")), brk(4)]),
                )],
            ),
            print(5, s("done")),
        ],
    );

    let harness = Harness::new(Config::default());
    with_timeout(harness.run(program)).await?;

    assert_eq!(harness.output.contents(), "0\n1\ndone\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn return_from_a_case_leaves_the_function() -> TestResult {
    init_tracing();

    let pick = function(
        "pick",
        &[("x", Type::Int)],
        Type::Int,
        vec![
            switch(
                1,
                var("x"),
                vec![(int(1), vec![ret(2, int(10))])],
                Some(vec![ret(3, int(20))]),
            ),
            ret(4, int(0)),
        ],
    );
    let program = program(
        "switch_return",
        vec![
            print(10, call("pick", vec![int(1)])),
            print(11, call("pick", vec![int(5)])),
        ],
    )
    .with_function(pick);

    let harness = Harness::new(Config::default());
    with_timeout(harness.run(program)).await?;

    assert_eq!(harness.output.contents(), "10\n20\n");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn exit_inside_a_case_ends_the_program() -> TestResult {
    init_tracing();

    let program = program(
        "switch_exit",
        vec![
            switch(
                1,
                s("b"),
                vec![
                    (s("a"), vec![print(2, s("a"))]),
                    (s("b"), vec![exit(3, 4)]),
                ],
                Some(vec![print(4, s("default"))]),
            ),
            print(5, s("unreachable")),
        ],
    );

    let harness = Harness::new(Config::default());
    let (_, outcome) = with_timeout(harness.run(program)).await?;

    assert_eq!(outcome.exit_code, 4);
    assert_eq!(harness.output.contents(), "");
    Ok(())
}
