// tests/switch_property.rs

mod common;
use crate::common::builders::ast::*;

use std::sync::{Arc, OnceLock};

use proptest::prelude::*;
use tokio::runtime::Runtime;

use shflow::config::Config;
use shflow::exec::Executioners;
use shflow::fs::mock::MockFileSystem;
use shflow::lang::{Program, Stmt, Type, Value};
use shflow::run::{ProgramThread, ThreadContext};
use shflow_test_utils::harness::SharedOutput;

#[derive(Debug, Clone, Copy)]
enum Action {
    Fall,
    Break,
    Exit(i64),
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Fall),
        Just(Action::Break),
        (1..5i64).prop_map(Action::Exit),
    ]
}

/// Switch programs never launch tasks; the runtime only backs the registry.
fn runtime() -> &'static Runtime {
    static RT: OnceLock<Runtime> = OnceLock::new();
    RT.get_or_init(|| Runtime::new().unwrap())
}

/// `var calls int = 0; switch (next(value)) { ... } print "end"`, where
/// `next` counts how often it is called.
fn switch_program(value: i64, cases: &[(i64, Action)], has_default: bool) -> Program {
    let next = function(
        "next",
        &[("x", Type::Int)],
        Type::Int,
        vec![
            assign(1, "calls", add(var("calls"), int(1))),
            ret(2, var("x")),
        ],
    );

    let cases = cases
        .iter()
        .enumerate()
        .map(|(i, (v, action))| {
            let line = 20 + i as u32;
            let mut body: Vec<Stmt> = vec![print(line, s(&format!("c{i}")))];
            match action {
                Action::Fall => {}
                Action::Break => body.push(brk(line)),
                Action::Exit(code) => body.push(exit(line, *code)),
            }
            (int(*v), body)
        })
        .collect();
    let default = has_default.then(|| vec![print(40, s("d"))]);

    program(
        "switch_prop",
        vec![
            decl(10, "calls", Type::Int, int(0)),
            switch(11, call("next", vec![int(value)]), cases, default),
            print(50, s("end")),
        ],
    )
    .with_function(next)
}

/// Reference semantics: expected output and exit code.
fn expected(value: i64, cases: &[(i64, Action)], has_default: bool) -> (String, i32) {
    let mut out = String::new();
    let mut matched = false;
    for (i, (v, action)) in cases.iter().enumerate() {
        if !matched && *v != value {
            continue;
        }
        matched = true;
        out.push_str(&format!("c{i}\n"));
        match action {
            Action::Fall => {}
            Action::Break => {
                out.push_str("end\n");
                return (out, 0);
            }
            Action::Exit(code) => return (out, *code as i32),
        }
    }
    if has_default {
        out.push_str("d\n");
    }
    out.push_str("end\n");
    (out, 0)
}

proptest! {
    #[test]
    fn switch_has_exactly_one_outcome_and_evaluates_once(
        value in 0..4i64,
        cases in proptest::collection::vec((0..4i64, action_strategy()), 0..6),
        has_default in any::<bool>(),
    ) {
        let registry = Arc::new(Executioners::new(Config::default(), runtime().handle().clone()));
        let output = SharedOutput::default();
        let ctx = ThreadContext::new(registry, Arc::new(MockFileSystem::new()))
            .with_output(Box::new(output.clone()));

        let mut thread = ProgramThread::new(switch_program(value, &cases, has_default), vec![], ctx).unwrap();
        let outcome = thread.run().unwrap();

        let (want_output, want_code) = expected(value, &cases, has_default);
        prop_assert_eq!(output.contents(), want_output);
        prop_assert_eq!(outcome.exit_code, want_code);

        let calls = thread.scope().get_symbol("calls").map(|s| s.value.clone());
        prop_assert_eq!(calls, Some(Value::Int(1)));
    }
}
