//! Driving executions that suspend on host prompts.

use std::thread;
use std::time::Duration;

use prism_eval::{Arguments, CallContext, Error, Interpreter, Outcome, Step, Value};

const SCRIPT: &str = r#"
main {
    a = io.ask(q='first');
    b = io.ask(q='second');
    exit a + b;
}
nested {
    base = 10;
    exit [1, [2, io.ask(q='deep') + base]];
}
in_loop {
    answers = [];
    for (q in ['x', 'y', 'z']) {
        answers.append(item=io.ask(q=q));
    }
    exit answers;
}
pair() {
    return [io.ask(q=1), io.ask(q=2)];
}
abandoned {
    io.ask(q='wait');
    global reached = True;
}
"#;

fn interpreter() -> Interpreter {
    let interpreter = Interpreter::new(SCRIPT).unwrap();
    interpreter
        .register_scoped_function("io.ask", |args: &Arguments, cx: &CallContext| -> Result<Value, Error> {
            cx.suspend(args.require("q")?.clone())
        })
        .unwrap();
    interpreter
}

#[test]
fn test_resume_step_by_step() {
    let interpreter = interpreter();
    let mut execution = interpreter.execute_node("main").unwrap();

    let Step::Prompt(prompt) = execution.resume(None) else {
        panic!("expected first prompt");
    };
    assert_eq!(prompt, Value::from("first"));

    let Step::Prompt(prompt) = execution.resume(Some(Value::from("x"))) else {
        panic!("expected second prompt");
    };
    assert_eq!(prompt, Value::from("second"));

    match execution.resume(Some(Value::from("y"))) {
        Step::Finished(outcome) => assert_eq!(outcome.unwrap(), Outcome::Exit(Value::from("xy"))),
        other => panic!("expected completion, got {:?}", other),
    }
    assert!(execution.is_finished());

    match execution.resume(None) {
        Step::Finished(Err(err)) => assert!(err.to_string().contains("already finished")),
        other => panic!("expected an error, got {:?}", other),
    }
}

#[test]
fn test_suspension_inside_nested_expression_keeps_scope() {
    let interpreter = interpreter();
    let outcome = interpreter
        .execute_node("nested")
        .unwrap()
        .drive(|prompt| {
            assert_eq!(prompt, Value::from("deep"));
            Ok(Value::Int(32))
        })
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Exit(Value::sequence([
            Value::Int(1),
            Value::sequence([Value::Int(2), Value::Int(42)]),
        ]))
    );
}

#[test]
fn test_suspension_inside_loop() {
    let interpreter = interpreter();
    let outcome = interpreter
        .execute_node("in_loop")
        .unwrap()
        .drive(|prompt| Ok(Value::from(format!("{}!", prompt))))
        .unwrap();
    assert_eq!(outcome, Outcome::Exit(Value::from(vec!["x!", "y!", "z!"])));
}

#[test]
fn test_function_execution_returns() {
    let interpreter = interpreter();
    let outcome = interpreter
        .execute_function("pair", Arguments::new())
        .unwrap()
        .drive(|prompt| Ok(prompt))
        .unwrap();
    assert_eq!(outcome, Outcome::Return(Value::from(vec![1, 2])));
}

#[test]
fn test_responder_error_stops_driving() {
    let interpreter = interpreter();
    let err = interpreter
        .execute_node("main")
        .unwrap()
        .drive(|_| Err(Error::runtime("no input available")))
        .unwrap_err();
    assert_eq!(err.to_string(), "no input available");
}

#[test]
fn test_finish_answers_prompts_with_none() {
    let interpreter = interpreter();
    let outcome = interpreter.execute_node("in_loop").unwrap().finish().unwrap();
    assert_eq!(
        outcome,
        Outcome::Exit(Value::sequence([Value::None, Value::None, Value::None]))
    );
}

#[test]
fn test_dropping_the_driver_abandons_the_run() {
    let interpreter = interpreter();
    let mut execution = interpreter.execute_node("abandoned").unwrap();
    assert!(matches!(execution.resume(None), Step::Prompt(_)));
    drop(execution);

    thread::sleep(Duration::from_millis(50));
    assert!(interpreter.globals().get("reached").is_none());
}

#[test]
fn test_missing_response_is_none() {
    let interpreter = Interpreter::new("main { exit io.ask(q=1); }").unwrap();
    interpreter
        .register_scoped_function("io.ask", |args: &Arguments, cx: &CallContext| -> Result<Value, Error> {
            cx.suspend(args.require("q")?.clone())
        })
        .unwrap();
    let mut execution = interpreter.execute_node("main").unwrap();
    assert!(matches!(execution.resume(None), Step::Prompt(_)));
    match execution.resume(None) {
        Step::Finished(outcome) => assert_eq!(outcome.unwrap(), Outcome::Exit(Value::None)),
        other => panic!("expected completion, got {:?}", other),
    }
}

#[test]
fn test_executions_are_independent() {
    let interpreter = interpreter();
    let mut first = interpreter.execute_node("main").unwrap();
    let mut second = interpreter.execute_node("main").unwrap();
    assert!(matches!(first.resume(None), Step::Prompt(_)));
    assert!(matches!(second.resume(None), Step::Prompt(_)));
    assert!(matches!(second.resume(Some(Value::from("c"))), Step::Prompt(_)));
    assert!(matches!(first.resume(Some(Value::from("a"))), Step::Prompt(_)));
    let Step::Finished(first) = first.resume(Some(Value::from("b"))) else {
        panic!("first execution should finish");
    };
    let Step::Finished(second) = second.resume(Some(Value::from("d"))) else {
        panic!("second execution should finish");
    };
    assert_eq!(first.unwrap(), Outcome::Exit(Value::from("ab")));
    assert_eq!(second.unwrap(), Outcome::Exit(Value::from("cd")));
}

#[tokio::test]
async fn test_resume_async() {
    let interpreter = interpreter();
    let mut execution = interpreter.execute_node("main").unwrap();
    let mut response = None;
    let mut prompts = Vec::new();
    let outcome = loop {
        match execution.resume_async(response.take()).await {
            Step::Prompt(prompt) => {
                prompts.push(prompt.clone());
                response = Some(Value::from(format!("<{}>", prompt)));
            }
            Step::Finished(outcome) => break outcome,
        }
    };
    assert_eq!(prompts, vec![Value::from("first"), Value::from("second")]);
    assert_eq!(outcome.unwrap(), Outcome::Exit(Value::from("<first><second>")));
}
