//! End-to-end script execution through the public interpreter API.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use prism_eval::{
    marshal, Arguments, CallContext, Callable, Error, HostObject, Interpreter, LookupError,
    LoopLimitPolicy, Outcome, Value,
};

fn run_node(interpreter: &Interpreter, name: &str) -> Result<Outcome, Error> {
    interpreter.execute_node(name)?.finish()
}

fn call(interpreter: &Interpreter, name: &str, args: Arguments) -> Result<Outcome, Error> {
    interpreter.execute_function(name, args)?.finish()
}

fn args<const N: usize>(pairs: [(&str, Value); N]) -> Arguments {
    pairs.into_iter().collect()
}

const ARITHMETIC: &str = r#"
add(x, y) { return x + y; }
divide(x, y) { return x / y; }
int_divide(x, y) { return x \ y; }
"#;

#[test]
fn test_add_follows_operand_types() {
    let interpreter = Interpreter::new(ARITHMETIC).unwrap();
    let cases = [
        (Value::from("eggs"), Value::from("spam"), Value::from("eggsspam")),
        (Value::from("eggs"), Value::Int(5), Value::from("eggs5")),
        (Value::from(vec![1, 2, 3]), Value::from(vec![4, 5, 6]), Value::from(vec![1, 2, 3, 4, 5, 6])),
        (Value::Int(2), Value::Int(3), Value::Int(5)),
    ];
    for (x, y, expected) in cases {
        let outcome = call(&interpreter, "add", args([("x", x), ("y", y)])).unwrap();
        assert_eq!(outcome, Outcome::Return(expected));
    }
}

#[test]
fn test_division() {
    let interpreter = Interpreter::new(ARITHMETIC).unwrap();
    let outcome = call(&interpreter, "divide", args([("x", Value::Int(3)), ("y", Value::Int(2))]));
    assert_eq!(outcome.unwrap(), Outcome::Return(Value::Float(1.5)));
    let outcome = call(&interpreter, "int_divide", args([("x", Value::Int(3)), ("y", Value::Int(2))]));
    assert_eq!(outcome.unwrap(), Outcome::Return(Value::Int(1)));

    let err = call(&interpreter, "divide", args([("x", Value::Int(3)), ("y", Value::Int(0))])).unwrap_err();
    assert!(err.to_string().contains("division by zero"), "{}", err);
}

#[test]
fn test_plain_assignment_writes_locals() {
    let interpreter = Interpreter::new("main { global x = 1; x = 2; exit [x, global x]; }").unwrap();
    let outcome = run_node(&interpreter, "main").unwrap();
    assert_eq!(outcome, Outcome::Exit(Value::from(vec![2, 1])));
    assert_eq!(interpreter.globals().get("x"), Some(&Value::Int(1)));
}

#[test]
fn test_local_qualifier_ignores_globals() {
    let interpreter = Interpreter::new("main { global x = 1; exit local x; }").unwrap();
    let err = run_node(&interpreter, "main").unwrap_err();
    assert_eq!(err.lookup(), Some(&LookupError::VariableNotFound("x".into())));
}

#[test]
fn test_globals_seeded_by_host() {
    let interpreter = Interpreter::new("main { exit greeting + ', world'; }").unwrap();
    interpreter
        .globals()
        .insert("greeting".to_string(), Value::from("hello"));
    assert_eq!(
        run_node(&interpreter, "main").unwrap(),
        Outcome::Exit(Value::from("hello, world"))
    );
}

#[test]
fn test_short_destructure_binds_none_and_logs() {
    let interpreter = Interpreter::new("main { [a, b, c] = [1, 2]; exit [a, b, c]; }").unwrap();
    let outcome = run_node(&interpreter, "main").unwrap();
    assert_eq!(
        outcome,
        Outcome::Exit(Value::sequence([Value::Int(1), Value::Int(2), Value::None]))
    );
    let log = interpreter.log();
    assert!(log.contains(&"Attempted to unpack sequence of length 2 into 3 slots".to_string()));
    assert!(log.iter().any(|line| line.contains("bound with a value of None")));
}

#[test]
fn test_long_destructure_discards_and_skips_placeholders() {
    let interpreter = Interpreter::new("main { [a, None] = [1, 2, 3]; exit a; }").unwrap();
    assert_eq!(run_node(&interpreter, "main").unwrap(), Outcome::Exit(Value::Int(1)));
    assert!(interpreter
        .log()
        .iter()
        .any(|line| line.contains("will be discarded")));
}

#[test]
fn test_destructure_requires_sequence() {
    let interpreter = Interpreter::new("main { [a, b] = 'ab'; }").unwrap();
    assert!(matches!(run_node(&interpreter, "main").unwrap_err(), Error::Execution(_)));
}

#[test]
fn test_goto_chain_exits() {
    let interpreter = Interpreter::new("main { goto b; } b { exit 'done'; }").unwrap();
    assert_eq!(run_node(&interpreter, "main").unwrap(), Outcome::Exit(Value::from("done")));
}

#[test]
fn test_goto_to_missing_node() {
    let interpreter = Interpreter::new("main { goto nowhere; }").unwrap();
    let err = run_node(&interpreter, "main").unwrap_err();
    assert_eq!(err.lookup(), Some(&LookupError::NodeNotFound("nowhere".into())));
}

#[test]
fn test_break_and_continue_outside_loops() {
    for source in [
        "main { break; }",
        "main { continue; }",
        "main { f(); } f() { break; }",
        "main { if (True) { continue; } }",
    ] {
        let interpreter = Interpreter::new(source).unwrap();
        let err = run_node(&interpreter, "main").unwrap_err();
        let Error::Execution(exec) = &err else {
            panic!("{}: expected ExecutionError, got {:?}", source, err);
        };
        assert!(exec.message.contains("not allowed outside of a loop"), "{}", err);
    }
}

#[test]
fn test_break_and_continue_inside_loops() {
    let source = r#"
main {
    total = 0;
    for (n in [1, 2, 3, 4, 5, 6]) {
        if (n % 2 == 0) { continue; }
        if (n > 4) { break; }
        total += n;
    }
    exit total;
}
"#;
    let interpreter = Interpreter::new(source).unwrap();
    assert_eq!(run_node(&interpreter, "main").unwrap(), Outcome::Exit(Value::Int(4)));
}

#[test]
fn test_return_from_inside_loop() {
    let source = "first(items) { for (x in items) { if (x > 1) { return x; } } return None; }";
    let interpreter = Interpreter::new(source).unwrap();
    let outcome = call(&interpreter, "first", args([("items", Value::from(vec![1, 5, 7]))]));
    assert_eq!(outcome.unwrap(), Outcome::Return(Value::Int(5)));
}

#[test]
fn test_default_loop_limit_truncates_and_logs() {
    let interpreter = Interpreter::new("main { n = 0; while (True) { n += 1; } exit n; }").unwrap();
    assert_eq!(run_node(&interpreter, "main").unwrap(), Outcome::Exit(Value::Int(100_000)));
    assert!(interpreter
        .log()
        .contains(&"Hard-breaking loop for exceeding iteration-limit of 100000 cycles".to_string()));
}

#[test]
fn test_loop_limit_fail_policy() {
    let interpreter = Interpreter::new("main { while (True) { } }").unwrap();
    interpreter.set_loop_limit(10);
    interpreter.set_loop_limit_policy(LoopLimitPolicy::Fail);
    let err = run_node(&interpreter, "main").unwrap_err();
    assert!(err.to_string().contains("iteration-limit of 10 cycles"), "{}", err);
}

#[test]
fn test_loop_limit_zero_disables() {
    let interpreter = Interpreter::new("main { n = 0; while (n < 1000) { n += 1; } exit n; }").unwrap();
    interpreter.set_loop_limit(10);
    assert_eq!(run_node(&interpreter, "main").unwrap(), Outcome::Exit(Value::Int(10)));
    interpreter.set_loop_limit(0);
    assert_eq!(run_node(&interpreter, "main").unwrap(), Outcome::Exit(Value::Int(1000)));
}

#[test]
fn test_function_overloads_by_parameter_names() {
    let source = "greet(name) { return 'hi ' + name; } greet(name, title) { return 'hi ' + title + ' ' + name; }";
    let interpreter = Interpreter::new(source).unwrap();
    let short = call(&interpreter, "greet", args([("name", Value::from("Ada"))])).unwrap();
    assert_eq!(short, Outcome::Return(Value::from("hi Ada")));
    let long = call(
        &interpreter,
        "greet",
        args([("title", Value::from("Dr")), ("name", Value::from("Ada"))]),
    )
    .unwrap();
    assert_eq!(long, Outcome::Return(Value::from("hi Dr Ada")));
}

#[test]
fn test_function_end_returns_none_and_exit_crosses_functions() {
    let interpreter = Interpreter::new("noop() { x = 1; } leave() { exit 7; }").unwrap();
    assert_eq!(call(&interpreter, "noop", Arguments::new()).unwrap(), Outcome::Return(Value::None));
    assert_eq!(call(&interpreter, "leave", Arguments::new()).unwrap(), Outcome::Exit(Value::Int(7)));
}

#[test]
fn test_missing_function_reports_parameters() {
    let interpreter = Interpreter::new("main { f(a=1, b=2); } f(b) { }").unwrap();
    let err = run_node(&interpreter, "main").unwrap_err();
    assert_eq!(
        err.lookup(),
        Some(&LookupError::FunctionNotFound {
            name: "f".into(),
            params: vec!["a".into(), "b".into()],
        })
    );
}

#[test]
fn test_bound_callable_beats_script_function() {
    let source = r#"
double(v) { return 'script'; }
main {
    plain = double(v=4);
    double = math.double;
    exit [plain, double(v=4)];
}
"#;
    let interpreter = Interpreter::new(source).unwrap();
    interpreter
        .register_scoped_function("math.double", |args: &Arguments, _: &CallContext| -> Result<Value, Error> {
            let v = args.require("v")?.as_int().unwrap_or_default();
            Ok(Value::Int(v * 2))
        })
        .unwrap();
    assert_eq!(
        run_node(&interpreter, "main").unwrap(),
        Outcome::Exit(Value::sequence([Value::from("script"), Value::Int(8)]))
    );
}

#[test]
fn test_scoped_variable_beats_host_function() {
    let interpreter = Interpreter::new(
        r#"
bound { seq = [1]; seq.append(item=2); exit seq; }
unbound { exit seq.append(item=2); }
scalar { seq = 5; exit seq.append(item=2); }
"#,
    )
    .unwrap();
    interpreter
        .register_scoped_function("seq.append", |_: &Arguments, _: &CallContext| -> Result<Value, Error> {
            Ok(Value::from("host"))
        })
        .unwrap();

    assert_eq!(run_node(&interpreter, "bound").unwrap(), Outcome::Exit(Value::from(vec![1, 2])));
    assert_eq!(run_node(&interpreter, "unbound").unwrap(), Outcome::Exit(Value::from("host")));
    assert_eq!(run_node(&interpreter, "scalar").unwrap(), Outcome::Exit(Value::from("host")));
}

#[test]
fn test_scoped_lookup_failures() {
    let interpreter = Interpreter::new("call { nope.missing(); } read { x = 5; exit x.length; }").unwrap();
    let err = run_node(&interpreter, "call").unwrap_err();
    assert_eq!(
        err.lookup(),
        Some(&LookupError::ScopedFunctionNotFound("nope.missing".into()))
    );
    let err = run_node(&interpreter, "read").unwrap_err();
    assert_eq!(
        err.lookup(),
        Some(&LookupError::ScopedVariableNotFound("x.length".into()))
    );
}

#[test]
fn test_container_capabilities_from_script() {
    let source = r#"
main {
    d = types.Dictionary();
    d.put(key='a', value=[3, 1, 2]);
    items = d.get(key='a');
    items.sort();
    copy = items.copy();
    copy.append(item=4);
    s = types.Set(items=[1, 1, 2]);
    exit [items, copy.length, s.length, d.contains(item='a'), (items).slice(start=1)];
}
"#;
    let interpreter = Interpreter::new(source).unwrap();
    assert_eq!(
        run_node(&interpreter, "main").unwrap(),
        Outcome::Exit(Value::sequence([
            Value::from(vec![1, 2, 3]),
            Value::Int(4),
            Value::Int(2),
            Value::Bool(true),
            Value::from(vec![2, 3]),
        ]))
    );
}

#[test]
fn test_conversions_from_script() {
    let source = "main { exit [types.int(v='12') + 1, types.string(v=255, int_base=16), types.float(v='x'), types.bool(v=[])]; }";
    let interpreter = Interpreter::new(source).unwrap();
    assert_eq!(
        run_node(&interpreter, "main").unwrap(),
        Outcome::Exit(Value::sequence([
            Value::Int(13),
            Value::from("ff"),
            Value::None,
            Value::Bool(false),
        ]))
    );
}

struct Counter {
    count: AtomicI64,
}

impl HostObject for Counter {
    fn type_name(&self) -> &str {
        "Counter"
    }

    fn attribute(self: Arc<Self>, name: &str) -> Option<Value> {
        match name {
            "value" => Some(Value::Int(self.count.load(Ordering::SeqCst))),
            "bump" => Some(Value::Callable(Callable::new(
                "Counter.bump",
                move |_: &Arguments, _: &CallContext| -> Result<Value, Error> {
                    Ok(Value::Int(self.count.fetch_add(1, Ordering::SeqCst) + 1))
                },
            ))),
            _ => None,
        }
    }
}

#[test]
fn test_host_object_capabilities() {
    let interpreter = Interpreter::new("main { c = app.counter(); c.bump(); c.bump(); exit [c.value, c.secret]; }").unwrap();
    let counter = Arc::new(Counter {
        count: AtomicI64::new(0),
    });
    interpreter
        .register_scoped_function("app.counter", move |_: &Arguments, _: &CallContext| -> Result<Value, Error> {
            Ok(Value::Object(counter.clone()))
        })
        .unwrap();
    let err = run_node(&interpreter, "main").unwrap_err();
    assert_eq!(
        err.lookup(),
        Some(&LookupError::ScopedVariableNotFound("c.secret".into()))
    );

    interpreter
        .extend_namespace("main { c = app.counter(); c.bump(); exit c.value; }")
        .unwrap();
    assert_eq!(run_node(&interpreter, "main").unwrap(), Outcome::Exit(Value::Int(3)));
}

#[test]
fn test_host_errors_are_wrapped_with_location() {
    let interpreter = Interpreter::new("main { x = 1; io.fail(); }").unwrap();
    interpreter
        .register_scoped_function("io.fail", |_: &Arguments, _: &CallContext| -> Result<Value, Error> {
            Err(Error::runtime("device unplugged"))
        })
        .unwrap();
    let err = run_node(&interpreter, "main").unwrap_err();
    assert_eq!(
        err.to_string(),
        "a processing error occurred in [main:2]: device unplugged"
    );
}

#[test]
fn test_execution_log_records_entries() {
    let interpreter = Interpreter::new("main { f(a=1); } f(a) { }").unwrap();
    run_node(&interpreter, "main").unwrap();
    assert_eq!(
        interpreter.log(),
        vec![
            "Executing node 'main'...",
            "Invoking function 'f(a)'...",
            "Executing function 'f(a)'...",
        ]
    );
}

#[test]
fn test_marshal_is_idempotent() {
    let values = [
        Value::None,
        Value::Int(3),
        Value::from("text"),
        Value::from(vec![1, 2]),
        Value::dictionary([(Value::from("k"), Value::Float(1.5))]).unwrap(),
    ];
    for value in values {
        assert_eq!(marshal(value.clone()), value);
        assert_eq!(marshal(marshal(value.clone())), value);
    }
}

const CYCLES: &str = r#"
self_ref { s = [1]; s.append(item=s); exit 'x' + s; }
mutual {
    a = [1]; b = [1];
    a.append(item=b); b.append(item=a);
    exit [a == b, types.string(v=a), a.contains(item=b)];
}
sorting {
    a = [1]; b = [1];
    a.append(item=b); b.append(item=a);
    t = [b, a];
    t.sort();
    exit t.length;
}
nested_dict { d = types.Dictionary(); d.put(key='me', value=d); exit types.string(v=d); }
"#;

#[test]
fn test_self_referential_collections_do_not_recurse_forever() {
    let interpreter = Interpreter::new(CYCLES).unwrap();
    assert_eq!(
        run_node(&interpreter, "self_ref").unwrap(),
        Outcome::Exit(Value::from("x[1, [...]]"))
    );
    assert_eq!(
        run_node(&interpreter, "mutual").unwrap(),
        Outcome::Exit(Value::sequence([
            Value::Bool(true),
            Value::from("[1, [1, [...]]]"),
            Value::Bool(true),
        ]))
    );
    assert_eq!(run_node(&interpreter, "sorting").unwrap(), Outcome::Exit(Value::Int(2)));
    assert_eq!(
        run_node(&interpreter, "nested_dict").unwrap(),
        Outcome::Exit(Value::from("{'me': {...}}"))
    );
}

#[test]
fn test_shuffle_keeps_members() {
    let interpreter =
        Interpreter::new("main { s = [4, 2, 3, 1]; s.shuffle(); n = s.length; s.sort(); exit [n, s]; }").unwrap();
    assert_eq!(
        run_node(&interpreter, "main").unwrap(),
        Outcome::Exit(Value::sequence([Value::Int(4), Value::from(vec![1, 2, 3, 4])]))
    );
}
