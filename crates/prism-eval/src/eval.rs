//! Expression and statement evaluation.
//!
//! Statements return a [`Signal`]; expressions return a value or an
//! [`Escape`]. An escape carries the two control transfers that can start
//! inside an expression (a called function executing `exit` or `goto`)
//! alongside ordinary failures, so `?` moves all three outward until a
//! statement turns them back into signals.
//!
//! `goto` unwinds to the nearest node runner, which then continues with the
//! target node in the same loop.

use std::collections::HashMap;

use prism_parser::{
    Argument, Binding, Block, CallTarget, Expr, FunctionKey, LogicalOp, Qualifier, Statement,
    Target,
};

use crate::config::LoopLimitPolicy;
use crate::containers;
use crate::error::{Error, ExecutionError, LookupError};
use crate::host::{Arguments, CallContext, Callable};
use crate::ops;
use crate::stack::ensure_sufficient_stack;
use crate::suspend::Outcome;
use crate::value::Value;
use crate::Result;

pub(crate) type Locals = HashMap<String, Value>;

/// Control transfer out of a statement list.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Signal {
    Normal,
    Return(Value),
    Exit(Value),
    Goto(String),
    Break,
    Continue,
    /// The list ran off its end.
    Exhausted,
}

/// Non-local exits from expression evaluation.
#[derive(Debug)]
pub(crate) enum Escape {
    Exit(Value),
    Goto(String),
    Fail(Error),
}

impl From<Error> for Escape {
    fn from(err: Error) -> Self {
        Escape::Fail(err)
    }
}

impl From<LookupError> for Escape {
    fn from(err: LookupError) -> Self {
        Escape::Fail(err.into())
    }
}

type Eval<T> = std::result::Result<T, Escape>;

/// What kind of body a statement list is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Node,
    Function,
    Conditional,
    Loop,
}

// ---- Entry points ----

/// Run the node `name` and every node it hands off to with `goto`,
/// returning the value the chain exits with.
pub(crate) fn run_node(name: &str, cx: &CallContext) -> Result<Value> {
    let runtime = cx.runtime();
    let mut current = name.to_string();
    loop {
        let body = runtime
            .node(&current)
            .ok_or_else(|| LookupError::NodeNotFound(current.clone()))?;
        runtime.log(format!("Executing node '{}'...", current));

        let mut locals = Locals::new();
        let signal = run_statements(&body, FrameKind::Node, &mut locals, cx)
            .map_err(|e| e.located(current.clone()))?;
        match signal {
            Signal::Goto(next) => {
                if runtime.node(&next).is_none() {
                    return Err(Error::from(LookupError::NodeNotFound(next)).located(current));
                }
                current = next;
            }
            Signal::Exit(value) => return Ok(value),
            Signal::Return(value) => {
                runtime.log_warning("Warning: exit-statement inferred from top-level return.");
                return Ok(value);
            }
            // Break and Continue are rejected by `run_statements` for nodes.
            _ => return Ok(Value::None),
        }
    }
}

/// Call the script function selected by `name` and the argument names.
///
/// `Ok` is the function's return value; an `exit` or `goto` inside it
/// escapes to the caller.
fn call_function(name: &str, args: Arguments, cx: &CallContext) -> Eval<Value> {
    let key = FunctionKey::new(name, args.names());
    let runtime = cx.runtime();
    let body = runtime
        .function(&key)
        .ok_or_else(|| LookupError::FunctionNotFound {
            name: key.name.clone(),
            params: key.params.iter().cloned().collect(),
        })?;
    let container = key.to_string();
    runtime.log(format!("Executing function '{}'...", container));

    let mut locals = args.into_locals();
    let signal = ensure_sufficient_stack(|| {
        run_statements(&body, FrameKind::Function, &mut locals, cx)
    })
    .map_err(|e| e.located(container))?;
    match signal {
        Signal::Return(value) => Ok(value),
        Signal::Exit(value) => Err(Escape::Exit(value)),
        Signal::Goto(node) => Err(Escape::Goto(node)),
        _ => Ok(Value::None),
    }
}

/// Call a script function from the top of an execution or a background
/// thread, following a `goto` out of it to the end of the node chain.
pub(crate) fn run_function(name: &str, args: Arguments, cx: &CallContext) -> Result<Outcome> {
    match call_function(name, args, cx) {
        Ok(value) => Ok(Outcome::Return(value)),
        Err(Escape::Exit(value)) => Ok(Outcome::Exit(value)),
        Err(Escape::Goto(node)) => run_node(&node, cx).map(Outcome::Exit),
        Err(Escape::Fail(err)) => Err(err),
    }
}

// ---- Statements ----

fn run_statements(
    statements: &Block,
    kind: FrameKind,
    locals: &mut Locals,
    cx: &CallContext,
) -> Result<Signal> {
    for (i, statement) in statements.iter().enumerate() {
        let position = i + 1;
        let signal = execute(statement, locals, cx).map_err(|e| e.located(position.to_string()))?;
        match signal {
            Signal::Normal => {}
            Signal::Break | Signal::Continue
                if matches!(kind, FrameKind::Node | FrameKind::Function) =>
            {
                let keyword = if signal == Signal::Break { "break" } else { "continue" };
                return Err(ExecutionError::new(
                    position.to_string(),
                    format!("`{}` statement not allowed outside of a loop", keyword),
                )
                .into());
            }
            other => return Ok(other),
        }
    }
    Ok(Signal::Exhausted)
}

fn execute(statement: &Statement, locals: &mut Locals, cx: &CallContext) -> Result<Signal> {
    match execute_statement(statement, locals, cx) {
        Ok(signal) => Ok(signal),
        Err(Escape::Exit(value)) => Ok(Signal::Exit(value)),
        Err(Escape::Goto(node)) => Ok(Signal::Goto(node)),
        Err(Escape::Fail(err)) => Err(err),
    }
}

fn execute_statement(statement: &Statement, locals: &mut Locals, cx: &CallContext) -> Eval<Signal> {
    match statement {
        Statement::Expr(expr) => {
            eval(expr, locals, cx)?;
            Ok(Signal::Normal)
        }

        Statement::Assign { target, value } => {
            let value = eval(value, locals, cx)?;
            assign(target, value, locals, cx);
            Ok(Signal::Normal)
        }

        Statement::AugAssign { target, op, value } => {
            let rhs = eval(value, locals, cx)?;
            let in_locals = match target.qualifier {
                Qualifier::Local => true,
                Qualifier::Global => false,
                Qualifier::Auto => locals.contains_key(&target.name),
            };
            if in_locals {
                let current = locals
                    .get(&target.name)
                    .ok_or_else(|| LookupError::VariableNotFound(target.name.clone()))?;
                let updated = ops::binary(*op, current, &rhs)?;
                locals.insert(target.name.clone(), updated);
            } else {
                let mut globals = cx.runtime().globals();
                let current = globals
                    .get(&target.name)
                    .ok_or_else(|| LookupError::VariableNotFound(target.name.clone()))?;
                let updated = ops::binary(*op, current, &rhs)?;
                globals.insert(target.name.clone(), updated);
            }
            Ok(Signal::Normal)
        }

        Statement::Destructure { targets, value } => {
            let value = eval(value, locals, cx)?;
            destructure(targets, value, locals, cx)?;
            Ok(Signal::Normal)
        }

        Statement::If { branches, otherwise } => {
            for (condition, body) in branches {
                if eval(condition, locals, cx)?.is_truthy() {
                    return Ok(run_conditional(body, locals, cx)?);
                }
            }
            match otherwise {
                Some(body) => Ok(run_conditional(body, locals, cx)?),
                None => Ok(Signal::Normal),
            }
        }

        Statement::While { condition, body } => {
            cx.runtime().log("Entering while-loop...");
            let mut guard = LoopGuard::new(cx);
            while eval(condition, locals, cx)?.is_truthy() {
                if !guard.tick(cx)? {
                    break;
                }
                if let Some(signal) = loop_body(body, locals, cx)? {
                    return Ok(signal);
                }
            }
            Ok(Signal::Normal)
        }

        Statement::For {
            binding,
            iterable,
            body,
        } => {
            let items = match eval(iterable, locals, cx)? {
                Value::Sequence(seq) => seq.snapshot(),
                other => {
                    return Err(Error::runtime(format!(
                        "cannot iterate over {}",
                        other.type_name()
                    ))
                    .into())
                }
            };
            cx.runtime().log("Entering foreach-loop...");
            let mut guard = LoopGuard::new(cx);
            for item in items {
                if !guard.tick(cx)? {
                    break;
                }
                match binding {
                    Binding::Single(target) => assign(target, item, locals, cx),
                    Binding::Pattern(targets) => destructure(targets, item, locals, cx)?,
                }
                if let Some(signal) = loop_body(body, locals, cx)? {
                    return Ok(signal);
                }
            }
            Ok(Signal::Normal)
        }

        Statement::Goto(node) => Ok(Signal::Goto(node.clone())),

        Statement::Return(value) => {
            let value = match value {
                Some(expr) => eval(expr, locals, cx)?,
                None => Value::None,
            };
            Ok(Signal::Return(value))
        }

        Statement::Exit(value) => {
            let value = match value {
                Some(expr) => eval(expr, locals, cx)?,
                None => Value::String(String::new()),
            };
            Ok(Signal::Exit(value))
        }

        Statement::Break => Ok(Signal::Break),
        Statement::Continue => Ok(Signal::Continue),
    }
}

fn run_conditional(body: &Block, locals: &mut Locals, cx: &CallContext) -> Result<Signal> {
    match run_statements(body, FrameKind::Conditional, locals, cx)? {
        Signal::Exhausted => Ok(Signal::Normal),
        signal => Ok(signal),
    }
}

/// Run one loop iteration. `Some` carries a signal the loop must return.
fn loop_body(body: &Block, locals: &mut Locals, cx: &CallContext) -> Result<Option<Signal>> {
    match run_statements(body, FrameKind::Loop, locals, cx)? {
        Signal::Break => Ok(Some(Signal::Normal)),
        Signal::Continue | Signal::Exhausted | Signal::Normal => Ok(None),
        signal => Ok(Some(signal)),
    }
}

/// Counts the iterations of one loop statement against the configured limit.
struct LoopGuard {
    limit: usize,
    policy: LoopLimitPolicy,
    iterations: usize,
}

impl LoopGuard {
    fn new(cx: &CallContext) -> Self {
        let settings = cx.runtime().loop_settings();
        Self {
            limit: settings.limit,
            policy: settings.policy,
            iterations: 0,
        }
    }

    /// Count the next iteration. `false` means the loop must stop.
    fn tick(&mut self, cx: &CallContext) -> Result<bool> {
        if self.limit != 0 && self.iterations >= self.limit {
            let message = format!(
                "Hard-breaking loop for exceeding iteration-limit of {} cycles",
                self.limit
            );
            return match self.policy {
                LoopLimitPolicy::Truncate => {
                    cx.runtime().log_warning(message);
                    Ok(false)
                }
                LoopLimitPolicy::Fail => Err(Error::runtime(message)),
            };
        }
        self.iterations += 1;
        Ok(true)
    }
}

fn assign(target: &Target, value: Value, locals: &mut Locals, cx: &CallContext) {
    match target.qualifier {
        Qualifier::Global => cx.runtime().set_global(&target.name, value),
        Qualifier::Auto | Qualifier::Local => {
            locals.insert(target.name.clone(), value);
        }
    }
}

fn destructure(
    targets: &[Option<Target>],
    value: Value,
    locals: &mut Locals,
    cx: &CallContext,
) -> Result<()> {
    let items = match value {
        Value::Sequence(seq) => seq.snapshot(),
        other => {
            return Err(Error::runtime(format!(
                "attempted to unpack non-sequence value of type {}",
                other.type_name()
            )))
        }
    };

    if items.len() != targets.len() {
        let runtime = cx.runtime();
        runtime.log_warning(format!(
            "Attempted to unpack sequence of length {} into {} slots",
            items.len(),
            targets.len()
        ));
        if items.len() < targets.len() {
            runtime.log_warning(
                "Destination variables outside the unpack-domain will be bound with a value of None",
            );
        } else {
            runtime.log_warning("Source values outside the unpack-domain will be discarded");
        }
    }

    let mut items = items.into_iter();
    for target in targets {
        let item = items.next().unwrap_or_default();
        if let Some(target) = target {
            assign(target, item, locals, cx);
        }
    }
    Ok(())
}

// ---- Expressions ----

fn eval(expr: &Expr, locals: &Locals, cx: &CallContext) -> Eval<Value> {
    ensure_sufficient_stack(|| eval_expr(expr, locals, cx))
}

fn eval_expr(expr: &Expr, locals: &Locals, cx: &CallContext) -> Eval<Value> {
    match expr {
        Expr::None => Ok(Value::None),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(n) => Ok(Value::Int(*n)),
        Expr::Float(f) => Ok(Value::Float(*f)),
        Expr::Str(s) => Ok(Value::String(s.clone())),

        Expr::Ident(target) => Ok(lookup(target, locals, cx)?),

        Expr::Scoped(name) => resolve_scoped(name, locals, cx),

        Expr::Sequence(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(item, locals, cx)?);
            }
            Ok(Value::sequence(values))
        }

        Expr::Binary { op, left, right } => {
            let left = eval(left, locals, cx)?;
            let right = eval(right, locals, cx)?;
            Ok(ops::binary(*op, &left, &right)?)
        }

        Expr::Logical { op, left, right } => {
            let left = eval(left, locals, cx)?;
            match op {
                LogicalOp::Or if left.is_truthy() => Ok(left),
                LogicalOp::Or => eval(right, locals, cx),
                LogicalOp::And if !left.is_truthy() => Ok(left),
                LogicalOp::And => Ok(Value::Bool(eval(right, locals, cx)?.is_truthy())),
            }
        }

        Expr::Unary { op, operand } => {
            let operand = eval(operand, locals, cx)?;
            Ok(ops::unary(*op, &operand)?)
        }

        Expr::Call { target, args } => {
            let args = eval_args(args, locals, cx)?;
            match target {
                CallTarget::Local(name) => call_local(name, args, locals, cx),
                CallTarget::Scoped(name) => call_scoped(name, args, locals, cx),
            }
        }

        Expr::Suffix { base, path } => {
            let base = eval(base, locals, cx)?;
            Ok(walk(base, path)?)
        }

        Expr::SuffixCall { base, path, args } => {
            let base = eval(base, locals, cx)?;
            let target = walk(base, path)?;
            let args = eval_args(args, locals, cx)?;
            match target {
                Value::Callable(callable) => invoke(&callable, &args, cx),
                other => Err(Error::runtime(format!(
                    "'{}' is not callable ({})",
                    path.join("."),
                    other.type_name()
                ))
                .into()),
            }
        }
    }
}

fn eval_args(args: &[Argument], locals: &Locals, cx: &CallContext) -> Eval<Arguments> {
    let mut evaluated = Arguments::new();
    for arg in args {
        let value = eval(&arg.value, locals, cx)?;
        evaluated.insert(arg.name.clone(), value);
    }
    Ok(evaluated)
}

/// Read a variable according to its qualifier.
fn lookup(target: &Target, locals: &Locals, cx: &CallContext) -> Result<Value> {
    let found = match target.qualifier {
        Qualifier::Local => locals.get(&target.name).cloned(),
        Qualifier::Global => cx.runtime().global(&target.name),
        Qualifier::Auto => match locals.get(&target.name) {
            Some(value) => Some(value.clone()),
            None => cx.runtime().global(&target.name),
        },
    };
    found.ok_or_else(|| LookupError::VariableNotFound(target.name.clone()).into())
}

/// Resolve a dotted name: the root as a variable and the rest as attributes,
/// or, when there is no such variable, a registered host function.
fn resolve_scoped(name: &str, locals: &Locals, cx: &CallContext) -> Eval<Value> {
    let mut segments = name.split('.');
    let root = segments.next().unwrap_or_default();
    let not_found = || Escape::from(LookupError::ScopedVariableNotFound(name.to_string()));

    let mut value = match lookup(&Target::auto(root), locals, cx) {
        Ok(value) => value,
        Err(_) => {
            return match cx.runtime().scoped_function(name) {
                Some(callable) => Ok(Value::Callable(callable)),
                None => Err(not_found()),
            }
        }
    };
    if value.is_scalar() || value.is_none() {
        return Err(not_found());
    }
    for segment in segments {
        value = containers::attribute(&value, segment).ok_or_else(not_found)?;
    }
    Ok(value)
}

/// Walk `path` as attributes of `value`.
fn walk(mut value: Value, path: &[String]) -> Result<Value> {
    for segment in path {
        value = containers::attribute(&value, segment).ok_or_else(|| {
            Error::runtime(format!("{} has no attribute '{}'", value.type_name(), segment))
        })?;
    }
    Ok(value)
}

fn invoke(callable: &Callable, args: &Arguments, cx: &CallContext) -> Eval<Value> {
    Ok(callable.call(args, cx)?)
}

/// `name(...)`: a callable bound to `name`, else a script function.
fn call_local(name: &str, args: Arguments, locals: &Locals, cx: &CallContext) -> Eval<Value> {
    let names: Vec<String> = args.names().into_iter().collect();
    cx.runtime()
        .log(format!("Invoking function '{}({})'...", name, names.join(", ")));

    if let Ok(Value::Callable(callable)) = lookup(&Target::auto(name), locals, cx) {
        return invoke(&callable, &args, cx);
    }
    call_function(name, args, cx)
}

/// `a.b.c(...)`: an attribute reached through a variable, else a registered
/// host function.
fn call_scoped(name: &str, args: Arguments, locals: &Locals, cx: &CallContext) -> Eval<Value> {
    match resolve_scoped(name, locals, cx) {
        Ok(Value::Callable(callable)) => return invoke(&callable, &args, cx),
        Ok(_) => {}
        Err(Escape::Fail(Error::Lookup(LookupError::ScopedVariableNotFound(_)))) => {}
        Err(other) => return Err(other),
    }
    match cx.runtime().scoped_function(name) {
        Some(callable) => invoke(&callable, &args, cx),
        None => Err(LookupError::ScopedFunctionNotFound(name.to_string()).into()),
    }
}
