//! The script/host boundary: callables, host objects and call context.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::Error;
use crate::interpreter::Interpreter;
use crate::runtime::Runtime;
use crate::suspend::Suspender;
use crate::value::Value;
use crate::Result;

/// Named arguments of a call, in the order they were written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(IndexMap<String, Value>);

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// The named argument, or a runtime error naming the missing parameter.
    pub fn require(&self, name: &str) -> Result<&Value> {
        self.0
            .get(name)
            .ok_or_else(|| Error::runtime(format!("missing required argument '{}'", name)))
    }

    /// The named argument unless it is absent or None.
    pub fn optional(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_none())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.shift_remove(name)
    }

    /// Argument names, sorted.
    pub fn names(&self) -> BTreeSet<String> {
        self.0.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub(crate) fn into_locals(self) -> HashMap<String, Value> {
        self.0.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A function the host makes callable from scripts.
///
/// Implemented for any `Fn(&Arguments, &CallContext) -> Result<Value>`.
pub trait HostFunction: Send + Sync {
    fn call(&self, args: &Arguments, cx: &CallContext) -> Result<Value>;
}

impl<F> HostFunction for F
where
    F: Fn(&Arguments, &CallContext) -> Result<Value> + Send + Sync,
{
    fn call(&self, args: &Arguments, cx: &CallContext) -> Result<Value> {
        self(args, cx)
    }
}

/// A named, shareable host function value.
#[derive(Clone)]
pub struct Callable {
    name: Arc<str>,
    function: Arc<dyn HostFunction>,
}

impl Callable {
    pub fn new(name: impl Into<Arc<str>>, function: impl HostFunction + 'static) -> Self {
        Self {
            name: name.into(),
            function: Arc::new(function),
        }
    }

    pub fn from_arc(name: impl Into<Arc<str>>, function: Arc<dyn HostFunction>) -> Self {
        Self {
            name: name.into(),
            function,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &Arguments, cx: &CallContext) -> Result<Value> {
        self.function.call(args, cx)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.function, &other.function)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<callable {}>", self.name)
    }
}

/// A host object reachable from scripts through dotted access.
///
/// Only the names `attribute` answers for are visible; there is no
/// reflection. Methods are returned as [`Value::Callable`].
pub trait HostObject: Send + Sync {
    fn type_name(&self) -> &str;

    fn attribute(self: Arc<Self>, name: &str) -> Option<Value>;
}

/// What a host function can see of the execution that called it.
#[derive(Clone)]
pub struct CallContext {
    interpreter: Interpreter,
    suspender: Option<Suspender>,
}

impl CallContext {
    pub(crate) fn new(interpreter: Interpreter, suspender: Option<Suspender>) -> Self {
        Self {
            interpreter,
            suspender,
        }
    }

    /// The interpreter the calling script runs in.
    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub(crate) fn runtime(&self) -> &Runtime {
        self.interpreter.runtime()
    }

    /// Whether a driver is attached that can answer [`suspend`](Self::suspend).
    pub fn can_suspend(&self) -> bool {
        self.suspender.is_some()
    }

    /// Hand `prompt` to the driver and block until it supplies a response.
    ///
    /// Background threads have no driver; suspending there is an error.
    pub fn suspend(&self, prompt: impl Into<Value>) -> Result<Value> {
        match &self.suspender {
            Some(suspender) => suspender.suspend(prompt.into()),
            None => Err(Error::runtime(
                "a suspending function was called without a driver; \
                 background threads must run to completion without prompting",
            )),
        }
    }

    /// Append a line to the interpreter's execution log.
    pub fn log(&self, message: impl Into<String>) {
        self.runtime().log(message);
    }
}
