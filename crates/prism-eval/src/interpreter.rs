//! The Prism interpreter: the handle hosts hold on to.
//!
//! An [`Interpreter`] is a cheap, cloneable handle to shared state: the
//! node and function tables, the registered host functions, the globals
//! and the execution log. Every execution, background thread and host
//! callback works through a clone of it.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::MappedMutexGuard;
use prism_parser::{parse, FunctionKey};
use regex::Regex;

use crate::builtins;
use crate::concurrency::{self, Task, ThreadHandle, ThreadInfo};
use crate::config::{Config, LoopLimitPolicy};
use crate::error::{Error, LookupError};
use crate::eval;
use crate::host::{Arguments, Callable, HostFunction};
use crate::runtime::Runtime;
use crate::suspend::{Execution, Outcome};
use crate::value::Value;
use crate::Result;

fn scoped_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_]\w*(\.[A-Za-z_]\w*)+$").expect("scoped name pattern is valid")
    })
}

#[derive(Clone)]
pub struct Interpreter {
    runtime: Arc<Runtime>,
}

impl Interpreter {
    /// Parse `source` and build an interpreter with the default settings.
    pub fn new(source: &str) -> Result<Self> {
        Self::with_config(source, Config::default())
    }

    pub fn with_config(source: &str, config: Config) -> Result<Self> {
        let script = parse(source)?;
        let runtime = Runtime::new(script, config);
        builtins::register(&runtime);
        tracing::debug!(
            nodes = runtime.node_names().len(),
            functions = runtime.function_keys().len(),
            "Interpreter created"
        );
        Ok(Self {
            runtime: Arc::new(runtime),
        })
    }

    pub(crate) fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn config(&self) -> &Config {
        self.runtime.config()
    }

    /// Parse more script source into the live namespace. Definitions with
    /// a name (and, for functions, parameter set) already present replace
    /// the old ones.
    pub fn extend_namespace(&self, source: &str) -> Result<()> {
        let script = parse(source)?;
        self.runtime.extend_namespace(script);
        Ok(())
    }

    // ---- Execution ----

    /// Start executing the node `name`. A missing node is reported here,
    /// before anything runs.
    pub fn execute_node(&self, name: &str) -> Result<Execution> {
        if self.runtime.node(name).is_none() {
            return Err(LookupError::NodeNotFound(name.to_string()).into());
        }
        let node = name.to_string();
        Execution::start(self, name, move |cx| {
            eval::run_node(&node, cx).map(Outcome::Exit)
        })
    }

    /// Start executing the script function selected by `name` and the
    /// names of `args`.
    pub fn execute_function(&self, name: &str, args: Arguments) -> Result<Execution> {
        let key = FunctionKey::new(name, args.names());
        if self.runtime.function(&key).is_none() {
            return Err(LookupError::FunctionNotFound {
                name: key.name,
                params: key.params.into_iter().collect(),
            }
            .into());
        }
        let name = name.to_string();
        Execution::start(self, &key.to_string(), move |cx| {
            eval::run_function(&name, args, cx)
        })
    }

    /// Run `task` on a background thread. See `types.Thread`.
    pub fn spawn(&self, task: Task, args: Arguments) -> Result<ThreadHandle> {
        concurrency::spawn(self, task, args)
    }

    // ---- Host functions ----

    /// Register host functions under dotted names such as `io.say`. Every
    /// name is checked before any is registered.
    pub fn register_scoped_functions<I, S>(&self, functions: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, Arc<dyn HostFunction>)>,
        S: Into<String>,
    {
        let functions: Vec<(String, Arc<dyn HostFunction>)> = functions
            .into_iter()
            .map(|(name, function)| (name.into(), function))
            .collect();
        if let Some((name, _)) = functions
            .iter()
            .find(|(name, _)| !scoped_name_pattern().is_match(name))
        {
            return Err(Error::config(format!(
                "'{}' is not a valid scoped identifier",
                name
            )));
        }
        for (name, function) in functions {
            let callable = Callable::from_arc(name.as_str(), function);
            self.runtime.register_scoped_function(name, callable);
        }
        Ok(())
    }

    /// Register a single host function.
    pub fn register_scoped_function(
        &self,
        name: &str,
        function: impl HostFunction + 'static,
    ) -> Result<()> {
        let function: Arc<dyn HostFunction> = Arc::new(function);
        self.register_scoped_functions([(name, function)])
    }

    // ---- Settings and state ----

    /// Iterations a single loop may run; 0 disables the limit.
    pub fn set_loop_limit(&self, limit: usize) {
        self.runtime.set_loop_limit(limit);
    }

    pub fn set_loop_limit_policy(&self, policy: LoopLimitPolicy) {
        self.runtime.set_loop_limit_policy(policy);
    }

    /// The execution log, oldest entry first.
    pub fn log(&self) -> Vec<String> {
        self.runtime.log_snapshot()
    }

    /// Sweep every lock this interpreter created, freeing those whose owner
    /// is gone (or is the calling thread, with `treat_caller_as_dead`).
    pub fn release_locks(&self, treat_caller_as_dead: bool) -> Vec<ThreadInfo> {
        let offenders = self.runtime.locks().release_dead(treat_caller_as_dead);
        if !offenders.is_empty() {
            let names: Vec<String> = offenders.iter().map(ToString::to_string).collect();
            self.runtime.log_warning(format!(
                "The following misbehaving threads left locks in use: {}",
                names.join(", ")
            ));
        }
        offenders
    }

    /// Direct access to the global variables.
    ///
    /// Holds the interpreter's shared lock: scripts running concurrently
    /// block on global access and logging until the guard is dropped.
    pub fn globals(&self) -> MappedMutexGuard<'_, HashMap<String, Value>> {
        self.runtime.globals()
    }

    pub fn list_nodes(&self) -> Vec<String> {
        self.runtime.node_names()
    }

    pub fn list_functions(&self) -> Vec<FunctionKey> {
        self.runtime.function_keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::CallContext;

    #[test]
    fn test_scoped_name_validation() {
        let interpreter = Interpreter::new("").unwrap();
        let ok = |_: &Arguments, _: &CallContext| -> Result<Value> { Ok(Value::None) };
        assert!(interpreter.register_scoped_function("io.say", ok).is_ok());
        assert!(interpreter.register_scoped_function("a.b.c_1", ok).is_ok());
        for bad in ["say", "io.", ".say", "io..say", "1o.say", "io.say-it"] {
            let err = interpreter.register_scoped_function(bad, ok).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{}: {:?}", bad, err);
        }
    }

    #[test]
    fn test_registration_is_all_or_nothing() {
        let interpreter = Interpreter::new("").unwrap();
        let f: Arc<dyn HostFunction> =
            Arc::new(|_: &Arguments, _: &CallContext| -> Result<Value> { Ok(Value::None) });
        let result = interpreter.register_scoped_functions(vec![
            ("good.name", Arc::clone(&f)),
            ("bad name", Arc::clone(&f)),
        ]);
        assert!(result.is_err());
        assert!(interpreter.runtime().scoped_function("good.name").is_none());
    }

    #[test]
    fn test_missing_entry_points_fail_fast() {
        let interpreter = Interpreter::new("main {} f(x) {}").unwrap();
        let err = interpreter.execute_node("nope").err().unwrap();
        assert_eq!(err.lookup(), Some(&LookupError::NodeNotFound("nope".into())));

        let err = interpreter.execute_function("f", Arguments::new()).err().unwrap();
        assert!(matches!(
            err.lookup(),
            Some(LookupError::FunctionNotFound { name, params }) if name == "f" && params.is_empty()
        ));
    }

    #[test]
    fn test_listing() {
        let interpreter = Interpreter::new("b {} a {} f(y, x) {}").unwrap();
        assert_eq!(interpreter.list_nodes(), vec!["a", "b"]);
        assert_eq!(interpreter.list_functions(), vec![FunctionKey::new("f", ["x", "y"])]);
    }

    #[test]
    fn test_syntax_error_surfaces() {
        let err = Interpreter::new("main { x = ; }").err().unwrap();
        assert!(matches!(err, Error::Syntax(_)));
    }
}
