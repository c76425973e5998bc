//! Shared state behind an [`Interpreter`](crate::Interpreter) handle.
//!
//! Everything here may be touched by several threads at once: the driver's
//! worker thread, background script threads and the host itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard, RwLock};
use prism_parser::{Block, FunctionKey, Script};

use crate::concurrency::LockRegistry;
use crate::config::{Config, LoopLimitPolicy};
use crate::host::Callable;
use crate::value::Value;

/// State guarded by the single shared mutex: the global variables and the
/// execution log.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub globals: HashMap<String, Value>,
    pub log: Vec<String>,
}

/// The node and function tables. Bodies are reference-counted so an
/// execution can hold on to one while the namespace is extended.
#[derive(Debug, Default)]
pub(crate) struct Namespace {
    pub nodes: HashMap<String, Arc<Block>>,
    pub functions: HashMap<FunctionKey, Arc<Block>>,
}

impl Namespace {
    /// Merge a parsed script, later definitions replacing earlier ones.
    pub fn extend(&mut self, script: Script) {
        for (name, body) in script.nodes {
            self.nodes.insert(name, Arc::new(body));
        }
        for (key, body) in script.functions {
            self.functions.insert(key, Arc::new(body));
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopSettings {
    pub limit: usize,
    pub policy: LoopLimitPolicy,
}

pub(crate) struct Runtime {
    namespace: RwLock<Namespace>,
    scoped_functions: RwLock<HashMap<String, Callable>>,
    shared: Mutex<Shared>,
    loop_settings: RwLock<LoopSettings>,
    locks: LockRegistry,
    threads_spawned: AtomicUsize,
    config: Config,
}

impl Runtime {
    pub fn new(script: Script, config: Config) -> Self {
        let mut namespace = Namespace::default();
        namespace.extend(script);
        Self {
            namespace: RwLock::new(namespace),
            scoped_functions: RwLock::new(HashMap::new()),
            shared: Mutex::new(Shared::default()),
            loop_settings: RwLock::new(LoopSettings {
                limit: config.loop_limit,
                policy: config.loop_limit_policy,
            }),
            locks: LockRegistry::default(),
            threads_spawned: AtomicUsize::new(0),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ---- Namespace ----

    pub fn extend_namespace(&self, script: Script) {
        self.namespace.write().extend(script);
    }

    pub fn node(&self, name: &str) -> Option<Arc<Block>> {
        self.namespace.read().nodes.get(name).cloned()
    }

    pub fn function(&self, key: &FunctionKey) -> Option<Arc<Block>> {
        self.namespace.read().functions.get(key).cloned()
    }

    pub fn node_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespace.read().nodes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn function_keys(&self) -> Vec<FunctionKey> {
        let mut keys: Vec<FunctionKey> = self.namespace.read().functions.keys().cloned().collect();
        keys.sort();
        keys
    }

    // ---- Host functions ----

    pub fn scoped_function(&self, name: &str) -> Option<Callable> {
        self.scoped_functions.read().get(name).cloned()
    }

    pub fn register_scoped_function(&self, name: String, callable: Callable) {
        self.scoped_functions.write().insert(name, callable);
    }

    // ---- Globals and log ----

    #[cfg(test)]
    pub fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock()
    }

    pub fn globals(&self) -> MappedMutexGuard<'_, HashMap<String, Value>> {
        MutexGuard::map(self.shared.lock(), |shared| &mut shared.globals)
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.shared.lock().globals.get(name).cloned()
    }

    pub fn set_global(&self, name: &str, value: Value) {
        self.shared.lock().globals.insert(name.to_string(), value);
    }

    /// Append a line to the execution log.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(target: "prism::log", "{}", message);
        self.shared.lock().log.push(message);
    }

    /// Append an anomaly to the execution log.
    pub fn log_warning(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(target: "prism::log", "{}", message);
        self.shared.lock().log.push(message);
    }

    pub fn log_snapshot(&self) -> Vec<String> {
        self.shared.lock().log.clone()
    }

    // ---- Loops ----

    pub fn loop_settings(&self) -> LoopSettings {
        *self.loop_settings.read()
    }

    pub fn set_loop_limit(&self, limit: usize) {
        self.loop_settings.write().limit = limit;
    }

    pub fn set_loop_limit_policy(&self, policy: LoopLimitPolicy) {
        self.loop_settings.write().policy = policy;
    }

    // ---- Concurrency ----

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// The next background thread name.
    pub fn next_thread_name(&self) -> String {
        let n = self.threads_spawned.fetch_add(1, Ordering::Relaxed);
        format!("prism-thread-{}", n)
    }
}
