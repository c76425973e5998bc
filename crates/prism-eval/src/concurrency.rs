//! Background threads and supervised locks.
//!
//! A supervised lock remembers which OS thread owns it and holds a weak
//! reference to that thread's liveness token. The token lives in a
//! thread-local and is dropped when the thread exits, so a sweep can tell
//! an owner that crashed or returned while holding the lock from one that
//! is merely slow.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::error::Error;
use crate::eval;
use crate::host::{Arguments, CallContext, Callable, HostObject};
use crate::interpreter::Interpreter;
use crate::value::Value;
use crate::Result;

thread_local! {
    static LIVENESS: Arc<()> = Arc::new(());
}

/// A thread as reported by a lock sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: Option<String>,
}

impl ThreadInfo {
    fn current() -> Self {
        let current = thread::current();
        Self {
            id: current.id(),
            name: current.name().map(str::to_string),
        }
    }
}

impl fmt::Display for ThreadInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({:?})", name, self.id),
            None => write!(f, "{:?}", self.id),
        }
    }
}

#[derive(Debug)]
struct Owner {
    info: ThreadInfo,
    alive: Weak<()>,
}

impl Owner {
    fn current() -> Self {
        Self {
            info: ThreadInfo::current(),
            alive: LIVENESS.with(Arc::downgrade),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.strong_count() > 0
    }
}

#[derive(Debug, Default)]
struct LockState {
    owner: Option<Owner>,
    count: usize,
}

/// A reentrant lock whose ownership can be cleared when its owner is gone.
#[derive(Debug, Default)]
pub struct SupervisedLock {
    state: Mutex<LockState>,
    available: Condvar,
}

impl SupervisedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, blocking while another thread holds it. Nested
    /// acquisitions by the owner only raise the hold count.
    pub fn acquire(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            match &state.owner {
                None => {
                    state.owner = Some(Owner::current());
                    state.count = 1;
                    return;
                }
                Some(owner) if owner.info.id == me => {
                    state.count += 1;
                    return;
                }
                Some(_) => self.available.wait(&mut state),
            }
        }
    }

    /// Drop one hold. Fails if the calling thread is not the owner.
    pub fn release(&self) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        match &state.owner {
            Some(owner) if owner.info.id == me => {
                state.count -= 1;
                if state.count == 0 {
                    state.owner = None;
                    self.available.notify_one();
                }
                Ok(())
            }
            _ => Err(Error::runtime("cannot release a lock not held by this thread")),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    pub fn owner(&self) -> Option<ThreadInfo> {
        self.state.lock().owner.as_ref().map(|o| o.info.clone())
    }

    /// Clear ownership if the owner no longer exists, or if
    /// `treat_caller_as_dead` is set and the owner is the calling thread.
    /// Returns the thread that was holding the lock improperly.
    pub fn release_dead(&self, treat_caller_as_dead: bool) -> Option<ThreadInfo> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        let dead = match &state.owner {
            Some(owner) => !owner.is_alive() || (treat_caller_as_dead && owner.info.id == me),
            None => false,
        };
        if !dead {
            return None;
        }
        state.count = 0;
        let owner = state.owner.take().map(|o| o.info);
        self.available.notify_all();
        owner
    }
}

impl HostObject for SupervisedLock {
    fn type_name(&self) -> &str {
        "Lock"
    }

    fn attribute(self: Arc<Self>, name: &str) -> Option<Value> {
        match name {
            "acquired" | "locked" => Some(Value::Bool(self.is_locked())),
            "acquire" | "lock" => Some(Value::Callable(Callable::new(
                format!("Lock.{}", name),
                move |_: &Arguments, _: &CallContext| -> Result<Value> {
                    self.acquire();
                    Ok(Value::None)
                },
            ))),
            "release" | "unlock" => Some(Value::Callable(Callable::new(
                format!("Lock.{}", name),
                move |_: &Arguments, _: &CallContext| -> Result<Value> {
                    self.release()?;
                    Ok(Value::None)
                },
            ))),
            _ => None,
        }
    }
}

/// Every lock created for one interpreter, held weakly so unused locks can
/// be freed.
#[derive(Debug, Default)]
pub(crate) struct LockRegistry {
    locks: Mutex<Vec<Weak<SupervisedLock>>>,
}

impl LockRegistry {
    pub fn create(&self) -> Arc<SupervisedLock> {
        let lock = Arc::new(SupervisedLock::new());
        self.locks.lock().push(Arc::downgrade(&lock));
        lock
    }

    /// Sweep every live lock, pruning ones that have been dropped.
    pub fn release_dead(&self, treat_caller_as_dead: bool) -> Vec<ThreadInfo> {
        let mut locks = self.locks.lock();
        locks.retain(|lock| lock.strong_count() > 0);
        let mut offenders = Vec::new();
        for lock in locks.iter().filter_map(Weak::upgrade) {
            if let Some(info) = lock.release_dead(treat_caller_as_dead) {
                if !offenders.contains(&info) {
                    offenders.push(info);
                }
            }
        }
        offenders
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// What a background thread runs.
#[derive(Debug, Clone)]
pub enum Task {
    /// A script function, looked up by name and the spawned argument names.
    Script(String),
    Callable(Callable),
}

#[derive(Debug, Default)]
struct Completion {
    result: Option<Result<Value>>,
}

#[derive(Debug)]
struct HandleState {
    name: String,
    completion: Mutex<Completion>,
    finished: Condvar,
}

/// Handle to a background thread started with [`Interpreter::spawn`].
#[derive(Debug, Clone)]
pub struct ThreadHandle {
    state: Arc<HandleState>,
}

impl ThreadHandle {
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// True from creation until the task completes.
    pub fn is_running(&self) -> bool {
        self.state.completion.lock().result.is_none()
    }

    /// The task's outcome, if it has completed.
    pub fn result(&self) -> Option<Result<Value>> {
        self.state.completion.lock().result.clone()
    }

    /// Block until the task completes and return its outcome.
    pub fn join(&self) -> Result<Value> {
        let mut completion = self.state.completion.lock();
        loop {
            if let Some(result) = &completion.result {
                return result.clone();
            }
            self.state.finished.wait(&mut completion);
        }
    }

    fn complete(&self, result: Result<Value>) {
        self.state.completion.lock().result = Some(result);
        self.state.finished.notify_all();
    }

    /// The script-visible form of an outcome: the value, or the error
    /// message once the task failed.
    fn script_result(result: Option<Result<Value>>) -> Value {
        match result {
            Some(Ok(value)) => value,
            Some(Err(err)) => Value::String(err.to_string()),
            None => Value::None,
        }
    }
}

impl HostObject for ThreadHandle {
    fn type_name(&self) -> &str {
        "Thread"
    }

    fn attribute(self: Arc<Self>, name: &str) -> Option<Value> {
        match name {
            "running" => Some(Value::Bool(self.is_running())),
            "result" => Some(Self::script_result(self.result())),
            "exception" => Some(Value::Bool(matches!(self.result(), Some(Err(_))))),
            "join" => Some(Value::Callable(Callable::new(
                "Thread.join",
                move |_: &Arguments, _: &CallContext| -> Result<Value> {
                    Ok(Self::script_result(Some(self.join())))
                },
            ))),
            _ => None,
        }
    }
}

/// Start `task` on a new OS thread. The task gets no suspender; when it
/// finishes, locks it still holds are swept.
pub(crate) fn spawn(interpreter: &Interpreter, task: Task, args: Arguments) -> Result<ThreadHandle> {
    let runtime = interpreter.runtime();
    let name = runtime.next_thread_name();
    let handle = ThreadHandle {
        state: Arc::new(HandleState {
            name: name.clone(),
            completion: Mutex::new(Completion::default()),
            finished: Condvar::new(),
        }),
    };

    let interpreter = interpreter.clone();
    let finished = handle.clone();
    thread::Builder::new()
        .name(name.clone())
        .stack_size(runtime.config().thread_stack_size)
        .spawn(move || {
            tracing::debug!(thread = %name, "Background thread started");
            let cx = CallContext::new(interpreter.clone(), None);
            let result = panic::catch_unwind(AssertUnwindSafe(|| match task {
                Task::Script(function) => {
                    eval::run_function(&function, args, &cx).map(|outcome| outcome.into_value())
                }
                Task::Callable(callable) => callable.call(&args, &cx),
            }))
            .unwrap_or_else(|_| Err(Error::runtime(format!("thread '{}' panicked", name))));

            if let Err(err) = &result {
                tracing::debug!(thread = %name, error = %err, "Background thread failed");
            }
            let offenders = interpreter.release_locks(true);
            if !offenders.is_empty() {
                tracing::warn!(thread = %name, count = offenders.len(), "Background thread left locks held");
            }
            finished.complete(result);
        })
        .map_err(|e| Error::runtime(format!("failed to spawn thread: {}", e)))?;

    Ok(handle)
}
