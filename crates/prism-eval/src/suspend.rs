//! Cooperative suspension between a running script and its driver.
//!
//! A top-level execution runs on its own worker thread. When a host function
//! calls [`CallContext::suspend`](crate::CallContext::suspend), the worker
//! sends a prompt to the driver and blocks until the driver resumes it with
//! a response.
//!
//! ## Channel Architecture
//!
//! - Events (prompts, completion): `tokio::sync::mpsc::UnboundedSender`, so the
//!   worker never blocks on sending and the driver can receive either
//!   blocking or from async code.
//! - Responses: a `std::sync::mpsc` channel created per prompt, received
//!   blocking on the worker.
//!
//! Dropping the [`Execution`] abandons the run: the worker's pending receive
//! fails and the script unwinds with an error nobody observes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::error::Error;
use crate::host::CallContext;
use crate::interpreter::Interpreter;
use crate::value::Value;
use crate::Result;

/// How a top-level execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A function ran off its end or executed `return`.
    Return(Value),
    /// An `exit` statement, or the end of a node chain.
    Exit(Value),
}

impl Outcome {
    pub fn value(&self) -> &Value {
        match self {
            Outcome::Return(v) | Outcome::Exit(v) => v,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Outcome::Return(v) | Outcome::Exit(v) => v,
        }
    }
}

/// What the driver sees each time it resumes an execution.
#[derive(Debug)]
pub enum Step {
    /// The script is suspended on this prompt and waits for a response.
    Prompt(Value),
    /// The script has finished. Further resumes keep reporting an error.
    Finished(Result<Outcome>),
}

pub(crate) enum Event {
    Prompt {
        prompt: Value,
        response_tx: mpsc::Sender<Value>,
    },
    Finished(Result<Outcome>),
}

/// The worker-side end of the channel pair.
#[derive(Clone)]
pub(crate) struct Suspender {
    tx: UnboundedSender<Event>,
}

impl Suspender {
    /// Send `prompt` to the driver and block for its response.
    pub fn suspend(&self, prompt: Value) -> Result<Value> {
        let (response_tx, response_rx) = mpsc::channel();
        self.tx
            .send(Event::Prompt {
                prompt,
                response_tx,
            })
            .map_err(|_| Error::runtime("the driver of this execution is gone"))?;
        response_rx
            .recv()
            .map_err(|_| Error::runtime("the driver stopped before answering a prompt"))
    }
}

/// A top-level execution, resumed step by step by its driver.
///
/// ```ignore
/// let mut execution = interpreter.execute_node("main")?;
/// let mut response = None;
/// loop {
///     match execution.resume(response.take()) {
///         Step::Prompt(prompt) => response = Some(answer(prompt)),
///         Step::Finished(outcome) => break outcome,
///     }
/// }
/// ```
pub struct Execution {
    events: UnboundedReceiver<Event>,
    pending: Option<mpsc::Sender<Value>>,
    finished: bool,
}

impl Execution {
    /// Run `body` on a new worker thread with a suspender attached.
    pub(crate) fn start<F>(interpreter: &Interpreter, label: &str, body: F) -> Result<Self>
    where
        F: FnOnce(&CallContext) -> Result<Outcome> + Send + 'static,
    {
        let (tx, events) = unbounded_channel();
        let suspender = Suspender { tx: tx.clone() };
        let cx = CallContext::new(interpreter.clone(), Some(suspender));
        let label = label.to_string();

        thread::Builder::new()
            .name(format!("prism-exec:{}", label))
            .stack_size(interpreter.runtime().config().thread_stack_size)
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| body(&cx)))
                    .unwrap_or_else(|_| Err(Error::runtime(format!("execution of '{}' panicked", label))));
                // The driver may already be gone.
                let _ = tx.send(Event::Finished(result));
            })
            .map_err(|e| Error::runtime(format!("failed to start execution thread: {}", e)))?;

        Ok(Self {
            events,
            pending: None,
            finished: false,
        })
    }

    /// Answer the pending prompt (if any) with `response` and block until
    /// the script suspends again or finishes. A missing response is
    /// delivered as None.
    ///
    /// Must not be called from within an async runtime; use
    /// [`resume_async`](Self::resume_async) there.
    pub fn resume(&mut self, response: Option<Value>) -> Step {
        if self.finished {
            return Self::already_finished();
        }
        self.answer(response);
        let event = self.events.blocking_recv();
        self.accept(event)
    }

    /// Async form of [`resume`](Self::resume).
    pub async fn resume_async(&mut self, response: Option<Value>) -> Step {
        if self.finished {
            return Self::already_finished();
        }
        self.answer(response);
        let event = self.events.recv().await;
        self.accept(event)
    }

    /// Run to completion, answering every prompt with `responder`.
    pub fn drive<F>(mut self, mut responder: F) -> Result<Outcome>
    where
        F: FnMut(Value) -> Result<Value>,
    {
        let mut response = None;
        loop {
            match self.resume(response.take()) {
                Step::Prompt(prompt) => response = Some(responder(prompt)?),
                Step::Finished(outcome) => return outcome,
            }
        }
    }

    /// Run to completion, answering every prompt with None.
    pub fn finish(self) -> Result<Outcome> {
        self.drive(|_| Ok(Value::None))
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn answer(&mut self, response: Option<Value>) {
        if let Some(response_tx) = self.pending.take() {
            // A failed send means the worker already unwound; its Finished
            // event is still queued.
            let _ = response_tx.send(response.unwrap_or_default());
        }
    }

    fn accept(&mut self, event: Option<Event>) -> Step {
        match event {
            Some(Event::Prompt {
                prompt,
                response_tx,
            }) => {
                self.pending = Some(response_tx);
                Step::Prompt(prompt)
            }
            Some(Event::Finished(result)) => {
                self.finished = true;
                Step::Finished(result)
            }
            None => {
                self.finished = true;
                Step::Finished(Err(Error::runtime(
                    "execution thread ended without reporting a result",
                )))
            }
        }
    }

    fn already_finished() -> Step {
        Step::Finished(Err(Error::runtime("execution has already finished")))
    }
}
