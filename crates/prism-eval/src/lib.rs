//! Prism script interpreter with host-driven suspension.
//!
//! Scripts are made of parameterless nodes, linked by `goto`, and functions
//! selected by name and parameter names. Hosts register dotted-name
//! functions the scripts call. A host function may suspend the script it
//! was called from; the driver of the [`Execution`] receives the prompt
//! and resumes the script with a response.
//!
//! ```ignore
//! let interpreter = Interpreter::new("main { name = io.ask(prompt='name?'); exit 'hi ' + name; }")?;
//! interpreter.register_scoped_function("io.ask", |args: &Arguments, cx: &CallContext| -> Result<Value> {
//!     cx.suspend(args.require("prompt")?.clone())
//! })?;
//! let outcome = interpreter.execute_node("main")?.drive(|_prompt| Ok(Value::from("Ada")))?;
//! assert_eq!(outcome, Outcome::Exit(Value::from("hi Ada")));
//! ```

mod builtins;
mod concurrency;
mod config;
mod containers;
mod error;
mod eval;
mod host;
mod interpreter;
mod ops;
mod runtime;
mod stack;
mod suspend;
mod value;

pub use concurrency::{SupervisedLock, Task, ThreadHandle, ThreadInfo};
pub use config::{Config, LoopLimitPolicy, DEFAULT_LOOP_LIMIT};
pub use error::{Error, ExecutionError, LookupError};
pub use host::{Arguments, CallContext, Callable, HostFunction, HostObject};
pub use interpreter::Interpreter;
pub use suspend::{Execution, Outcome, Step};
pub use value::{marshal, Dictionary, Key, Sequence, Set, Value};

pub use prism_parser::{FunctionKey, ParseError};

/// Result type for interpreter operations.
pub type Result<T> = std::result::Result<T, Error>;
