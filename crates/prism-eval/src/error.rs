//! Error types for the Prism interpreter.

use prism_parser::ParseError;
use thiserror::Error;

/// A namespace element could not be found.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("unable to find node '{0}'")]
    NodeNotFound(String),

    #[error("unable to find function '{name}({})'", .params.join(", "))]
    FunctionNotFound { name: String, params: Vec<String> },

    #[error("unable to find scoped function '{0}'")]
    ScopedFunctionNotFound(String),

    #[error("unable to find variable '{0}'")]
    VariableNotFound(String),

    #[error("unable to resolve scoped variable '{0}'")]
    ScopedVariableNotFound(String),
}

/// A failure while executing statements, carrying the path of statement
/// positions it unwound through.
///
/// The first path element names the node or function that was entered;
/// each following element is the 1-based index of a statement within the
/// enclosing block.
#[derive(Error, Debug, Clone)]
#[error("a processing error occurred in [{}]: {message}", .location_path.join(":"))]
pub struct ExecutionError {
    pub location_path: Vec<String>,
    pub message: String,
    #[source]
    pub cause: Option<Box<Error>>,
}

impl ExecutionError {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location_path: vec![location.into()],
            message: message.into(),
            cause: None,
        }
    }

    /// The innermost error that started the unwinding.
    pub fn root_cause(&self) -> Option<&Error> {
        let mut cause = self.cause.as_deref()?;
        while let Error::Execution(inner) = cause {
            match inner.cause.as_deref() {
                Some(next) => cause = next,
                None => break,
            }
        }
        Some(cause)
    }
}

/// Errors that can occur while loading or running a script.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] ParseError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Type mismatches, arithmetic failures and host call failures.
    #[error("{0}")]
    Runtime(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Prefix the error's location path with `location`, wrapping it in an
    /// [`ExecutionError`] first if it is not one already.
    pub fn located(self, location: impl Into<String>) -> Self {
        match self {
            Error::Execution(mut err) => {
                err.location_path.insert(0, location.into());
                Error::Execution(err)
            }
            other => Error::Execution(ExecutionError {
                location_path: vec![location.into()],
                message: other.to_string(),
                cause: Some(Box::new(other)),
            }),
        }
    }

    /// The lookup failure behind this error, however deeply it was wrapped.
    pub fn lookup(&self) -> Option<&LookupError> {
        match self {
            Error::Lookup(err) => Some(err),
            Error::Execution(err) => match err.root_cause() {
                Some(Error::Lookup(err)) => Some(err),
                _ => None,
            },
            _ => None,
        }
    }
}
