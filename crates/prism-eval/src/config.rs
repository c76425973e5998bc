//! Interpreter configuration.

use serde::Deserialize;

use crate::error::Error;

/// What happens when a loop reaches the iteration limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopLimitPolicy {
    /// Stop the loop and record the event in the execution log.
    #[default]
    Truncate,
    /// Stop the loop with an execution error.
    Fail,
}

/// Settings for an [`Interpreter`](crate::Interpreter).
///
/// Can be loaded from JSON; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Register `types.Thread` and `types.Lock`.
    pub threading: bool,
    /// Iterations a single loop may run; 0 disables the limit.
    pub loop_limit: usize,
    pub loop_limit_policy: LoopLimitPolicy,
    /// Stack size of the threads scripts run on.
    pub thread_stack_size: usize,
}

pub const DEFAULT_LOOP_LIMIT: usize = 100_000;

impl Default for Config {
    fn default() -> Self {
        Self {
            threading: true,
            loop_limit: DEFAULT_LOOP_LIMIT,
            loop_limit_policy: LoopLimitPolicy::Truncate,
            thread_stack_size: 8 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn with_threading(mut self, threading: bool) -> Self {
        self.threading = threading;
        self
    }

    pub fn with_loop_limit(mut self, limit: usize) -> Self {
        self.loop_limit = limit;
        self
    }

    pub fn with_loop_limit_policy(mut self, policy: LoopLimitPolicy) -> Self {
        self.loop_limit_policy = policy;
        self
    }

    pub fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Parse a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::config(format!("invalid configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.threading);
        assert_eq!(config.loop_limit, 100_000);
        assert_eq!(config.loop_limit_policy, LoopLimitPolicy::Truncate);
    }

    #[test]
    fn test_from_json_fills_missing_fields() {
        let config = Config::from_json(r#"{"loop_limit": 10, "loop_limit_policy": "fail"}"#).unwrap();
        assert_eq!(config.loop_limit, 10);
        assert_eq!(config.loop_limit_policy, LoopLimitPolicy::Fail);
        assert!(config.threading);
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        let result = Config::from_json(r#"{"loop_limt": 10}"#);
        assert!(matches!(result, Err(Error::Config(_))), "{:?}", result);
    }
}
