//! Stack safety for deeply nested scripts.

/// Ensure sufficient stack space for recursive evaluation.
///
/// Grows the stack if remaining space is less than 128KB, allocating 1MB
/// segments. Deeply nested expressions and recursive script functions both
/// recurse through the evaluator.
pub fn ensure_sufficient_stack<R, F: FnOnce() -> R>(f: F) -> R {
    stacker::maybe_grow(128 * 1024, 1024 * 1024, f)
}
