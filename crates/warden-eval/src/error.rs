//! Infrastructure error type (SPEC_FULL.md §7 "Rust error types").
//!
//! `EvalError` covers failures that are *not* representable as `Value::Error` --
//! broker misconfiguration, not a value flowing through a policy body. Every
//! `EvalError` that surfaces during compilation or evaluation is caught at the
//! policy boundary and turned into `INDETERMINATE`; it never escapes `warden-eval`'s
//! public API as an `Err`. `thiserror` is used here (the teacher's workspace already
//! depends on it for its sibling crates), in contrast to the hand-rolled
//! `Display`/`Error` impls used for the value-level taxonomy in `value::Value::Error`.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),

    #[error("unknown function '{library}.{name}'", library = library.as_deref().unwrap_or("<env>"))]
    UnknownFunction { library: Option<String>, name: String },

    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    ArityMismatch { name: String, expected: usize, got: usize },

    #[error("attribute broker unavailable: {0}")]
    BrokerUnavailable(String),
}
