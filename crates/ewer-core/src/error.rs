//! Error types for ewer-core.
//!
//! [`GraphError`] covers graph-construction failures, which are fatal at
//! script load time. [`TaskError`] is the failure type returned by user task
//! functions and by value subscription.

use thiserror::Error;

/// Errors raised while constructing the task graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// An anonymous callable (closure) was given to a task constructor.
    /// Closures have no stable module-qualified name and therefore no
    /// stable digest.
    #[error("anonymous callable cannot be used as a task function: {0:?}")]
    AnonymousFunction(String),

    /// A task name without a module qualifier.
    #[error("task name is not module-qualified: {0:?}")]
    UnqualifiedName(String),

    /// An empty task name.
    #[error("task name is empty")]
    EmptyName,

    /// An array whose buffer length disagrees with its shape and dtype.
    #[error("array buffer of {len} bytes does not match shape {shape:?} of {dtype}")]
    ArrayShape {
        shape: Vec<u64>,
        dtype: &'static str,
        len: usize,
    },

    /// A digest string that is not 40 lowercase hex characters.
    #[error("digest must be 40 hex characters, got {0:?}")]
    BadDigest(String),
}

/// Errors raised by user task functions and by tasklet operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Generic task failure with a message.
    #[error("{0}")]
    Failed(String),

    /// A positional argument the function expected was not supplied.
    #[error("missing positional argument {0}")]
    MissingPositional(usize),

    /// A keyword argument the function expected was not supplied.
    #[error("missing keyword argument {0:?}")]
    MissingKeyword(String),

    /// An argument had an unexpected kind.
    #[error("argument {context}: expected {expected}, got {actual}")]
    WrongKind {
        context: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Subscript index past the end of a sequence value.
    #[error("subscript {index} out of range for sequence of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// Subscript key absent from a map value.
    #[error("key {key:?} not present in map value")]
    KeyNotFound { key: String },

    /// Subscript applied to a value kind that does not support it.
    #[error("value of kind {0} cannot be subscripted")]
    NotSubscriptable(&'static str),
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        TaskError::Failed(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        TaskError::Failed(message.to_string())
    }
}
