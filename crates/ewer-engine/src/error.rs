//! Engine error types.
//!
//! [`EngineError`] covers everything that can stop a worker; the
//! propagation policy of the scheduler is local recovery for store faults
//! and (with keep-going) for task failures, everything else surfaces.
//! [`BarrierError`] is the typed failure of the barrier protocol and
//! [`ScriptError`] the failure type of user scripts; the script loader is
//! the single site that catches barriers.

use thiserror::Error;

use ewer_core::{Digest, GraphError, TaskError};
use ewer_storage::StoreError;

/// Errors raised by the execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A store backend fault. The scheduler downgrades these to unknown
    /// state during a pass; commands propagate them.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A graph-construction failure; fatal at script load.
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// A filesystem fault outside the store (e.g. timed-path stat).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A task function returned an error.
    #[error("task {name} failed: {source}")]
    TaskFailed {
        name: String,
        #[source]
        source: TaskError,
    },

    /// Debug mode found a task digest that changed across execution.
    /// Fatal: a task function mutated an argument, which corrupts every
    /// downstream memoization key.
    #[error("digest of task {name} changed during execution; the task function mutated an argument")]
    HashMismatch { name: String },

    /// A task was asked to run before its dependencies were available.
    #[error("task {0} is not ready to run")]
    NotReady(String),

    /// A malformed invalidation pattern.
    #[error("invalid name pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// The user script failed for a reason of its own.
    #[error("script failed: {0}")]
    ScriptFailed(String),
}

/// The sentinel failure a script raises when a value it needs to continue
/// building the graph has not been computed yet.
#[derive(Debug, Error)]
#[error("barrier: result {digest} is not yet available")]
pub struct BarrierError {
    pub digest: Digest,
}

/// Failure type of user scripts.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Graph construction cannot continue until more results exist.
    #[error(transparent)]
    Barrier(#[from] BarrierError),

    /// Graph construction failed outright; fatal.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// An engine-level failure surfaced inside the script (e.g. a store
    /// fault while resolving a barrier value).
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Any other script failure.
    #[error("{0}")]
    Failed(String),
}

impl From<StoreError> for ScriptError {
    fn from(e: StoreError) -> Self {
        ScriptError::Engine(EngineError::Store(e))
    }
}
