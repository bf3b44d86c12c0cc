//! The ewer execution engine: cooperative multi-worker scheduling over a
//! shared store.
//!
//! Workers coordinate only through the store: per-digest result entries
//! for memoization and per-digest lock entries for at-most-once
//! execution. A single job description runs unchanged on one worker or
//! on hundreds sharing a filesystem or key-value service.
//!
//! # Modules
//!
//! - [`runner`]: argument materialization and single-task execution
//! - [`executor`]: the multi-pass scheduler and the `execute` command
//! - [`script`]: script loading, the owned registry context, barriers
//! - [`invalidate`]: transitive result invalidation by name pattern
//! - [`commands`]: status / check / sleep-until / cleanup / count
//! - [`util`]: identity and timed-path task helpers
//! - [`error`]: engine, script, and barrier error types

pub mod commands;
pub mod error;
pub mod executor;
pub mod invalidate;
pub mod runner;
pub mod script;
pub mod util;

// Re-export key types for ergonomic use.
pub use commands::{check, classify, cleanup, cleanup_locks, count, sleep_until, status, StateCounts, TaskState};
pub use error::{BarrierError, EngineError, ScriptError};
pub use executor::{execute, ExecuteOptions, Executor};
pub use invalidate::{invalidate, NamePattern};
pub use runner::{can_load, can_run, resolve, run_task, task_value, RunOptions};
pub use script::{load_script, ScriptCtx, ScriptFn};
