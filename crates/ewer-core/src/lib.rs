//! Core task-graph model for the ewer computation engine.
//!
//! A user script builds a DAG of [`Task`] nodes (memoized function
//! invocations identified by content digests) connected through argument
//! trees. This crate owns the value model, the hash kernel, and the graph
//! structure; it knows nothing about persistence or scheduling (those
//! live in `ewer-storage` and `ewer-engine`).
//!
//! # Modules
//!
//! - [`digest`]: the 40-hex-character content digest
//! - [`value`]: the tagged value variant over supported kinds
//! - [`hash`]: recursive digest computation for tasks and arguments
//! - [`task`]: Task, Tasklet, argument trees, and the task registry
//! - [`graph`]: transitive dependency walks and topological ordering
//! - [`error`]: graph-construction and task-function error types

pub mod digest;
pub mod error;
pub mod graph;
pub mod hash;
pub mod task;
pub mod value;

// Re-export key types for ergonomic use.
pub use digest::Digest;
pub use error::{GraphError, TaskError};
pub use graph::{recursive_dependencies, topological_sort};
pub use task::{
    Arg, CallArgs, CustomDigest, Node, Task, TaskFn, TaskHandle, TaskRegistry, Tasklet, TaskletOp,
};
pub use value::{Dtype, NdArray, Value};

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn value_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Unit),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<f64>().prop_map(Value::Float),
            ".{0,24}".prop_map(Value::Str),
            proptest::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        ];
        leaf.prop_recursive(3, 24, 6, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                proptest::collection::vec(inner, 0..4).prop_map(Value::set),
            ]
        })
    }

    proptest! {
        /// Structural equality implies digest equality, and a fresh
        /// construction of the same value digests identically.
        #[test]
        fn prop_equal_values_hash_equal(v in value_strategy()) {
            let copy = v.clone();
            prop_assert_eq!(hash::value_digest(&v), hash::value_digest(&copy));
        }

        /// Task digests are stable across separate registries, the way two
        /// worker processes must agree on every key.
        #[test]
        fn prop_task_digest_stable_across_registries(v in value_strategy()) {
            let func: TaskFn = Arc::new(|_| Ok(Value::Unit));
            let first = Task::new("demo.work", func.clone(), vec![Arg::Value(v.clone())]).unwrap();
            let second = Task::new("demo.work", func, vec![Arg::Value(v)]).unwrap();
            prop_assert_eq!(first.digest(), second.digest());
        }
    }
}
