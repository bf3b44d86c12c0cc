//! The hash kernel: deterministic content digests for tasks, tasklets,
//! and argument values.
//!
//! A task digest covers the fully qualified function name, every
//! positional argument tagged with its index, and every keyword argument
//! tagged with its key in insertion order. Argument hashing is recursive:
//! a task contributes its own digest, which is how dependency structure
//! enters the digest and why equal graphs built in separate processes
//! agree on every key.
//!
//! # Determinism
//!
//! - Every contribution is written as a length-prefixed frame, so adjacent
//!   fields can never alias.
//! - Scalars use fixed canonical encodings (little-endian integers,
//!   IEEE-754 bits for floats, UTF-8 for strings).
//! - Map entries hash in insertion order, key before value.
//! - Set members hash in sorted member-digest order, removing insertion
//!   order from the digest.

use indexmap::IndexMap;

use crate::digest::{Digest, DIGEST_LEN};
use crate::task::{Arg, Node, TaskletOp};
use crate::value::Value;

/// Incremental hasher producing a [`Digest`].
///
/// Wraps blake3 and frames every write with a length prefix.
pub struct TaskHasher {
    inner: blake3::Hasher,
}

impl TaskHasher {
    pub fn new() -> Self {
        TaskHasher {
            inner: blake3::Hasher::new(),
        }
    }

    /// Writes one length-prefixed frame.
    pub fn frame(&mut self, payload: &[u8]) {
        self.inner.update(&(payload.len() as u64).to_le_bytes());
        self.inner.update(payload);
    }

    /// Writes a kind tag as its own frame.
    pub fn tag(&mut self, tag: &str) {
        self.frame(tag.as_bytes());
    }

    /// Finalizes into a 20-byte digest (blake3 XOF output).
    pub fn finish(self) -> Digest {
        let mut bytes = [0u8; DIGEST_LEN];
        self.inner.finalize_xof().fill(&mut bytes);
        Digest::from_bytes(bytes)
    }
}

impl Default for TaskHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hashes a plain value on its own. Used for canonical set ordering and
/// anywhere a value needs a standalone identity.
pub fn value_digest(value: &Value) -> Digest {
    let mut hasher = TaskHasher::new();
    write_value(&mut hasher, value);
    hasher.finish()
}

/// Hashes an argument tree on its own.
pub fn arg_digest(arg: &Arg) -> Digest {
    let mut hasher = TaskHasher::new();
    write_arg(&mut hasher, arg);
    hasher.finish()
}

/// Computes a task digest from its name, positional arguments, and
/// keyword arguments.
pub fn task_digest(name: &str, args: &[Arg], kwargs: &IndexMap<String, Arg>) -> Digest {
    let mut hasher = TaskHasher::new();
    hasher.frame(name.as_bytes());
    for (index, arg) in args.iter().enumerate() {
        hasher.tag("pos");
        hasher.frame(&(index as u64).to_le_bytes());
        write_arg(&mut hasher, arg);
    }
    for (key, arg) in kwargs {
        hasher.tag("kw");
        hasher.frame(key.as_bytes());
        write_arg(&mut hasher, arg);
    }
    hasher.finish()
}

/// Computes a tasklet digest from its base digest and unary operation.
pub fn tasklet_digest(base: &Digest, op: &TaskletOp) -> Digest {
    let mut hasher = TaskHasher::new();
    hasher.tag("tasklet");
    hasher.frame(base.as_bytes());
    write_tasklet_op(&mut hasher, op);
    hasher.finish()
}

fn write_tasklet_op(hasher: &mut TaskHasher, op: &TaskletOp) {
    match op {
        TaskletOp::Index(index) => {
            hasher.tag("op-index");
            hasher.frame(&(*index as u64).to_le_bytes());
        }
        TaskletOp::Key(key) => {
            hasher.tag("op-key");
            hasher.frame(key.as_bytes());
        }
    }
}

/// Writes one argument's hash contribution.
///
/// `Arg::Value`, `Arg::List`, and `Arg::Map` share tags with the value
/// kinds they mirror, so a list of plain values hashes the same whether it
/// arrived as a value or as an argument tree.
pub fn write_arg(hasher: &mut TaskHasher, arg: &Arg) {
    match arg {
        Arg::Value(value) => write_value(hasher, value),
        Arg::Task(task) => {
            hasher.tag("task");
            hasher.frame(task.digest().as_bytes());
        }
        Arg::Tasklet(tasklet) => {
            hasher.tag("tasklet");
            hasher.frame(tasklet.digest().as_bytes());
        }
        Arg::List(items) => {
            hasher.tag("list");
            hasher.frame(&(items.len() as u64).to_le_bytes());
            for item in items {
                write_arg(hasher, item);
            }
        }
        Arg::Map(entries) => {
            hasher.tag("map");
            hasher.frame(&(entries.len() as u64).to_le_bytes());
            for (key, item) in entries {
                hasher.frame(key.as_bytes());
                write_arg(hasher, item);
            }
        }
        Arg::Custom(custom) => {
            hasher.tag("custom");
            hasher.frame(custom.digest().as_bytes());
        }
    }
}

/// Writes one value's hash contribution.
pub fn write_value(hasher: &mut TaskHasher, value: &Value) {
    match value {
        Value::Unit => hasher.tag("unit"),
        Value::Bool(v) => {
            hasher.tag("bool");
            hasher.frame(&[*v as u8]);
        }
        Value::Int(v) => {
            hasher.tag("int");
            hasher.frame(&v.to_le_bytes());
        }
        Value::Float(v) => {
            hasher.tag("float");
            hasher.frame(&v.to_bits().to_le_bytes());
        }
        Value::Str(v) => {
            hasher.tag("str");
            hasher.frame(v.as_bytes());
        }
        Value::Bytes(v) => {
            hasher.tag("bytes");
            hasher.frame(v);
        }
        Value::List(items) => {
            hasher.tag("list");
            hasher.frame(&(items.len() as u64).to_le_bytes());
            for item in items {
                write_value(hasher, item);
            }
        }
        Value::Map(entries) => {
            hasher.tag("map");
            hasher.frame(&(entries.len() as u64).to_le_bytes());
            for (key, item) in entries {
                hasher.frame(key.as_bytes());
                write_value(hasher, item);
            }
        }
        Value::Set(members) => {
            // Members are kept in canonical sorted-digest order by
            // Value::set; hash the member digests, not the members, so a
            // non-canonical Set still hashes order-independently.
            let mut digests: Vec<Digest> = members.iter().map(value_digest).collect();
            digests.sort();
            hasher.tag("set");
            hasher.frame(&(digests.len() as u64).to_le_bytes());
            for digest in digests {
                hasher.frame(digest.as_bytes());
            }
        }
        Value::Array(array) => {
            hasher.tag("array");
            hasher.frame(array.dtype().name().as_bytes());
            hasher.frame(&(array.shape().len() as u64).to_le_bytes());
            for dim in array.shape() {
                hasher.frame(&dim.to_le_bytes());
            }
            hasher.frame(array.data());
        }
        Value::Blob(bytes) => {
            hasher.tag("blob");
            hasher.frame(bytes);
        }
    }
}

/// Digest of a dependency node (task or tasklet).
pub fn node_digest(node: &Node) -> Digest {
    match node {
        Node::Task(task) => task.digest(),
        Node::Tasklet(tasklet) => tasklet.digest(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskHandle};
    use crate::value::Value;
    use std::sync::Arc;

    fn noop_task(name: &str, args: Vec<Arg>) -> TaskHandle {
        Arc::new(
            Task::new(name, Arc::new(|_| Ok(Value::Unit)), args).unwrap(),
        )
    }

    #[test]
    fn test_digest_deterministic() {
        let a = noop_task("demo.first", vec![Arg::Value(Value::Int(1))]);
        let b = noop_task("demo.first", vec![Arg::Value(Value::Int(1))]);
        assert_eq!(a.digest(), b.digest(), "equal tasks must share a digest");
    }

    #[test]
    fn test_digest_changes_with_name() {
        let a = noop_task("demo.first", vec![]);
        let b = noop_task("demo.second", vec![]);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_digest_changes_with_args() {
        let a = noop_task("demo.first", vec![Arg::Value(Value::Int(1))]);
        let b = noop_task("demo.first", vec![Arg::Value(Value::Int(2))]);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_positional_index_matters() {
        let a = noop_task(
            "demo.pair",
            vec![Arg::Value(Value::Int(1)), Arg::Value(Value::Int(2))],
        );
        let b = noop_task(
            "demo.pair",
            vec![Arg::Value(Value::Int(2)), Arg::Value(Value::Int(1))],
        );
        assert_ne!(a.digest(), b.digest(), "argument order must matter");
    }

    #[test]
    fn test_dependency_digest_propagates() {
        let dep1 = noop_task("demo.dep", vec![Arg::Value(Value::Int(1))]);
        let dep2 = noop_task("demo.dep", vec![Arg::Value(Value::Int(2))]);
        let a = noop_task("demo.top", vec![Arg::Task(dep1)]);
        let b = noop_task("demo.top", vec![Arg::Task(dep2)]);
        assert_ne!(
            a.digest(),
            b.digest(),
            "changing a dependency must change the dependent digest"
        );
    }

    #[test]
    fn test_int_and_float_do_not_collide() {
        let int = value_digest(&Value::Int(1));
        let float = value_digest(&Value::Float(f64::from_bits(1)));
        assert_ne!(int, float);
    }

    #[test]
    fn test_set_hash_order_independent() {
        let a = value_digest(&Value::Set(vec![Value::Int(1), Value::Int(2)]));
        let b = value_digest(&Value::Set(vec![Value::Int(2), Value::Int(1)]));
        assert_eq!(a, b, "set digests must not depend on member order");
    }

    #[test]
    fn test_arg_list_matches_value_list() {
        let as_value = arg_digest(&Arg::Value(Value::List(vec![
            Value::Int(1),
            Value::Int(2),
        ])));
        let as_args = arg_digest(&Arg::List(vec![
            Arg::Value(Value::Int(1)),
            Arg::Value(Value::Int(2)),
        ]));
        assert_eq!(
            as_value, as_args,
            "a list of plain values must hash the same through either path"
        );
    }
}
