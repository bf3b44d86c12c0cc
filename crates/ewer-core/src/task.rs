//! Tasks, tasklets, and the argument trees that connect them.
//!
//! A [`Task`] is a node in the computation DAG: a named function plus its
//! arguments. Arguments may themselves contain tasks (directly or nested
//! inside lists and maps), which is what makes the registry a graph. A
//! [`Tasklet`] is a lightweight projection over a task's value that is
//! never persisted on its own.
//!
//! Tasks are immutable after construction except for two caches: the
//! memoized digest and the in-memory result. Both caches are safe to share
//! across worker threads.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use indexmap::IndexMap;

use crate::digest::Digest;
use crate::error::{GraphError, TaskError};
use crate::hash;
use crate::value::Value;

/// Materialized arguments handed to a task function at run time.
#[derive(Debug, Clone)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: IndexMap<String, Value>,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>, keyword: IndexMap<String, Value>) -> Self {
        CallArgs { positional, keyword }
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self) -> &IndexMap<String, Value> {
        &self.keyword
    }

    /// Positional argument by index.
    pub fn get(&self, index: usize) -> Result<&Value, TaskError> {
        self.positional
            .get(index)
            .ok_or(TaskError::MissingPositional(index))
    }

    /// Keyword argument by name.
    pub fn kw(&self, name: &str) -> Result<&Value, TaskError> {
        self.keyword
            .get(name)
            .ok_or_else(|| TaskError::MissingKeyword(name.to_string()))
    }

    /// Positional argument coerced to an integer.
    pub fn int(&self, index: usize) -> Result<i64, TaskError> {
        let value = self.get(index)?;
        value.as_int().ok_or_else(|| TaskError::WrongKind {
            context: format!("positional {}", index),
            expected: "int",
            actual: value.kind(),
        })
    }

    /// Positional argument coerced to a string slice.
    pub fn str(&self, index: usize) -> Result<&str, TaskError> {
        let value = self.get(index)?;
        value.as_str().ok_or_else(|| TaskError::WrongKind {
            context: format!("positional {}", index),
            expected: "str",
            actual: value.kind(),
        })
    }
}

/// The function a task runs. Receives materialized arguments, returns the
/// task's result value.
pub type TaskFn = Arc<dyn Fn(CallArgs) -> Result<Value, TaskError> + Send + Sync>;

/// A user-supplied custom-hash capability.
///
/// The digest it returns stands in for the wrapped value in every task
/// digest that contains it; `resolve` produces the value handed to the
/// task function. A strong digest is the implementor's responsibility:
/// equal digests are taken to imply equal values.
pub trait CustomDigest: Send + Sync {
    fn digest(&self) -> Digest;
    fn resolve(&self) -> Value;
}

/// One argument slot of a task: a plain value, a dependency, or a nested
/// container that may hold dependencies.
#[derive(Clone)]
pub enum Arg {
    Value(Value),
    Task(TaskHandle),
    Tasklet(Arc<Tasklet>),
    List(Vec<Arg>),
    Map(IndexMap<String, Arg>),
    Custom(Arc<dyn CustomDigest>),
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(v) => write!(f, "Arg::Value({:?})", v),
            Arg::Task(t) => write!(f, "Arg::Task({})", t.name()),
            Arg::Tasklet(_) => write!(f, "Arg::Tasklet"),
            Arg::List(items) => write!(f, "Arg::List({} items)", items.len()),
            Arg::Map(entries) => write!(f, "Arg::Map({} entries)", entries.len()),
            Arg::Custom(_) => write!(f, "Arg::Custom"),
        }
    }
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Arg::Value(v)
    }
}

impl From<TaskHandle> for Arg {
    fn from(t: TaskHandle) -> Self {
        Arg::Task(t)
    }
}

impl From<&TaskHandle> for Arg {
    fn from(t: &TaskHandle) -> Self {
        Arg::Task(Arc::clone(t))
    }
}

impl From<Arc<Tasklet>> for Arg {
    fn from(t: Arc<Tasklet>) -> Self {
        Arg::Tasklet(t)
    }
}

/// A shared reference to a task. Tasks are always handled through this.
pub type TaskHandle = Arc<Task>;

/// A dependency node: either a task or a tasklet projection of one.
#[derive(Clone)]
pub enum Node {
    Task(TaskHandle),
    Tasklet(Arc<Tasklet>),
}

impl Node {
    /// Digest of this node.
    pub fn digest(&self) -> Digest {
        hash::node_digest(self)
    }

    /// First-level dependencies of this node.
    pub fn dependencies(&self) -> Vec<Node> {
        match self {
            Node::Task(task) => task.dependencies(),
            Node::Tasklet(tasklet) => vec![tasklet.base().clone()],
        }
    }

    /// The persistable task at the bottom of this node. For a task, the
    /// task itself; for a tasklet, its base task through any chain.
    pub fn base_task(&self) -> TaskHandle {
        match self {
            Node::Task(task) => Arc::clone(task),
            Node::Tasklet(tasklet) => tasklet.base_task(),
        }
    }

    /// Derives an index-subscription tasklet over this node.
    pub fn index(&self, index: usize) -> Arc<Tasklet> {
        Arc::new(Tasklet::new(self.clone(), TaskletOp::Index(index)))
    }

    /// Derives a key-subscription tasklet over this node.
    pub fn key(&self, key: impl Into<String>) -> Arc<Tasklet> {
        Arc::new(Tasklet::new(self.clone(), TaskletOp::Key(key.into())))
    }

    /// Derives the tasklet sequence `node[0], node[1], ..., node[n-1]`, for
    /// fanning a known-length sequence result out to dependents. Nothing
    /// checks that `n` matches the actual result length.
    pub fn iterate(&self, n: usize) -> Vec<Arc<Tasklet>> {
        (0..n).map(|i| self.index(i)).collect()
    }
}

impl From<TaskHandle> for Node {
    fn from(t: TaskHandle) -> Self {
        Node::Task(t)
    }
}

impl From<&TaskHandle> for Node {
    fn from(t: &TaskHandle) -> Self {
        Node::Task(Arc::clone(t))
    }
}

impl From<Arc<Tasklet>> for Node {
    fn from(t: Arc<Tasklet>) -> Self {
        Node::Tasklet(t)
    }
}

/// A node representing one memoized function invocation.
pub struct Task {
    name: String,
    display_name: String,
    func: TaskFn,
    args: Vec<Arg>,
    kwargs: IndexMap<String, Arg>,
    digest: OnceLock<Digest>,
    result: Mutex<Option<Value>>,
}

impl Task {
    /// Creates a task from a module-qualified function name, the function
    /// itself, and positional arguments.
    ///
    /// The name must carry a module qualifier (`demo.primes` or
    /// `demo::primes`); anonymous callables are rejected because they have
    /// no stable name to hash.
    pub fn new(name: impl Into<String>, func: TaskFn, args: Vec<Arg>) -> Result<Task, GraphError> {
        Task::with_kwargs(name, func, args, IndexMap::new())
    }

    /// Creates a task with positional and keyword arguments.
    pub fn with_kwargs(
        name: impl Into<String>,
        func: TaskFn,
        args: Vec<Arg>,
        kwargs: IndexMap<String, Arg>,
    ) -> Result<Task, GraphError> {
        let name = name.into();
        if name.is_empty() {
            return Err(GraphError::EmptyName);
        }
        if name.contains("{{closure}}") || name.contains("<lambda>") {
            return Err(GraphError::AnonymousFunction(name));
        }
        if !name.contains('.') && !name.contains("::") {
            return Err(GraphError::UnqualifiedName(name));
        }
        Ok(Task {
            display_name: name.clone(),
            name,
            func,
            args,
            kwargs,
            digest: OnceLock::new(),
            result: Mutex::new(None),
        })
    }

    /// Overrides the name used for reporting. Never affects the digest.
    pub fn display_as(mut self, display_name: impl Into<String>) -> Task {
        self.display_name = display_name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    pub fn kwargs(&self) -> &IndexMap<String, Arg> {
        &self.kwargs
    }

    /// The task's content digest, computed on first demand and memoized.
    pub fn digest(&self) -> Digest {
        *self
            .digest
            .get_or_init(|| hash::task_digest(&self.name, &self.args, &self.kwargs))
    }

    /// Recomputes the digest from scratch, bypassing the memo. Debug mode
    /// compares this against the memoized digest around each run to catch
    /// argument mutation.
    pub fn recompute_digest(&self) -> Digest {
        hash::task_digest(&self.name, &self.args, &self.kwargs)
    }

    /// First-level dependencies: every task or tasklet reachable through
    /// the argument trees without crossing another task.
    pub fn dependencies(&self) -> Vec<Node> {
        let mut deps = Vec::new();
        let mut queue: Vec<&Arg> = self.args.iter().collect();
        queue.extend(self.kwargs.values());
        while let Some(arg) = queue.pop() {
            match arg {
                Arg::Task(task) => deps.push(Node::Task(Arc::clone(task))),
                Arg::Tasklet(tasklet) => deps.push(Node::Tasklet(Arc::clone(tasklet))),
                Arg::List(items) => queue.extend(items.iter()),
                Arg::Map(entries) => queue.extend(entries.values()),
                Arg::Value(_) | Arg::Custom(_) => {}
            }
        }
        deps
    }

    /// Invokes the task function with materialized arguments.
    pub fn call(&self, args: CallArgs) -> Result<Value, TaskError> {
        (self.func)(args)
    }

    /// Whether a result is cached in memory.
    pub fn is_loaded(&self) -> bool {
        self.result.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Clones the cached in-memory result, if any.
    pub fn cached(&self) -> Option<Value> {
        self.result.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Caches a result in memory.
    pub fn store_result(&self, value: Value) {
        *self.result.lock().unwrap_or_else(|e| e.into_inner()) = Some(value);
    }

    /// Evicts the in-memory result.
    pub fn unload(&self) {
        *self.result.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Evicts the in-memory results of this task and its whole dependency
    /// cone. Used by aggressive-unload mode to trade I/O for peak memory.
    pub fn unload_recursive(self: &Arc<Self>) {
        fn walk(node: &Node, visited: &mut std::collections::HashSet<usize>) {
            let key = match node {
                Node::Task(task) => Arc::as_ptr(task) as usize,
                Node::Tasklet(tasklet) => Arc::as_ptr(tasklet) as usize,
            };
            if !visited.insert(key) {
                return;
            }
            if let Node::Task(task) = node {
                task.unload();
            }
            for dep in node.dependencies() {
                walk(&dep, visited);
            }
        }
        let mut visited = std::collections::HashSet::new();
        walk(&Node::Task(Arc::clone(self)), &mut visited);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task({}, {} args, {} kwargs)",
            self.name,
            self.args.len(),
            self.kwargs.len()
        )
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task: {}()", self.name)
    }
}

/// The pure unary operation a tasklet applies to its base's value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskletOp {
    /// Subscription by sequence index.
    Index(usize),
    /// Subscription by map key.
    Key(String),
}

impl TaskletOp {
    /// Applies the operation to a materialized value.
    pub fn apply(&self, value: Value) -> Result<Value, TaskError> {
        match self {
            TaskletOp::Index(index) => match value {
                Value::List(mut items) => {
                    if *index >= items.len() {
                        return Err(TaskError::IndexOutOfRange {
                            index: *index,
                            len: items.len(),
                        });
                    }
                    Ok(items.swap_remove(*index))
                }
                other => Err(TaskError::NotSubscriptable(other.kind())),
            },
            TaskletOp::Key(key) => match value {
                Value::Map(mut entries) => entries
                    .swap_remove(key)
                    .ok_or_else(|| TaskError::KeyNotFound { key: key.clone() }),
                other => Err(TaskError::NotSubscriptable(other.kind())),
            },
        }
    }
}

/// A lightweight projection `op(value(base))`.
///
/// Looks like a task and hashes like one, but its result is never stored:
/// it is recomputed from the base each time its value is demanded.
pub struct Tasklet {
    base: Node,
    op: TaskletOp,
}

impl Tasklet {
    pub fn new(base: Node, op: TaskletOp) -> Tasklet {
        Tasklet { base, op }
    }

    pub fn base(&self) -> &Node {
        &self.base
    }

    pub fn op(&self) -> &TaskletOp {
        &self.op
    }

    /// Digest: tag + base digest + operation digest.
    pub fn digest(&self) -> Digest {
        hash::tasklet_digest(&self.base.digest(), &self.op)
    }

    /// The persistable task under this tasklet, through any chain of
    /// projections.
    pub fn base_task(&self) -> TaskHandle {
        self.base.base_task()
    }
}

/// The ordered sequence of every task constructed so far.
///
/// Order is construction order and is preserved for reproducibility; the
/// scheduler processes ready tasks in this order. The registry is an
/// explicitly owned context threaded through task construction: reloading
/// a script clears it and builds it anew.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Vec<TaskHandle>,
}

impl TaskRegistry {
    pub fn new() -> TaskRegistry {
        TaskRegistry { tasks: Vec::new() }
    }

    /// Appends a task and returns the shared handle to it.
    pub fn submit(&mut self, task: Task) -> TaskHandle {
        let handle = Arc::new(task);
        self.tasks.push(Arc::clone(&handle));
        handle
    }

    /// Appends an already shared task handle.
    pub fn submit_handle(&mut self, handle: TaskHandle) {
        self.tasks.push(handle);
    }

    pub fn tasks(&self) -> &[TaskHandle] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drops every registered task. Called when the scheduler reloads the
    /// user script for a new pass.
    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_fn() -> TaskFn {
        Arc::new(|_| Ok(Value::Unit))
    }

    #[test]
    fn test_rejects_anonymous_names() {
        let err = Task::new("demo::run::{{closure}}", unit_fn(), vec![]);
        assert!(matches!(err, Err(GraphError::AnonymousFunction(_))));
    }

    #[test]
    fn test_rejects_unqualified_names() {
        let err = Task::new("run", unit_fn(), vec![]);
        assert!(matches!(err, Err(GraphError::UnqualifiedName(_))));
        assert!(matches!(
            Task::new("", unit_fn(), vec![]),
            Err(GraphError::EmptyName)
        ));
    }

    #[test]
    fn test_display_name_does_not_affect_digest() {
        let plain = Task::new("demo.work", unit_fn(), vec![]).unwrap();
        let renamed = Task::new("demo.work", unit_fn(), vec![])
            .unwrap()
            .display_as("pretty");
        assert_eq!(plain.digest(), renamed.digest());
        assert_eq!(renamed.display_name(), "pretty");
    }

    #[test]
    fn test_dependencies_finds_nested_tasks() {
        let mut registry = TaskRegistry::new();
        let a = registry.submit(Task::new("demo.a", unit_fn(), vec![]).unwrap());
        let b = registry.submit(Task::new("demo.b", unit_fn(), vec![]).unwrap());
        let c = registry.submit(
            Task::with_kwargs(
                "demo.c",
                unit_fn(),
                vec![Arg::List(vec![Arg::Task(Arc::clone(&a)), Arg::Value(Value::Int(3))])],
                [("extra".to_string(), Arg::Task(Arc::clone(&b)))]
                    .into_iter()
                    .collect(),
            )
            .unwrap(),
        );

        let deps = c.dependencies();
        let mut names: Vec<&str> = deps
            .iter()
            .map(|d| match d {
                Node::Task(t) => t.name(),
                Node::Tasklet(_) => "tasklet",
            })
            .collect();
        names.sort();
        assert_eq!(names, vec!["demo.a", "demo.b"]);
    }

    #[test]
    fn test_dependencies_is_first_level_only() {
        let mut registry = TaskRegistry::new();
        let a = registry.submit(Task::new("demo.a", unit_fn(), vec![]).unwrap());
        let b = registry.submit(Task::new("demo.b", unit_fn(), vec![Arg::Task(a)]).unwrap());
        let c = registry.submit(Task::new("demo.c", unit_fn(), vec![Arg::Task(b)]).unwrap());

        let deps = c.dependencies();
        assert_eq!(deps.len(), 1, "must not recurse into dependency dependencies");
    }

    #[test]
    fn test_tasklet_subscription() {
        let op = TaskletOp::Index(1);
        let out = op
            .apply(Value::List(vec![Value::Int(10), Value::Int(20)]))
            .unwrap();
        assert_eq!(out, Value::Int(20));

        let missing = TaskletOp::Index(5).apply(Value::List(vec![Value::Int(1)]));
        assert!(matches!(missing, Err(TaskError::IndexOutOfRange { .. })));

        let not_seq = TaskletOp::Index(0).apply(Value::Int(7));
        assert!(matches!(not_seq, Err(TaskError::NotSubscriptable("int"))));
    }

    #[test]
    fn test_iterate_produces_distinct_projections() {
        let mut registry = TaskRegistry::new();
        let base = registry.submit(Task::new("demo.seq", unit_fn(), vec![]).unwrap());
        let node = Node::Task(base);
        let items = node.iterate(3);
        assert_eq!(items.len(), 3);
        assert_ne!(items[0].digest(), items[1].digest());
        assert_eq!(items[2].digest(), node.index(2).digest());
    }

    #[test]
    fn test_tasklet_digest_depends_on_op() {
        let mut registry = TaskRegistry::new();
        let base = registry.submit(Task::new("demo.base", unit_fn(), vec![]).unwrap());
        let node = Node::Task(base);
        let first = node.index(0);
        let second = node.index(1);
        assert_ne!(first.digest(), second.digest());
        assert_ne!(first.digest(), node.digest());
    }

    #[test]
    fn test_registry_preserves_construction_order() {
        let mut registry = TaskRegistry::new();
        for i in 0..4 {
            registry.submit(
                Task::new("demo.step", unit_fn(), vec![Arg::Value(Value::Int(i))]).unwrap(),
            );
        }
        let digests: Vec<_> = registry.tasks().iter().map(|t| t.digest()).collect();
        assert_eq!(registry.len(), 4);
        // Re-submitting the same graph yields the same order and digests.
        let mut again = TaskRegistry::new();
        for i in 0..4 {
            again.submit(
                Task::new("demo.step", unit_fn(), vec![Arg::Value(Value::Int(i))]).unwrap(),
            );
        }
        let digests_again: Vec<_> = again.tasks().iter().map(|t| t.digest()).collect();
        assert_eq!(digests, digests_again);

        again.clear();
        assert!(again.is_empty());
    }

    #[test]
    fn test_unload_recursive_evicts_cone() {
        let mut registry = TaskRegistry::new();
        let a = registry.submit(Task::new("demo.a", unit_fn(), vec![]).unwrap());
        let b = registry.submit(Task::new("demo.b", unit_fn(), vec![Arg::Task(Arc::clone(&a))]).unwrap());
        a.store_result(Value::Int(1));
        b.store_result(Value::Int(2));
        assert!(a.is_loaded() && b.is_loaded());

        b.unload_recursive();
        assert!(!a.is_loaded(), "dependency cache must be evicted");
        assert!(!b.is_loaded(), "own cache must be evicted");
    }
}
