//! Task execution: argument materialization, runnability, and the run
//! itself.
//!
//! [`resolve`] is the universal resolution helper: tasks and tasklets
//! become their materialized values (loading from the store when the
//! in-memory cache is cold), containers recurse, plain values pass
//! through. Execution uses it to build the argument vector at run time,
//! which is the moment dependency results actually move.

use indexmap::IndexMap;

use ewer_core::task::{Arg, CallArgs, Node, Task, TaskHandle};
use ewer_core::Value;
use ewer_storage::Store;

use crate::error::EngineError;

/// Options controlling a single task run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Recompute and check the task digest before and after the run.
    pub debug: bool,
    /// Persist the result to the store (on by default through
    /// [`RunOptions::save`]).
    pub save: bool,
}

impl RunOptions {
    pub fn save() -> RunOptions {
        RunOptions {
            debug: false,
            save: true,
        }
    }
}

/// Materializes one argument tree into a value.
pub fn resolve(arg: &Arg, store: &dyn Store) -> Result<Value, EngineError> {
    match arg {
        Arg::Value(value) => Ok(value.clone()),
        Arg::Task(task) => task_value(task, store),
        Arg::Tasklet(tasklet) => node_value(&Node::Tasklet(tasklet.clone()), store),
        Arg::List(items) => items
            .iter()
            .map(|item| resolve(item, store))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Arg::Map(entries) => entries
            .iter()
            .map(|(key, item)| Ok((key.clone(), resolve(item, store)?)))
            .collect::<Result<IndexMap<_, _>, EngineError>>()
            .map(Value::Map),
        Arg::Custom(custom) => Ok(custom.resolve()),
    }
}

/// Materializes a dependency node's value.
pub fn node_value(node: &Node, store: &dyn Store) -> Result<Value, EngineError> {
    match node {
        Node::Task(task) => task_value(task, store),
        Node::Tasklet(tasklet) => {
            let base = node_value(tasklet.base(), store)?;
            tasklet.op().apply(base).map_err(|source| EngineError::TaskFailed {
                name: tasklet.base_task().name().to_string(),
                source,
            })
        }
    }
}

/// A task's materialized value: the in-memory cache if warm, otherwise a
/// store load (which then warms the cache).
pub fn task_value(task: &TaskHandle, store: &dyn Store) -> Result<Value, EngineError> {
    if let Some(value) = task.cached() {
        return Ok(value);
    }
    let value = store.load(&task.digest())?;
    task.store_result(value.clone());
    Ok(value)
}

/// Whether the task's result entry exists in the store.
pub fn can_load(task: &Task, store: &dyn Store) -> Result<bool, EngineError> {
    Ok(store.can_load(&task.digest())?)
}

/// Whether every dependency is resolved in memory or loadable from the
/// store: the definition of a ready task.
pub fn can_run(task: &Task, store: &dyn Store) -> Result<bool, EngineError> {
    for dep in task.dependencies() {
        let base = dep.base_task();
        if !base.is_loaded() && !store.can_load(&base.digest())? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Runs the task: materializes arguments, invokes the function, persists
/// and caches the result.
///
/// In debug mode the task digest is recomputed immediately before and
/// after the run; a change is fatal and indicates argument mutation.
pub fn run_task(
    task: &TaskHandle,
    store: &dyn Store,
    options: &RunOptions,
) -> Result<Value, EngineError> {
    if !can_run(task, store)? {
        return Err(EngineError::NotReady(task.name().to_string()));
    }
    if options.debug {
        check_digest(task)?;
    }

    let positional = task
        .args()
        .iter()
        .map(|arg| resolve(arg, store))
        .collect::<Result<Vec<_>, _>>()?;
    let keyword = task
        .kwargs()
        .iter()
        .map(|(key, arg)| Ok((key.clone(), resolve(arg, store)?)))
        .collect::<Result<IndexMap<_, _>, EngineError>>()?;

    let result = task
        .call(CallArgs::new(positional, keyword))
        .map_err(|source| EngineError::TaskFailed {
            name: task.name().to_string(),
            source,
        })?;

    if options.save {
        store.dump(&task.digest(), &result)?;
    }
    task.store_result(result.clone());

    if options.debug {
        check_digest(task)?;
    }
    Ok(result)
}

fn check_digest(task: &Task) -> Result<(), EngineError> {
    if task.digest() != task.recompute_digest() {
        return Err(EngineError::HashMismatch {
            name: task.name().to_string(),
        });
    }
    Ok(())
}
