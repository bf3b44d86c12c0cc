//! Non-executing commands over the graph and store: status, check,
//! sleep-until, cleanup, and per-name counts.

use std::collections::{BTreeMap, HashSet};
use std::thread;
use std::time::Duration;

use ewer_core::graph::{recursive_dependencies, topological_sort};
use ewer_core::task::{Node, TaskHandle};
use ewer_core::Digest;
use ewer_storage::Store;

use crate::error::EngineError;
use crate::runner;

/// The state a task classifies into during a scheduler pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Finished,
    Locked,
    Ready,
    Waiting,
}

/// Per-name tallies of task states.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StateCounts {
    pub waiting: usize,
    pub ready: usize,
    pub finished: usize,
    pub locked: usize,
}

/// Classifies one task the way the scheduler would, without executing.
pub fn classify(task: &TaskHandle, store: &dyn Store) -> Result<TaskState, EngineError> {
    if store.can_load(&task.digest())? {
        return Ok(TaskState::Finished);
    }
    if store.getlock(&task.digest()).is_locked()? {
        return Ok(TaskState::Locked);
    }
    if runner::can_run(task, store)? {
        return Ok(TaskState::Ready);
    }
    Ok(TaskState::Waiting)
}

/// The `status` command: classify every task, emit per-name counts.
pub fn status(
    tasks: &[TaskHandle],
    store: &dyn Store,
) -> Result<BTreeMap<String, StateCounts>, EngineError> {
    let mut report: BTreeMap<String, StateCounts> = BTreeMap::new();
    for task in tasks {
        let entry = report.entry(task.display_name().to_string()).or_default();
        match classify(task, store)? {
            TaskState::Finished => entry.finished += 1,
            TaskState::Locked => entry.locked += 1,
            TaskState::Ready => entry.ready += 1,
            TaskState::Waiting => entry.waiting += 1,
        }
    }
    Ok(report)
}

/// The `check` command: true iff every task's result is loadable.
pub fn check(tasks: &[TaskHandle], store: &dyn Store) -> Result<bool, EngineError> {
    check_or_wait(tasks, store, None)
}

/// The `sleep-until` command: block, polling, until every task's result
/// is loadable.
pub fn sleep_until(
    tasks: &[TaskHandle],
    store: &dyn Store,
    poll: Duration,
) -> Result<(), EngineError> {
    check_or_wait(tasks, store, Some(poll)).map(|_| ())
}

/// Shared walk for check/sleep-until. Visits tasks dependents-first so a
/// loadable task prunes its whole dependency cone from the active set --
/// on large finished graphs most tasks are never probed individually.
fn check_or_wait(
    tasks: &[TaskHandle],
    store: &dyn Store,
    poll: Option<Duration>,
) -> Result<bool, EngineError> {
    let ordered = topological_sort(tasks);
    let mut active: HashSet<Digest> = ordered.iter().map(|t| t.digest()).collect();

    for task in ordered.iter().rev() {
        if !active.contains(&task.digest()) {
            continue;
        }
        while !store.can_load(&task.digest())? {
            match poll {
                Some(interval) => thread::sleep(interval),
                None => return Ok(false),
            }
        }
        for dep in recursive_dependencies(&Node::Task(task.clone()), None) {
            active.remove(&dep.base_task().digest());
        }
    }
    Ok(true)
}

/// The `cleanup` command: delete every store entry whose digest is not in
/// the current task set. Returns the number deleted.
pub fn cleanup(tasks: &[TaskHandle], store: &dyn Store) -> Result<usize, EngineError> {
    let active: HashSet<Digest> = tasks.iter().map(|t| t.digest()).collect();
    Ok(store.cleanup(&active)?)
}

/// The `cleanup --locks-only` command: delete every lock entry.
pub fn cleanup_locks(store: &dyn Store) -> Result<usize, EngineError> {
    Ok(store.remove_locks()?)
}

/// The `count` command: per-name task counts for the current graph.
pub fn count(tasks: &[TaskHandle]) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for task in tasks {
        *counts.entry(task.name().to_string()).or_insert(0) += 1;
    }
    counts
}
