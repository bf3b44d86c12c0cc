//! Script loading and the barrier protocol.
//!
//! A script is the user code that builds the task graph. It receives a
//! [`ScriptCtx`] (the owned registry context plus store access) and
//! registers tasks by side effect, in construction order.
//!
//! When the script needs an actual computed value to continue building
//! the graph (not just a handle), it calls [`ScriptCtx::barrier_value`].
//! If the value is not available yet, that fails with [`BarrierError`];
//! the loader is the single place that catches it, recording that the
//! graph is incomplete so the scheduler re-loads the script after the
//! next execute pass.

use tracing::debug;

use ewer_core::task::{Node, Task, TaskHandle, TaskRegistry};
use ewer_core::Value;
use ewer_storage::Store;

use crate::error::{BarrierError, EngineError, ScriptError};
use crate::runner::{self, RunOptions};

/// The context a script builds its graph in: the task registry plus the
/// store the workers share.
pub struct ScriptCtx<'a> {
    registry: &'a mut TaskRegistry,
    store: &'a dyn Store,
}

impl<'a> ScriptCtx<'a> {
    pub fn new(registry: &'a mut TaskRegistry, store: &'a dyn Store) -> ScriptCtx<'a> {
        ScriptCtx { registry, store }
    }

    /// Registers a task and returns its shared handle.
    pub fn submit(&mut self, task: Task) -> TaskHandle {
        self.registry.submit(task)
    }

    pub fn store(&self) -> &dyn Store {
        self.store
    }

    pub fn tasks(&self) -> &[TaskHandle] {
        self.registry.tasks()
    }

    /// Returns the node's computed value, or fails with a barrier if it
    /// has not been produced yet.
    ///
    /// This is the primitive behind phased graph construction: everything
    /// before the first unavailable value is registered normally, and the
    /// scheduler re-enters the script once more results exist.
    pub fn barrier_value(&self, node: &Node) -> Result<Value, ScriptError> {
        let base = node.base_task();
        let digest = base.digest();
        if !base.is_loaded() && !self.store.can_load(&digest)? {
            return Err(ScriptError::Barrier(BarrierError { digest }));
        }
        Ok(runner::node_value(node, self.store)?)
    }

    /// Registers a task and immediately returns its value, running it
    /// here if no result exists yet. The eager counterpart of
    /// [`ScriptCtx::barrier_value`] for cheap graph-shaping computations.
    pub fn cached_query(&mut self, task: Task) -> Result<Value, ScriptError> {
        let handle = self.submit(task);
        if !self.store.can_load(&handle.digest())? {
            runner::run_task(&handle, self.store, &RunOptions::save())?;
        }
        Ok(runner::task_value(&handle, self.store)?)
    }
}

/// The user script: builds the graph into the context, in order.
pub type ScriptFn = dyn Fn(&mut ScriptCtx<'_>) -> Result<(), ScriptError> + Sync;

/// Loads (or reloads) the script into the registry.
///
/// Clears the registry first: reloading is how barrier phases see a
/// larger graph. Returns whether the script stopped at a barrier. Graph
/// construction errors and other script failures are fatal.
pub fn load_script(
    script: &ScriptFn,
    registry: &mut TaskRegistry,
    store: &dyn Store,
) -> Result<bool, EngineError> {
    registry.clear();
    let mut ctx = ScriptCtx::new(registry, store);
    match script(&mut ctx) {
        Ok(()) => Ok(false),
        Err(ScriptError::Barrier(barrier)) => {
            debug!(digest = %barrier.digest, "script stopped at barrier");
            Ok(true)
        }
        Err(ScriptError::Graph(e)) => Err(EngineError::Graph(e)),
        Err(ScriptError::Engine(e)) => Err(e),
        Err(ScriptError::Failed(message)) => Err(EngineError::ScriptFailed(message)),
    }
}
