//! The cooperative multi-pass scheduler.
//!
//! One worker runs one [`Executor`]. There is no job queue and no master:
//! the store is the queue. Each pass classifies the frontier into
//! finished / ready / locked / waiting, attempts the ready tasks in
//! registry order under the store's per-digest lock, and carries the
//! waiting and locked sets into the next pass. When a pass executes nothing
//! while work remains, the worker is stalled on peers and sleeps for the
//! configured interval, giving up after the configured number of wait
//! cycles.
//!
//! [`execute`] wraps the loop in the barrier reload protocol: scripts
//! that stop at a barrier get re-loaded after each pass, so the graph
//! grows in phases until a load completes without a barrier.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use ewer_core::task::{TaskHandle, TaskRegistry};
use ewer_storage::Store;

use crate::error::EngineError;
use crate::runner::{self, RunOptions};
use crate::script::{load_script, ScriptFn};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Seconds slept when a pass stalls.
    pub wait_cycle_seconds: u64,
    /// Stalled passes tolerated before giving up.
    pub wait_cycles: u32,
    /// Evict the dependency cone's in-memory caches after each run.
    pub aggressive_unload: bool,
    /// Recheck task digests around every run.
    pub debug: bool,
    /// Log task failures and keep scheduling instead of terminating.
    pub keep_going: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        ExecuteOptions {
            wait_cycle_seconds: 12,
            wait_cycles: 30,
            aggressive_unload: false,
            debug: false,
            keep_going: false,
        }
    }
}

/// Outcome of one attempt at a ready task.
enum Attempt {
    /// This worker ran it.
    Executed,
    /// A peer produced the result between classification and here.
    Finished,
    /// A peer holds the lock.
    Locked,
    /// The task failed and keep-going dropped it for this pass.
    Skipped,
}

/// A single worker's scheduler.
pub struct Executor<'a> {
    store: &'a dyn Store,
    options: ExecuteOptions,
    shutdown: Arc<AtomicBool>,
}

impl<'a> Executor<'a> {
    pub fn new(store: &'a dyn Store, options: ExecuteOptions) -> Executor<'a> {
        Executor {
            store,
            options,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builds an executor sharing an externally owned shutdown flag
    /// (typically set from a termination-signal handler). When the flag
    /// rises the executor finishes the task in flight, releases its lock,
    /// and returns.
    pub fn with_shutdown(
        store: &'a dyn Store,
        options: ExecuteOptions,
        shutdown: Arc<AtomicBool>,
    ) -> Executor<'a> {
        Executor {
            store,
            options,
            shutdown,
        }
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Store probe downgraded to "not loadable" on backend faults; the
    /// next pass retries.
    fn loadable(&self, task: &TaskHandle) -> bool {
        match self.store.can_load(&task.digest()) {
            Ok(present) => present,
            Err(e) => {
                warn!(task = task.name(), error = %e, "store fault while probing result; treating as absent");
                false
            }
        }
    }

    fn runnable(&self, task: &TaskHandle) -> bool {
        match runner::can_run(task, self.store) {
            Ok(ready) => ready,
            Err(e) => {
                warn!(task = task.name(), error = %e, "store fault while probing dependencies; treating as waiting");
                false
            }
        }
    }

    /// Runs the scheduling loop over a snapshot of the registry until the
    /// frontier empties or the wait cycles are exhausted. Returns the
    /// tasks executed by this worker.
    pub fn execute_loop(
        &self,
        tasks: &[TaskHandle],
        wait_cycles: u32,
    ) -> Result<Vec<TaskHandle>, EngineError> {
        info!(tasks = tasks.len(), "beginning execution");

        let mut wait_cycles = wait_cycles;
        let mut current: Vec<TaskHandle> = tasks.to_vec();
        let mut finished: Vec<TaskHandle> = Vec::new();
        let mut total_executed: Vec<TaskHandle> = Vec::new();

        while !current.is_empty() && !self.stopping() {
            let mut waiting = Vec::new();
            let mut ready = Vec::new();
            let mut locked = Vec::new();
            let mut executed = Vec::new();

            for task in current {
                if self.loadable(&task) {
                    finished.push(task);
                } else if self.runnable(&task) {
                    ready.push(task);
                } else {
                    waiting.push(task);
                }
            }
            info!(
                waiting = waiting.len(),
                ready = ready.len(),
                finished = finished.len(),
                "pre-execute task status"
            );

            for task in ready {
                if self.stopping() {
                    waiting.push(task);
                    continue;
                }
                match self.attempt(&task)? {
                    Attempt::Executed => executed.push(task),
                    Attempt::Finished => finished.push(task),
                    Attempt::Locked => locked.push(task),
                    Attempt::Skipped => {}
                }
            }

            total_executed.extend(executed.iter().cloned());
            current = waiting;
            current.extend(locked);

            if !current.is_empty() && executed.is_empty() && !self.stopping() {
                if wait_cycles == 0 {
                    info!("finished wait cycles without open task");
                    return Ok(total_executed);
                }
                wait_cycles -= 1;
                info!(
                    seconds = self.options.wait_cycle_seconds,
                    "waiting for an open task"
                );
                thread::sleep(Duration::from_secs(self.options.wait_cycle_seconds));
            }
        }

        info!("no tasks available to run");
        Ok(total_executed)
    }

    /// One attempt at a ready task: re-check, claim the lock, re-check
    /// under the lock, run. The lock is released on every path out.
    fn attempt(&self, task: &TaskHandle) -> Result<Attempt, EngineError> {
        if self.loadable(task) {
            return Ok(Attempt::Finished);
        }

        let lock = self.store.getlock(&task.digest());
        let acquired = match lock.acquire() {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(task = task.name(), error = %e, "store fault while acquiring lock; treating as held");
                false
            }
        };
        if !acquired {
            return Ok(Attempt::Locked);
        }

        let outcome = if self.loadable(task) {
            // A peer finished it between our check and the claim.
            Ok(Attempt::Finished)
        } else {
            self.execute_task(task)
        };

        if let Err(e) = lock.release() {
            warn!(task = task.name(), error = %e, "failed to release lock");
        }
        outcome
    }

    fn execute_task(&self, task: &TaskHandle) -> Result<Attempt, EngineError> {
        info!(task = task.display_name(), "begin task");
        let run = RunOptions {
            debug: self.options.debug,
            save: true,
        };
        match runner::run_task(task, self.store, &run) {
            Ok(_) => {
                info!(task = task.display_name(), "ended task");
                if self.options.aggressive_unload {
                    task.unload_recursive();
                }
                Ok(Attempt::Executed)
            }
            // Argument mutation corrupts memoization keys; never survive it.
            Err(e @ EngineError::HashMismatch { .. }) => Err(e),
            Err(e) => {
                if self.options.keep_going {
                    error!(task = task.name(), error = %e, "task failed; continuing");
                    Ok(Attempt::Skipped)
                } else {
                    Err(e)
                }
            }
        }
    }
}

/// The `execute` command: the scheduling loop wrapped in the barrier
/// reload protocol.
///
/// Reloads the script into a fresh registry, runs a full execute pass,
/// and, while the script keeps stopping at a barrier, reloads and goes
/// again, sleeping between barren cycles. Without a barrier one pass
/// suffices. Returns per-display-name execution counts for this worker.
pub fn execute(
    script: &ScriptFn,
    store: &dyn Store,
    options: &ExecuteOptions,
    shutdown: Arc<AtomicBool>,
) -> Result<BTreeMap<String, usize>, EngineError> {
    let mut registry = TaskRegistry::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut wait_cycles = options.wait_cycles;

    loop {
        let has_barrier = load_script(script, &mut registry, store)?;
        if options.debug {
            // Force digest computation up front so mutation checks have a
            // pristine baseline.
            for task in registry.tasks() {
                task.digest();
            }
        }

        let executor = Executor::with_shutdown(store, options.clone(), Arc::clone(&shutdown));
        let inner_cycles = if has_barrier { 0 } else { options.wait_cycles };
        let executed = executor.execute_loop(registry.tasks(), inner_cycles)?;
        for task in &executed {
            *counts.entry(task.display_name().to_string()).or_insert(0) += 1;
        }

        if !has_barrier || shutdown.load(Ordering::Relaxed) {
            break;
        }
        if executed.is_empty() {
            if wait_cycles == 0 {
                info!("execute ending, no tasks can be run");
                break;
            }
            wait_cycles -= 1;
            info!(
                seconds = options.wait_cycle_seconds,
                "waiting to recycle barrier"
            );
            thread::sleep(Duration::from_secs(options.wait_cycle_seconds));
        }
    }

    Ok(counts)
}
