//! The [`Store`] trait defining the persistence contract every backend
//! implements, and the [`StoreLock`] mutual-exclusion handle.
//!
//! The store holds two independent per-digest mappings: result entries
//! (`digest -> bytes`) and lock entries (`digest -> holder identity`).
//! A lock may exist without a result (the task is running) and a result
//! without a lock (the task is finished). Workers coordinate exclusively
//! through this contract: there is no master process.

use std::collections::HashSet;

use ewer_core::{Digest, Value};

use crate::error::StoreError;

/// The persistence contract for result and lock entries.
///
/// Implementations must be shareable across worker threads (`&self`
/// methods, `Send + Sync`); cross-process safety is a per-backend
/// property (the in-memory backend has none).
pub trait Store: Send + Sync {
    /// Encodes `value` and persists it under `digest`.
    ///
    /// Must be atomic against readers: a concurrent [`Store::can_load`]
    /// sees either nothing or the complete entry, never partial bytes.
    fn dump(&self, digest: &Digest, value: &Value) -> Result<(), StoreError>;

    /// Reads and decodes the entry under `digest`.
    ///
    /// Fails with [`StoreError::Missing`] if no entry exists, and
    /// [`StoreError::Corrupt`] if the entry's bytes do not decode.
    fn load(&self, digest: &Digest) -> Result<Value, StoreError>;

    /// Non-blocking existence check. May be racy against concurrent
    /// deletes; callers tolerate this.
    fn can_load(&self, digest: &Digest) -> Result<bool, StoreError>;

    /// Deletes the entry if present; returns whether anything was deleted.
    fn remove(&self, digest: &Digest) -> Result<bool, StoreError>;

    /// Enumerates every present result entry.
    fn list(&self) -> Result<Vec<Digest>, StoreError>;

    /// Returns a lock handle for `digest`. Does not acquire.
    fn getlock(&self, digest: &Digest) -> Box<dyn StoreLock>;

    /// Deletes every result entry whose digest is not in `active`.
    /// Returns the number of entries deleted.
    fn cleanup(&self, active: &HashSet<Digest>) -> Result<usize, StoreError>;

    /// Deletes every lock entry; used to recover from crashed workers.
    /// Returns the number of locks deleted.
    fn remove_locks(&self) -> Result<usize, StoreError>;

    /// Enumerates every held lock.
    fn listlocks(&self) -> Result<Vec<Digest>, StoreError>;

    /// Releases any connections. Default: nothing to release.
    fn close(&self) {}
}

/// A per-digest mutual-exclusion entry in the store.
///
/// Locks are advisory: [`StoreLock::release`] does not verify that the
/// caller is the acquirer. The engine never releases a lock it did not
/// attempt to acquire in the current pass; operators break stuck locks
/// with `cleanup --locks-only`.
pub trait StoreLock: Send {
    /// Atomically creates the lock entry iff it does not exist. Returns
    /// whether this caller now owns it. Never waits.
    fn acquire(&self) -> Result<bool, StoreError>;

    /// Deletes the lock entry.
    fn release(&self) -> Result<(), StoreError>;

    /// Advisory existence check. Only `acquire` answers atomically.
    fn is_locked(&self) -> Result<bool, StoreError>;
}
