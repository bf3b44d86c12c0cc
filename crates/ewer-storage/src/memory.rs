//! In-memory implementation of [`Store`].
//!
//! First-class backend for tests and single-process runs: results and
//! locks live in concurrent maps with the same semantics as the on-disk
//! backend, including codec roundtrips (a value that cannot encode fails
//! here too). Cloning the store shares the underlying maps, so worker
//! threads in one process coordinate correctly. Not safe across
//! processes.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use ewer_core::{Digest, Value};

use crate::codec;
use crate::error::StoreError;
use crate::identity::WorkerIdentity;
use crate::traits::{Store, StoreLock};

#[derive(Default)]
struct Maps {
    results: DashMap<Digest, Vec<u8>>,
    locks: DashMap<Digest, WorkerIdentity>,
}

/// Store backed by process-local maps.
#[derive(Clone, Default)]
pub struct MemoryStore {
    maps: Arc<Maps>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl Store for MemoryStore {
    fn dump(&self, digest: &Digest, value: &Value) -> Result<(), StoreError> {
        let bytes = codec::encode(value)?;
        self.maps.results.insert(*digest, bytes);
        Ok(())
    }

    fn load(&self, digest: &Digest) -> Result<Value, StoreError> {
        let bytes = self
            .maps
            .results
            .get(digest)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::Missing(*digest))?;
        codec::decode(&bytes).map_err(|source| StoreError::Corrupt {
            digest: *digest,
            source,
        })
    }

    fn can_load(&self, digest: &Digest) -> Result<bool, StoreError> {
        Ok(self.maps.results.contains_key(digest))
    }

    fn remove(&self, digest: &Digest) -> Result<bool, StoreError> {
        Ok(self.maps.results.remove(digest).is_some())
    }

    fn list(&self) -> Result<Vec<Digest>, StoreError> {
        Ok(self.maps.results.iter().map(|entry| *entry.key()).collect())
    }

    fn getlock(&self, digest: &Digest) -> Box<dyn StoreLock> {
        Box::new(MemoryLock {
            maps: Arc::clone(&self.maps),
            digest: *digest,
        })
    }

    fn cleanup(&self, active: &HashSet<Digest>) -> Result<usize, StoreError> {
        let stale: Vec<Digest> = self
            .maps
            .results
            .iter()
            .map(|entry| *entry.key())
            .filter(|digest| !active.contains(digest))
            .collect();
        let mut removed = 0;
        for digest in stale {
            if self.maps.results.remove(&digest).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn remove_locks(&self) -> Result<usize, StoreError> {
        let count = self.maps.locks.len();
        self.maps.locks.clear();
        Ok(count)
    }

    fn listlocks(&self) -> Result<Vec<Digest>, StoreError> {
        Ok(self.maps.locks.iter().map(|entry| *entry.key()).collect())
    }
}

struct MemoryLock {
    maps: Arc<Maps>,
    digest: Digest,
}

impl StoreLock for MemoryLock {
    fn acquire(&self) -> Result<bool, StoreError> {
        // The map entry API is the compare-and-set: insertion happens
        // only while holding the shard lock for this key.
        match self.maps.locks.entry(self.digest) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(WorkerIdentity::current());
                Ok(true)
            }
        }
    }

    fn release(&self) -> Result<(), StoreError> {
        self.maps.locks.remove(&self.digest);
        Ok(())
    }

    fn is_locked(&self) -> Result<bool, StoreError> {
        Ok(self.maps.locks.contains_key(&self.digest))
    }
}
