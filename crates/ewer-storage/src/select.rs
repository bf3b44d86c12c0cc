//! Store selection from a connection string.
//!
//! - `in-memory`: the process-local [`MemoryStore`]
//! - `kv://host[:port]/prefix`: the key-value service backend
//! - `kv+object://bucket+host[:port]/prefix`: the hybrid backend
//! - anything else: treated as a directory path for [`FileStore`]

use tracing::debug;

use crate::error::StoreError;
use crate::file::FileStore;
use crate::kv::{KvStore, ObjectKvStore};
use crate::memory::MemoryStore;
use crate::traits::Store;

/// Returns a store appropriate for the connection string.
pub fn select(spec: &str) -> Result<Box<dyn Store>, StoreError> {
    debug!(spec, "selecting store backend");
    if spec == "in-memory" {
        return Ok(Box::new(MemoryStore::new()));
    }
    if spec.starts_with("kv+object://") {
        return Ok(Box::new(ObjectKvStore::open(spec)?));
    }
    if spec.starts_with("kv://") {
        return Ok(Box::new(KvStore::open(spec)?));
    }
    Ok(Box::new(FileStore::new(spec)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ewer_core::hash::value_digest;
    use ewer_core::Value;

    #[test]
    fn test_in_memory_selected() {
        let store = select("in-memory").unwrap();
        let digest = value_digest(&Value::Int(1));
        store.dump(&digest, &Value::Int(1)).unwrap();
        assert!(store.can_load(&digest).unwrap());
    }

    #[test]
    fn test_directory_path_selected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        let store = select(path.to_str().unwrap()).unwrap();
        let digest = value_digest(&Value::Int(2));
        store.dump(&digest, &Value::Int(2)).unwrap();
        assert!(path.join("results").join(digest.to_hex()).exists());
    }

    #[test]
    fn test_malformed_kv_spec_rejected() {
        assert!(matches!(
            select("kv://"),
            Err(StoreError::Connection(_))
        ));
        assert!(matches!(
            select("kv+object://bucket-without-host"),
            Err(StoreError::Connection(_))
        ));
    }
}
