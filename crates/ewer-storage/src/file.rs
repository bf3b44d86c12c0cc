//! Directory-backed implementation of [`Store`].
//!
//! An ewer directory holds three subdirectories:
//!
//! - `results/`: one file per result entry, named by the 40-hex digest;
//! - `locks/`: one file per held lock, named by the digest, containing
//!   the acquirer's identity;
//! - `tempfiles/`: staging area for dumps.
//!
//! Dumps are atomic against readers: bytes are written to a tempfile in
//! `tempfiles/` and renamed into `results/` in one step, so a concurrent
//! `can_load` sees either nothing or a complete entry. A worker killed
//! mid-dump leaves at most an orphan tempfile, never a partial result.
//! Lock acquisition is an exclusive create (`O_CREAT | O_EXCL`), the
//! filesystem's compare-and-set.

use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use ewer_core::{Digest, Value};

use crate::codec;
use crate::error::StoreError;
use crate::identity::WorkerIdentity;
use crate::traits::{Store, StoreLock};

const RESULTS_DIR: &str = "results";
const LOCKS_DIR: &str = "locks";
const TEMP_DIR: &str = "tempfiles";

/// Store backed by a shared directory (local disk or network filesystem).
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (or creates) an ewer directory at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<FileStore, StoreError> {
        let store = FileStore { root: root.into() };
        fs::create_dir_all(store.root.join(RESULTS_DIR))?;
        fs::create_dir_all(store.root.join(LOCKS_DIR))?;
        fs::create_dir_all(store.root.join(TEMP_DIR))?;
        Ok(store)
    }

    /// Deletes a whole store directory. Test and operator helper.
    pub fn remove_store(root: impl AsRef<Path>) -> Result<(), StoreError> {
        match fs::remove_dir_all(root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn result_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(RESULTS_DIR).join(digest.to_hex())
    }

    fn lock_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(LOCKS_DIR).join(digest.to_hex())
    }

    /// Digests parsed from the filenames in a subdirectory. Files with
    /// non-digest names are ignored.
    fn list_dir(&self, dir: &str) -> Result<Vec<Digest>, StoreError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(self.root.join(dir))? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(digest) = Digest::from_hex(name) {
                    out.push(digest);
                }
            }
        }
        Ok(out)
    }
}

impl Store for FileStore {
    fn dump(&self, digest: &Digest, value: &Value) -> Result<(), StoreError> {
        let mut temp = NamedTempFile::new_in(self.root.join(TEMP_DIR))?;
        codec::encode_to(value, &mut temp)?;
        temp.flush()?;
        temp.persist(self.result_path(digest))
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn load(&self, digest: &Digest) -> Result<Value, StoreError> {
        let file = match fs::File::open(self.result_path(digest)) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::Missing(*digest))
            }
            Err(e) => return Err(e.into()),
        };
        codec::decode_from(std::io::BufReader::new(file)).map_err(|source| StoreError::Corrupt {
            digest: *digest,
            source,
        })
    }

    fn can_load(&self, digest: &Digest) -> Result<bool, StoreError> {
        Ok(self.result_path(digest).exists())
    }

    fn remove(&self, digest: &Digest) -> Result<bool, StoreError> {
        match fs::remove_file(self.result_path(digest)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<Digest>, StoreError> {
        self.list_dir(RESULTS_DIR)
    }

    fn getlock(&self, digest: &Digest) -> Box<dyn StoreLock> {
        Box::new(FileLock {
            path: self.lock_path(digest),
        })
    }

    fn cleanup(&self, active: &HashSet<Digest>) -> Result<usize, StoreError> {
        let mut removed = 0;
        for digest in self.list()? {
            if !active.contains(&digest) && self.remove(&digest)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn remove_locks(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for digest in self.listlocks()? {
            match fs::remove_file(self.lock_path(&digest)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    fn listlocks(&self) -> Result<Vec<Digest>, StoreError> {
        self.list_dir(LOCKS_DIR)
    }
}

/// Lock entry as an exclusively created file.
struct FileLock {
    path: PathBuf,
}

impl StoreLock for FileLock {
    fn acquire(&self) -> Result<bool, StoreError> {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                // Identity is diagnostic only; the exclusive create is the
                // mutual exclusion.
                let _ = file.write_all(&WorkerIdentity::current().to_bytes());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn release(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_locked(&self) -> Result<bool, StoreError> {
        Ok(self.path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ewer_core::hash::value_digest;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("data")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_dump_load_remove() {
        let (_dir, store) = store();
        let value = Value::List((0..232).map(Value::Int).collect());
        let digest = value_digest(&value);

        assert!(!store.can_load(&digest).unwrap());
        store.dump(&digest, &value).unwrap();
        assert!(store.can_load(&digest).unwrap());
        assert_eq!(store.load(&digest).unwrap(), value);
        assert_eq!(store.list().unwrap(), vec![digest]);

        assert!(store.remove(&digest).unwrap());
        assert!(!store.remove(&digest).unwrap(), "second remove finds nothing");
        assert!(!store.can_load(&digest).unwrap());
    }

    #[test]
    fn test_load_missing_entry() {
        let (_dir, store) = store();
        let digest = value_digest(&Value::Int(1));
        assert!(matches!(
            store.load(&digest),
            Err(StoreError::Missing(d)) if d == digest
        ));
    }

    #[test]
    fn test_dump_leaves_no_tempfile_behind() {
        let (_dir, store) = store();
        let digest = value_digest(&Value::Int(9));
        store.dump(&digest, &Value::Int(9)).unwrap();
        let leftovers: Vec<_> = fs::read_dir(store.root().join(TEMP_DIR))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty(), "dump must rename its tempfile away");
    }

    #[test]
    fn test_lock_mutual_exclusion() {
        let (_dir, store) = store();
        let digest = value_digest(&Value::Int(1));

        assert!(store.listlocks().unwrap().is_empty());
        let lock = store.getlock(&digest);
        assert!(!lock.is_locked().unwrap());
        assert!(lock.acquire().unwrap());
        assert!(!lock.acquire().unwrap(), "second acquire must fail");

        let lock2 = store.getlock(&digest);
        assert!(!lock2.acquire().unwrap());
        assert_eq!(store.listlocks().unwrap(), vec![digest]);

        lock.release().unwrap();
        assert!(lock2.acquire().unwrap(), "released lock is acquirable again");
        lock2.release().unwrap();
    }

    #[test]
    fn test_remove_locks() {
        let (_dir, store) = store();
        let lock = store.getlock(&value_digest(&Value::Int(1)));
        assert!(lock.acquire().unwrap());
        assert_eq!(store.remove_locks().unwrap(), 1);
        assert!(store.listlocks().unwrap().is_empty());
    }

    #[test]
    fn test_cleanup_keeps_active() {
        let (_dir, store) = store();
        let keep = value_digest(&Value::Int(1));
        let drop = value_digest(&Value::Int(2));
        store.dump(&keep, &Value::Int(1)).unwrap();
        store.dump(&drop, &Value::Int(2)).unwrap();

        let active: HashSet<Digest> = [keep].into_iter().collect();
        assert_eq!(store.cleanup(&active).unwrap(), 1);
        assert!(store.can_load(&keep).unwrap());
        assert!(!store.can_load(&drop).unwrap());
    }
}
