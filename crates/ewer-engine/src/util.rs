//! Small task-construction conveniences.

use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use ewer_core::task::{Arg, CallArgs, Task, TaskFn, TaskHandle};
use ewer_core::{TaskError, Value};

use crate::error::EngineError;
use crate::script::ScriptCtx;

/// Returns the first positional argument unchanged. Extra arguments take
/// part in the digest but not the result, which is what makes
/// [`timed_path`] work.
fn return_first(args: CallArgs) -> Result<Value, TaskError> {
    Ok(args.get(0)?.clone())
}

fn return_first_fn() -> TaskFn {
    Arc::new(return_first)
}

/// Wraps a value in an identity task.
///
/// Pointless on its face, but a large value wrapped this way is stored
/// once and dependents load it by digest instead of re-hashing the whole
/// payload into every dependent's key.
pub fn identity(ctx: &mut ScriptCtx<'_>, value: Value) -> Result<TaskHandle, EngineError> {
    let task = Task::new("ewer.util.identity", return_first_fn(), vec![Arg::Value(value)])?
        .display_as("identity");
    Ok(ctx.submit(task))
}

/// A task that returns `path` with the file's modification time folded
/// into the digest: when the file changes, the task invalidates, and so
/// does everything downstream of it.
pub fn timed_path(ctx: &mut ScriptCtx<'_>, path: &Path) -> Result<TaskHandle, EngineError> {
    let mtime = std::fs::metadata(path)?
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let task = Task::new(
        "ewer.util.timed_path",
        return_first_fn(),
        vec![
            Arg::Value(Value::Str(path.to_string_lossy().into_owned())),
            Arg::Value(Value::Int(mtime)),
        ],
    )?
    .display_as("timed_path");
    Ok(ctx.submit(task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{run_task, RunOptions};
    use ewer_core::task::TaskRegistry;
    use ewer_storage::MemoryStore;
    use std::fs;

    #[test]
    fn test_identity_roundtrip() {
        let store = MemoryStore::new();
        let mut registry = TaskRegistry::new();
        let mut ctx = ScriptCtx::new(&mut registry, &store);
        let task = identity(&mut ctx, Value::Str("payload".into())).unwrap();
        let value = run_task(&task, &store, &RunOptions::save()).unwrap();
        assert_eq!(value, Value::Str("payload".into()));
    }

    #[test]
    fn test_timed_path_digest_tracks_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("input.txt");
        fs::write(&file, b"one").unwrap();

        let store = MemoryStore::new();
        let mut registry = TaskRegistry::new();

        let first = {
            let mut ctx = ScriptCtx::new(&mut registry, &store);
            timed_path(&mut ctx, &file).unwrap().digest()
        };

        // Same mtime, same digest.
        let second = {
            let mut ctx = ScriptCtx::new(&mut registry, &store);
            timed_path(&mut ctx, &file).unwrap().digest()
        };
        assert_eq!(first, second);

        // Push the mtime forward; the digest must move.
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        let file_handle = fs::File::options().write(true).open(&file).unwrap();
        file_handle.set_modified(later).unwrap();
        drop(file_handle);

        let third = {
            let mut ctx = ScriptCtx::new(&mut registry, &store);
            timed_path(&mut ctx, &file).unwrap().digest()
        };
        assert_ne!(first, third, "a touched file must change the digest");
    }
}
