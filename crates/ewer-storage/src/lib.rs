//! Persistence layer for the ewer computation engine.
//!
//! Provides the [`Store`] trait defining the contract all backends
//! implement (result entries and lock entries keyed by content digest),
//! the value codec, and four backends: on-disk directory, in-memory,
//! key-value service, and the hybrid object+key-value variant.
//!
//! # Modules
//!
//! - [`error`]: CodecError and StoreError
//! - [`codec`]: prefix-byte value encoding with transparent compression
//! - [`traits`]: Store and StoreLock contracts
//! - [`identity`]: worker identity recorded in lock entries
//! - [`file`]: directory backend (atomic tempfile+rename dumps)
//! - [`memory`]: process-local backend for tests and single-process runs
//! - [`kv`]: key-value service backend and hybrid variant
//! - [`select`]: connection-string dispatch

pub mod codec;
pub mod error;
pub mod file;
pub mod identity;
pub mod kv;
pub mod memory;
pub mod select;
pub mod traits;

// Re-export key types for ergonomic use.
pub use codec::{decode, decode_from, encode, encode_to};
pub use error::{CodecError, StoreError};
pub use file::FileStore;
pub use identity::WorkerIdentity;
pub use kv::{KvStore, ObjectKvStore};
pub use memory::MemoryStore;
pub use select::select;
pub use traits::{Store, StoreLock};
