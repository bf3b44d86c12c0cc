//! Storage error types.
//!
//! [`CodecError`] covers the value codec; [`StoreError`] covers every
//! backend fault. The scheduler treats any `StoreError` from a liveness
//! probe as unknown state for the current pass (cannot load, cannot
//! lock) and retries on the next pass.

use thiserror::Error;

use ewer_core::Digest;

/// Errors from encoding or decoding values.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading or writing the byte stream failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream's prefix byte names no known encoder.
    #[error("unknown encoder prefix {0:#04x}")]
    UnknownPrefix(u8),

    /// An array payload whose header disagrees with its data.
    #[error("corrupt array payload: {0}")]
    CorruptArray(String),

    /// No encoder accepted the value. Cannot happen while the general
    /// encoder handles every kind, but the probe loop reports it rather
    /// than assuming.
    #[error("no encoder accepts value of kind {0}")]
    Unencodable(&'static str),
}

/// Errors from store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Value encoding failed during a dump. Fatal.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Filesystem fault.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// No result entry exists under the digest.
    #[error("missing result entry {0}")]
    Missing(Digest),

    /// An entry exists but its bytes do not decode.
    #[error("corrupt result entry {digest}: {source}")]
    Corrupt {
        digest: Digest,
        source: CodecError,
    },

    /// Key-value service fault.
    #[error("key-value service error: {0}")]
    Kv(#[from] redis::RedisError),

    /// A connection string no backend recognizes.
    #[error("invalid store connection string {0:?}")]
    Connection(String),
}
