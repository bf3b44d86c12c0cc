//! Content digests identifying tasks and their results.
//!
//! A [`Digest`] is 20 bytes of blake3 output, rendered as exactly 40
//! lowercase hex characters. The hex form is the universal coordination
//! key: it names result entries and lock entries in every store backend,
//! so two processes that build the same graph address the same entries.

use std::fmt;
use std::str::FromStr;

use crate::error::GraphError;

/// Digest length in bytes. The hex rendering is twice this.
pub const DIGEST_LEN: usize = 20;

/// A 20-byte content digest, shown as 40 hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Wraps raw digest bytes.
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Digest(bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Renders the digest as 40 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(DIGEST_LEN * 2);
        for byte in &self.0 {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }

    /// Parses a 40-hex-character string back into a digest.
    pub fn from_hex(s: &str) -> Result<Self, GraphError> {
        if s.len() != DIGEST_LEN * 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(GraphError::BadDigest(s.to_string()));
        }
        let mut bytes = [0u8; DIGEST_LEN];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16).ok_or_else(|| GraphError::BadDigest(s.to_string()))?;
            let lo = (chunk[1] as char).to_digit(16).ok_or_else(|| GraphError::BadDigest(s.to_string()))?;
            bytes[i] = ((hi << 4) | lo) as u8;
        }
        Ok(Digest(bytes))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::from_hex(s)
    }
}
