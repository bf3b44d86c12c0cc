//! Worker identity written into lock entries for diagnostics.
//!
//! Locks are advisory (release is not ownership-checked), but recording
//! who acquired one lets an operator see which host and process holds a
//! stuck lock before breaking it.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies the worker process that acquired a lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub hostname: String,
    pub pid: u32,
    pub token: Uuid,
}

impl WorkerIdentity {
    /// Identity of the current process. The token is fresh per call, so
    /// two locks taken by the same process are still distinguishable.
    pub fn current() -> WorkerIdentity {
        WorkerIdentity {
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            pid: std::process::id(),
            token: Uuid::new_v4(),
        }
    }

    /// JSON payload stored in the lock entry.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.hostname, self.pid, self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_roundtrips_as_json() {
        let identity = WorkerIdentity::current();
        let bytes = identity.to_bytes();
        let back: WorkerIdentity = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.pid, identity.pid);
        assert_eq!(back.token, identity.token);
    }
}
