//! Provenance recording for expedition runs.
//!
//! - [`ProvenanceSink`]: durable, append-only storage for finalized
//!   [`ExpeditionLog`]s (one per run, never overwritten)
//! - [`ProvenanceRecorder`]: the handle the orchestrator is given to write
//!   exactly one log per run
//! - [`fs::FsProvenanceSink`]: filesystem sink with atomic writes and a
//!   SHA-256 digest sidecar
//! - [`memory::MemoryProvenanceSink`]: in-memory sink for tests
//!
//! Sinks must accept writes from concurrently executing runs; each log is
//! stored as a single unit so one run's records never interleave with another's.

pub mod fs;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::domain::{ExpeditionLog, RunOutcome};

/// Errors raised by provenance sinks.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("run {run_id} already has a recorded log")]
    AlreadyRecorded { run_id: String },

    #[error("invalid run id: {run_id}")]
    InvalidRunId { run_id: String },

    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    #[error("digest mismatch for run {run_id}: expected {expected}, got {actual}")]
    DigestMismatch {
        run_id: String,
        expected: String,
        actual: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Content digest (SHA-256 hex string) of a serialized log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serialize a log into the canonical stored form.
pub fn encode_log(log: &ExpeditionLog) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(log)?)
}

/// Summary row returned by [`ProvenanceSink::list_runs`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunIndexEntry {
    pub run_id: String,
    pub domain: String,
    pub outcome: RunOutcome,
    pub cycles: usize,
    pub completed_at: DateTime<Utc>,
    pub digest: ContentDigest,
}

impl RunIndexEntry {
    pub fn from_log(log: &ExpeditionLog, digest: ContentDigest) -> Self {
        Self {
            run_id: log.run_id.clone(),
            domain: log.domain.clone(),
            outcome: log.outcome,
            cycles: log.cycle_count(),
            completed_at: log.completed_at,
            digest,
        }
    }
}

/// Durable, append-only store for expedition logs.
///
/// Guarantees:
/// - `write_log` returns only after the log is durable (no fire-and-forget).
/// - A second `write_log` for the same run id fails with `AlreadyRecorded`.
/// - `read_log` returns exactly the log that was written, verified against its digest.
#[async_trait]
pub trait ProvenanceSink: Send + Sync {
    /// Persist a finalized log, returning the digest of the stored bytes.
    async fn write_log(&self, log: &ExpeditionLog) -> StorageResult<ContentDigest>;

    /// Read a previously written log by run id.
    async fn read_log(&self, run_id: &str) -> StorageResult<ExpeditionLog>;

    /// List recorded runs, optionally filtered by domain, oldest first.
    async fn list_runs(&self, domain: Option<&str>) -> StorageResult<Vec<RunIndexEntry>>;
}

/// Explicitly injected writer of expedition provenance.
#[derive(Clone)]
pub struct ProvenanceRecorder {
    sink: Arc<dyn ProvenanceSink>,
}

impl ProvenanceRecorder {
    pub fn new(sink: Arc<dyn ProvenanceSink>) -> Self {
        Self { sink }
    }

    /// Write the terminal log for a run.
    pub async fn record(&self, log: &ExpeditionLog) -> StorageResult<ContentDigest> {
        match self.sink.write_log(log).await {
            Ok(digest) => {
                crate::obs::emit_provenance_written(&log.run_id, digest.short(), log.cycle_count());
                Ok(digest)
            }
            Err(e) => {
                crate::obs::emit_provenance_error(&log.run_id, &e);
                Err(e)
            }
        }
    }

    /// Access the underlying sink (e.g. for auditing).
    pub fn sink(&self) -> &Arc<dyn ProvenanceSink> {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_from_bytes_is_stable() {
        let a = ContentDigest::from_bytes(b"expedition");
        let b = ContentDigest::from_bytes(b"expedition");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn test_digest_try_from_validates() {
        assert!(ContentDigest::try_from("abc".to_string()).is_err());
        let valid = "A".repeat(64);
        let digest = ContentDigest::try_from(valid).unwrap();
        assert_eq!(digest.as_str(), "a".repeat(64));
    }
}
