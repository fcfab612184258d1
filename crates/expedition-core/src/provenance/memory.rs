//! In-memory provenance sink (testing only)

use std::sync::Mutex;

use async_trait::async_trait;

use super::{encode_log, ContentDigest, ProvenanceSink, RunIndexEntry, StorageError, StorageResult};
use crate::domain::ExpeditionLog;

#[derive(Debug)]
struct StoredLog {
    run_id: String,
    bytes: Vec<u8>,
    digest: ContentDigest,
}

/// In-memory sink keeping serialized logs in write order.
#[derive(Debug, Default)]
pub struct MemoryProvenanceSink {
    logs: Mutex<Vec<StoredLog>>,
}

impl MemoryProvenanceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of logs written so far.
    pub fn write_count(&self) -> usize {
        self.logs.lock().unwrap().len()
    }

    /// Run ids in write order.
    pub fn run_ids(&self) -> Vec<String> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .map(|l| l.run_id.clone())
            .collect()
    }

    /// Raw stored bytes for a run.
    pub fn raw(&self, run_id: &str) -> Option<Vec<u8>> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .find(|l| l.run_id == run_id)
            .map(|l| l.bytes.clone())
    }
}

#[async_trait]
impl ProvenanceSink for MemoryProvenanceSink {
    async fn write_log(&self, log: &ExpeditionLog) -> StorageResult<ContentDigest> {
        let bytes = encode_log(log)?;
        let digest = ContentDigest::from_bytes(&bytes);
        let mut logs = self.logs.lock().unwrap();
        if logs.iter().any(|l| l.run_id == log.run_id) {
            return Err(StorageError::AlreadyRecorded {
                run_id: log.run_id.clone(),
            });
        }
        logs.push(StoredLog {
            run_id: log.run_id.clone(),
            bytes,
            digest: digest.clone(),
        });
        Ok(digest)
    }

    async fn read_log(&self, run_id: &str) -> StorageResult<ExpeditionLog> {
        let logs = self.logs.lock().unwrap();
        let stored = logs
            .iter()
            .find(|l| l.run_id == run_id)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        Ok(serde_json::from_slice(&stored.bytes)?)
    }

    async fn list_runs(&self, domain: Option<&str>) -> StorageResult<Vec<RunIndexEntry>> {
        let logs = self.logs.lock().unwrap();
        let mut entries = Vec::new();
        for stored in logs.iter() {
            let log: ExpeditionLog = serde_json::from_slice(&stored.bytes)?;
            if domain.map_or(true, |d| d == log.domain) {
                entries.push(RunIndexEntry::from_log(&log, stored.digest.clone()));
            }
        }
        Ok(entries)
    }
}
