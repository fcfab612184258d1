use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::warn;

use super::{encode_log, ContentDigest, ProvenanceSink, RunIndexEntry, StorageError, StorageResult};
use crate::domain::ExpeditionLog;

const LOG_FILE: &str = "expedition.json";
const DIGEST_FILE: &str = "expedition.digest";

/// Filesystem-backed provenance sink.
///
/// Layout: `<root>/runs/<run_id>/expedition.json` plus `expedition.digest`
/// holding the SHA-256 of the JSON bytes. The run directory is claimed with a
/// non-recursive `create_dir`, so two writers for the same run id cannot both succeed.
#[derive(Debug, Clone)]
pub struct FsProvenanceSink {
    runs_dir: PathBuf,
}

impl FsProvenanceSink {
    /// Create a sink rooted at `root`. Creates `root/runs/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let runs_dir = root.as_ref().join("runs");
        fs::create_dir_all(&runs_dir)?;
        Ok(Self { runs_dir })
    }

    /// Directory holding a run's files.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    fn write_sync(runs_dir: &Path, run_id: &str, json: &[u8]) -> StorageResult<ContentDigest> {
        validate_run_id(run_id)?;
        let run_dir = runs_dir.join(run_id);
        match fs::create_dir(&run_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyRecorded {
                    run_id: run_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let digest = ContentDigest::from_bytes(json);
        let written = write_atomic(&run_dir, LOG_FILE, json)
            .and_then(|_| write_atomic(&run_dir, DIGEST_FILE, digest.as_str().as_bytes()));
        if let Err(e) = written {
            // Release the claim so the run is not left half-recorded.
            let _ = fs::remove_dir_all(&run_dir);
            return Err(e);
        }
        Ok(digest)
    }

    fn read_sync(runs_dir: &Path, run_id: &str) -> StorageResult<(ExpeditionLog, ContentDigest)> {
        validate_run_id(run_id)?;
        let run_dir = runs_dir.join(run_id);
        let json = fs::read(run_dir.join(LOG_FILE)).map_err(|e| not_found_or_io(e, run_id))?;
        let recorded =
            fs::read_to_string(run_dir.join(DIGEST_FILE)).map_err(|e| not_found_or_io(e, run_id))?;

        let actual = ContentDigest::from_bytes(&json);
        if recorded.trim() != actual.as_str() {
            return Err(StorageError::DigestMismatch {
                run_id: run_id.to_string(),
                expected: recorded.trim().to_string(),
                actual: actual.to_string(),
            });
        }
        Ok((serde_json::from_slice(&json)?, actual))
    }

    fn list_sync(runs_dir: &Path, domain: Option<&str>) -> StorageResult<Vec<RunIndexEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(runs_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let run_id = entry.file_name().to_string_lossy().into_owned();
            match Self::read_sync(runs_dir, &run_id) {
                Ok((log, digest)) => {
                    if domain.map_or(true, |d| d == log.domain) {
                        entries.push(RunIndexEntry::from_log(&log, digest));
                    }
                }
                Err(e) => warn!(run_id = %run_id, error = %e, "Skipping unreadable run log"),
            }
        }
        entries.sort_by(|a, b| a.completed_at.cmp(&b.completed_at));
        Ok(entries)
    }
}

#[async_trait]
impl ProvenanceSink for FsProvenanceSink {
    async fn write_log(&self, log: &ExpeditionLog) -> StorageResult<ContentDigest> {
        let json = encode_log(log)?;
        let runs_dir = self.runs_dir.clone();
        let run_id = log.run_id.clone();
        blocking(move || Self::write_sync(&runs_dir, &run_id, &json)).await
    }

    async fn read_log(&self, run_id: &str) -> StorageResult<ExpeditionLog> {
        let runs_dir = self.runs_dir.clone();
        let run_id = run_id.to_string();
        blocking(move || Self::read_sync(&runs_dir, &run_id).map(|(log, _)| log)).await
    }

    async fn list_runs(&self, domain: Option<&str>) -> StorageResult<Vec<RunIndexEntry>> {
        let runs_dir = self.runs_dir.clone();
        let domain = domain.map(str::to_string);
        blocking(move || Self::list_sync(&runs_dir, domain.as_deref())).await
    }
}

/// Write to a temp file in `dir`, fsync, then rename into place.
fn write_atomic(dir: &Path, name: &str, data: &[u8]) -> StorageResult<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(name)).map_err(|e| e.error)?;
    Ok(())
}

fn validate_run_id(run_id: &str) -> StorageResult<()> {
    let ok = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidRunId {
            run_id: run_id.to_string(),
        })
    }
}

fn not_found_or_io(e: std::io::Error, run_id: &str) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::RunNotFound {
            run_id: run_id.to_string(),
        }
    } else {
        StorageError::Io(e)
    }
}

async fn blocking<T, F>(f: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CycleMetrics, ExpeditionRun, QualityThresholds, RunOutcome, ValidationCycle,
    };
    use crate::domain::OrchestratorState;

    fn sealed_log(domain: &str) -> ExpeditionLog {
        let mut run = ExpeditionRun::new(domain, QualityThresholds::default().with_cycles(1, 2));
        run.set_scope(10, vec!["docs".to_string()]).unwrap();
        run.transition(OrchestratorState::Looping).unwrap();
        run.push_cycle(ValidationCycle::new(1, CycleMetrics::new(0.97, 0.96, 0.93), 12))
            .unwrap();
        run.seal(RunOutcome::Success, None).unwrap();
        run.to_log().unwrap()
    }

    fn make_sink() -> (tempfile::TempDir, FsProvenanceSink) {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsProvenanceSink::new(dir.path()).unwrap();
        (dir, sink)
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let (_dir, sink) = make_sink();
        let log = sealed_log("payments");
        let digest = sink.write_log(&log).await.unwrap();

        let loaded = sink.read_log(&log.run_id).await.unwrap();
        assert_eq!(loaded, log);

        let on_disk = fs::read_to_string(sink.run_dir(&log.run_id).join(DIGEST_FILE)).unwrap();
        assert_eq!(on_disk, digest.as_str());
    }

    #[tokio::test]
    async fn test_second_write_is_rejected() {
        let (_dir, sink) = make_sink();
        let log = sealed_log("payments");
        sink.write_log(&log).await.unwrap();
        let err = sink.write_log(&log).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyRecorded { .. }));
    }

    #[tokio::test]
    async fn test_tampered_log_fails_digest_check() {
        let (_dir, sink) = make_sink();
        let log = sealed_log("payments");
        sink.write_log(&log).await.unwrap();

        let path = sink.run_dir(&log.run_id).join(LOG_FILE);
        let tampered = fs::read_to_string(&path)
            .unwrap()
            .replace("payments", "payrolls");
        fs::write(&path, tampered).unwrap();

        let err = sink.read_log(&log.run_id).await.unwrap_err();
        assert!(matches!(err, StorageError::DigestMismatch { .. }));
    }

    #[tokio::test]
    async fn test_missing_run_is_not_found() {
        let (_dir, sink) = make_sink();
        let err = sink.read_log("does-not-exist").await.unwrap_err();
        assert!(matches!(err, StorageError::RunNotFound { .. }));
    }

    #[tokio::test]
    async fn test_path_traversal_run_id_rejected() {
        let (_dir, sink) = make_sink();
        let err = sink.read_log("../etc").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidRunId { .. }));
    }

    #[tokio::test]
    async fn test_list_filters_by_domain_and_skips_corrupt() {
        let (_dir, sink) = make_sink();
        sink.write_log(&sealed_log("payments")).await.unwrap();
        sink.write_log(&sealed_log("payments")).await.unwrap();
        sink.write_log(&sealed_log("billing")).await.unwrap();
        fs::create_dir(sink.run_dir("half-written")).unwrap();

        assert_eq!(sink.list_runs(None).await.unwrap().len(), 3);
        let payments = sink.list_runs(Some("payments")).await.unwrap();
        assert_eq!(payments.len(), 2);
        assert!(payments.iter().all(|e| e.domain == "payments"));
    }
}
