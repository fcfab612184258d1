//! Built-in finalizers, run once after the validation loop passes.
//!
//! Both write into `<output_dir>/<run_id>/` using the same temp-file and
//! rename sequence as the filesystem provenance sink.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::adapter::{FinalizationRequest, StageAdapter, StageFailure};
use crate::domain::{CycleMetrics, FinalizationOutput, StageKind};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const LEARNINGS_FILE: &str = "learnings.json";

/// Deployment manifest written by [`ManifestPackager`].
#[derive(Debug, Serialize)]
struct Manifest<'a> {
    run_id: &'a str,
    domain: &'a str,
    cycles: usize,
    final_metrics: CycleMetrics,
}

/// Learning record written by [`LearningCaptureWriter`].
#[derive(Debug, Serialize)]
struct Learnings<'a> {
    run_id: &'a str,
    domain: &'a str,
    trajectory: Vec<CycleMetrics>,
    gaps: Vec<&'a str>,
    improvements: Vec<&'a str>,
}

/// Packages the validated run for deployment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestPackager;

#[async_trait]
impl StageAdapter<FinalizationRequest, FinalizationOutput> for ManifestPackager {
    fn kind(&self) -> StageKind {
        StageKind::Packaging
    }

    async fn execute(
        &self,
        input: &FinalizationRequest,
    ) -> Result<FinalizationOutput, StageFailure> {
        let manifest = Manifest {
            run_id: &input.run_id,
            domain: &input.domain,
            cycles: input.cycles.len(),
            final_metrics: input.final_metrics,
        };
        let path = write_json(&input.output_dir, &input.run_id, MANIFEST_FILE, &manifest).await?;
        Ok(FinalizationOutput {
            artifacts: vec![path.display().to_string()],
            summary: format!(
                "packaged {} after {} cycle(s)",
                input.domain,
                input.cycles.len()
            ),
        })
    }
}

/// Captures the metric trajectory, gaps and improvements of the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct LearningCaptureWriter;

#[async_trait]
impl StageAdapter<FinalizationRequest, FinalizationOutput> for LearningCaptureWriter {
    fn kind(&self) -> StageKind {
        StageKind::LearningCapture
    }

    async fn execute(
        &self,
        input: &FinalizationRequest,
    ) -> Result<FinalizationOutput, StageFailure> {
        let learnings = Learnings {
            run_id: &input.run_id,
            domain: &input.domain,
            trajectory: input.cycles.iter().map(|c| c.metrics).collect(),
            gaps: input
                .cycles
                .iter()
                .flat_map(|c| c.gaps.iter().map(String::as_str))
                .collect(),
            improvements: input
                .cycles
                .iter()
                .flat_map(|c| c.improvements.iter().map(String::as_str))
                .collect(),
        };
        let gap_count = learnings.gaps.len();
        let path = write_json(&input.output_dir, &input.run_id, LEARNINGS_FILE, &learnings).await?;
        Ok(FinalizationOutput {
            artifacts: vec![path.display().to_string()],
            summary: format!("captured {} gap(s)", gap_count),
        })
    }
}

async fn write_json<T: Serialize>(
    output_dir: &Path,
    run_id: &str,
    name: &str,
    value: &T,
) -> Result<PathBuf, StageFailure> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| StageFailure::new(format!("cannot serialize {}: {}", name, e)))?;
    let dir = output_dir.join(run_id);
    let name = name.to_string();

    tokio::task::spawn_blocking(move || -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(&name);
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(path)
    })
    .await
    .map_err(|e| StageFailure::new(format!("finalizer task failed: {}", e)))?
    .map_err(|e| StageFailure::new(format!("cannot write artifact: {}", e)))
}
