//! Scripted stage adapters (testing only)
//!
//! Provides deterministic extractors, generators, executors and finalizers
//! that satisfy the [`StageAdapter`] contract without any external
//! collaborator, plus a re-export of the in-memory provenance sink.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::adapter::{
    ExtractionRequest, FinalizationRequest, GenerationRequest, MeasurementRequest, StageAdapter,
    StageFailure,
};
use crate::domain::{
    CycleMetrics, ExtractionOutput, FinalizationOutput, GenerationOutput, MeasurementOutput,
    StageKind,
};

pub use crate::provenance::memory::MemoryProvenanceSink;

// ---------------------------------------------------------------------------
// ScriptedExtractor
// ---------------------------------------------------------------------------

/// Extractor that succeeds except on the configured cycles, recording every request.
#[derive(Debug, Default)]
pub struct ScriptedExtractor {
    failing_cycles: HashSet<u32>,
    transient_cycles: HashSet<u32>,
    requests: Mutex<Vec<ExtractionRequest>>,
}

impl ScriptedExtractor {
    pub fn healthy() -> Self {
        Self::default()
    }

    /// Fail with a non-recoverable error on the given cycles.
    pub fn failing_on(cycles: &[u32]) -> Self {
        Self {
            failing_cycles: cycles.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Fail with a recoverable error on the given cycles.
    pub fn transient_on(cycles: &[u32]) -> Self {
        Self {
            transient_cycles: cycles.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<ExtractionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageAdapter<ExtractionRequest, ExtractionOutput> for ScriptedExtractor {
    fn kind(&self) -> StageKind {
        StageKind::Extraction
    }

    async fn execute(&self, input: &ExtractionRequest) -> Result<ExtractionOutput, StageFailure> {
        self.requests.lock().unwrap().push(input.clone());
        if self.failing_cycles.contains(&input.cycle) {
            return Err(StageFailure::new(format!(
                "source domain '{}' unreachable",
                input.domain
            )));
        }
        if self.transient_cycles.contains(&input.cycle) {
            return Err(StageFailure::transient("knowledge store busy"));
        }
        Ok(ExtractionOutput {
            entity_count: 40 + u64::from(input.cycle) * 5,
            relationship_count: 25 + u64::from(input.cycle) * 3,
            store_ref: format!("kb://{}/cycle-{}", input.domain, input.cycle),
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedGenerator
// ---------------------------------------------------------------------------

/// Scenario generator with optional failures and artificial latency.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    failing_cycles: HashSet<u32>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn failing_on(cycles: &[u32]) -> Self {
        Self {
            failing_cycles: cycles.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Sleep for `delay` before answering (for timeout tests).
    pub fn sleeping(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }
}

#[async_trait]
impl StageAdapter<GenerationRequest, GenerationOutput> for ScriptedGenerator {
    fn kind(&self) -> StageKind {
        StageKind::ScenarioGeneration
    }

    async fn execute(&self, input: &GenerationRequest) -> Result<GenerationOutput, StageFailure> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_cycles.contains(&input.cycle) {
            return Err(StageFailure::new("scenario generator crashed"));
        }
        Ok(GenerationOutput {
            scenario_count: u64::from(input.target_count.max(1)),
            location: format!("scenarios/{}/cycle-{}", input.domain, input.cycle),
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedExecutor
// ---------------------------------------------------------------------------

/// Executor that reports a scripted metric sequence.
///
/// Cycle `n` reports `metrics[n - 1]`; cycles past the end repeat the last entry.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    metrics: Vec<CycleMetrics>,
    gaps: Vec<String>,
    failing_cycles: HashSet<u32>,
    cancel_after: Option<(u32, CancellationToken)>,
}

impl ScriptedExecutor {
    pub fn sequence(metrics: Vec<CycleMetrics>) -> Self {
        Self {
            metrics,
            ..Self::default()
        }
    }

    pub fn constant(metrics: CycleMetrics) -> Self {
        Self::sequence(vec![metrics])
    }

    /// Report these gaps on every cycle.
    pub fn with_gaps(mut self, gaps: Vec<String>) -> Self {
        self.gaps = gaps;
        self
    }

    pub fn failing_on(mut self, cycles: &[u32]) -> Self {
        self.failing_cycles = cycles.iter().copied().collect();
        self
    }

    /// Cancel `token` while measuring cycle `cycle` (the measurement still completes).
    pub fn cancel_during(mut self, cycle: u32, token: CancellationToken) -> Self {
        self.cancel_after = Some((cycle, token));
        self
    }
}

#[async_trait]
impl StageAdapter<MeasurementRequest, MeasurementOutput> for ScriptedExecutor {
    fn kind(&self) -> StageKind {
        StageKind::Execution
    }

    async fn execute(&self, input: &MeasurementRequest) -> Result<MeasurementOutput, StageFailure> {
        if let Some((cycle, token)) = &self.cancel_after {
            if *cycle == input.cycle {
                token.cancel();
            }
        }
        if self.failing_cycles.contains(&input.cycle) {
            return Err(StageFailure::new("test harness unavailable"));
        }
        let index = (input.cycle as usize).saturating_sub(1);
        let metrics = self
            .metrics
            .get(index)
            .or_else(|| self.metrics.last())
            .copied()
            .unwrap_or_default();
        let mut gaps = self.gaps.clone();
        if gaps.is_empty() && metrics.primary_pass_rate < 1.0 {
            gaps.push(format!(
                "cycle {}: {:.0}% of scenarios failing",
                input.cycle,
                (1.0 - metrics.primary_pass_rate) * 100.0
            ));
        }
        Ok(MeasurementOutput { metrics, gaps })
    }
}

// ---------------------------------------------------------------------------
// ScriptedFinalizer
// ---------------------------------------------------------------------------

/// Finalizer that either succeeds with one artifact or fails.
#[derive(Debug)]
pub struct ScriptedFinalizer {
    kind: StageKind,
    fail: bool,
    calls: Mutex<u32>,
}

impl ScriptedFinalizer {
    pub fn succeeding(kind: StageKind) -> Self {
        Self {
            kind,
            fail: false,
            calls: Mutex::new(0),
        }
    }

    pub fn failing(kind: StageKind) -> Self {
        Self {
            kind,
            fail: true,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl StageAdapter<FinalizationRequest, FinalizationOutput> for ScriptedFinalizer {
    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn execute(
        &self,
        input: &FinalizationRequest,
    ) -> Result<FinalizationOutput, StageFailure> {
        *self.calls.lock().unwrap() += 1;
        if self.fail {
            return Err(StageFailure::new(format!("{} target rejected upload", self.kind)));
        }
        Ok(FinalizationOutput {
            artifacts: vec![format!("{}/{}.out", input.run_id, self.kind)],
            summary: format!("{} complete", self.kind),
        })
    }
}
