//! Stage adapter interface.
//!
//! Every external collaborator (scoping, extraction, scenario generation,
//! execution/measurement, finalization) is reached through [`StageAdapter`].
//! [`invoke_stage`] wraps a call uniformly: it applies the per-stage timeout,
//! measures elapsed time and turns the outcome into a [`StageResult`] carrying
//! the typed [`StageOutput`]. A failing adapter never raises outward; the
//! caller decides how to react to `success == false`.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::domain::{
    CycleMetrics, ExtractionOutput, FinalizationOutput, GenerationOutput, MeasurementOutput,
    SourceListing, StageKind, StageOutput, StageResult, TargetCount, ValidationCycle,
};

// ---------------------------------------------------------------------------
// Stage inputs
// ---------------------------------------------------------------------------

/// Input to the one-time scoping stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeRequest {
    pub domain: String,
    pub source_dir: PathBuf,
}

/// Input to the extraction stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub domain: String,
    pub cycle: u32,
    pub target_count: u32,
    pub sources: Vec<String>,
    /// Improvements derived from the previous cycle's gaps.
    pub improvements: Vec<String>,
}

/// Input to the scenario-generation stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationRequest {
    pub domain: String,
    pub cycle: u32,
    pub target_count: u32,
    pub extraction: ExtractionOutput,
}

/// Input to the execution/measurement stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MeasurementRequest {
    pub domain: String,
    pub cycle: u32,
    pub scenarios: GenerationOutput,
}

/// Input to the finalization stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalizationRequest {
    pub run_id: String,
    pub domain: String,
    pub output_dir: PathBuf,
    pub final_metrics: CycleMetrics,
    pub cycles: Vec<ValidationCycle>,
}

// ---------------------------------------------------------------------------
// Adapter contract
// ---------------------------------------------------------------------------

/// Failure reported by an adapter.
///
/// Failures are fatal unless the adapter marks them recoverable. Only the
/// extraction stage distinguishes the two; a timeout is never recoverable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", .errors.join("; "))]
pub struct StageFailure {
    pub errors: Vec<String>,
    pub timed_out: bool,
    pub recoverable: bool,
}

impl StageFailure {
    pub fn new(error: impl Into<String>) -> Self {
        Self::with_errors(vec![error.into()])
    }

    pub fn with_errors(errors: Vec<String>) -> Self {
        Self {
            errors,
            timed_out: false,
            recoverable: false,
        }
    }

    /// A failure the loop may record and retry on the next cycle.
    pub fn transient(error: impl Into<String>) -> Self {
        Self {
            recoverable: true,
            ..Self::new(error)
        }
    }

    /// Failure produced when a stage exceeds its budget.
    pub fn timeout(stage: StageKind, budget: Duration) -> Self {
        Self {
            errors: vec![format!(
                "stage '{}' timed out after {} ms",
                stage,
                budget.as_millis()
            )],
            timed_out: true,
            recoverable: false,
        }
    }
}

/// Uniform contract wrapping an external collaborator.
#[async_trait]
pub trait StageAdapter<I, O>: Send + Sync
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    /// Which stage this adapter implements.
    fn kind(&self) -> StageKind;

    /// Run the stage.
    async fn execute(&self, input: &I) -> Result<O, StageFailure>;
}

pub type TargetResolver = dyn StageAdapter<ScopeRequest, TargetCount>;
pub type SourceEnumerator = dyn StageAdapter<ScopeRequest, SourceListing>;
pub type Extractor = dyn StageAdapter<ExtractionRequest, ExtractionOutput>;
pub type ScenarioGenerator = dyn StageAdapter<GenerationRequest, GenerationOutput>;
pub type Executor = dyn StageAdapter<MeasurementRequest, MeasurementOutput>;
pub type Finalizer = dyn StageAdapter<FinalizationRequest, FinalizationOutput>;

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

/// Per-stage timeouts in seconds. `0` disables the timeout for that stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StageTimeouts {
    pub scoping_secs: u64,
    pub extraction_secs: u64,
    pub generation_secs: u64,
    pub execution_secs: u64,
    pub finalization_secs: u64,

    /// When true, a generation/execution timeout is recorded and the loop
    /// moves on to the next cycle; when false it aborts the run. Extraction
    /// timeouts always abort.
    pub retry_on_timeout: bool,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            scoping_secs: 60,
            extraction_secs: 900,
            generation_secs: 900,
            execution_secs: 1800,
            finalization_secs: 300,
            retry_on_timeout: true,
        }
    }
}

impl StageTimeouts {
    /// No timeouts at all.
    pub fn unbounded() -> Self {
        Self {
            scoping_secs: 0,
            extraction_secs: 0,
            generation_secs: 0,
            execution_secs: 0,
            finalization_secs: 0,
            retry_on_timeout: true,
        }
    }

    /// Timeout budget for a stage, if bounded.
    pub fn for_stage(&self, stage: StageKind) -> Option<Duration> {
        let secs = match stage {
            StageKind::TargetResolution | StageKind::SourceEnumeration => self.scoping_secs,
            StageKind::Extraction => self.extraction_secs,
            StageKind::ScenarioGeneration => self.generation_secs,
            StageKind::Execution => self.execution_secs,
            StageKind::Packaging | StageKind::LearningCapture => self.finalization_secs,
        };
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

// ---------------------------------------------------------------------------
// Uniform invocation
// ---------------------------------------------------------------------------

/// Result of one wrapped adapter call.
#[derive(Debug, Clone)]
pub struct StageInvocation<O> {
    /// Record to append to the run.
    pub result: StageResult,
    /// Typed output on success.
    pub output: Option<O>,
}

impl<O> StageInvocation<O> {
    pub fn succeeded(&self) -> bool {
        self.result.success
    }
}

/// Execute `adapter` with timing, timeout and result capture.
pub async fn invoke_stage<I, O>(
    adapter: &dyn StageAdapter<I, O>,
    input: &I,
    cycle: Option<u32>,
    timeout: Option<Duration>,
) -> StageInvocation<O>
where
    I: Send + Sync + 'static,
    O: Clone + Into<StageOutput> + Send + 'static,
{
    let stage = adapter.kind();
    let start = Instant::now();

    let outcome = match timeout {
        Some(budget) => match tokio::time::timeout(budget, adapter.execute(input)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(StageFailure::timeout(stage, budget)),
        },
        None => adapter.execute(input).await,
    };

    let elapsed = start.elapsed();
    let duration_ms = elapsed.as_millis() as u64;

    let invocation = match outcome {
        Ok(output) => {
            let payload: StageOutput = output.clone().into();
            let mut warnings = payload.warnings();
            if let Some(budget) = timeout {
                // Flag stages that used more than 80% of their budget.
                if elapsed * 5 >= budget * 4 {
                    warnings.push(format!(
                        "stage '{}' used {} ms of its {} ms budget",
                        stage,
                        duration_ms,
                        budget.as_millis()
                    ));
                }
            }
            StageInvocation {
                result: StageResult {
                    stage,
                    cycle,
                    success: true,
                    duration_ms,
                    output: Some(payload),
                    errors: Vec::new(),
                    warnings,
                    timed_out: false,
                    recoverable: false,
                    timestamp: Utc::now(),
                },
                output: Some(output),
            }
        }
        Err(failure) => {
            let mut errors = failure.errors;
            if errors.is_empty() {
                errors.push(format!("stage '{}' failed without detail", stage));
            }
            StageInvocation {
                result: StageResult {
                    stage,
                    cycle,
                    success: false,
                    duration_ms,
                    output: None,
                    errors,
                    warnings: Vec::new(),
                    timed_out: failure.timed_out,
                    recoverable: failure.recoverable,
                    timestamp: Utc::now(),
                },
                output: None,
            }
        }
    };

    crate::obs::emit_stage_finished(
        stage,
        cycle,
        invocation.result.success,
        invocation.result.duration_ms,
    );
    invocation
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SleepyGenerator {
        sleep: Duration,
        fail: bool,
    }

    #[async_trait]
    impl StageAdapter<GenerationRequest, GenerationOutput> for SleepyGenerator {
        fn kind(&self) -> StageKind {
            StageKind::ScenarioGeneration
        }

        async fn execute(&self, _input: &GenerationRequest) -> Result<GenerationOutput, StageFailure> {
            tokio::time::sleep(self.sleep).await;
            if self.fail {
                return Err(StageFailure::with_errors(Vec::new()));
            }
            Ok(GenerationOutput {
                scenario_count: 4,
                location: "scenarios/".to_string(),
            })
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            domain: "billing".to_string(),
            cycle: 1,
            target_count: 4,
            extraction: ExtractionOutput {
                entity_count: 10,
                relationship_count: 4,
                store_ref: "kb://billing".to_string(),
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_invocation_captures_output() {
        let adapter = SleepyGenerator {
            sleep: Duration::from_millis(10),
            fail: false,
        };
        let inv = invoke_stage::<GenerationRequest, GenerationOutput>(
            &adapter,
            &request(),
            Some(1),
            None,
        )
        .await;
        assert!(inv.succeeded());
        assert_eq!(inv.result.stage, StageKind::ScenarioGeneration);
        assert_eq!(inv.result.cycle, Some(1));
        assert_eq!(inv.output.as_ref().map(|o| o.scenario_count), Some(4));
        assert!(matches!(
            inv.result.output,
            Some(StageOutput::Generation(_))
        ));
        assert!(inv.result.warnings.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_failed_result() {
        let adapter = SleepyGenerator {
            sleep: Duration::from_secs(30),
            fail: false,
        };
        let inv = invoke_stage::<GenerationRequest, GenerationOutput>(
            &adapter,
            &request(),
            Some(2),
            Some(Duration::from_secs(1)),
        )
        .await;
        assert!(!inv.succeeded());
        assert!(inv.result.timed_out);
        assert!(inv.output.is_none());
        assert!(inv.result.errors[0].contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_stage_warns() {
        let adapter = SleepyGenerator {
            sleep: Duration::from_secs(9),
            fail: false,
        };
        let inv = invoke_stage::<GenerationRequest, GenerationOutput>(
            &adapter,
            &request(),
            Some(1),
            Some(Duration::from_secs(10)),
        )
        .await;
        assert!(inv.succeeded());
        assert_eq!(inv.result.warnings.len(), 1);
        assert!(inv.result.warnings[0].contains("budget"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_detail_gets_error() {
        let adapter = SleepyGenerator {
            sleep: Duration::from_millis(1),
            fail: true,
        };
        let inv = invoke_stage::<GenerationRequest, GenerationOutput>(
            &adapter,
            &request(),
            Some(1),
            None,
        )
        .await;
        assert!(!inv.succeeded());
        assert!(!inv.result.timed_out);
        assert_eq!(inv.result.errors.len(), 1);
    }

    #[test]
    fn test_failures_are_fatal_unless_transient() {
        assert!(!StageFailure::new("missing input").recoverable);
        assert!(StageFailure::transient("rate limited").recoverable);
        let timeout = StageFailure::timeout(StageKind::Extraction, Duration::from_secs(5));
        assert!(timeout.timed_out);
        assert!(!timeout.recoverable);
    }

    #[test]
    fn test_stage_timeouts() {
        let t = StageTimeouts::default();
        assert_eq!(
            t.for_stage(StageKind::Execution),
            Some(Duration::from_secs(1800))
        );
        assert!(t.retry_on_timeout);
        assert_eq!(StageTimeouts::unbounded().for_stage(StageKind::Extraction), None);
    }
}
