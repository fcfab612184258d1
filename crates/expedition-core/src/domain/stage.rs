//! Stage kinds, typed stage payloads and stage results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cycle::CycleMetrics;

/// Closed enumeration of every stage the orchestrator can run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Scoping: resolve how many outputs the run targets.
    TargetResolution,

    /// Scoping: enumerate the sources to extract from.
    SourceEnumeration,

    /// Loop: extract entities/relationships from the sources.
    Extraction,

    /// Loop: generate behaviour-test scenarios from the extraction.
    ScenarioGeneration,

    /// Loop: execute scenarios and measure quality.
    Execution,

    /// Finalization: package deployable artifacts.
    Packaging,

    /// Finalization: capture learnings from the run.
    LearningCapture,
}

impl StageKind {
    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::TargetResolution => "target_resolution",
            StageKind::SourceEnumeration => "source_enumeration",
            StageKind::Extraction => "extraction",
            StageKind::ScenarioGeneration => "scenario_generation",
            StageKind::Execution => "execution",
            StageKind::Packaging => "packaging",
            StageKind::LearningCapture => "learning_capture",
        }
    }

    /// Whether this stage runs inside the validation loop.
    pub fn is_loop_stage(&self) -> bool {
        matches!(
            self,
            StageKind::Extraction | StageKind::ScenarioGeneration | StageKind::Execution
        )
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolved target output count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetCount {
    pub target_count: u32,
}

/// Sources available for extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceListing {
    pub sources: Vec<String>,
}

/// What the extraction collaborator produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionOutput {
    pub entity_count: u64,
    pub relationship_count: u64,
    /// Opaque reference to where the extraction was stored.
    pub store_ref: String,
}

/// What the scenario-generation collaborator produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationOutput {
    pub scenario_count: u64,
    pub location: String,
}

/// Quality measured by the execution collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasurementOutput {
    #[serde(flatten)]
    pub metrics: CycleMetrics,
    #[serde(default)]
    pub gaps: Vec<String>,
}

/// What a finalization stage produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinalizationOutput {
    /// Paths or references of produced artifacts.
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

/// Typed payload of a stage, one variant per payload shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StageOutput {
    Target(TargetCount),
    Sources(SourceListing),
    Extraction(ExtractionOutput),
    Generation(GenerationOutput),
    Measurement(MeasurementOutput),
    Finalization(FinalizationOutput),
}

impl StageOutput {
    /// Warnings implied by the payload itself (empty outputs).
    pub fn warnings(&self) -> Vec<String> {
        match self {
            StageOutput::Extraction(out) if out.entity_count == 0 => {
                vec!["extraction produced no entities".to_string()]
            }
            StageOutput::Generation(out) if out.scenario_count == 0 => {
                vec!["scenario generation produced no scenarios".to_string()]
            }
            StageOutput::Sources(out) if out.sources.is_empty() => {
                vec!["source enumeration found no sources".to_string()]
            }
            _ => Vec::new(),
        }
    }
}

macro_rules! impl_from_payload {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for StageOutput {
                fn from(value: $ty) -> Self {
                    StageOutput::$variant(value)
                }
            }
        )*
    };
}

impl_from_payload! {
    TargetCount => Target,
    SourceListing => Sources,
    ExtractionOutput => Extraction,
    GenerationOutput => Generation,
    MeasurementOutput => Measurement,
    FinalizationOutput => Finalization,
}

/// Outcome of one stage execution. Appended to the run, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageResult {
    pub stage: StageKind,

    /// Cycle number for loop stages.
    pub cycle: Option<u32>,

    pub success: bool,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Typed payload (absent on failure).
    pub output: Option<StageOutput>,

    pub errors: Vec<String>,

    pub warnings: Vec<String>,

    /// Whether the stage exceeded its timeout.
    #[serde(default)]
    pub timed_out: bool,

    /// Whether the adapter reported the failure as recoverable.
    #[serde(default)]
    pub recoverable: bool,

    pub timestamp: DateTime<Utc>,
}

impl StageResult {
    /// Whether this stage passed.
    pub fn passed(&self) -> bool {
        self.success && self.errors.is_empty()
    }
}
