//! Core domain types for expedition runs.
//!
//! - [`ExpeditionRun`]: one orchestrator invocation and its lifecycle
//! - [`StageResult`]: outcome of a single stage, with a typed [`StageOutput`]
//! - [`ValidationCycle`]: one extraction → generation → measurement iteration
//! - [`QualityThresholds`]: gate criteria and cycle budget
//! - [`ExpeditionLog`]: the durable provenance artifact of a terminal run

pub mod cycle;
pub mod error;
pub mod run;
pub mod stage;
pub mod thresholds;

pub use cycle::{CycleMetrics, ValidationCycle};
pub use error::{ConfigError, ExpeditionError, Result};
pub use run::{
    AbortReason, ExpeditionLog, ExpeditionRun, FinalizationReport, OrchestratorState, RunOutcome,
    LOG_SCHEMA_VERSION,
};
pub use stage::{
    ExtractionOutput, FinalizationOutput, GenerationOutput, MeasurementOutput, SourceListing,
    StageKind, StageOutput, StageResult, TargetCount,
};
pub use thresholds::QualityThresholds;
