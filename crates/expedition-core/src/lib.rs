//! Expedition Core
//!
//! Drives knowledge-extraction expeditions through a bounded, quality-gated
//! validation loop:
//! - One-time scoping (target count, source enumeration)
//! - Extraction → scenario generation → measurement cycles until the quality
//!   gate passes or the cycle budget runs out
//! - One-time finalization (packaging, learning capture) after success
//! - Exactly one durable provenance log per run

pub mod adapter;
pub mod audit;
pub mod command;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod finalize;
pub mod gate;
pub mod improvement;
pub mod obs;
pub mod orchestrator;
pub mod provenance;
pub mod scoping;
pub mod telemetry;
pub mod validation_loop;

pub use adapter::{
    invoke_stage, ExtractionRequest, FinalizationRequest, GenerationRequest, MeasurementRequest,
    ScopeRequest, StageAdapter, StageFailure, StageTimeouts,
};
pub use audit::{audit_log, AuditFinding, AuditReport};
pub use command::{CommandAdapter, CommandSpec, StageCommands};
pub use config::ExpeditionConfig;
pub use domain::{
    AbortReason, ConfigError, CycleMetrics, ExpeditionError, ExpeditionLog, ExpeditionRun,
    FinalizationReport, OrchestratorState, QualityThresholds, Result, RunOutcome, StageKind,
    StageOutput, StageResult, ValidationCycle,
};
pub use gate::{evaluate_gate, GateVerdict, Shortfall};
pub use improvement::{GapFocusImprovement, ImprovementMode, ImprovementStrategy, LogOnlyImprovement};
pub use orchestrator::{ExpeditionOrchestrator, ExpeditionReport, ScopingStages};
pub use provenance::fs::FsProvenanceSink;
pub use provenance::memory::MemoryProvenanceSink;
pub use provenance::{ContentDigest, ProvenanceRecorder, ProvenanceSink, StorageError};
pub use validation_loop::{LoopOutcome, LoopStages, ValidationLoop};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
