//! Domain-level error taxonomy for the expedition orchestrator.
//!
//! Stage failures are never errors: they are recorded as data on
//! [`StageResult`](crate::domain::StageResult). These variants cover
//! configuration mistakes, lifecycle misuse and provenance I/O.

use crate::domain::run::OrchestratorState;
use crate::provenance::StorageError;

/// Errors produced while validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be within [0.0, 1.0], got {value}")]
    RatioOutOfRange { field: &'static str, value: f64 },

    #[error("min_cycles must be at least 1")]
    ZeroMinCycles,

    #[error("min_cycles ({min}) must not exceed max_cycles ({max})")]
    CycleBoundsInverted { min: u32, max: u32 },

    #[error("domain name must not be empty")]
    EmptyDomain,

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Expedition domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ExpeditionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: OrchestratorState,
        to: OrchestratorState,
    },

    #[error("run {0} is sealed and can no longer be modified")]
    RunSealed(String),

    #[error("run {0} has not reached a terminal state")]
    RunNotTerminal(String),

    #[error("cycle out of order: expected {expected}, got {actual}")]
    CycleOutOfOrder { expected: u32, actual: u32 },

    #[error("provenance error: {0}")]
    Provenance(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for expedition domain operations.
pub type Result<T> = std::result::Result<T, ExpeditionError>;
