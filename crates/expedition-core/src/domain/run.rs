//! Expedition run lifecycle and the provenance log derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::cycle::{CycleMetrics, ValidationCycle};
use crate::domain::error::{ExpeditionError, Result};
use crate::domain::stage::{StageKind, StageResult};
use crate::domain::thresholds::QualityThresholds;

/// Log format version written into every [`ExpeditionLog`].
pub const LOG_SCHEMA_VERSION: u32 = 1;

/// Orchestrator state machine.
///
/// `Scoping → Looping → Finalizing → Done`, with `Aborted` reachable from the
/// first three. `Done` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Scoping,
    Looping,
    Finalizing,
    Done,
    Aborted,
}

impl OrchestratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrchestratorState::Done | OrchestratorState::Aborted)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: OrchestratorState) -> bool {
        use OrchestratorState::*;
        matches!(
            (self, next),
            (Scoping, Looping)
                | (Scoping, Aborted)
                | (Looping, Finalizing)
                | (Looping, Done)
                | (Looping, Aborted)
                | (Finalizing, Done)
                | (Finalizing, Aborted)
        )
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Quality gates passed.
    Success,
    /// Quality gates not met after the cycle budget was exhausted.
    Failed,
    /// Fatal error or cancellation.
    Aborted,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Success => f.write_str("success"),
            RunOutcome::Failed => f.write_str("failed"),
            RunOutcome::Aborted => f.write_str("aborted"),
        }
    }
}

/// Why a run was aborted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// Scoping produced missing or invalid input.
    InvalidScope { errors: Vec<String> },

    /// A stage reported a non-recoverable failure.
    StageFailed { stage: StageKind, errors: Vec<String> },

    /// A stage exceeded its timeout and the policy does not allow retry.
    StageTimedOut { stage: StageKind, errors: Vec<String> },

    /// Cancellation was requested; no new cycle was started.
    Cancelled { completed_cycles: u32 },
}

impl AbortReason {
    /// Error list propagated to the caller.
    pub fn errors(&self) -> Vec<String> {
        match self {
            AbortReason::InvalidScope { errors }
            | AbortReason::StageFailed { errors, .. }
            | AbortReason::StageTimedOut { errors, .. } => errors.clone(),
            AbortReason::Cancelled { completed_cycles } => {
                vec![format!("cancelled after {} cycle(s)", completed_cycles)]
            }
        }
    }
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::InvalidScope { errors } => {
                write!(f, "invalid scoping input: {}", errors.join("; "))
            }
            AbortReason::StageFailed { stage, errors } => {
                write!(f, "stage '{}' failed: {}", stage, errors.join("; "))
            }
            AbortReason::StageTimedOut { stage, .. } => write!(f, "stage '{}' timed out", stage),
            AbortReason::Cancelled { completed_cycles } => {
                write!(f, "cancelled after {} cycle(s)", completed_cycles)
            }
        }
    }
}

/// Status of the one-time finalization stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FinalizationReport {
    #[default]
    NotRun,
    Succeeded {
        artifacts: Vec<String>,
    },
    Failed {
        failed_stages: Vec<StageKind>,
        errors: Vec<String>,
    },
}

impl FinalizationReport {
    pub fn is_failed(&self) -> bool {
        matches!(self, FinalizationReport::Failed { .. })
    }
}

/// One invocation of the orchestrator for a target domain.
///
/// Mutated by the orchestrator as stages complete; once [`ExpeditionRun::seal`]
/// sets the completion timestamp every further mutation is rejected.
#[derive(Debug, Clone)]
pub struct ExpeditionRun {
    run_id: String,
    domain: String,
    thresholds: QualityThresholds,
    target_count: Option<u32>,
    sources: Vec<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    state: OrchestratorState,
    outcome: Option<RunOutcome>,
    abort_reason: Option<AbortReason>,
    finalization: FinalizationReport,
    stages: Vec<StageResult>,
    cycles: Vec<ValidationCycle>,
}

impl ExpeditionRun {
    /// Start a new run in the `Scoping` state with a fresh run identifier.
    pub fn new(domain: impl Into<String>, thresholds: QualityThresholds) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            domain: domain.into(),
            thresholds,
            target_count: None,
            sources: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            state: OrchestratorState::Scoping,
            outcome: None,
            abort_reason: None,
            finalization: FinalizationReport::NotRun,
            stages: Vec::new(),
            cycles: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn target_count(&self) -> Option<u32> {
        self.target_count
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn stages(&self) -> &[StageResult] {
        &self.stages
    }

    pub fn cycles(&self) -> &[ValidationCycle] {
        &self.cycles
    }

    pub fn last_cycle(&self) -> Option<&ValidationCycle> {
        self.cycles.last()
    }

    pub fn is_sealed(&self) -> bool {
        self.completed_at.is_some()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_sealed() {
            return Err(ExpeditionError::RunSealed(self.run_id.clone()));
        }
        Ok(())
    }

    /// Move the state machine forward, rejecting illegal transitions.
    pub fn transition(&mut self, next: OrchestratorState) -> Result<()> {
        self.ensure_open()?;
        if !self.state.can_transition_to(next) {
            return Err(ExpeditionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Record the scope resolved during `Scoping`.
    pub fn set_scope(&mut self, target_count: u32, sources: Vec<String>) -> Result<()> {
        self.ensure_open()?;
        self.target_count = Some(target_count);
        self.sources = sources;
        Ok(())
    }

    pub fn push_stage(&mut self, result: StageResult) -> Result<()> {
        self.ensure_open()?;
        self.stages.push(result);
        Ok(())
    }

    /// Append a cycle. Cycle numbers must be contiguous starting at 1.
    pub fn push_cycle(&mut self, cycle: ValidationCycle) -> Result<()> {
        self.ensure_open()?;
        let expected = self.cycles.len() as u32 + 1;
        if cycle.number != expected {
            return Err(ExpeditionError::CycleOutOfOrder {
                expected,
                actual: cycle.number,
            });
        }
        self.cycles.push(cycle);
        Ok(())
    }

    /// Record the shortfalls the gate reported for the latest cycle.
    pub fn record_shortfalls(&mut self, shortfalls: Vec<String>) -> Result<()> {
        self.ensure_open()?;
        if let Some(cycle) = self.cycles.last_mut() {
            cycle.shortfalls = shortfalls;
        }
        Ok(())
    }

    /// Record the improvements applied after the latest cycle.
    pub fn record_improvements(&mut self, improvements: Vec<String>) -> Result<()> {
        self.ensure_open()?;
        if let Some(cycle) = self.cycles.last_mut() {
            cycle.improvements = improvements;
        }
        Ok(())
    }

    pub fn record_finalization(&mut self, report: FinalizationReport) -> Result<()> {
        self.ensure_open()?;
        self.finalization = report;
        Ok(())
    }

    /// Enter the terminal state and set the completion timestamp.
    ///
    /// `Aborted` outcomes move to `OrchestratorState::Aborted`, everything else
    /// to `OrchestratorState::Done`.
    pub fn seal(&mut self, outcome: RunOutcome, abort_reason: Option<AbortReason>) -> Result<()> {
        let terminal = match outcome {
            RunOutcome::Aborted => OrchestratorState::Aborted,
            RunOutcome::Success | RunOutcome::Failed => OrchestratorState::Done,
        };
        self.transition(terminal)?;
        self.outcome = Some(outcome);
        self.abort_reason = abort_reason;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Derive the provenance log. Fails until the run is sealed.
    pub fn to_log(&self) -> Result<ExpeditionLog> {
        let (Some(completed_at), Some(outcome)) = (self.completed_at, self.outcome) else {
            return Err(ExpeditionError::RunNotTerminal(self.run_id.clone()));
        };
        Ok(ExpeditionLog {
            schema_version: LOG_SCHEMA_VERSION,
            run_id: self.run_id.clone(),
            domain: self.domain.clone(),
            target_count: self.target_count,
            sources: self.sources.clone(),
            thresholds: self.thresholds,
            started_at: self.started_at,
            completed_at,
            terminal_state: self.state,
            outcome,
            abort_reason: self.abort_reason.clone(),
            final_metrics: self.cycles.last().map(|c| c.metrics),
            finalization: self.finalization.clone(),
            stages: self.stages.clone(),
            cycles: self.cycles.clone(),
        })
    }
}

/// Durable provenance artifact for a terminal run. Written once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpeditionLog {
    pub schema_version: u32,
    pub run_id: String,
    pub domain: String,
    pub target_count: Option<u32>,
    pub sources: Vec<String>,
    pub thresholds: QualityThresholds,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub terminal_state: OrchestratorState,
    pub outcome: RunOutcome,
    pub abort_reason: Option<AbortReason>,
    pub final_metrics: Option<CycleMetrics>,
    pub finalization: FinalizationReport,
    pub stages: Vec<StageResult>,
    pub cycles: Vec<ValidationCycle>,
}

impl ExpeditionLog {
    pub fn cycle_count(&self) -> usize {
        self.cycles.len()
    }

    /// Whether the validation loop passed its quality gates.
    pub fn validation_passed(&self) -> bool {
        self.outcome == RunOutcome::Success
    }

    /// Shortfalls of the final cycle (empty on success or when no cycle ran).
    pub fn final_shortfalls(&self) -> &[String] {
        self.cycles
            .last()
            .map(|c| c.shortfalls.as_slice())
            .unwrap_or(&[])
    }

    /// Stage results recorded for one cycle, in execution order.
    pub fn stages_for_cycle(&self, number: u32) -> impl Iterator<Item = &StageResult> {
        self.stages.iter().filter(move |s| s.cycle == Some(number))
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
