//! Structured lifecycle events for expedition runs.
//!
//! Every event carries an `event` field (`expedition.started`, `stage.finished`,
//! `gate.evaluated`, `cycle.recorded`, `expedition.finished`,
//! `provenance.written`) so log pipelines can filter on it. Use
//! [`ExpeditionSpan`] to tag everything emitted during a run with its `run_id`.

use tracing::{info, warn, Instrument};

use crate::domain::{CycleMetrics, RunOutcome, StageKind};

/// Run-scoped tracing span.
///
/// The orchestrator future is instrumented with it rather than entering a
/// guard, so the run future stays `Send` across awaits.
///
/// ```ignore
/// let span = ExpeditionSpan::new(run.run_id(), run.domain());
/// span.instrument(async { /* stages */ }).await;
/// ```
#[derive(Debug, Clone)]
pub struct ExpeditionSpan {
    span: tracing::Span,
}

impl ExpeditionSpan {
    pub fn new(run_id: &str, domain: &str) -> Self {
        Self {
            span: tracing::info_span!("expedition.run", run_id = %run_id, domain = %domain),
        }
    }

    /// Attach the span to a future.
    pub fn instrument<F>(&self, fut: F) -> tracing::instrument::Instrumented<F>
    where
        F: std::future::Future,
    {
        fut.instrument(self.span.clone())
    }
}

pub fn emit_expedition_started(run_id: &str, domain: &str, min_cycles: u32, max_cycles: u32) {
    info!(
        event = "expedition.started",
        run_id = %run_id,
        domain = %domain,
        min_cycles = min_cycles,
        max_cycles = max_cycles,
    );
}

/// Emit event: one stage adapter call completed (successfully or not).
pub fn emit_stage_finished(stage: StageKind, cycle: Option<u32>, success: bool, duration_ms: u64) {
    if success {
        info!(
            event = "stage.finished",
            stage = %stage,
            cycle = cycle,
            success = success,
            duration_ms = duration_ms,
        );
    } else {
        warn!(
            event = "stage.finished",
            stage = %stage,
            cycle = cycle,
            success = success,
            duration_ms = duration_ms,
        );
    }
}

/// Emit event: quality gate evaluated for a cycle.
pub fn emit_gate_evaluated(run_id: &str, cycle: u32, metrics: &CycleMetrics, passed: bool) {
    info!(
        event = "gate.evaluated",
        run_id = %run_id,
        cycle = cycle,
        primary_pass_rate = metrics.primary_pass_rate,
        coverage_ratio = metrics.coverage_ratio,
        completeness_ratio = metrics.completeness_ratio,
        passed = passed,
    );
}

pub fn emit_cycle_recorded(run_id: &str, cycle: u32, gaps: usize) {
    info!(event = "cycle.recorded", run_id = %run_id, cycle = cycle, gaps = gaps);
}

pub fn emit_expedition_finished(run_id: &str, outcome: RunOutcome, cycles: usize, duration_ms: u64) {
    info!(
        event = "expedition.finished",
        run_id = %run_id,
        outcome = %outcome,
        cycles = cycles,
        duration_ms = duration_ms,
    );
}

pub fn emit_provenance_written(run_id: &str, digest: &str, cycles: usize) {
    info!(event = "provenance.written", run_id = %run_id, digest = %digest, cycles = cycles);
}

/// Emit event: provenance write failed (warning level).
pub fn emit_provenance_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "provenance.error", run_id = %run_id, error = %error);
}
