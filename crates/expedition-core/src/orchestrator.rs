//! Top-level expedition state machine.
//!
//! `scoping → looping → finalizing → done`, with `aborted` reachable from the
//! first three. Scoping runs once, the validation loop is delegated to
//! [`ValidationLoop`], finalizers run once after a passing loop, and the
//! provenance recorder is awaited exactly once before [`ExpeditionOrchestrator::run`]
//! returns.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapter::{
    invoke_stage, FinalizationRequest, Finalizer, ScopeRequest, SourceEnumerator,
    StageInvocation, TargetResolver,
};
use crate::command::{CommandAdapter, CommandSpec};
use crate::config::ExpeditionConfig;
use crate::domain::{
    AbortReason, ConfigError, ExpeditionLog, ExpeditionRun, FinalizationReport,
    OrchestratorState, Result, RunOutcome, StageKind,
};
use crate::finalize::{LearningCaptureWriter, ManifestPackager};
use crate::improvement::ImprovementStrategy;
use crate::obs;
use crate::provenance::{ContentDigest, ProvenanceRecorder};
use crate::scoping::{DirectorySources, FixedTarget, StaticSources};
use crate::validation_loop::{LoopOutcome, LoopStages, ValidationLoop};

/// The two one-time scoping adapters.
#[derive(Clone)]
pub struct ScopingStages {
    pub target: Arc<TargetResolver>,
    pub sources: Arc<SourceEnumerator>,
}

impl ScopingStages {
    /// Fixed target count plus either the configured sources or a listing of `source_dir`.
    pub fn from_config(config: &ExpeditionConfig) -> Self {
        let sources: Arc<SourceEnumerator> = if config.sources.is_empty() {
            Arc::new(DirectorySources)
        } else {
            Arc::new(StaticSources::new(config.sources.clone()))
        };
        Self {
            target: Arc::new(FixedTarget::new(config.target_count)),
            sources,
        }
    }
}

/// What a completed `run` hands back: the recorded log and its digest.
#[derive(Debug, Clone, Serialize)]
pub struct ExpeditionReport {
    pub log: ExpeditionLog,
    pub digest: ContentDigest,
}

impl ExpeditionReport {
    pub fn outcome(&self) -> RunOutcome {
        self.log.outcome
    }
}

/// Drives one expedition run per call to [`run`](Self::run).
pub struct ExpeditionOrchestrator {
    config: ExpeditionConfig,
    scoping: ScopingStages,
    loop_stages: LoopStages,
    finalizers: Vec<Arc<Finalizer>>,
    improvement: Arc<dyn ImprovementStrategy>,
    recorder: ProvenanceRecorder,
}

impl ExpeditionOrchestrator {
    /// Build an orchestrator, validating the configuration first.
    ///
    /// Starts with no finalizers and the improvement strategy named in the config.
    pub fn new(
        config: ExpeditionConfig,
        scoping: ScopingStages,
        loop_stages: LoopStages,
        recorder: ProvenanceRecorder,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let improvement = config.improvement.strategy();
        Ok(Self {
            config,
            scoping,
            loop_stages,
            finalizers: Vec::new(),
            improvement,
            recorder,
        })
    }

    /// Wire every stage from configuration: command adapters for the loop,
    /// built-in finalizers unless a command replaces them.
    pub fn from_config(
        config: ExpeditionConfig,
        recorder: ProvenanceRecorder,
    ) -> std::result::Result<Self, ConfigError> {
        let stages = &config.stages;
        let loop_stages = LoopStages {
            extractor: Arc::new(CommandAdapter::new(
                StageKind::Extraction,
                required(&stages.extraction, StageKind::Extraction)?,
            )),
            generator: Arc::new(CommandAdapter::new(
                StageKind::ScenarioGeneration,
                required(&stages.generation, StageKind::ScenarioGeneration)?,
            )),
            executor: Arc::new(CommandAdapter::new(
                StageKind::Execution,
                required(&stages.execution, StageKind::Execution)?,
            )),
        };
        let packaging: Arc<Finalizer> = match &stages.packaging {
            Some(spec) => Arc::new(CommandAdapter::new(StageKind::Packaging, spec.clone())),
            None => Arc::new(ManifestPackager),
        };
        let learning: Arc<Finalizer> = match &stages.learning_capture {
            Some(spec) => Arc::new(CommandAdapter::new(StageKind::LearningCapture, spec.clone())),
            None => Arc::new(LearningCaptureWriter),
        };
        let scoping = ScopingStages::from_config(&config);

        let orchestrator = Self::new(config, scoping, loop_stages, recorder)?;
        Ok(orchestrator.with_finalizers(vec![packaging, learning]))
    }

    /// Finalizers run in the given order after a passing loop.
    pub fn with_finalizers(mut self, finalizers: Vec<Arc<Finalizer>>) -> Self {
        self.finalizers = finalizers;
        self
    }

    pub fn with_improvement(mut self, improvement: Arc<dyn ImprovementStrategy>) -> Self {
        self.improvement = improvement;
        self
    }

    pub fn config(&self) -> &ExpeditionConfig {
        &self.config
    }

    /// Execute one run to a terminal state and record its log.
    ///
    /// Stage failures, cancellation and unmet gates are reported through the
    /// log's outcome. The returned error is a provenance write failure.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ExpeditionReport> {
        let run = ExpeditionRun::new(self.config.domain.clone(), self.config.thresholds);
        let span = obs::ExpeditionSpan::new(run.run_id(), run.domain());
        span.instrument(self.run_to_completion(run, cancel)).await
    }

    async fn run_to_completion(
        &self,
        mut run: ExpeditionRun,
        cancel: CancellationToken,
    ) -> Result<ExpeditionReport> {
        let started = Instant::now();
        obs::emit_expedition_started(
            run.run_id(),
            run.domain(),
            self.config.thresholds.min_cycles,
            self.config.thresholds.max_cycles,
        );

        let (outcome, abort_reason) = self.drive(&mut run, &cancel).await?;
        if let Some(reason) = &abort_reason {
            warn!(reason = %reason, "Expedition aborted");
        }
        run.seal(outcome, abort_reason)?;
        let log = run.to_log()?;

        let digest = self.recorder.record(&log).await?;
        obs::emit_expedition_finished(
            &log.run_id,
            log.outcome,
            log.cycle_count(),
            started.elapsed().as_millis() as u64,
        );
        Ok(ExpeditionReport { log, digest })
    }

    async fn drive(
        &self,
        run: &mut ExpeditionRun,
        cancel: &CancellationToken,
    ) -> Result<(RunOutcome, Option<AbortReason>)> {
        if let Some(reason) = self.scope(run).await? {
            return Ok((RunOutcome::Aborted, Some(reason)));
        }

        run.transition(OrchestratorState::Looping)?;
        let validation = ValidationLoop::new(
            &self.loop_stages,
            self.improvement.as_ref(),
            self.config.timeouts,
        );
        match validation.run(run, cancel).await? {
            LoopOutcome::Passed { cycles } => {
                info!(cycles = cycles, "Validation passed, finalizing");
                run.transition(OrchestratorState::Finalizing)?;
                let report = self.finalize(run).await?;
                run.record_finalization(report)?;
                Ok((RunOutcome::Success, None))
            }
            LoopOutcome::Exhausted { cycles } => {
                warn!(cycles = cycles, "Validation failed after exhausting cycle budget");
                Ok((RunOutcome::Failed, None))
            }
            LoopOutcome::Aborted(reason) => Ok((RunOutcome::Aborted, Some(reason))),
        }
    }

    /// Resolve target count and sources. Returns an abort reason when there
    /// is nothing to work on.
    async fn scope(&self, run: &mut ExpeditionRun) -> Result<Option<AbortReason>> {
        let request = ScopeRequest {
            domain: run.domain().to_string(),
            source_dir: self.config.source_dir.clone(),
        };

        let StageInvocation { result, output } = invoke_stage(
            self.scoping.target.as_ref(),
            &request,
            None,
            self.config.timeouts.for_stage(StageKind::TargetResolution),
        )
        .await;
        let failure = scoping_failure(result.stage, result.timed_out, &result.errors);
        run.push_stage(result)?;
        let Some(target) = output else {
            return Ok(Some(failure));
        };
        if target.target_count == 0 {
            return Ok(Some(AbortReason::InvalidScope {
                errors: vec!["target count resolved to 0".to_string()],
            }));
        }

        let StageInvocation { result, output } = invoke_stage(
            self.scoping.sources.as_ref(),
            &request,
            None,
            self.config.timeouts.for_stage(StageKind::SourceEnumeration),
        )
        .await;
        let failure = scoping_failure(result.stage, result.timed_out, &result.errors);
        run.push_stage(result)?;
        let Some(listing) = output else {
            return Ok(Some(failure));
        };
        if listing.sources.is_empty() {
            return Ok(Some(AbortReason::InvalidScope {
                errors: vec![format!("no sources found for domain '{}'", run.domain())],
            }));
        }

        info!(
            target_count = target.target_count,
            sources = listing.sources.len(),
            "Scope resolved"
        );
        run.set_scope(target.target_count, listing.sources)?;
        Ok(None)
    }

    /// Run every finalizer in order. Failures are collected, never retried.
    async fn finalize(&self, run: &mut ExpeditionRun) -> Result<FinalizationReport> {
        let request = FinalizationRequest {
            run_id: run.run_id().to_string(),
            domain: run.domain().to_string(),
            output_dir: self.config.output_dir.clone(),
            final_metrics: run.last_cycle().map(|c| c.metrics).unwrap_or_default(),
            cycles: run.cycles().to_vec(),
        };

        let mut artifacts = Vec::new();
        let mut failed_stages = Vec::new();
        let mut errors = Vec::new();
        for finalizer in &self.finalizers {
            let stage = finalizer.kind();
            let StageInvocation { result, output } = invoke_stage(
                finalizer.as_ref(),
                &request,
                None,
                self.config.timeouts.for_stage(stage),
            )
            .await;
            match output {
                Some(out) => artifacts.extend(out.artifacts),
                None => {
                    warn!(stage = %stage, "Finalization stage failed");
                    failed_stages.push(stage);
                    errors.extend(result.errors.iter().cloned());
                }
            }
            run.push_stage(result)?;
        }

        Ok(if failed_stages.is_empty() {
            FinalizationReport::Succeeded { artifacts }
        } else {
            FinalizationReport::Failed {
                failed_stages,
                errors,
            }
        })
    }
}

fn required(
    spec: &Option<CommandSpec>,
    stage: StageKind,
) -> std::result::Result<CommandSpec, ConfigError> {
    spec.clone().ok_or_else(|| {
        ConfigError::Invalid(format!("no command configured for stage '{}'", stage))
    })
}

fn scoping_failure(stage: StageKind, timed_out: bool, errors: &[String]) -> AbortReason {
    let errors = errors.to_vec();
    if timed_out {
        AbortReason::StageTimedOut { stage, errors }
    } else {
        AbortReason::StageFailed { stage, errors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::StageCommands;
    use crate::fakes::MemoryProvenanceSink;

    fn recorder() -> ProvenanceRecorder {
        ProvenanceRecorder::new(Arc::new(MemoryProvenanceSink::new()))
    }

    #[test]
    fn test_from_config_requires_loop_commands() {
        let config = ExpeditionConfig::for_domain("payments");
        let err = ExpeditionOrchestrator::from_config(config, recorder())
            .err()
            .unwrap();
        assert!(err.to_string().contains("extraction"));
    }

    #[test]
    fn test_from_config_wires_builtin_finalizers() {
        let mut config = ExpeditionConfig::for_domain("payments");
        config.stages = StageCommands {
            extraction: Some(CommandSpec::new("extract", &[])),
            generation: Some(CommandSpec::new("generate", &[])),
            execution: Some(CommandSpec::new("execute", &[])),
            ..StageCommands::default()
        };
        let orchestrator = ExpeditionOrchestrator::from_config(config, recorder()).unwrap();
        let kinds: Vec<StageKind> = orchestrator.finalizers.iter().map(|f| f.kind()).collect();
        assert_eq!(kinds, vec![StageKind::Packaging, StageKind::LearningCapture]);
        assert_eq!(orchestrator.improvement.name(), "log_only");
    }

    #[test]
    fn test_invalid_config_rejected_before_any_stage() {
        let mut config = ExpeditionConfig::for_domain("payments");
        config.thresholds = config.thresholds.with_cycles(0, 2);
        let stages = &mut config.stages;
        stages.extraction = Some(CommandSpec::new("extract", &[]));
        stages.generation = Some(CommandSpec::new("generate", &[]));
        stages.execution = Some(CommandSpec::new("execute", &[]));
        let err = ExpeditionOrchestrator::from_config(config, recorder())
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::ZeroMinCycles));
    }
}
