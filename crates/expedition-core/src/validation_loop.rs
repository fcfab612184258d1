//! Validation loop controller.
//!
//! Runs extraction → scenario generation → execution/measurement until the
//! quality gate passes (after at least `min_cycles`) or `max_cycles` is
//! exhausted. Each iteration:
//! 1. Checks the cancellation token; no new cycle starts once it is raised
//! 2. Extracts; a non-recoverable extraction failure aborts the run, a
//!    recoverable one degrades the cycle
//! 3. Generates scenarios; failures are recorded and the cycle degrades
//! 4. Measures; failures and invalid metrics are recorded and the cycle degrades
//! 5. Appends a [`ValidationCycle`] and evaluates the gate
//! 6. Stops on pass or exhaustion, otherwise derives improvements and repeats

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapter::{
    invoke_stage, ExtractionRequest, Executor, Extractor, GenerationRequest, MeasurementRequest,
    ScenarioGenerator, StageInvocation, StageTimeouts,
};
use crate::domain::{
    AbortReason, CycleMetrics, ExpeditionRun, Result, StageKind, StageResult, ValidationCycle,
};
use crate::gate::{evaluate_gate, min_cycles_shortfall};
use crate::improvement::ImprovementStrategy;

/// The three adapters driven by the loop.
#[derive(Clone)]
pub struct LoopStages {
    pub extractor: Arc<Extractor>,
    pub generator: Arc<ScenarioGenerator>,
    pub executor: Arc<Executor>,
}

/// How the loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Quality gates passed on cycle `cycles`.
    Passed { cycles: u32 },
    /// `max_cycles` ran without passing.
    Exhausted { cycles: u32 },
    /// Fatal failure or cancellation.
    Aborted(AbortReason),
}

/// Drives the bounded, quality-gated retry loop for one run.
pub struct ValidationLoop<'a> {
    stages: &'a LoopStages,
    improvement: &'a dyn ImprovementStrategy,
    timeouts: StageTimeouts,
}

impl<'a> ValidationLoop<'a> {
    pub fn new(
        stages: &'a LoopStages,
        improvement: &'a dyn ImprovementStrategy,
        timeouts: StageTimeouts,
    ) -> Self {
        Self {
            stages,
            improvement,
            timeouts,
        }
    }

    /// Run the loop, appending stage results and cycles to `run`.
    ///
    /// Errors are returned only for lifecycle misuse (e.g. a sealed run);
    /// stage failures are reflected in the returned [`LoopOutcome`].
    pub async fn run(
        &self,
        run: &mut ExpeditionRun,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome> {
        let thresholds = *run.thresholds();
        let domain = run.domain().to_string();
        let target_count = run.target_count().unwrap_or(0);
        let sources = run.sources().to_vec();
        let mut improvements: Vec<String> = Vec::new();
        let mut cycle: u32 = 1;

        loop {
            if cancel.is_cancelled() {
                info!(cycle = cycle, "Cancellation requested, not starting cycle");
                return Ok(LoopOutcome::Aborted(AbortReason::Cancelled {
                    completed_cycles: cycle - 1,
                }));
            }

            info!("=== Cycle {} of {} ===", cycle, thresholds.max_cycles);

            // Extraction: fatal unless the adapter reports the failure as recoverable.
            let request = ExtractionRequest {
                domain: domain.clone(),
                cycle,
                target_count,
                sources: sources.clone(),
                improvements: std::mem::take(&mut improvements),
            };
            let StageInvocation {
                result: extraction_result,
                output: extracted,
            } = invoke_stage(
                self.stages.extractor.as_ref(),
                &request,
                Some(cycle),
                self.timeouts.for_stage(StageKind::Extraction),
            )
            .await;

            let mut record =
                ValidationCycle::new(cycle, CycleMetrics::zero(), extraction_result.duration_ms);

            if extracted.is_none() && !extraction_result.recoverable {
                let errors = extraction_result.errors.clone();
                warn!(cycle = cycle, errors = ?errors, "Extraction failed, aborting run");
                let stage = StageKind::Extraction;
                let reason = if extraction_result.timed_out {
                    AbortReason::StageTimedOut { stage, errors }
                } else {
                    AbortReason::StageFailed { stage, errors }
                };
                run.push_stage(extraction_result)?;
                return Ok(LoopOutcome::Aborted(reason));
            }
            if extracted.is_none() {
                mark_failed(&mut record, &extraction_result);
            }
            run.push_stage(extraction_result)?;

            if let Some(extracted) = extracted {
                let request = GenerationRequest {
                    domain: domain.clone(),
                    cycle,
                    target_count,
                    extraction: extracted,
                };
                if let Some(reason) = self.generate_and_measure(run, &mut record, request).await? {
                    return Ok(LoopOutcome::Aborted(reason));
                }
            }

            // Gate verdict.
            let verdict = evaluate_gate(&record.metrics, &thresholds);
            let mut shortfalls = verdict.reasons();
            shortfalls.extend(
                record
                    .failed_stages
                    .iter()
                    .map(|stage| format!("stage '{}' failed", stage)),
            );
            shortfalls.extend(min_cycles_shortfall(cycle, &thresholds));
            let passed =
                verdict.passed() && !record.is_degraded() && cycle >= thresholds.min_cycles;

            crate::obs::emit_gate_evaluated(run.run_id(), cycle, &record.metrics, passed);
            crate::obs::emit_cycle_recorded(run.run_id(), cycle, record.gaps.len());

            record.shortfalls = shortfalls;
            run.push_cycle(record)?;

            if passed {
                info!(cycle = cycle, "Quality gates passed");
                return Ok(LoopOutcome::Passed { cycles: cycle });
            }
            if cycle >= thresholds.max_cycles {
                warn!(cycle = cycle, "Quality gates not met, cycle budget exhausted");
                return Ok(LoopOutcome::Exhausted { cycles: cycle });
            }

            let derived = match run.last_cycle() {
                Some(last) => self.improvement.derive(last).await,
                None => Vec::new(),
            };
            info!(
                cycle = cycle,
                strategy = self.improvement.name(),
                improvements = derived.len(),
                "Derived improvements for next cycle"
            );
            run.record_improvements(derived.clone())?;
            improvements = derived;
            cycle += 1;
        }
    }

    /// Scenario generation followed by execution/measurement for one cycle.
    ///
    /// Returns an abort reason when a timed-out stage may not be retried.
    async fn generate_and_measure(
        &self,
        run: &mut ExpeditionRun,
        record: &mut ValidationCycle,
        request: GenerationRequest,
    ) -> Result<Option<AbortReason>> {
        let cycle = record.number;
        let StageInvocation {
            result: generation_result,
            output: scenarios,
        } = invoke_stage(
            self.stages.generator.as_ref(),
            &request,
            Some(cycle),
            self.timeouts.for_stage(StageKind::ScenarioGeneration),
        )
        .await;
        let abort = self.degrade(record, &generation_result);
        run.push_stage(generation_result)?;
        if abort.is_some() {
            return Ok(abort);
        }

        // Nothing to measure without scenarios.
        let Some(scenarios) = scenarios else {
            return Ok(None);
        };

        let StageInvocation {
            result: mut measurement_result,
            output: measured,
        } = invoke_stage(
            self.stages.executor.as_ref(),
            &MeasurementRequest {
                domain: request.domain,
                cycle,
                scenarios,
            },
            Some(cycle),
            self.timeouts.for_stage(StageKind::Execution),
        )
        .await;

        if let Some(measured) = &measured {
            reject_invalid_metrics(&mut measurement_result, &measured.metrics);
        }
        let abort = self.degrade(record, &measurement_result);
        if measurement_result.success {
            if let Some(measured) = measured {
                record.metrics = measured.metrics;
                record.gaps.extend(measured.gaps);
            }
        }
        run.push_stage(measurement_result)?;
        Ok(abort)
    }

    /// Record a failed generation/measurement stage on the cycle.
    ///
    /// Returns an abort reason when the failure is a timeout and the policy
    /// does not allow retrying timed-out stages.
    fn degrade(&self, record: &mut ValidationCycle, result: &StageResult) -> Option<AbortReason> {
        if result.success {
            return None;
        }
        if result.timed_out && !self.timeouts.retry_on_timeout {
            warn!(stage = %result.stage, "Stage timed out and retry is disabled, aborting run");
            return Some(AbortReason::StageTimedOut {
                stage: result.stage,
                errors: result.errors.clone(),
            });
        }
        mark_failed(record, result);
        None
    }
}

fn mark_failed(record: &mut ValidationCycle, result: &StageResult) {
    warn!(
        stage = %result.stage,
        cycle = record.number,
        "Stage failed, cycle recorded as degraded"
    );
    record.failed_stages.push(result.stage);
    record.gaps.push(format!(
        "{} failed: {}",
        result.stage,
        result.errors.join("; ")
    ));
}

/// Turn a measurement with non-finite or out-of-range ratios into a failed stage.
///
/// The payload is dropped so the log never carries a value JSON cannot hold.
fn reject_invalid_metrics(result: &mut StageResult, metrics: &CycleMetrics) {
    let invalid = metrics.out_of_range();
    if invalid.is_empty() {
        return;
    }
    let stage = result.stage;
    result.success = false;
    result.output = None;
    result.errors = invalid
        .into_iter()
        .map(|(name, value)| format!("{} reported invalid {} {}", stage, name, value))
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QualityThresholds;
    use crate::fakes::{ScriptedExecutor, ScriptedExtractor, ScriptedGenerator};
    use crate::improvement::{GapFocusImprovement, LogOnlyImprovement};

    fn stages(executor: ScriptedExecutor) -> LoopStages {
        LoopStages {
            extractor: Arc::new(ScriptedExtractor::healthy()),
            generator: Arc::new(ScriptedGenerator::healthy()),
            executor: Arc::new(executor),
        }
    }

    fn run_with(thresholds: QualityThresholds) -> ExpeditionRun {
        let mut run = ExpeditionRun::new("checkout", thresholds);
        run.set_scope(20, vec!["specs/checkout.md".to_string()]).unwrap();
        run
    }

    #[tokio::test]
    async fn test_passing_metrics_still_wait_for_min_cycles() {
        let stages = stages(ScriptedExecutor::constant(CycleMetrics::new(1.0, 1.0, 1.0)));
        let lp = ValidationLoop::new(&stages, &LogOnlyImprovement, StageTimeouts::unbounded());
        let mut run = run_with(QualityThresholds::default());

        let outcome = lp.run(&mut run, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, LoopOutcome::Passed { cycles: 3 });
        assert_eq!(run.cycles().len(), 3);
        assert_eq!(
            run.cycles()[0].shortfalls,
            vec!["cycle 1 < minimum cycles 3".to_string()]
        );
        assert!(run.cycles()[2].shortfalls.is_empty());
    }

    #[tokio::test]
    async fn test_improvements_flow_into_next_extraction() {
        let extractor = Arc::new(ScriptedExtractor::healthy());
        let stages = LoopStages {
            extractor: extractor.clone(),
            generator: Arc::new(ScriptedGenerator::healthy()),
            executor: Arc::new(
                ScriptedExecutor::constant(CycleMetrics::new(0.5, 0.5, 0.5))
                    .with_gaps(vec!["refunds".to_string()]),
            ),
        };
        let lp = ValidationLoop::new(&stages, &GapFocusImprovement, StageTimeouts::unbounded());
        let mut run = run_with(QualityThresholds::default().with_cycles(1, 2));

        let outcome = lp.run(&mut run, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, LoopOutcome::Exhausted { cycles: 2 });

        let requests = extractor.requests();
        assert!(requests[0].improvements.is_empty());
        assert_eq!(
            requests[1].improvements,
            vec!["focus extraction on: refunds".to_string()]
        );
        assert_eq!(run.cycles()[0].improvements, requests[1].improvements);
        // The final cycle never derives improvements.
        assert!(run.cycles()[1].improvements.is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_degrades_cycle_and_continues() {
        let stages = LoopStages {
            extractor: Arc::new(ScriptedExtractor::healthy()),
            generator: Arc::new(ScriptedGenerator::failing_on(&[1])),
            executor: Arc::new(ScriptedExecutor::constant(CycleMetrics::new(1.0, 1.0, 1.0))),
        };
        let lp = ValidationLoop::new(&stages, &LogOnlyImprovement, StageTimeouts::unbounded());
        let mut run = run_with(QualityThresholds::default().with_cycles(1, 3));

        let outcome = lp.run(&mut run, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, LoopOutcome::Passed { cycles: 2 });

        let first = &run.cycles()[0];
        assert!(first.is_degraded());
        assert_eq!(first.failed_stages, vec![StageKind::ScenarioGeneration]);
        assert_eq!(first.metrics, CycleMetrics::zero());
        assert!(first
            .shortfalls
            .contains(&"stage 'scenario_generation' failed".to_string()));
        // Extraction + failed generation; measurement skipped.
        assert_eq!(
            run.stages()
                .iter()
                .filter(|s| s.cycle == Some(1))
                .count(),
            2
        );
    }

    fn execution_result(run: &ExpeditionRun, cycle: u32) -> &StageResult {
        run.stages()
            .iter()
            .find(|s| s.stage == StageKind::Execution && s.cycle == Some(cycle))
            .unwrap()
    }

    #[tokio::test]
    async fn test_out_of_range_metrics_fail_measurement() {
        let stages = stages(ScriptedExecutor::sequence(vec![
            CycleMetrics::new(1.7, 2.0, 1.3),
            CycleMetrics::new(0.97, 0.96, 0.93),
        ]));
        let lp = ValidationLoop::new(&stages, &LogOnlyImprovement, StageTimeouts::unbounded());
        let mut run = run_with(QualityThresholds::default().with_cycles(1, 2));

        let outcome = lp.run(&mut run, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, LoopOutcome::Passed { cycles: 2 });

        let first = &run.cycles()[0];
        assert_eq!(first.failed_stages, vec![StageKind::Execution]);
        assert_eq!(first.metrics, CycleMetrics::zero());
        assert!(first
            .shortfalls
            .contains(&"stage 'execution' failed".to_string()));

        let result = execution_result(&run, 1);
        assert!(!result.success);
        assert!(result.output.is_none());
        assert_eq!(
            result.errors,
            vec![
                "execution reported invalid primary_pass_rate 1.7".to_string(),
                "execution reported invalid coverage_ratio 2".to_string(),
                "execution reported invalid completeness_ratio 1.3".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_nan_metric_never_reaches_the_log() {
        let stages = stages(ScriptedExecutor::constant(CycleMetrics::new(
            f64::NAN,
            1.0,
            1.0,
        )));
        let lp = ValidationLoop::new(&stages, &LogOnlyImprovement, StageTimeouts::unbounded());
        let mut run = run_with(QualityThresholds::default().with_cycles(1, 1));

        let outcome = lp.run(&mut run, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, LoopOutcome::Exhausted { cycles: 1 });
        assert_eq!(run.cycles()[0].metrics, CycleMetrics::zero());
        assert_eq!(
            execution_result(&run, 1).errors,
            vec!["execution reported invalid primary_pass_rate NaN".to_string()]
        );
    }

    #[tokio::test]
    async fn test_recoverable_extraction_failure_degrades_cycle() {
        let stages = LoopStages {
            extractor: Arc::new(ScriptedExtractor::transient_on(&[1])),
            generator: Arc::new(ScriptedGenerator::healthy()),
            executor: Arc::new(ScriptedExecutor::constant(CycleMetrics::new(1.0, 1.0, 1.0))),
        };
        let lp = ValidationLoop::new(&stages, &LogOnlyImprovement, StageTimeouts::unbounded());
        let mut run = run_with(QualityThresholds::default().with_cycles(1, 3));

        let outcome = lp.run(&mut run, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, LoopOutcome::Passed { cycles: 2 });

        let first = &run.cycles()[0];
        assert_eq!(first.failed_stages, vec![StageKind::Extraction]);
        assert_eq!(
            first.gaps,
            vec!["extraction failed: knowledge store busy".to_string()]
        );
        // Generation and measurement are skipped after a failed extraction.
        let stages: Vec<StageKind> = run
            .stages()
            .iter()
            .filter(|s| s.cycle == Some(1))
            .map(|s| s.stage)
            .collect();
        assert_eq!(stages, vec![StageKind::Extraction]);
        assert!(run.stages()[0].recoverable);
    }

    #[tokio::test]
    async fn test_non_recoverable_extraction_failure_aborts() {
        let stages = LoopStages {
            extractor: Arc::new(ScriptedExtractor::failing_on(&[2])),
            generator: Arc::new(ScriptedGenerator::healthy()),
            executor: Arc::new(ScriptedExecutor::constant(CycleMetrics::new(0.5, 0.5, 0.5))),
        };
        let lp = ValidationLoop::new(&stages, &LogOnlyImprovement, StageTimeouts::unbounded());
        let mut run = run_with(QualityThresholds::default());

        let outcome = lp.run(&mut run, &CancellationToken::new()).await.unwrap();
        assert!(matches!(
            outcome,
            LoopOutcome::Aborted(AbortReason::StageFailed {
                stage: StageKind::Extraction,
                ..
            })
        ));
        assert_eq!(run.cycles().len(), 1);
    }
}
