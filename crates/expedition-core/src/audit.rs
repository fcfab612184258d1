//! Offline re-check of a recorded [`ExpeditionLog`].
//!
//! The auditor never re-runs a stage. It re-evaluates every recorded cycle
//! with the gate evaluator (against the log's own thresholds or an override)
//! and checks that the structure and outcome of the log are consistent with
//! those verdicts. A log that was edited after the fact, or one judged under
//! stricter thresholds, produces findings.

use serde::{Deserialize, Serialize};

use crate::domain::{ExpeditionLog, QualityThresholds, RunOutcome, LOG_SCHEMA_VERSION};
use crate::gate::evaluate_gate;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Re-evaluated verdict for one recorded cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleAudit {
    pub number: u32,
    pub passed: bool,
    pub shortfalls: Vec<String>,
}

/// An inconsistency found in a log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditFinding {
    UnsupportedSchema { found: u32 },
    NonContiguousCycle { expected: u32, actual: u32 },
    CycleBudgetExceeded { cycles: u32, max_cycles: u32 },
    /// Success recorded but the final cycle does not pass.
    SuccessWithoutPassingCycle { cycle: Option<u32> },
    /// A cycle before the last one already passed, so the loop should have stopped.
    PassedCycleNotFinal { cycle: u32 },
    /// Failure recorded but the cycle budget was not used up, or a cycle passed.
    FailedOutcomeInconsistent { cycles: u32, max_cycles: u32 },
    /// A gate shortfall recomputed from the metrics is missing from the record.
    MissingShortfall { cycle: u32, shortfall: String },
    FinalMetricsMismatch,
}

impl std::fmt::Display for AuditFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditFinding::UnsupportedSchema { found } => write!(
                f,
                "schema version {} (expected {})",
                found, LOG_SCHEMA_VERSION
            ),
            AuditFinding::NonContiguousCycle { expected, actual } => {
                write!(f, "cycle {} recorded where {} was expected", actual, expected)
            }
            AuditFinding::CycleBudgetExceeded { cycles, max_cycles } => {
                write!(f, "{} cycles recorded, max_cycles is {}", cycles, max_cycles)
            }
            AuditFinding::SuccessWithoutPassingCycle { cycle: Some(n) } => {
                write!(f, "outcome is success but cycle {} does not pass", n)
            }
            AuditFinding::SuccessWithoutPassingCycle { cycle: None } => {
                write!(f, "outcome is success but no cycle was recorded")
            }
            AuditFinding::PassedCycleNotFinal { cycle } => {
                write!(f, "cycle {} passes but the loop continued", cycle)
            }
            AuditFinding::FailedOutcomeInconsistent { cycles, max_cycles } => write!(
                f,
                "outcome is failed after {} of {} cycles",
                cycles, max_cycles
            ),
            AuditFinding::MissingShortfall { cycle, shortfall } => {
                write!(f, "cycle {} is missing shortfall '{}'", cycle, shortfall)
            }
            AuditFinding::FinalMetricsMismatch => {
                write!(f, "final metrics differ from the last cycle")
            }
        }
    }
}

/// Result of auditing one log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub thresholds: QualityThresholds,
    pub cycles: Vec<CycleAudit>,
    pub findings: Vec<AuditFinding>,
}

impl AuditReport {
    /// True when no finding was raised.
    pub fn is_consistent(&self) -> bool {
        self.findings.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Auditor
// ---------------------------------------------------------------------------

/// Audit `log` against `thresholds`, or against the thresholds it was run with.
pub fn audit_log(log: &ExpeditionLog, thresholds: Option<&QualityThresholds>) -> AuditReport {
    let thresholds = thresholds.copied().unwrap_or(log.thresholds);
    let recorded_thresholds = thresholds == log.thresholds;
    let mut findings = Vec::new();

    if log.schema_version != LOG_SCHEMA_VERSION {
        findings.push(AuditFinding::UnsupportedSchema {
            found: log.schema_version,
        });
    }

    let mut cycles = Vec::with_capacity(log.cycles.len());
    for (index, cycle) in log.cycles.iter().enumerate() {
        let expected = index as u32 + 1;
        if cycle.number != expected {
            findings.push(AuditFinding::NonContiguousCycle {
                expected,
                actual: cycle.number,
            });
        }

        let verdict = evaluate_gate(&cycle.metrics, &thresholds);
        let reasons = verdict.reasons();
        if recorded_thresholds {
            for reason in &reasons {
                if !cycle.shortfalls.contains(reason) {
                    findings.push(AuditFinding::MissingShortfall {
                        cycle: cycle.number,
                        shortfall: reason.clone(),
                    });
                }
            }
        }

        cycles.push(CycleAudit {
            number: cycle.number,
            passed: verdict.passed()
                && !cycle.is_degraded()
                && cycle.number >= thresholds.min_cycles,
            shortfalls: reasons,
        });
    }

    let count = log.cycles.len() as u32;
    if count > thresholds.max_cycles {
        findings.push(AuditFinding::CycleBudgetExceeded {
            cycles: count,
            max_cycles: thresholds.max_cycles,
        });
    }

    // Every cycle but the last must fail, or the loop would have stopped there.
    if let Some((_, earlier)) = cycles.split_last() {
        for cycle in earlier.iter().filter(|c| c.passed) {
            findings.push(AuditFinding::PassedCycleNotFinal {
                cycle: cycle.number,
            });
        }
    }

    let last = cycles.last();
    match log.outcome {
        RunOutcome::Success => {
            if !last.map_or(false, |c| c.passed) {
                findings.push(AuditFinding::SuccessWithoutPassingCycle {
                    cycle: last.map(|c| c.number),
                });
            }
        }
        RunOutcome::Failed => {
            if count != thresholds.max_cycles || last.map_or(false, |c| c.passed) {
                findings.push(AuditFinding::FailedOutcomeInconsistent {
                    cycles: count,
                    max_cycles: thresholds.max_cycles,
                });
            }
        }
        RunOutcome::Aborted => {}
    }

    if log.final_metrics != log.cycles.last().map(|c| c.metrics) {
        findings.push(AuditFinding::FinalMetricsMismatch);
    }

    AuditReport {
        run_id: log.run_id.clone(),
        outcome: log.outcome,
        thresholds,
        cycles,
        findings,
    }
}
