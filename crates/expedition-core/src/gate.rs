//! Quality gate evaluator.
//!
//! Compares a cycle's [`CycleMetrics`] against [`QualityThresholds`] and
//! produces a [`GateVerdict`] listing every shortfall. The evaluator is a pure
//! function: no state, no side effects, identical inputs give identical
//! verdicts. The loop controller and the log auditor both call it.

use serde::{Deserialize, Serialize};

use crate::domain::{CycleMetrics, QualityThresholds};

/// Metric checked by the gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateMetric {
    PrimaryPassRate,
    Coverage,
    Completeness,
}

impl GateMetric {
    pub fn label(&self) -> &'static str {
        match self {
            GateMetric::PrimaryPassRate => "primary pass rate",
            GateMetric::Coverage => "coverage ratio",
            GateMetric::Completeness => "completeness ratio",
        }
    }
}

/// A single metric below its required minimum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Shortfall {
    pub metric: GateMetric,
    pub measured: f64,
    pub required: f64,
    /// Human-readable explanation.
    pub reason: String,
}

/// The outcome of evaluating one cycle's metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateVerdict {
    /// Shortfalls found (empty when passed).
    pub shortfalls: Vec<Shortfall>,
}

impl GateVerdict {
    /// Whether the gate passed (i.e., there are no shortfalls).
    pub fn passed(&self) -> bool {
        self.shortfalls.is_empty()
    }

    /// Shortfall explanations, in metric order.
    pub fn reasons(&self) -> Vec<String> {
        self.shortfalls.iter().map(|s| s.reason.clone()).collect()
    }
}

/// Evaluate `metrics` against `thresholds`. Comparisons are inclusive: a
/// metric exactly equal to its minimum passes.
pub fn evaluate_gate(metrics: &CycleMetrics, thresholds: &QualityThresholds) -> GateVerdict {
    let checks = [
        (
            GateMetric::PrimaryPassRate,
            metrics.primary_pass_rate,
            thresholds.min_pass_rate,
        ),
        (
            GateMetric::Coverage,
            metrics.coverage_ratio,
            thresholds.min_coverage,
        ),
        (
            GateMetric::Completeness,
            metrics.completeness_ratio,
            thresholds.min_completeness,
        ),
    ];

    let shortfalls = checks
        .into_iter()
        .filter_map(|(metric, measured, required)| check_metric(metric, measured, required))
        .collect();

    GateVerdict { shortfalls }
}

fn check_metric(metric: GateMetric, measured: f64, required: f64) -> Option<Shortfall> {
    // NaN never satisfies `>=`, so an unmeasurable metric is a shortfall.
    if measured >= required {
        return None;
    }
    Some(Shortfall {
        metric,
        measured,
        required,
        reason: format!("{} {} < required {}", metric.label(), measured, required),
    })
}

/// Shortfall for a cycle that ran before the configured minimum, if any.
pub fn min_cycles_shortfall(cycle: u32, thresholds: &QualityThresholds) -> Option<String> {
    (cycle < thresholds.min_cycles).then(|| {
        format!(
            "cycle {} < minimum cycles {}",
            cycle, thresholds.min_cycles
        )
    })
}
