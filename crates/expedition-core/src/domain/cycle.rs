//! Validation cycle records.

use serde::{Deserialize, Serialize};

use crate::domain::stage::StageKind;

/// Fixed-shape metrics measured at the end of every cycle. All ratios are in [0.0, 1.0].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CycleMetrics {
    pub primary_pass_rate: f64,
    pub coverage_ratio: f64,
    pub completeness_ratio: f64,
}

impl CycleMetrics {
    pub fn new(primary_pass_rate: f64, coverage_ratio: f64, completeness_ratio: f64) -> Self {
        Self {
            primary_pass_rate,
            coverage_ratio,
            completeness_ratio,
        }
    }

    /// Metrics recorded for a cycle whose generation or measurement stage failed.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Ratios that are not finite or fall outside [0.0, 1.0], by field name.
    pub fn out_of_range(&self) -> Vec<(&'static str, f64)> {
        [
            ("primary_pass_rate", self.primary_pass_rate),
            ("coverage_ratio", self.coverage_ratio),
            ("completeness_ratio", self.completeness_ratio),
        ]
        .into_iter()
        .filter(|(_, v)| !v.is_finite() || !(0.0..=1.0).contains(v))
        .collect()
    }
}

/// One iteration of the extraction → generation → measurement loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationCycle {
    /// 1-based, contiguous within a run.
    pub number: u32,

    pub metrics: CycleMetrics,

    /// Duration of the extraction sub-stage in milliseconds.
    pub extraction_duration_ms: u64,

    /// Gaps surfaced by the measurement stage (or by a failed stage).
    pub gaps: Vec<String>,

    /// Improvements derived from `gaps` and applied before the next cycle.
    pub improvements: Vec<String>,

    /// Gate shortfalls for this cycle, including the minimum-cycle rule.
    pub shortfalls: Vec<String>,

    /// Loop stages that failed inside this cycle.
    pub failed_stages: Vec<StageKind>,
}

impl ValidationCycle {
    pub fn new(number: u32, metrics: CycleMetrics, extraction_duration_ms: u64) -> Self {
        Self {
            number,
            metrics,
            extraction_duration_ms,
            gaps: Vec::new(),
            improvements: Vec::new(),
            shortfalls: Vec::new(),
            failed_stages: Vec::new(),
        }
    }

    /// Whether a generation or measurement failure degraded this cycle.
    pub fn is_degraded(&self) -> bool {
        !self.failed_stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_ratios() {
        assert!(CycleMetrics::new(0.0, 1.0, 0.5).out_of_range().is_empty());

        let bad = CycleMetrics::new(1.4, -0.2, f64::NAN).out_of_range();
        let names: Vec<&str> = bad.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            vec!["primary_pass_rate", "coverage_ratio", "completeness_ratio"]
        );
        assert_eq!(bad[0].1, 1.4);
        assert!(bad[2].1.is_nan());

        let inf = CycleMetrics::new(f64::INFINITY, 1.0, 1.0).out_of_range();
        assert_eq!(inf.len(), 1);
    }

    #[test]
    fn test_degraded_cycle() {
        let mut cycle = ValidationCycle::new(1, CycleMetrics::zero(), 10);
        assert!(!cycle.is_degraded());
        cycle.failed_stages.push(StageKind::ScenarioGeneration);
        assert!(cycle.is_degraded());
    }
}
