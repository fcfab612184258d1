//! Quality thresholds consumed by the gate evaluator.

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

/// Pass/fail criteria for a validation cycle plus the loop's iteration budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QualityThresholds {
    /// Minimum primary pass rate (0.0–1.0).
    pub min_pass_rate: f64,

    /// Minimum coverage ratio (0.0–1.0).
    pub min_coverage: f64,

    /// Minimum completeness ratio (0.0–1.0).
    pub min_completeness: f64,

    /// Cycles that must run before the loop may stop successfully.
    pub min_cycles: u32,

    /// Hard upper bound on cycles.
    pub max_cycles: u32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_pass_rate: 0.95,
            min_coverage: 0.95,
            min_completeness: 0.90,
            min_cycles: 3,
            max_cycles: 5,
        }
    }
}

impl QualityThresholds {
    /// Override the cycle bounds.
    pub fn with_cycles(mut self, min_cycles: u32, max_cycles: u32) -> Self {
        self.min_cycles = min_cycles;
        self.max_cycles = max_cycles;
        self
    }

    /// Check the invariants: ratios in [0.0, 1.0], `1 <= min_cycles <= max_cycles`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("min_pass_rate", self.min_pass_rate),
            ("min_coverage", self.min_coverage),
            ("min_completeness", self.min_completeness),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::RatioOutOfRange { field, value });
            }
        }
        if self.min_cycles == 0 {
            return Err(ConfigError::ZeroMinCycles);
        }
        if self.min_cycles > self.max_cycles {
            return Err(ConfigError::CycleBoundsInverted {
                min: self.min_cycles,
                max: self.max_cycles,
            });
        }
        Ok(())
    }
}
