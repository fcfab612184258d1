//! Gap-driven improvement strategies applied between cycles.
//!
//! Whether gaps should automatically re-parameterise extraction or only be
//! surfaced to an operator is a deployment decision, so the step is an
//! injected [`ImprovementStrategy`]. The default, [`LogOnlyImprovement`],
//! derives nothing: gaps stay on the cycle record for a human to act on.
//! Whatever a strategy returns is recorded on the cycle and handed to the next
//! extraction call via `ExtractionRequest::improvements`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::ValidationCycle;

/// Derives improvements from a failed cycle's gaps.
#[async_trait]
pub trait ImprovementStrategy: Send + Sync {
    /// Name recorded in logs.
    fn name(&self) -> &'static str;

    /// Improvements to apply before the next cycle.
    async fn derive(&self, cycle: &ValidationCycle) -> Vec<String>;
}

/// No-op strategy: records nothing and leaves gaps for an operator.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyImprovement;

#[async_trait]
impl ImprovementStrategy for LogOnlyImprovement {
    fn name(&self) -> &'static str {
        "log_only"
    }

    async fn derive(&self, cycle: &ValidationCycle) -> Vec<String> {
        if !cycle.gaps.is_empty() {
            info!(
                cycle = cycle.number,
                gaps = cycle.gaps.len(),
                "Gaps left for operator review"
            );
        }
        Vec::new()
    }
}

/// Turns every gap into a targeted re-extraction directive.
#[derive(Debug, Clone, Copy, Default)]
pub struct GapFocusImprovement;

#[async_trait]
impl ImprovementStrategy for GapFocusImprovement {
    fn name(&self) -> &'static str {
        "gap_focus"
    }

    async fn derive(&self, cycle: &ValidationCycle) -> Vec<String> {
        let mut seen = std::collections::BTreeSet::new();
        cycle
            .gaps
            .iter()
            .map(|g| g.trim())
            .filter(|g| !g.is_empty() && seen.insert(g.to_string()))
            .map(|g| format!("focus extraction on: {}", g))
            .collect()
    }
}

/// Strategy selector used in configuration files.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementMode {
    #[default]
    LogOnly,
    GapFocus,
}

impl ImprovementMode {
    pub fn strategy(&self) -> Arc<dyn ImprovementStrategy> {
        match self {
            ImprovementMode::LogOnly => Arc::new(LogOnlyImprovement),
            ImprovementMode::GapFocus => Arc::new(GapFocusImprovement),
        }
    }
}
