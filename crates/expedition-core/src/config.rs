//! Expedition configuration loaded from TOML.
//!
//! ```toml
//! domain = "payments"
//! source_dir = "sources"
//! target_count = 25
//!
//! [thresholds]
//! min_pass_rate = 0.95
//! min_cycles = 3
//! max_cycles = 5
//!
//! [timeouts]
//! execution_secs = 1200
//! retry_on_timeout = false
//!
//! [stages.extraction]
//! program = "./bin/extract"
//! ```
//!
//! Every field has a default, so a file only needs the keys it changes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::adapter::StageTimeouts;
use crate::command::StageCommands;
use crate::domain::{ConfigError, QualityThresholds, Result};
use crate::improvement::ImprovementMode;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExpeditionConfig {
    /// Target domain the expedition builds knowledge for.
    pub domain: String,

    /// Directory enumerated for sources when `sources` is empty.
    pub source_dir: PathBuf,

    /// Where finalizers write their artifacts.
    pub output_dir: PathBuf,

    /// Root of the filesystem provenance sink.
    pub provenance_dir: PathBuf,

    /// Target output count reported by the scoping stage.
    pub target_count: u32,

    /// Explicit source list; overrides enumeration of `source_dir`.
    pub sources: Vec<String>,

    pub improvement: ImprovementMode,
    pub thresholds: QualityThresholds,
    pub timeouts: StageTimeouts,
    pub stages: StageCommands,
}

impl Default for ExpeditionConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            source_dir: PathBuf::from("sources"),
            output_dir: PathBuf::from("out"),
            provenance_dir: PathBuf::from(".expedition"),
            target_count: 10,
            sources: Vec::new(),
            improvement: ImprovementMode::default(),
            thresholds: QualityThresholds::default(),
            timeouts: StageTimeouts::default(),
            stages: StageCommands::default(),
        }
    }
}

impl ExpeditionConfig {
    /// Default configuration for `domain`.
    pub fn for_domain(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Self::default()
        }
    }

    /// Parse TOML. Does not validate.
    pub fn from_toml_str(s: &str) -> std::result::Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> std::result::Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Reject configurations that must fail before any stage runs.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.domain.trim().is_empty() {
            return Err(ConfigError::EmptyDomain);
        }
        self.thresholds.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = ExpeditionConfig::from_toml_str(
            r#"
            domain = "payments"

            [thresholds]
            max_cycles = 7

            [timeouts]
            retry_on_timeout = false

            [stages.extraction]
            program = "./extract"
            args = ["--fast"]
            "#,
        )
        .unwrap();

        assert_eq!(config.domain, "payments");
        assert_eq!(config.thresholds.max_cycles, 7);
        assert_eq!(config.thresholds.min_cycles, 3);
        assert_eq!(config.thresholds.min_pass_rate, 0.95);
        assert!(!config.timeouts.retry_on_timeout);
        assert_eq!(config.timeouts.execution_secs, 1800);
        assert_eq!(config.stages.extraction.as_ref().unwrap().args, vec!["--fast"]);
        assert!(config.stages.generation.is_none());
        assert_eq!(config.improvement, ImprovementMode::LogOnly);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_domain_rejected() {
        let err = ExpeditionConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::EmptyDomain));
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let config = ExpeditionConfig::from_toml_str(
            r#"
            domain = "payments"
            [thresholds]
            min_cycles = 6
            max_cycles = 2
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CycleBoundsInverted { min: 6, max: 2 })
        ));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = ExpeditionConfig::from_toml_str("domain = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_default_renders_and_reparses() {
        let config = ExpeditionConfig::for_domain("payments");
        let rendered = config.to_toml_string().unwrap();
        let reparsed = ExpeditionConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("expedition.toml");
        std::fs::write(&path, "domain = \"billing\"\ntarget_count = 4\n").unwrap();
        let config = ExpeditionConfig::load(&path).unwrap();
        assert_eq!(config.target_count, 4);

        std::fs::write(&path, "target_count = 4\n").unwrap();
        assert!(ExpeditionConfig::load(&path).is_err());
    }
}
