//! Configuration loading
//!
//! Quality workflow policy knobs come from a TOML file resolved in
//! priority order:
//! 1. Explicit path argument (highest priority)
//! 2. `AQW_CONFIG` environment variable
//! 3. `<config_dir>/aqw/config.toml`
//! 4. Compiled defaults (fallback)
//!
//! A missing file falls through to defaults; a file that exists but does
//! not parse is a configuration error.

use crate::models::AgreementMetric;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "AQW_CONFIG";

/// Task lock policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease TTL applied when the caller does not pass one explicitly
    #[serde(default = "default_ttl_seconds")]
    pub default_ttl_seconds: u64,
}

/// Agreement scoring policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgreementConfig {
    /// Metric used when the caller does not choose one
    #[serde(default = "default_metric")]
    pub default_metric: AgreementMetric,
    /// Scores below this trigger disagreement analysis
    #[serde(default = "default_low_agreement_threshold")]
    pub low_agreement_threshold: f64,
}

/// Review pipeline policy (per project)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// When enabled, submissions with agreement >= pass_threshold skip
    /// manual review levels entirely
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
    /// Review levels applied when the caller does not pass a count
    #[serde(default = "default_levels")]
    pub default_levels: u8,
}

/// Top-level AQW configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub agreement: AgreementConfig,
    #[serde(default)]
    pub review: ReviewConfig,
}

fn default_ttl_seconds() -> u64 {
    300
}

fn default_metric() -> AgreementMetric {
    AgreementMetric::PercentAgreement
}

fn default_low_agreement_threshold() -> f64 {
    0.75
}

fn default_pass_threshold() -> f64 {
    0.9
}

fn default_levels() -> u8 {
    2
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_ttl_seconds(),
        }
    }
}

impl Default for AgreementConfig {
    fn default() -> Self {
        Self {
            default_metric: default_metric(),
            low_agreement_threshold: default_low_agreement_threshold(),
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            auto_approve: false,
            pass_threshold: default_pass_threshold(),
            default_levels: default_levels(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            agreement: AgreementConfig::default(),
            review: ReviewConfig::default(),
        }
    }
}

impl QualityConfig {
    /// Load configuration following the priority order in the module
    /// docs. `explicit_path` is typically a CLI argument from the
    /// composing service.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        // Priority 1: explicit path - must exist and parse
        if let Some(path) = explicit_path {
            info!("Loading config from explicit path: {}", path.display());
            return Self::from_file(path);
        }

        // Priority 2: environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            info!("Loading config from {}: {}", CONFIG_ENV_VAR, path);
            return Self::from_file(Path::new(&path));
        }

        // Priority 3: user config directory
        if let Some(path) = default_config_path() {
            if path.exists() {
                info!("Loading config from {}", path.display());
                return Self::from_file(&path);
            }
        }

        // Priority 4: compiled defaults
        debug!("No config file found; using compiled defaults");
        Ok(Self::default())
    }

    /// Parse a specific TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
    }
}

/// Default configuration file path for the platform
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("aqw").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = QualityConfig::default();
        assert_eq!(config.lock.default_ttl_seconds, 300);
        assert_eq!(
            config.agreement.default_metric,
            AgreementMetric::PercentAgreement
        );
        assert_eq!(config.agreement.low_agreement_threshold, 0.75);
        assert!(!config.review.auto_approve);
        assert_eq!(config.review.pass_threshold, 0.9);
        assert_eq!(config.review.default_levels, 2);
    }

    #[test]
    fn test_from_file_full() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[lock]
default_ttl_seconds = 60

[agreement]
default_metric = "fleiss_kappa"
low_agreement_threshold = 0.8

[review]
auto_approve = true
pass_threshold = 0.95
default_levels = 3
"#
        )
        .unwrap();

        let config = QualityConfig::from_file(file.path()).unwrap();
        assert_eq!(config.lock.default_ttl_seconds, 60);
        assert_eq!(config.agreement.default_metric, AgreementMetric::FleissKappa);
        assert_eq!(config.agreement.low_agreement_threshold, 0.8);
        assert!(config.review.auto_approve);
        assert_eq!(config.review.pass_threshold, 0.95);
        assert_eq!(config.review.default_levels, 3);
    }

    #[test]
    fn test_from_file_partial_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[review]
auto_approve = true
"#
        )
        .unwrap();

        let config = QualityConfig::from_file(file.path()).unwrap();
        assert!(config.review.auto_approve);
        // Unspecified sections and fields fall back to defaults
        assert_eq!(config.review.pass_threshold, 0.9);
        assert_eq!(config.lock.default_ttl_seconds, 300);
    }

    #[test]
    fn test_from_file_missing_is_error() {
        let result = QualityConfig::from_file(Path::new("/nonexistent/aqw.toml"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_file_malformed_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not valid toml [[[").unwrap();

        let result = QualityConfig::from_file(file.path());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_explicit_path_wins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[lock]\ndefault_ttl_seconds = 42\n").unwrap();

        let config = QualityConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.lock.default_ttl_seconds, 42);
    }
}
