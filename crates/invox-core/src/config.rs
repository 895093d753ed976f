//! Extraction tuning configuration
//!
//! The reconciliation tolerance, dedup cap and timeouts are empirical
//! constants, so they live in a config file rather than in code.
//!
//! Config is loaded with a two-layer resolution:
//! 1. Check for override in data dir (~/.local/share/invox/config/extraction.toml)
//! 2. Fall back to embedded defaults (compiled into binary)

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/extraction.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct MoneyConfig {
    pub default_tax_rate: f64,
    pub default_currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    pub tolerance_percent: f64,
    pub tolerance_absolute: f64,
}

impl ReconcileConfig {
    /// Absolute tolerance for a given computed total: the larger of the
    /// percentage band and the flat currency-unit band.
    pub fn tolerance_for(&self, computed_total: f64) -> f64 {
        (computed_total.abs() * self.tolerance_percent / 100.0).max(self.tolerance_absolute)
    }

    pub fn within(&self, reported: f64, computed: f64) -> bool {
        (reported - computed).abs() <= self.tolerance_for(computed)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub max_line_items: usize,
    pub max_ocr_pages: usize,
    pub render_scale: f32,
    pub max_quantity: f64,
    pub max_unit_price: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub request_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl ModelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Linear backoff: base, 2*base, 3*base... No jitter; retries are
    /// sequential, never concurrent attempts.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_ms * u64::from(attempt))
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }

    /// Per-call options for the model backends.
    pub fn generate_options(&self) -> crate::ai::GenerateOptions {
        crate::ai::GenerateOptions {
            temperature: self.temperature,
            max_tokens: self.max_output_tokens,
            timeout: self.request_timeout(),
        }
    }
}

/// All tuning knobs for the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    pub money: MoneyConfig,
    pub reconcile: ReconcileConfig,
    pub limits: LimitsConfig,
    pub model: ModelConfig,
}

impl ExtractionConfig {
    /// Load config, preferring the data-dir override over embedded defaults.
    pub fn load() -> Self {
        if let Some(path) = Self::override_path() {
            if path.exists() {
                match fs::read_to_string(&path).map_err(Error::from).and_then(|s| {
                    toml::from_str::<ExtractionConfig>(&s)
                        .map_err(|e| Error::InvalidData(format!("bad config {}: {}", path.display(), e)))
                }) {
                    Ok(config) => {
                        tracing::debug!(path = %path.display(), "Loaded extraction config override");
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring unreadable config override");
                    }
                }
            }
        }
        Self::embedded()
    }

    /// The compiled-in defaults. Infallible: the embedded file is validated
    /// by the test below.
    pub fn embedded() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("embedded extraction.toml is valid")
    }

    pub fn from_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::InvalidData(format!("bad config: {}", e)))
    }

    fn override_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("invox").join("config").join("extraction.toml"))
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self::embedded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_config_parses() {
        let config = ExtractionConfig::embedded();
        assert_eq!(config.money.default_tax_rate, 15.0);
        assert_eq!(config.limits.max_line_items, 20);
        assert_eq!(config.limits.max_ocr_pages, 3);
        assert_eq!(config.model.max_retries, 2);
    }

    #[test]
    fn test_tolerance_larger_of_percent_and_unit() {
        let config = ExtractionConfig::embedded();
        // 5% of 1000 = 50, larger than 1 unit
        assert_eq!(config.reconcile.tolerance_for(1000.0), 50.0);
        // 5% of 10 = 0.5, the 1-unit floor wins
        assert_eq!(config.reconcile.tolerance_for(10.0), 1.0);
    }

    #[test]
    fn test_within_tolerance() {
        let config = ExtractionConfig::embedded();
        assert!(config.reconcile.within(1049.0, 1000.0));
        assert!(!config.reconcile.within(1051.0, 1000.0));
        assert!(config.reconcile.within(10.9, 10.0));
        assert!(!config.reconcile.within(11.1, 10.0));
    }

    #[test]
    fn test_linear_retry_delay() {
        let config = ExtractionConfig::embedded();
        assert_eq!(config.model.retry_delay(1), Duration::from_millis(1000));
        assert_eq!(config.model.retry_delay(2), Duration::from_millis(2000));
    }
}
