//! Configuration module for drumdag
//!
//! `DatasetConfig` holds every knob of the drums dataset run: the eval
//! split, the partition seed, quantization and extraction parameters, and
//! driver behaviour. It is read from a TOML file; every field has a default,
//! so a partial (or missing) file is fine.
//!
//! # Config Location
//!
//! Without `--config`, the file is looked up in the platform config dir:
//! - **Linux**: `~/.config/drumdag/config.toml`
//! - **macOS**: `~/Library/Application Support/drumdag/config.toml`
//! - **Windows**: `%APPDATA%\drumdag\config.toml`
//!
//! # Example
//!
//! ```toml
//! eval_ratio = 0.1
//! seed = 42
//!
//! [extractor]
//! min_bars = 7
//! max_steps = 512
//! gap_bars = 1.0
//! ```

use crate::error::{DrumDagError, Result};
use crate::music::stages::drums_extractor::{DEFAULT_GAP_BARS, DEFAULT_MAX_STEPS, DEFAULT_MIN_BARS};
use crate::music::stages::quantizer::DEFAULT_STEPS_PER_QUARTER;
use crate::pipeline::driver::FailurePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "drumdag";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default fraction of input set aside for evaluation
pub const DEFAULT_EVAL_RATIO: f64 = 0.1;

/// Default number of records between sink flushes
pub const DEFAULT_FLUSH_EVERY: u64 = 1000;

// ==================== Config Location ====================

/// Get the drumdag config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Dataset Config ====================

/// Drum track extraction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Tracks shorter than this many bars are discarded
    #[serde(default = "default_min_bars")]
    pub min_bars: u32,

    /// Tracks longer than this many steps are truncated (0 = no limit)
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,

    /// Silence of at least this many bars splits tracks
    #[serde(default = "default_gap_bars")]
    pub gap_bars: f64,
}

fn default_min_bars() -> u32 {
    DEFAULT_MIN_BARS
}

fn default_max_steps() -> u64 {
    DEFAULT_MAX_STEPS
}

fn default_gap_bars() -> f64 {
    DEFAULT_GAP_BARS
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_bars: DEFAULT_MIN_BARS,
            max_steps: DEFAULT_MAX_STEPS,
            gap_bars: DEFAULT_GAP_BARS,
        }
    }
}

/// Serial driver behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Flush sinks every N records (0 = only on close)
    #[serde(default = "default_flush_every")]
    pub flush_every: u64,

    /// What to do when a stage fails on a record
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_flush_every() -> u64 {
    DEFAULT_FLUSH_EVERY
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            flush_every: DEFAULT_FLUSH_EVERY,
            failure_policy: FailurePolicy::Skip,
        }
    }
}

/// Complete configuration of a dataset run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Fraction of input set aside for the eval set
    #[serde(default = "default_eval_ratio")]
    pub eval_ratio: f64,

    /// Seed for the train/eval partition
    #[serde(default)]
    pub seed: u64,

    /// Quantization resolution
    #[serde(default = "default_steps_per_quarter")]
    pub steps_per_quarter: u32,

    #[serde(default)]
    pub extractor: ExtractorConfig,

    #[serde(default)]
    pub driver: DriverConfig,
}

fn default_eval_ratio() -> f64 {
    DEFAULT_EVAL_RATIO
}

fn default_steps_per_quarter() -> u32 {
    DEFAULT_STEPS_PER_QUARTER
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            eval_ratio: DEFAULT_EVAL_RATIO,
            seed: 0,
            steps_per_quarter: DEFAULT_STEPS_PER_QUARTER,
            extractor: ExtractorConfig::default(),
            driver: DriverConfig::default(),
        }
    }
}

impl DatasetConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DrumDagError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            DrumDagError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, returning defaults when the file is
    /// absent or unreadable
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DrumDagError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| DrumDagError::Config(format!("Failed to write config: {}", e)))
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.eval_ratio) {
            return Err(DrumDagError::Config(format!(
                "eval_ratio must be in [0, 1], got {}",
                self.eval_ratio
            )));
        }
        if self.steps_per_quarter == 0 {
            return Err(DrumDagError::Config(
                "steps_per_quarter must be positive".to_string(),
            ));
        }
        if !self.extractor.gap_bars.is_finite() || self.extractor.gap_bars < 0.0 {
            return Err(DrumDagError::Config(format!(
                "gap_bars must be non-negative, got {}",
                self.extractor.gap_bars
            )));
        }
        Ok(())
    }
}
