// ⚙️ Analysis Configuration - every policy knob in one explicit structure
//
// Passed into each component instead of living in process-wide constants,
// so two pipelines with different policies can run side by side.

use crate::error::AnalysisError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// ROOT CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub years: YearRange,

    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub trend: TrendConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

// ============================================================================
// IDENTITY
// ============================================================================

/// How free-text names are canonicalized for matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Ordered honorific tokens stripped from the start of a name
    #[serde(default = "default_honorifics")]
    pub honorifics: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            honorifics: default_honorifics(),
        }
    }
}

fn default_honorifics() -> Vec<String> {
    vec![
        "dr.", "dr", "mr.", "mr", "mrs.", "mrs", "ms.", "ms", "prof.", "prof",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

// ============================================================================
// YEARS
// ============================================================================

/// Inclusive range of years the dataset is allowed to contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    #[serde(default = "default_first_year")]
    pub first: i32,

    #[serde(default = "default_last_year")]
    pub last: i32,
}

impl YearRange {
    pub fn new(first: i32, last: i32) -> Self {
        YearRange { first, last }
    }

    pub fn contains(&self, year: i32) -> bool {
        year >= self.first && year <= self.last
    }
}

impl Default for YearRange {
    fn default() -> Self {
        Self {
            first: default_first_year(),
            last: default_last_year(),
        }
    }
}

fn default_first_year() -> i32 {
    2013
}

fn default_last_year() -> i32 {
    2024
}

// ============================================================================
// YEARLY MAXIMUM SELECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakPolicy {
    /// Equal rates: prefer more appointments, then the earlier organization name
    LargerSampleThenName,

    /// Equal rates: prefer the earlier organization name only
    NameOnly,
}

impl Default for TieBreakPolicy {
    fn default() -> Self {
        TieBreakPolicy::LargerSampleThenName
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Volume floor: org-years with fewer appointments can't win a year
    #[serde(default = "default_min_total")]
    pub min_total: u64,

    #[serde(default)]
    pub tie_break: TieBreakPolicy,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            min_total: default_min_total(),
            tie_break: TieBreakPolicy::default(),
        }
    }
}

fn default_min_total() -> u64 {
    1
}

// ============================================================================
// TREND
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendConfig {
    /// Confidence level for the slope interval (default: 0.95)
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,

    /// p-value below which a slope counts as significant (default: 0.05)
    #[serde(default = "default_significance_level")]
    pub significance_level: f64,

    /// Minimum number of valid annual points (never below 3)
    #[serde(default = "default_min_points")]
    pub min_points: usize,

    /// |standardized residual| above this flags an outlier (default: 2.0)
    #[serde(default = "default_outlier_threshold")]
    pub outlier_threshold: f64,

    #[serde(default)]
    pub strength: StrengthThresholds,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            confidence_level: default_confidence_level(),
            significance_level: default_significance_level(),
            min_points: default_min_points(),
            outlier_threshold: default_outlier_threshold(),
            strength: StrengthThresholds::default(),
        }
    }
}

fn default_confidence_level() -> f64 {
    0.95
}

fn default_significance_level() -> f64 {
    0.05
}

fn default_min_points() -> usize {
    3
}

fn default_outlier_threshold() -> f64 {
    2.0
}

/// Buckets on |slope|, in the units of the fitted proportion per year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrengthThresholds {
    #[serde(default = "default_negligible_below")]
    pub negligible_below: f64,

    #[serde(default = "default_weak_below")]
    pub weak_below: f64,

    /// At or above this the trend is "strong"
    #[serde(default = "default_moderate_below")]
    pub moderate_below: f64,
}

impl Default for StrengthThresholds {
    fn default() -> Self {
        Self {
            negligible_below: default_negligible_below(),
            weak_below: default_weak_below(),
            moderate_below: default_moderate_below(),
        }
    }
}

fn default_negligible_below() -> f64 {
    0.1
}

fn default_weak_below() -> f64 {
    0.5
}

fn default_moderate_below() -> f64 {
    1.0
}

// ============================================================================
// PIPELINE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// OR the derived reappointment flag with the loader's source flag
    #[serde(default)]
    pub reconcile_source_flags: bool,
}

// ============================================================================
// LOADING & VALIDATION
// ============================================================================

impl AnalysisConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AnalysisConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), AnalysisError> {
        if self.years.first > self.years.last {
            return Err(AnalysisError::InvalidConfig(format!(
                "years.first ({}) is after years.last ({})",
                self.years.first, self.years.last
            )));
        }

        let trend = &self.trend;
        if !(trend.confidence_level > 0.0 && trend.confidence_level < 1.0) {
            return Err(AnalysisError::InvalidConfig(format!(
                "trend.confidence_level must be in (0, 1), got {}",
                trend.confidence_level
            )));
        }

        if !(trend.significance_level > 0.0 && trend.significance_level < 1.0) {
            return Err(AnalysisError::InvalidConfig(format!(
                "trend.significance_level must be in (0, 1), got {}",
                trend.significance_level
            )));
        }

        if trend.min_points < 3 {
            return Err(AnalysisError::InvalidConfig(format!(
                "trend.min_points must be at least 3, got {}",
                trend.min_points
            )));
        }

        if trend.outlier_threshold <= 0.0 {
            return Err(AnalysisError::InvalidConfig(
                "trend.outlier_threshold must be positive".to_string(),
            ));
        }

        let s = &trend.strength;
        if !(0.0 <= s.negligible_below
            && s.negligible_below <= s.weak_below
            && s.weak_below <= s.moderate_below)
        {
            return Err(AnalysisError::InvalidConfig(
                "trend.strength thresholds must be non-negative and ascending".to_string(),
            ));
        }

        Ok(())
    }

    /// Default configuration rendered as TOML (for `init-config`)
    pub fn default_toml() -> String {
        toml::to_string_pretty(&AnalysisConfig::default()).unwrap_or_default()
    }
}

// ============================================================================
// TESTS
// ============================================================================
