// 🚨 Error Taxonomy - what can go wrong while analyzing appointments
//
// Two classes:
// - Exclusions (missing field, unparseable year, degenerate identity) are
//   recovered locally: the record is filtered and the reason is kept so the
//   caller can report data quality.
// - Fatal errors (insufficient data, invalid config) are returned to the caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ============================================================================
// ANALYSIS ERROR
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnalysisError {
    /// A record lacks a field some aggregation step needs
    #[error("record {record_index} is missing required field `{field}`")]
    MissingField { record_index: usize, field: String },

    /// Year is present but is not an integer inside the configured range
    #[error("record {record_index} has unparseable year {raw:?}")]
    UnparseableYear { record_index: usize, raw: String },

    /// Trend estimation needs more annual points than were supplied
    #[error("insufficient data for trend estimation: {valid} usable points, at least {required} required")]
    InsufficientData { valid: usize, required: usize },

    /// Every trend point falls in the same year, so no slope can be fitted
    #[error("no year spread for trend estimation: all {points} points fall in {year}")]
    NoYearSpread { points: usize, year: i32 },

    /// Informational: name, position and organization are all empty
    #[error("record {record_index} has an empty identity (name, position and organization)")]
    DegenerateIdentity { record_index: usize },

    /// Configuration values are inconsistent
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AnalysisError {
    pub fn missing_field(record_index: usize, field: &str) -> Self {
        AnalysisError::MissingField {
            record_index,
            field: field.to_string(),
        }
    }

    /// Short stable code used as a grouping key in summaries
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::MissingField { .. } => "missing_field",
            AnalysisError::UnparseableYear { .. } => "unparseable_year",
            AnalysisError::InsufficientData { .. } => "insufficient_data",
            AnalysisError::NoYearSpread { .. } => "no_year_spread",
            AnalysisError::DegenerateIdentity { .. } => "degenerate_identity",
            AnalysisError::InvalidConfig(_) => "invalid_config",
        }
    }

    /// Exclusion-class errors are filtered, not propagated
    pub fn is_exclusion(&self) -> bool {
        matches!(
            self,
            AnalysisError::MissingField { .. }
                | AnalysisError::UnparseableYear { .. }
                | AnalysisError::DegenerateIdentity { .. }
        )
    }
}

// ============================================================================
// EXCLUSION
// ============================================================================

/// One record left out of (or specially handled by) a component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    /// Position of the record in the loader's original sequence
    pub record_index: usize,

    /// Which component recorded it ("marker", "org_year", ...)
    pub stage: String,

    pub reason: AnalysisError,
}

impl Exclusion {
    pub fn new(stage: &str, reason: AnalysisError) -> Self {
        let record_index = match &reason {
            AnalysisError::MissingField { record_index, .. }
            | AnalysisError::UnparseableYear { record_index, .. }
            | AnalysisError::DegenerateIdentity { record_index } => *record_index,
            _ => usize::MAX,
        };

        Exclusion {
            record_index,
            stage: stage.to_string(),
            reason,
        }
    }
}

// ============================================================================
// EXCLUSION SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExclusionSummary {
    pub missing_year: usize,
    pub missing_organization: usize,
    pub unparseable_year: usize,
    pub degenerate_identity: usize,

    /// Counts per "stage:code" key, for anything the fixed fields don't cover
    pub by_stage: BTreeMap<String, usize>,
}

impl ExclusionSummary {
    pub fn from_exclusions<'a, I>(exclusions: I) -> Self
    where
        I: IntoIterator<Item = &'a Exclusion>,
    {
        let mut summary = ExclusionSummary::default();

        for exclusion in exclusions {
            match &exclusion.reason {
                AnalysisError::MissingField { field, .. } if field == "year" => {
                    summary.missing_year += 1
                }
                AnalysisError::MissingField { field, .. } if field == "organization" => {
                    summary.missing_organization += 1
                }
                AnalysisError::UnparseableYear { .. } => summary.unparseable_year += 1,
                AnalysisError::DegenerateIdentity { .. } => summary.degenerate_identity += 1,
                _ => {}
            }

            *summary
                .by_stage
                .entry(format!("{}:{}", exclusion.stage, exclusion.reason.code()))
                .or_insert(0) += 1;
        }

        summary
    }

    /// Records dropped from aggregation (degenerate identities are kept)
    pub fn excluded_total(&self) -> usize {
        self.missing_year + self.missing_organization + self.unparseable_year
    }

    pub fn summary(&self) -> String {
        format!(
            "Excluded {} records (missing year: {}, unparseable year: {}, missing organization: {}) | {} degenerate identities",
            self.excluded_total(),
            self.missing_year,
            self.unparseable_year,
            self.missing_organization,
            self.degenerate_identity
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusion_takes_record_index_from_reason() {
        let exclusion = Exclusion::new(
            "marker",
            AnalysisError::UnparseableYear {
                record_index: 7,
                raw: "20x4".to_string(),
            },
        );

        assert_eq!(exclusion.record_index, 7);
        assert_eq!(exclusion.stage, "marker");
    }

    #[test]
    fn test_summary_counts_each_kind() {
        let exclusions = vec![
            Exclusion::new("marker", AnalysisError::missing_field(0, "year")),
            Exclusion::new("marker", AnalysisError::missing_field(1, "year")),
            Exclusion::new(
                "marker",
                AnalysisError::UnparseableYear {
                    record_index: 2,
                    raw: "abc".to_string(),
                },
            ),
            Exclusion::new("org_year", AnalysisError::missing_field(3, "organization")),
            Exclusion::new("marker", AnalysisError::DegenerateIdentity { record_index: 4 }),
        ];

        let summary = ExclusionSummary::from_exclusions(&exclusions);

        assert_eq!(summary.missing_year, 2);
        assert_eq!(summary.unparseable_year, 1);
        assert_eq!(summary.missing_organization, 1);
        assert_eq!(summary.degenerate_identity, 1);
        assert_eq!(summary.excluded_total(), 4);
        assert_eq!(summary.by_stage.get("marker:missing_field"), Some(&2));
        assert!(!summary.summary().is_empty());
    }

    #[test]
    fn test_exclusion_classification() {
        assert!(AnalysisError::missing_field(0, "year").is_exclusion());
        assert!(!AnalysisError::InsufficientData { valid: 2, required: 3 }.is_exclusion());
    }

    #[test]
    fn test_no_year_spread_is_fatal_and_names_the_year() {
        let error = AnalysisError::NoYearSpread { points: 3, year: 2014 };

        assert!(!error.is_exclusion());
        assert_eq!(error.code(), "no_year_spread");
        assert_eq!(
            error.to_string(),
            "no year spread for trend estimation: all 3 points fall in 2014"
        );
    }
}
