// 🔁 Reappointment Marker - decide which records are reappointments
//
// Group by canonical identity, stable-sort each group by year, and mark every
// record after the earliest as a reappointment. Source-provided flags are
// ignored: the derived flag is the single source of truth downstream.
//
// Known limitation: two records of the same identity in the same year are
// ordered by input position, so the split depends on loader order.

use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Exclusion};
use crate::normalizer::Normalizer;
use crate::record::{AppointmentRecord, CanonicalIdentity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

pub const STAGE: &str = "marker";

// ============================================================================
// MARKED RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkedRecord {
    /// Position in the loader's original sequence
    pub record_index: usize,

    pub record: AppointmentRecord,

    /// Parsed, range-checked year
    pub year: i32,

    pub identity: CanonicalIdentity,

    pub is_reappointment: bool,
}

impl MarkedRecord {
    /// Organization key for org-year grouping (see AppointmentRecord::organization_key)
    pub fn organization(&self) -> Option<String> {
        self.record.organization_key()
    }
}

// ============================================================================
// MARKING OUTCOME
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkingOutcome {
    /// Marked records, in original input order
    pub marked: Vec<MarkedRecord>,

    /// Records dropped for missing/unparseable year, plus degenerate-identity notices
    pub exclusions: Vec<Exclusion>,

    /// Number of non-degenerate identity groups
    pub group_count: usize,

    pub reappointment_count: usize,
}

impl MarkingOutcome {
    /// Records removed from the output (degenerate identities are kept)
    pub fn excluded_count(&self) -> usize {
        self.exclusions
            .iter()
            .filter(|e| !matches!(e.reason, AnalysisError::DegenerateIdentity { .. }))
            .count()
    }

    pub fn degenerate_count(&self) -> usize {
        self.exclusions
            .iter()
            .filter(|e| matches!(e.reason, AnalysisError::DegenerateIdentity { .. }))
            .count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} records marked ({} reappointments) across {} identities | {} excluded, {} degenerate",
            self.marked.len(),
            self.reappointment_count,
            self.group_count,
            self.excluded_count(),
            self.degenerate_count()
        )
    }
}

// ============================================================================
// REAPPOINTMENT MARKER
// ============================================================================

pub struct ReappointmentMarker {
    normalizer: Normalizer,
    config: AnalysisConfig,
}

impl ReappointmentMarker {
    pub fn new(config: &AnalysisConfig) -> Self {
        ReappointmentMarker {
            normalizer: Normalizer::new(&config.identity),
            config: config.clone(),
        }
    }

    pub fn mark(&self, records: &[AppointmentRecord]) -> MarkingOutcome {
        let mut outcome = MarkingOutcome::default();

        // Identity → positions in outcome.marked, kept in input order
        let mut groups: HashMap<CanonicalIdentity, Vec<usize>> = HashMap::new();

        for (record_index, record) in records.iter().enumerate() {
            let year = match record.parse_year(record_index, &self.config.years) {
                Ok(y) => y,
                Err(reason) => {
                    debug!("Excluding record {}: {}", record_index, reason);
                    outcome.exclusions.push(Exclusion::new(STAGE, reason));
                    continue;
                }
            };

            let identity = self.normalizer.canonical_identity(record);
            let position = outcome.marked.len();

            if identity.is_degenerate() {
                outcome.exclusions.push(Exclusion::new(
                    STAGE,
                    AnalysisError::DegenerateIdentity { record_index },
                ));
            } else {
                groups.entry(identity.clone()).or_default().push(position);
            }

            outcome.marked.push(MarkedRecord {
                record_index,
                record: record.clone(),
                year,
                identity,
                is_reappointment: false,
            });
        }

        outcome.group_count = groups.len();

        for positions in groups.values_mut() {
            // sort_by_key is stable: same-year ties keep input order
            positions.sort_by_key(|&p| outcome.marked[p].year);

            for &p in positions.iter().skip(1) {
                outcome.marked[p].is_reappointment = true;
            }
        }

        outcome.reappointment_count = outcome.marked.iter().filter(|m| m.is_reappointment).count();

        let excluded = outcome.excluded_count();
        if excluded > 0 {
            warn!(
                "{} of {} records excluded for missing or unparseable year",
                excluded,
                records.len()
            );
        }
        debug!("{}", outcome.summary());

        outcome
    }
}

// ============================================================================
// OR-RECONCILIATION (opt-in post-processing)
// ============================================================================

/// OR each derived flag with the record's source flag.
///
/// Only for consumers that still want "reappointed if either source says so".
/// Returns the number of records flipped from false to true.
pub fn reconcile_with_source_flags(marked: &mut [MarkedRecord]) -> usize {
    let mut flipped = 0;

    for m in marked.iter_mut() {
        if !m.is_reappointment && m.record.source_reappointed == Some(true) {
            m.is_reappointment = true;
            flipped += 1;
        }
    }

    flipped
}

// ============================================================================
// TESTS
// ============================================================================
