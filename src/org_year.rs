// 🏢 Org-Year Aggregator - appointments and reappointments per (organization, year)
//
// Sparse output: an org-year with no records simply has no row.
// Organizations are grouped by their trimmed, whitespace-collapsed name;
// "Dept. A" and "Dept A" stay distinct on purpose.

use crate::error::{AnalysisError, Exclusion, ExclusionSummary};
use crate::marker::MarkedRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const STAGE: &str = "org_year";

// ============================================================================
// ORG-YEAR STAT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgYearStat {
    pub organization: String,
    pub year: i32,
    pub total_appointments: u64,
    pub reappointment_count: u64,

    /// reappointment_count / total_appointments, in [0, 1]
    pub rate: f64,
}

impl OrgYearStat {
    pub fn new(organization: &str, year: i32, total_appointments: u64, reappointment_count: u64) -> Self {
        OrgYearStat {
            organization: organization.to_string(),
            year,
            total_appointments,
            reappointment_count,
            rate: rate(reappointment_count, total_appointments),
        }
    }
}

/// Ratio defined as 0 when the denominator is 0
pub fn rate(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

// ============================================================================
// AGGREGATION OUTCOME
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrgYearOutcome {
    /// Sorted by (organization, year)
    pub stats: Vec<OrgYearStat>,

    /// Records left out for lacking an organization
    pub exclusions: Vec<Exclusion>,
}

impl OrgYearOutcome {
    pub fn exclusion_summary(&self) -> ExclusionSummary {
        ExclusionSummary::from_exclusions(&self.exclusions)
    }

    /// Sum of total_appointments for one year
    pub fn total_for_year(&self, year: i32) -> u64 {
        self.stats
            .iter()
            .filter(|s| s.year == year)
            .map(|s| s.total_appointments)
            .sum()
    }
}

/// Count appointments and reappointments per (organization, year).
///
/// Years are already parsed on MarkedRecord, so only the organization can be missing.
pub fn aggregate_org_year(records: &[MarkedRecord]) -> OrgYearOutcome {
    let mut counts: BTreeMap<(String, i32), (u64, u64)> = BTreeMap::new();
    let mut exclusions = Vec::new();

    for m in records {
        let organization = match m.organization() {
            Some(org) => org,
            None => {
                exclusions.push(Exclusion::new(
                    STAGE,
                    AnalysisError::missing_field(m.record_index, "organization"),
                ));
                continue;
            }
        };

        let entry = counts.entry((organization, m.year)).or_insert((0, 0));
        entry.0 += 1;
        if m.is_reappointment {
            entry.1 += 1;
        }
    }

    if !exclusions.is_empty() {
        warn!("{} marked records have no organization", exclusions.len());
    }

    let stats: Vec<OrgYearStat> = counts
        .into_iter()
        .map(|((organization, year), (total, reappointments))| {
            OrgYearStat::new(&organization, year, total, reappointments)
        })
        .collect();

    debug!("Aggregated {} org-year pairs", stats.len());

    OrgYearOutcome { stats, exclusions }
}

// ============================================================================
// ORGANIZATION TOTALS (across all years)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationTotal {
    pub organization: String,
    pub years_active: usize,
    pub total_appointments: u64,
    pub reappointment_count: u64,
    pub rate: f64,
}

/// Per-organization sums over every year, most reappointments first
pub fn organization_totals(stats: &[OrgYearStat]) -> Vec<OrganizationTotal> {
    let mut sums: BTreeMap<&str, (usize, u64, u64)> = BTreeMap::new();

    for s in stats {
        let entry = sums.entry(s.organization.as_str()).or_insert((0, 0, 0));
        entry.0 += 1;
        entry.1 += s.total_appointments;
        entry.2 += s.reappointment_count;
    }

    let mut totals: Vec<OrganizationTotal> = sums
        .into_iter()
        .map(|(organization, (years_active, total, reappointments))| OrganizationTotal {
            organization: organization.to_string(),
            years_active,
            total_appointments: total,
            reappointment_count: reappointments,
            rate: rate(reappointments, total),
        })
        .collect();

    // BTreeMap already yields names in order; stable sort keeps it for ties
    totals.sort_by(|a, b| b.reappointment_count.cmp(&a.reappointment_count));
    totals
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::marker::ReappointmentMarker;
    use crate::record::AppointmentRecord;

    fn create_test_record(name: &str, org: &str, year: i32) -> AppointmentRecord {
        AppointmentRecord::new(name, "Member", org, year)
    }

    fn marked(records: &[AppointmentRecord]) -> Vec<MarkedRecord> {
        ReappointmentMarker::new(&AnalysisConfig::default())
            .mark(records)
            .marked
    }

    #[test]
    fn test_example_scenario() {
        let records = vec![
            AppointmentRecord::new("Alice", "Clerk", "DeptA", 2013),
            AppointmentRecord::new("Alice", "Clerk", "DeptA", 2015),
            AppointmentRecord::new("Bob", "Clerk", "DeptA", 2014),
        ];

        let outcome = aggregate_org_year(&marked(&records));

        assert_eq!(
            outcome.stats,
            vec![
                OrgYearStat::new("DeptA", 2013, 1, 0),
                OrgYearStat::new("DeptA", 2014, 1, 0),
                OrgYearStat::new("DeptA", 2015, 1, 1),
            ]
        );
        assert_eq!(outcome.stats[2].rate, 1.0);
    }

    #[test]
    fn test_rate_is_exact_ratio() {
        let records = vec![
            create_test_record("A", "Board", 2013),
            create_test_record("A", "Board", 2014),
            create_test_record("B", "Board", 2013),
            create_test_record("B", "Board", 2014),
            create_test_record("C", "Board", 2014),
        ];

        let outcome = aggregate_org_year(&marked(&records));
        let stat_2014 = outcome.stats.iter().find(|s| s.year == 2014).unwrap();

        assert_eq!(stat_2014.total_appointments, 3);
        assert_eq!(stat_2014.reappointment_count, 2);
        assert!((stat_2014.rate - 2.0 / 3.0).abs() < f64::EPSILON);
        assert!(outcome.stats.iter().all(|s| (0.0..=1.0).contains(&s.rate)));
    }

    #[test]
    fn test_missing_organization_is_excluded_and_counted() {
        let mut orphan = create_test_record("Zed", "", 2013);
        orphan.organization = None;
        let records = vec![
            create_test_record("A", "Board", 2013),
            orphan,
            create_test_record("B", "   ", 2013),
        ];

        let outcome = aggregate_org_year(&marked(&records));

        assert_eq!(outcome.stats.len(), 1);
        assert_eq!(outcome.stats[0].total_appointments, 1);
        assert_eq!(outcome.exclusions.len(), 2);
        assert_eq!(outcome.exclusion_summary().missing_organization, 2);
    }

    #[test]
    fn test_organizations_differing_by_punctuation_stay_distinct() {
        let records = vec![
            create_test_record("A", "Dept. of Health", 2013),
            create_test_record("B", "Dept of Health", 2013),
            create_test_record("C", "  Dept of   Health ", 2013),
        ];

        let outcome = aggregate_org_year(&marked(&records));

        assert_eq!(outcome.stats.len(), 2);
        let plain = outcome
            .stats
            .iter()
            .find(|s| s.organization == "Dept of Health")
            .unwrap();
        assert_eq!(plain.total_appointments, 2);
    }

    #[test]
    fn test_sparse_output() {
        let records = vec![
            create_test_record("A", "Board", 2013),
            create_test_record("B", "Agency", 2015),
        ];

        let outcome = aggregate_org_year(&marked(&records));

        assert_eq!(outcome.stats.len(), 2);
        assert!(outcome.stats.iter().all(|s| s.total_appointments > 0));
        assert_eq!(outcome.total_for_year(2014), 0);
    }

    #[test]
    fn test_organization_totals() {
        let stats = vec![
            OrgYearStat::new("Agency", 2013, 4, 1),
            OrgYearStat::new("Board", 2013, 5, 2),
            OrgYearStat::new("Board", 2014, 5, 3),
            OrgYearStat::new("Commission", 2014, 2, 1),
        ];

        let totals = organization_totals(&stats);

        assert_eq!(totals[0].organization, "Board");
        assert_eq!(totals[0].years_active, 2);
        assert_eq!(totals[0].total_appointments, 10);
        assert_eq!(totals[0].reappointment_count, 5);
        assert_eq!(totals[0].rate, 0.5);
        // Tie on reappointments: alphabetical
        assert_eq!(totals[1].organization, "Agency");
        assert_eq!(totals[2].organization, "Commission");
    }

    #[test]
    fn test_zero_total_rate() {
        assert_eq!(rate(0, 0), 0.0);
    }
}
