// 📅 Annual Proportion Aggregator - government-wide reappointment share per year
//
// One row per year present in the input. Missing years are absent, not zero.

use crate::org_year::OrgYearStat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnualProportion {
    pub year: i32,
    pub total_appointments_all_orgs: u64,
    pub total_reappointments_all_orgs: u64,

    /// Percentage in [0, 100]
    pub proportion: f64,

    /// Organizations contributing to this year
    pub organization_count: usize,
}

impl AnnualProportion {
    /// Proportion as a fraction in [0, 1]
    pub fn fraction(&self) -> f64 {
        self.proportion / 100.0
    }
}

/// Sum org-year counts across organizations, one row per year (ascending)
pub fn aggregate_annual(stats: &[OrgYearStat]) -> Vec<AnnualProportion> {
    let mut by_year: BTreeMap<i32, (u64, u64, usize)> = BTreeMap::new();

    for s in stats {
        let entry = by_year.entry(s.year).or_insert((0, 0, 0));
        entry.0 += s.total_appointments;
        entry.1 += s.reappointment_count;
        entry.2 += 1;
    }

    let annual: Vec<AnnualProportion> = by_year
        .into_iter()
        .map(|(year, (total, reappointments, orgs))| AnnualProportion {
            year,
            total_appointments_all_orgs: total,
            total_reappointments_all_orgs: reappointments,
            proportion: if total == 0 {
                0.0
            } else {
                reappointments as f64 * 100.0 / total as f64
            },
            organization_count: orgs,
        })
        .collect();

    debug!("Aggregated {} annual proportions", annual.len());
    annual
}

/// Year-over-year change in percentage points between consecutive present years
pub fn year_over_year_changes(annual: &[AnnualProportion]) -> Vec<(i32, f64)> {
    annual
        .windows(2)
        .map(|w| (w[1].year, w[1].proportion - w[0].proportion))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
