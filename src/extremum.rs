// 🏆 Yearly Extremum Selector - which organization reappoints the most, per year
//
// Tie-break on equal rates (LargerSampleThenName):
//   1. more total appointments wins
//   2. then the lexicographically earlier organization name
// The result never depends on input order.

use crate::config::{SelectionConfig, TieBreakPolicy};
use crate::org_year::OrgYearStat;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

/// Compare rates exactly (cross-multiplied counts, no float rounding)
fn compare_rate(a: &OrgYearStat, b: &OrgYearStat) -> Ordering {
    let lhs = a.reappointment_count as u128 * b.total_appointments as u128;
    let rhs = b.reappointment_count as u128 * a.total_appointments as u128;
    lhs.cmp(&rhs)
}

/// Ordering where Greater means `a` should be selected over `b`
pub fn rank(a: &OrgYearStat, b: &OrgYearStat, policy: TieBreakPolicy) -> Ordering {
    let by_rate = compare_rate(a, b);
    let by_name = b.organization.cmp(&a.organization);

    match policy {
        TieBreakPolicy::LargerSampleThenName => by_rate
            .then_with(|| a.total_appointments.cmp(&b.total_appointments))
            .then(by_name),
        TieBreakPolicy::NameOnly => by_rate.then(by_name),
    }
}

/// Organization with the highest rate in each year.
///
/// Rows under the `min_total` volume floor are ignored; a year with nothing left
/// is omitted from the result.
pub fn yearly_maximum(stats: &[OrgYearStat], selection: &SelectionConfig) -> BTreeMap<i32, OrgYearStat> {
    let mut winners: BTreeMap<i32, OrgYearStat> = BTreeMap::new();

    for candidate in stats
        .iter()
        .filter(|s| s.total_appointments >= selection.min_total)
    {
        let replace = match winners.get(&candidate.year) {
            Some(current) => rank(candidate, current, selection.tie_break) == Ordering::Greater,
            None => true,
        };

        if replace {
            winners.insert(candidate.year, candidate.clone());
        }
    }

    debug!(
        "Selected yearly maxima for {} years (min_total = {})",
        winners.len(),
        selection.min_total
    );

    winners
}

// ============================================================================
// TESTS
// ============================================================================
