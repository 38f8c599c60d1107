// 🔗 Reappointment Pipeline - records in, three tables + trend out
//
// Stages (each consumes a fully materialized input):
// 1. mark reappointments (normalizer inside)
// 2. optional OR-reconciliation with source flags
// 3. org-year aggregation → organization totals, yearly maxima
// 4. annual proportions → trend fit
//
// A failed trend fit never discards the tables computed before it.

use crate::annual::{aggregate_annual, AnnualProportion};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Exclusion, ExclusionSummary};
use crate::extremum::yearly_maximum;
use crate::marker::{reconcile_with_source_flags, MarkingOutcome, ReappointmentMarker};
use crate::org_year::{aggregate_org_year, organization_totals, OrgYearOutcome, OrgYearStat, OrganizationTotal};
use crate::record::AppointmentRecord;
use crate::trend::{fit_trend, points_from_annual, TrendModel};
use std::collections::BTreeMap;
use tracing::{info, warn};

// ============================================================================
// PIPELINE OUTCOME
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub input_count: usize,
    pub marking: MarkingOutcome,
    pub org_year: OrgYearOutcome,
    pub annual: Vec<AnnualProportion>,
    pub yearly_maxima: BTreeMap<i32, OrgYearStat>,
    pub organization_totals: Vec<OrganizationTotal>,

    /// Kept as a Result so the tables above survive a failed fit
    pub trend: Result<TrendModel, AnalysisError>,

    /// Flags flipped by OR-reconciliation (0 unless enabled)
    pub reconciled_flags: usize,
}

impl PipelineOutcome {
    /// All exclusions across stages, in stage order
    pub fn exclusions(&self) -> impl Iterator<Item = &Exclusion> {
        self.marking.exclusions.iter().chain(self.org_year.exclusions.iter())
    }

    pub fn exclusion_summary(&self) -> ExclusionSummary {
        ExclusionSummary::from_exclusions(self.exclusions())
    }

    pub fn org_year_stats(&self) -> &[OrgYearStat] {
        &self.org_year.stats
    }

    pub fn trend_model(&self) -> Option<&TrendModel> {
        self.trend.as_ref().ok()
    }

    pub fn summary(&self) -> String {
        let trend = match &self.trend {
            Ok(model) => model.summary(),
            Err(e) => format!("trend unavailable: {}", e),
        };

        format!(
            "{} records → {} org-year rows, {} years | {}",
            self.input_count,
            self.org_year.stats.len(),
            self.annual.len(),
            trend
        )
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct ReappointmentPipeline {
    config: AnalysisConfig,
}

impl ReappointmentPipeline {
    pub fn new(config: AnalysisConfig) -> Self {
        ReappointmentPipeline { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn run(&self, records: &[AppointmentRecord]) -> PipelineOutcome {
        info!("Running reappointment pipeline on {} records", records.len());

        // Stage 1: identity resolution + marking
        let mut marking = ReappointmentMarker::new(&self.config).mark(records);
        info!("{}", marking.summary());

        // Stage 2: opt-in reconciliation
        let reconciled_flags = if self.config.pipeline.reconcile_source_flags {
            let flipped = reconcile_with_source_flags(&mut marking.marked);
            marking.reappointment_count += flipped;
            info!("OR-reconciliation flipped {} flags to reappointed", flipped);
            flipped
        } else {
            0
        };

        // Stage 3: org-year tables
        let org_year = aggregate_org_year(&marking.marked);
        let organization_totals = organization_totals(&org_year.stats);
        let yearly_maxima = yearly_maximum(&org_year.stats, &self.config.selection);
        info!(
            "Aggregated {} org-year rows across {} organizations",
            org_year.stats.len(),
            organization_totals.len()
        );

        // Stage 4: annual series + trend
        let annual = aggregate_annual(&org_year.stats);
        let trend = fit_trend(&points_from_annual(&annual), &self.config.trend);

        if let Err(e) = &trend {
            warn!("Trend estimation failed: {}", e);
        }

        PipelineOutcome {
            input_count: records.len(),
            marking,
            org_year,
            annual,
            yearly_maxima,
            organization_totals,
            trend,
            reconciled_flags,
        }
    }
}

impl Default for ReappointmentPipeline {
    fn default() -> Self {
        Self::new(AnalysisConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trend::TrendDirection;

    fn create_test_record(name: &str, org: &str, year: i32) -> AppointmentRecord {
        AppointmentRecord::new(name, "Member", org, year)
    }

    #[test]
    fn test_example_scenario_end_to_end() {
        let records = vec![
            AppointmentRecord::new("Alice", "Clerk", "DeptA", 2013),
            AppointmentRecord::new("Alice", "Clerk", "DeptA", 2015),
            AppointmentRecord::new("Bob", "Clerk", "DeptA", 2014),
        ];

        let outcome = ReappointmentPipeline::default().run(&records);

        let flags: Vec<bool> = outcome.marking.marked.iter().map(|m| m.is_reappointment).collect();
        assert_eq!(flags, vec![false, true, false]);

        let proportions: Vec<f64> = outcome.annual.iter().map(|a| a.proportion).collect();
        assert_eq!(proportions, vec![0.0, 0.0, 100.0]);

        // Three points: the fit succeeds
        let model = outcome.trend.as_ref().unwrap();
        assert_eq!(model.n, 3);
        assert!(model.slope > 0.0);

        println!("{}", outcome.summary());
    }

    #[test]
    fn test_trend_failure_keeps_tables() {
        let records = vec![
            create_test_record("A", "Board", 2013),
            create_test_record("A", "Board", 2014),
            create_test_record("B", "Agency", 2014),
        ];

        let outcome = ReappointmentPipeline::default().run(&records);

        assert_eq!(
            outcome.trend,
            Err(AnalysisError::InsufficientData { valid: 2, required: 3 })
        );
        assert_eq!(outcome.org_year.stats.len(), 3);
        assert_eq!(outcome.annual.len(), 2);
        assert_eq!(outcome.yearly_maxima[&2014].organization, "Board");
        assert!(outcome.trend_model().is_none());
    }

    #[test]
    fn test_exclusions_are_surfaced() {
        let mut no_org = create_test_record("C", "", 2014);
        no_org.organization = None;
        let records = vec![
            create_test_record("A", "Board", 2013),
            create_test_record("B", "Board", 2013).with_raw_year(None),
            create_test_record("C", "Board", 2013).with_raw_year(Some("twenty")),
            no_org,
        ];

        let outcome = ReappointmentPipeline::default().run(&records);
        let summary = outcome.exclusion_summary();

        assert_eq!(summary.missing_year, 1);
        assert_eq!(summary.unparseable_year, 1);
        assert_eq!(summary.missing_organization, 1);
        assert_eq!(outcome.org_year.stats.len(), 1);
        assert_eq!(outcome.annual[0].total_appointments_all_orgs, 1);
    }

    #[test]
    fn test_annual_totals_match_org_year() {
        let mut records = Vec::new();
        for year in 2013..=2018 {
            for (i, org) in ["Agency", "Board", "Commission"].iter().enumerate() {
                for person in 0..(i + 2) {
                    records.push(create_test_record(&format!("P{}-{}", org, person), org, year));
                }
            }
        }

        let outcome = ReappointmentPipeline::default().run(&records);

        for annual in &outcome.annual {
            assert_eq!(annual.total_appointments_all_orgs, outcome.org_year.total_for_year(annual.year));
        }
        // Everyone after 2013 is a reappointment
        assert_eq!(outcome.annual[0].proportion, 0.0);
        assert_eq!(outcome.annual[1].proportion, 100.0);
        assert!(outcome.trend.as_ref().unwrap().slope > 0.0);
    }

    #[test]
    fn test_rising_series_is_labelled_increasing() {
        // Board: one newcomer per year plus every earlier member reappointed
        let mut records = Vec::new();
        for year in 2013..=2020 {
            for person in 0..=(year - 2013) {
                records.push(create_test_record(&format!("P{}", person), "Board", year));
            }
        }

        let outcome = ReappointmentPipeline::default().run(&records);
        let model = outcome.trend.as_ref().unwrap();

        assert_eq!(model.direction, TrendDirection::Increasing);
        assert!(model.is_significant);
    }

    #[test]
    fn test_source_flags_ignored_by_default() {
        let records = vec![
            create_test_record("A", "Board", 2013).with_source_flag(Some(true)),
            create_test_record("B", "Board", 2014).with_source_flag(Some(true)),
        ];

        let outcome = ReappointmentPipeline::default().run(&records);

        assert_eq!(outcome.reconciled_flags, 0);
        assert_eq!(outcome.marking.reappointment_count, 0);
        assert!(outcome.org_year.stats.iter().all(|s| s.reappointment_count == 0));
    }

    #[test]
    fn test_reconciliation_when_enabled() {
        let mut config = AnalysisConfig::default();
        config.pipeline.reconcile_source_flags = true;

        let records = vec![
            create_test_record("A", "Board", 2013).with_source_flag(Some(true)),
            create_test_record("A", "Board", 2014).with_source_flag(Some(false)),
            create_test_record("B", "Board", 2014),
        ];

        let outcome = ReappointmentPipeline::new(config).run(&records);

        assert_eq!(outcome.reconciled_flags, 1);
        assert_eq!(outcome.marking.reappointment_count, 2);
        let total: u64 = outcome.org_year.stats.iter().map(|s| s.reappointment_count).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_min_total_floor_reaches_selector() {
        let mut config = AnalysisConfig::default();
        config.selection.min_total = 2;

        let records = vec![
            create_test_record("A", "Tiny", 2013),
            create_test_record("A", "Tiny", 2014),
            create_test_record("B", "Large", 2014),
            create_test_record("C", "Large", 2014),
        ];

        let outcome = ReappointmentPipeline::new(config).run(&records);

        assert!(!outcome.yearly_maxima.contains_key(&2013));
        assert_eq!(outcome.yearly_maxima[&2014].organization, "Large");
    }
}
