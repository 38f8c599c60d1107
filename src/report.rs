// 📝 Report Export - write the pipeline's tables to an output directory
//
// Files:
//   org_year_stats.csv, annual_proportions.csv, yearly_maxima.csv,
//   marked_records.csv, trend_model.json, summary.json
// Tables stay sparse: only rows the pipeline produced are written.

use crate::error::ExclusionSummary;
use crate::pipeline::PipelineOutcome;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ============================================================================
// FLAT ROWS (csv cannot serialize nested structs)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyMaximumRow {
    pub year: i32,
    pub organization: String,
    pub total_appointments: u64,
    pub reappointment_count: u64,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkedRecordRow {
    pub record_index: usize,
    pub name: String,
    pub position: String,
    pub organization: String,
    pub year: i32,
    pub is_reappointment: bool,
    pub source_file: String,
    pub line_number: usize,
}

/// Contents of summary.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub input_records: usize,
    pub marked_records: usize,
    pub reappointments: usize,
    pub identity_groups: usize,
    pub org_year_rows: usize,
    pub organizations: usize,
    pub years: Vec<i32>,
    pub reconciled_flags: usize,
    pub exclusions: ExclusionSummary,

    /// Trend label, or None when the fit failed
    pub trend_direction: Option<String>,
    pub trend_error: Option<String>,
}

impl RunSummary {
    pub fn from_outcome(outcome: &PipelineOutcome) -> Self {
        let (trend_direction, trend_error) = match &outcome.trend {
            Ok(model) => (Some(model.direction.label().to_string()), None),
            Err(e) => (None, Some(e.to_string())),
        };

        RunSummary {
            input_records: outcome.input_count,
            marked_records: outcome.marking.marked.len(),
            reappointments: outcome.marking.reappointment_count,
            identity_groups: outcome.marking.group_count,
            org_year_rows: outcome.org_year.stats.len(),
            organizations: outcome.organization_totals.len(),
            years: outcome.annual.iter().map(|a| a.year).collect(),
            reconciled_flags: outcome.reconciled_flags,
            exclusions: outcome.exclusion_summary(),
            trend_direction,
            trend_error,
        }
    }
}

pub fn yearly_maximum_rows(outcome: &PipelineOutcome) -> Vec<YearlyMaximumRow> {
    outcome
        .yearly_maxima
        .values()
        .map(|s| YearlyMaximumRow {
            year: s.year,
            organization: s.organization.clone(),
            total_appointments: s.total_appointments,
            reappointment_count: s.reappointment_count,
            rate: s.rate,
        })
        .collect()
}

pub fn marked_record_rows(outcome: &PipelineOutcome) -> Vec<MarkedRecordRow> {
    outcome
        .marking
        .marked
        .iter()
        .map(|m| MarkedRecordRow {
            record_index: m.record_index,
            name: m.record.name.clone().unwrap_or_default(),
            position: m.record.position.clone().unwrap_or_default(),
            organization: m.record.organization.clone().unwrap_or_default(),
            year: m.year,
            is_reappointment: m.is_reappointment,
            source_file: m.record.source_file.clone(),
            line_number: m.record.line_number,
        })
        .collect()
}

// ============================================================================
// WRITERS
// ============================================================================

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Failed to write row to {}", path.display()))?;
    }

    writer.flush()?;
    debug!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Write every table into `output_dir` (created if missing); returns written paths
pub fn export_outcome(outcome: &PipelineOutcome, output_dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let mut written = Vec::new();
    let mut target = |name: &str| {
        let path = output_dir.join(name);
        written.push(path.clone());
        path
    };

    write_csv(&target("org_year_stats.csv"), &outcome.org_year.stats)?;
    write_csv(&target("annual_proportions.csv"), &outcome.annual)?;
    write_csv(&target("yearly_maxima.csv"), &yearly_maximum_rows(outcome))?;
    write_csv(&target("marked_records.csv"), &marked_record_rows(outcome))?;

    // trend_model.json is only written when the fit succeeded
    if let Ok(model) = &outcome.trend {
        write_json(&target("trend_model.json"), model)?;
    }

    write_json(&target("summary.json"), &RunSummary::from_outcome(outcome))?;

    info!("Exported {} files to {}", written.len(), output_dir.display());
    Ok(written)
}

// ============================================================================
// TEXT SUMMARY
// ============================================================================

/// Human-readable report of a pipeline run
pub fn render_text(outcome: &PipelineOutcome) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write_text(&mut out, outcome);
    out
}

/// Write the text report into any `fmt::Write` sink
pub fn write_text<W: std::fmt::Write>(out: &mut W, outcome: &PipelineOutcome) -> std::fmt::Result {
    let rule = "━".repeat(60);

    writeln!(out, "{}", rule)?;
    writeln!(out, "REAPPOINTMENT ANALYSIS")?;
    writeln!(out, "{}", rule)?;
    writeln!(out, "{}", outcome.marking.summary())?;

    let exclusions = outcome.exclusion_summary();
    if exclusions.excluded_total() > 0 || exclusions.degenerate_identity > 0 {
        writeln!(out, "Data quality: {}", exclusions.summary())?;
    }

    writeln!(out, "\nAnnual reappointment proportion:")?;
    for a in &outcome.annual {
        writeln!(
            out,
            "  {}  {:>6.2}%  ({} of {}, {} orgs)",
            a.year,
            a.proportion,
            a.total_reappointments_all_orgs,
            a.total_appointments_all_orgs,
            a.organization_count
        )?;
    }

    writeln!(out, "\nHighest reappointment rate per year:")?;
    for (year, s) in &outcome.yearly_maxima {
        writeln!(
            out,
            "  {}  {:<40} {:>6.2}%  ({} of {})",
            year,
            s.organization,
            s.rate * 100.0,
            s.reappointment_count,
            s.total_appointments
        )?;
    }

    writeln!(out, "\nTop organizations by reappointments:")?;
    for t in outcome.organization_totals.iter().take(10) {
        writeln!(
            out,
            "  {:<40} {:>5} of {:<5} ({} years)",
            t.organization, t.reappointment_count, t.total_appointments, t.years_active
        )?;
    }

    writeln!(out, "\nTrend:")?;
    match &outcome.trend {
        Ok(model) => {
            writeln!(out, "  {}", model.summary())?;
            writeln!(
                out,
                "  total change {:+.2} points over {}-{}",
                model.total_change, model.first_year, model.last_year
            )?;

            let d = &model.diagnostics;
            if let Some(dw) = d.durbin_watson {
                writeln!(out, "  Durbin-Watson {:.3}", dw)?;
            }
            if let (Some(w), Some(p)) = (d.shapiro_wilk_w, d.shapiro_wilk_p) {
                writeln!(out, "  Shapiro-Wilk W = {:.3}, p = {:.4}", w, p)?;
            }
            if let (Some(lm), Some(p)) = (d.breusch_pagan_lm, d.breusch_pagan_p) {
                writeln!(out, "  Breusch-Pagan LM = {:.3}, p = {:.4}", lm, p)?;
            }
            if !d.outlier_years.is_empty() {
                writeln!(out, "  Outlier years: {:?}", d.outlier_years)?;
            }
            if !d.influential_years.is_empty() {
                writeln!(out, "  Influential years: {:?}", d.influential_years)?;
            }
        }
        Err(e) => {
            writeln!(out, "  unavailable: {}", e)?;
        }
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ReappointmentPipeline;
    use crate::record::AppointmentRecord;
    use tempfile::TempDir;

    fn create_test_outcome() -> PipelineOutcome {
        let records = vec![
            AppointmentRecord::new("Alice", "Clerk", "DeptA", 2013),
            AppointmentRecord::new("Alice", "Clerk", "DeptA", 2015),
            AppointmentRecord::new("Bob", "Clerk", "DeptA", 2014),
            AppointmentRecord::new("Carol", "Chair", "Board", 2015),
        ];
        ReappointmentPipeline::default().run(&records)
    }

    #[test]
    fn test_export_writes_all_files() {
        let dir = TempDir::new().unwrap();
        let outcome = create_test_outcome();

        let written = export_outcome(&outcome, dir.path()).unwrap();

        assert_eq!(written.len(), 6);
        for path in &written {
            assert!(path.exists(), "{} missing", path.display());
        }

        let csv = std::fs::read_to_string(dir.path().join("org_year_stats.csv")).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("organization,year,total_appointments,reappointment_count,rate")
        );
        // Sparse: 3 DeptA rows + 1 Board row
        assert_eq!(lines.count(), 4);
    }

    #[test]
    fn test_trend_file_skipped_when_fit_fails() {
        let dir = TempDir::new().unwrap();
        let records = vec![AppointmentRecord::new("Alice", "Clerk", "DeptA", 2013)];
        let outcome = ReappointmentPipeline::default().run(&records);

        let written = export_outcome(&outcome, dir.path()).unwrap();

        assert_eq!(written.len(), 5);
        assert!(!dir.path().join("trend_model.json").exists());

        let summary: RunSummary = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("summary.json")).unwrap(),
        )
        .unwrap();
        assert!(summary.trend_direction.is_none());
        assert!(summary.trend_error.unwrap().contains("insufficient data"));
    }

    #[test]
    fn test_marked_record_rows() {
        let outcome = create_test_outcome();

        let rows = marked_record_rows(&outcome);

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1].name, "Alice");
        assert!(rows[1].is_reappointment);
        assert!(!rows[3].is_reappointment);
    }

    #[test]
    fn test_summary_counts() {
        let summary = RunSummary::from_outcome(&create_test_outcome());

        assert_eq!(summary.input_records, 4);
        assert_eq!(summary.reappointments, 1);
        assert_eq!(summary.identity_groups, 3);
        assert_eq!(summary.organizations, 2);
        assert_eq!(summary.years, vec![2013, 2014, 2015]);
    }

    #[test]
    fn test_render_text() {
        let text = render_text(&create_test_outcome());
        println!("{}", text);

        assert!(text.contains("REAPPOINTMENT ANALYSIS"));
        assert!(text.contains("2015"));
        assert!(text.contains("DeptA"));
        assert!(text.contains("Trend:"));
    }

    /// Accepts a fixed number of bytes, then fails
    struct LimitedSink {
        remaining: usize,
    }

    impl std::fmt::Write for LimitedSink {
        fn write_str(&mut self, s: &str) -> std::fmt::Result {
            if s.len() > self.remaining {
                return Err(std::fmt::Error);
            }
            self.remaining -= s.len();
            Ok(())
        }
    }

    #[test]
    fn test_write_text_propagates_sink_errors() {
        let outcome = create_test_outcome();

        let mut sink = LimitedSink { remaining: 64 };
        assert!(write_text(&mut sink, &outcome).is_err());

        let mut full = String::new();
        assert!(write_text(&mut full, &outcome).is_ok());
        assert_eq!(full, render_text(&outcome));
    }

    #[test]
    fn test_render_text_reports_failed_trend() {
        let records = vec![
            AppointmentRecord::new("Alice", "Clerk", "DeptA", 2015),
            AppointmentRecord::new("Alice", "Clerk", "DeptA", 2015),
        ];
        let outcome = ReappointmentPipeline::default().run(&records);

        let text = render_text(&outcome);

        assert!(text.contains("Trend:\n  unavailable: "));
        assert!(!text.contains("Durbin-Watson"));
    }
}
