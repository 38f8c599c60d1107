// Reappointment Trends - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod config;
pub mod record;
pub mod normalizer;
pub mod marker;     // Identity resolution + reappointment flags
pub mod org_year;   // Per (organization, year) counts
pub mod annual;     // Government-wide share per year
pub mod extremum;   // Top organization per year
pub mod stats;      // Distribution functions, Shapiro-Wilk
pub mod trend;      // OLS trend + diagnostics
pub mod pipeline;
pub mod loader;
pub mod report;
pub mod db;

// Re-export commonly used types
pub use error::{AnalysisError, Exclusion, ExclusionSummary};
pub use config::{
    AnalysisConfig, IdentityConfig, PipelineConfig, SelectionConfig,
    StrengthThresholds, TieBreakPolicy, TrendConfig, YearRange,
};
pub use record::{AppointmentRecord, CanonicalIdentity};
pub use normalizer::{normalize, Normalizer};
pub use marker::{reconcile_with_source_flags, MarkedRecord, MarkingOutcome, ReappointmentMarker};
pub use org_year::{aggregate_org_year, organization_totals, OrgYearOutcome, OrgYearStat, OrganizationTotal};
pub use annual::{aggregate_annual, year_over_year_changes, AnnualProportion};
pub use extremum::yearly_maximum;
pub use trend::{
    fit_trend, points_from_annual, Autocorrelation, Diagnostics, PointDiagnostics,
    TrendDirection, TrendEstimator, TrendModel, TrendPoint, TrendStrength,
};
pub use pipeline::{PipelineOutcome, ReappointmentPipeline};
pub use loader::{load_csv, load_directory, load_path, parse_reappointed_flag};
pub use report::{export_outcome, render_text, RunSummary};
pub use db::{
    RunRecord,
    setup_database, open_database, insert_run, compute_dataset_hash,
    list_runs, get_latest_run, get_run, get_org_year_stats, get_org_history,
    get_annual_proportions, get_yearly_maxima, get_trend, count_runs,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
