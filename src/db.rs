// 🗄️ Run Store - analysis runs persisted to SQLite (WAL)
//
// One row in `runs` per distinct (records, config) pair. The SHA-256
// dataset_hash is UNIQUE, so importing the same data twice is a no-op.
// Child tables are keyed by run_id.

use crate::annual::AnnualProportion;
use crate::config::AnalysisConfig;
use crate::org_year::OrgYearStat;
use crate::pipeline::PipelineOutcome;
use crate::record::AppointmentRecord;
use crate::trend::TrendModel;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

/// One persisted pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub dataset_hash: String,

    /// RFC 3339, UTC
    pub created_at: String,

    /// File or directory the records came from
    pub source: String,

    pub input_records: i64,
    pub marked_records: i64,
    pub reappointments: i64,
    pub excluded_records: i64,
    pub org_year_rows: i64,
    pub first_year: Option<i32>,
    pub last_year: Option<i32>,

    pub trend_direction: Option<String>,
    pub trend_error: Option<String>,
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            dataset_hash TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL,
            source TEXT NOT NULL,
            input_records INTEGER NOT NULL,
            marked_records INTEGER NOT NULL,
            reappointments INTEGER NOT NULL,
            excluded_records INTEGER NOT NULL,
            org_year_rows INTEGER NOT NULL,
            first_year INTEGER,
            last_year INTEGER,
            trend_direction TEXT,
            trend_error TEXT,
            config TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS org_year_stats (
            run_id TEXT NOT NULL,
            organization TEXT NOT NULL,
            year INTEGER NOT NULL,
            total_appointments INTEGER NOT NULL,
            reappointment_count INTEGER NOT NULL,
            rate REAL NOT NULL,
            PRIMARY KEY (run_id, organization, year)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS annual_proportions (
            run_id TEXT NOT NULL,
            year INTEGER NOT NULL,
            total_appointments_all_orgs INTEGER NOT NULL,
            total_reappointments_all_orgs INTEGER NOT NULL,
            proportion REAL NOT NULL,
            organization_count INTEGER NOT NULL,
            PRIMARY KEY (run_id, year)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS yearly_maxima (
            run_id TEXT NOT NULL,
            year INTEGER NOT NULL,
            organization TEXT NOT NULL,
            total_appointments INTEGER NOT NULL,
            reappointment_count INTEGER NOT NULL,
            rate REAL NOT NULL,
            PRIMARY KEY (run_id, year)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS trend_models (
            run_id TEXT PRIMARY KEY,
            slope REAL NOT NULL,
            intercept REAL NOT NULL,
            r_squared REAL NOT NULL,
            p_value REAL NOT NULL,
            direction TEXT NOT NULL,
            model_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_org_year_org ON org_year_stats(run_id, organization)",
        [],
    )?;

    Ok(())
}

/// Open (or create) a store and make sure the schema exists
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

// ============================================================================
// HASHING
// ============================================================================

/// SHA-256 over every record's content (in order) plus the configuration
pub fn compute_dataset_hash(records: &[AppointmentRecord], config: &AnalysisConfig) -> Result<String> {
    let mut hasher = Sha256::new();

    for record in records {
        hasher.update(record.content_hash());
        hasher.update(b"\n");
    }
    hasher.update(serde_json::to_string(config)?);

    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// INSERT
// ============================================================================

/// Persist a run. Returns None when the same dataset + config is already stored.
pub fn insert_run(
    conn: &Connection,
    outcome: &PipelineOutcome,
    records: &[AppointmentRecord],
    config: &AnalysisConfig,
    source: &str,
) -> Result<Option<RunRecord>> {
    let dataset_hash = compute_dataset_hash(records, config)?;

    let (trend_direction, trend_error) = match &outcome.trend {
        Ok(model) => (Some(model.direction.label().to_string()), None),
        Err(e) => (None, Some(e.to_string())),
    };

    let run = RunRecord {
        run_id: uuid::Uuid::new_v4().to_string(),
        dataset_hash,
        created_at: Utc::now().to_rfc3339(),
        source: source.to_string(),
        input_records: outcome.input_count as i64,
        marked_records: outcome.marking.marked.len() as i64,
        reappointments: outcome.marking.reappointment_count as i64,
        excluded_records: outcome.exclusion_summary().excluded_total() as i64,
        org_year_rows: outcome.org_year.stats.len() as i64,
        first_year: outcome.annual.first().map(|a| a.year),
        last_year: outcome.annual.last().map(|a| a.year),
        trend_direction,
        trend_error,
    };

    let tx = conn.unchecked_transaction()?;

    let result = tx.execute(
        "INSERT INTO runs (
            run_id, dataset_hash, created_at, source, input_records, marked_records,
            reappointments, excluded_records, org_year_rows, first_year, last_year,
            trend_direction, trend_error, config
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            run.run_id,
            run.dataset_hash,
            run.created_at,
            run.source,
            run.input_records,
            run.marked_records,
            run.reappointments,
            run.excluded_records,
            run.org_year_rows,
            run.first_year,
            run.last_year,
            run.trend_direction,
            run.trend_error,
            serde_json::to_string(config)?,
        ],
    );

    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            info!("Run with dataset hash {} already stored, skipping", &run.dataset_hash[..12]);
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    }

    for s in &outcome.org_year.stats {
        tx.execute(
            "INSERT INTO org_year_stats (run_id, organization, year, total_appointments, reappointment_count, rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.run_id,
                s.organization,
                s.year,
                s.total_appointments as i64,
                s.reappointment_count as i64,
                s.rate
            ],
        )?;
    }

    for a in &outcome.annual {
        tx.execute(
            "INSERT INTO annual_proportions (
                run_id, year, total_appointments_all_orgs, total_reappointments_all_orgs,
                proportion, organization_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.run_id,
                a.year,
                a.total_appointments_all_orgs as i64,
                a.total_reappointments_all_orgs as i64,
                a.proportion,
                a.organization_count as i64
            ],
        )?;
    }

    for s in outcome.yearly_maxima.values() {
        tx.execute(
            "INSERT INTO yearly_maxima (run_id, year, organization, total_appointments, reappointment_count, rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.run_id,
                s.year,
                s.organization,
                s.total_appointments as i64,
                s.reappointment_count as i64,
                s.rate
            ],
        )?;
    }

    if let Ok(model) = &outcome.trend {
        tx.execute(
            "INSERT INTO trend_models (run_id, slope, intercept, r_squared, p_value, direction, model_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.run_id,
                model.slope,
                model.intercept,
                model.r_squared,
                model.p_value,
                model.direction.label(),
                serde_json::to_string(model)?,
            ],
        )?;
    }

    tx.commit()?;
    debug!("Stored run {} ({} org-year rows)", run.run_id, run.org_year_rows);

    Ok(Some(run))
}

// ============================================================================
// QUERIES
// ============================================================================

const RUN_COLUMNS: &str = "run_id, dataset_hash, created_at, source, input_records, marked_records,
     reappointments, excluded_records, org_year_rows, first_year, last_year,
     trend_direction, trend_error";

fn run_from_row(row: &Row) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        run_id: row.get(0)?,
        dataset_hash: row.get(1)?,
        created_at: row.get(2)?,
        source: row.get(3)?,
        input_records: row.get(4)?,
        marked_records: row.get(5)?,
        reappointments: row.get(6)?,
        excluded_records: row.get(7)?,
        org_year_rows: row.get(8)?,
        first_year: row.get(9)?,
        last_year: row.get(10)?,
        trend_direction: row.get(11)?,
        trend_error: row.get(12)?,
    })
}

fn stat_from_row(row: &Row) -> rusqlite::Result<OrgYearStat> {
    let total: i64 = row.get(2)?;
    let reappointments: i64 = row.get(3)?;
    Ok(OrgYearStat {
        organization: row.get(0)?,
        year: row.get(1)?,
        total_appointments: total as u64,
        reappointment_count: reappointments as u64,
        rate: row.get(4)?,
    })
}

/// All runs, newest first
pub fn list_runs(conn: &Connection) -> Result<Vec<RunRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM runs ORDER BY id DESC", RUN_COLUMNS))?;

    let runs = stmt
        .query_map([], run_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(runs)
}

pub fn get_latest_run(conn: &Connection) -> Result<Option<RunRecord>> {
    let run = conn
        .query_row(
            &format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS),
            [],
            run_from_row,
        )
        .optional()?;

    Ok(run)
}

pub fn get_run(conn: &Connection, run_id: &str) -> Result<Option<RunRecord>> {
    let run = conn
        .query_row(
            &format!("SELECT {} FROM runs WHERE run_id = ?1", RUN_COLUMNS),
            params![run_id],
            run_from_row,
        )
        .optional()?;

    Ok(run)
}

/// Org-year table of one run, sorted by (organization, year)
pub fn get_org_year_stats(conn: &Connection, run_id: &str) -> Result<Vec<OrgYearStat>> {
    let mut stmt = conn.prepare(
        "SELECT organization, year, total_appointments, reappointment_count, rate
         FROM org_year_stats
         WHERE run_id = ?1
         ORDER BY organization, year",
    )?;

    let stats = stmt
        .query_map(params![run_id], stat_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(stats)
}

/// One organization's rows across years
pub fn get_org_history(conn: &Connection, run_id: &str, organization: &str) -> Result<Vec<OrgYearStat>> {
    let mut stmt = conn.prepare(
        "SELECT organization, year, total_appointments, reappointment_count, rate
         FROM org_year_stats
         WHERE run_id = ?1 AND organization = ?2
         ORDER BY year",
    )?;

    let stats = stmt
        .query_map(params![run_id, organization], stat_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(stats)
}

pub fn get_annual_proportions(conn: &Connection, run_id: &str) -> Result<Vec<AnnualProportion>> {
    let mut stmt = conn.prepare(
        "SELECT year, total_appointments_all_orgs, total_reappointments_all_orgs, proportion, organization_count
         FROM annual_proportions
         WHERE run_id = ?1
         ORDER BY year",
    )?;

    let annual = stmt
        .query_map(params![run_id], |row| {
            let total: i64 = row.get(1)?;
            let reappointments: i64 = row.get(2)?;
            let orgs: i64 = row.get(4)?;
            Ok(AnnualProportion {
                year: row.get(0)?,
                total_appointments_all_orgs: total as u64,
                total_reappointments_all_orgs: reappointments as u64,
                proportion: row.get(3)?,
                organization_count: orgs as usize,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(annual)
}

pub fn get_yearly_maxima(conn: &Connection, run_id: &str) -> Result<Vec<OrgYearStat>> {
    let mut stmt = conn.prepare(
        "SELECT organization, year, total_appointments, reappointment_count, rate
         FROM yearly_maxima
         WHERE run_id = ?1
         ORDER BY year",
    )?;

    let maxima = stmt
        .query_map(params![run_id], stat_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(maxima)
}

/// Stored trend model, None if the run's fit failed
pub fn get_trend(conn: &Connection, run_id: &str) -> Result<Option<TrendModel>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT model_json FROM trend_models WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )
        .optional()?;

    match json {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).context("Failed to decode stored trend model")?,
        )),
        None => Ok(None),
    }
}

pub fn count_runs(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;

    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ReappointmentPipeline;

    fn create_test_records() -> Vec<AppointmentRecord> {
        vec![
            AppointmentRecord::new("Alice", "Clerk", "DeptA", 2013),
            AppointmentRecord::new("Alice", "Clerk", "DeptA", 2015),
            AppointmentRecord::new("Bob", "Clerk", "DeptA", 2014),
            AppointmentRecord::new("Carol", "Chair", "Board", 2014),
            AppointmentRecord::new("Carol", "Chair", "Board", 2015),
        ]
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_and_query_run() {
        let conn = setup();
        let records = create_test_records();
        let config = AnalysisConfig::default();
        let outcome = ReappointmentPipeline::new(config.clone()).run(&records);

        let run = insert_run(&conn, &outcome, &records, &config, "test.csv")
            .unwrap()
            .unwrap();

        assert_eq!(run.input_records, 5);
        assert_eq!(run.reappointments, 2);
        assert_eq!(run.first_year, Some(2013));
        assert_eq!(run.last_year, Some(2015));

        let latest = get_latest_run(&conn).unwrap().unwrap();
        assert_eq!(latest, run);
        assert_eq!(get_run(&conn, &run.run_id).unwrap(), Some(run.clone()));

        assert_eq!(get_org_year_stats(&conn, &run.run_id).unwrap(), outcome.org_year.stats);
        assert_eq!(get_annual_proportions(&conn, &run.run_id).unwrap(), outcome.annual);

        let maxima = get_yearly_maxima(&conn, &run.run_id).unwrap();
        let expected: Vec<OrgYearStat> = outcome.yearly_maxima.values().cloned().collect();
        assert_eq!(maxima, expected);

        let trend = get_trend(&conn, &run.run_id).unwrap().unwrap();
        assert_eq!(trend.n, 3);
        assert!((trend.slope - outcome.trend.as_ref().unwrap().slope).abs() < 1e-12);
    }

    #[test]
    fn test_idempotent_insert() {
        let conn = setup();
        let records = create_test_records();
        let config = AnalysisConfig::default();
        let outcome = ReappointmentPipeline::new(config.clone()).run(&records);

        let first = insert_run(&conn, &outcome, &records, &config, "a.csv").unwrap();
        let second = insert_run(&conn, &outcome, &records, &config, "b.csv").unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(count_runs(&conn).unwrap(), 1);

        // Different configuration → different run
        let mut other = config.clone();
        other.selection.min_total = 2;
        let third = insert_run(&conn, &outcome, &records, &other, "a.csv").unwrap();
        assert!(third.is_some());
        assert_eq!(list_runs(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_source_flags_distinguish_runs_when_reconciling() {
        let conn = setup();
        let mut config = AnalysisConfig::default();
        config.pipeline.reconcile_source_flags = true;

        let unflagged: Vec<AppointmentRecord> = create_test_records()
            .into_iter()
            .map(|r| r.with_source_flag(Some(false)))
            .collect();
        let flagged: Vec<AppointmentRecord> = create_test_records()
            .into_iter()
            .map(|r| r.with_source_flag(Some(true)))
            .collect();

        let pipeline = ReappointmentPipeline::new(config.clone());
        let a = pipeline.run(&unflagged);
        let b = pipeline.run(&flagged);
        assert_ne!(a.marking.reappointment_count, b.marking.reappointment_count);

        let first = insert_run(&conn, &a, &unflagged, &config, "a.csv").unwrap();
        let second = insert_run(&conn, &b, &flagged, &config, "b.csv").unwrap();

        assert!(first.is_some());
        let second = second.unwrap();
        assert_eq!(second.reappointments, 5);
        assert_eq!(count_runs(&conn).unwrap(), 2);
    }

    #[test]
    fn test_org_history_with_percent_in_name() {
        let conn = setup();
        let records = vec![
            AppointmentRecord::new("Alice", "Clerk", "100% Renewable Board", 2013),
            AppointmentRecord::new("Alice", "Clerk", "100% Renewable Board", 2014),
            AppointmentRecord::new("Bob", "Clerk", "100%25 Board", 2014),
        ];
        let config = AnalysisConfig::default();
        let outcome = ReappointmentPipeline::new(config.clone()).run(&records);
        let run = insert_run(&conn, &outcome, &records, &config, "pct.csv")
            .unwrap()
            .unwrap();

        let history = get_org_history(&conn, &run.run_id, "100% Renewable Board").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].reappointment_count, 1);

        // Literal "%25" is its own organization, never decoded to "%"
        let literal = get_org_history(&conn, &run.run_id, "100%25 Board").unwrap();
        assert_eq!(literal.len(), 1);
    }

    #[test]
    fn test_org_history() {
        let conn = setup();
        let records = create_test_records();
        let config = AnalysisConfig::default();
        let outcome = ReappointmentPipeline::new(config.clone()).run(&records);
        let run = insert_run(&conn, &outcome, &records, &config, "test.csv")
            .unwrap()
            .unwrap();

        let history = get_org_history(&conn, &run.run_id, "Board").unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].year, 2014);
        assert_eq!(history[1].reappointment_count, 1);
        assert!(get_org_history(&conn, &run.run_id, "Nobody").unwrap().is_empty());
    }

    #[test]
    fn test_failed_trend_is_recorded() {
        let conn = setup();
        let records = vec![AppointmentRecord::new("Alice", "Clerk", "DeptA", 2013)];
        let config = AnalysisConfig::default();
        let outcome = ReappointmentPipeline::new(config.clone()).run(&records);

        let run = insert_run(&conn, &outcome, &records, &config, "tiny.csv")
            .unwrap()
            .unwrap();

        assert!(run.trend_direction.is_none());
        assert!(run.trend_error.is_some());
        assert_eq!(get_trend(&conn, &run.run_id).unwrap(), None);
    }

    #[test]
    fn test_dataset_hash_is_order_sensitive() {
        let config = AnalysisConfig::default();
        let mut records = create_test_records();
        let a = compute_dataset_hash(&records, &config).unwrap();
        records.swap(0, 1);
        let b = compute_dataset_hash(&records, &config).unwrap();

        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_store() {
        let conn = setup();
        assert_eq!(get_latest_run(&conn).unwrap(), None);
        assert!(list_runs(&conn).unwrap().is_empty());
    }
}
