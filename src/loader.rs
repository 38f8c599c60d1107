// 📥 Record Loader - appointment CSVs into AppointmentRecords
//
// Yearly export files disagree on column names, column order and how the
// "reappointed" flag is spelled. Everything is unified here, before the core:
// - columns located by header name, case-insensitive
// - year taken from the file name when the file has no year column
// - reappointed flag reduced to Option<bool>
// Rows are kept in file order; directories load in file-name order.

use crate::record::AppointmentRecord;
use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};
use regex::Regex;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ============================================================================
// COLUMN DETECTION
// ============================================================================

/// Header positions for the columns we read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMap {
    pub name: Option<usize>,
    pub position: Option<usize>,
    pub organization: Option<usize>,
    pub year: Option<usize>,
    pub reappointed: Option<usize>,
}

impl ColumnMap {
    pub fn from_headers(headers: &StringRecord) -> Self {
        let mut map = ColumnMap::default();

        for (i, header) in headers.iter().enumerate() {
            let key = header.trim().to_lowercase();
            let slot = match key.as_str() {
                "name" => &mut map.name,
                "position" => &mut map.position,
                "org" | "organization" => &mut map.organization,
                "year" => &mut map.year,
                "reappointed" => &mut map.reappointed,
                _ => continue,
            };
            // First matching column wins
            if slot.is_none() {
                *slot = Some(i);
            }
        }

        map
    }
}

fn field(record: &StringRecord, column: Option<usize>) -> Option<String> {
    column.and_then(|i| record.get(i)).map(|v| v.to_string())
}

// ============================================================================
// FLAG & YEAR UNIFICATION
// ============================================================================

/// Unify the many spellings of the source "reappointed" flag.
///
/// true/yes/y/t/1 → Some(true), false/no/n/f/0 → Some(false),
/// blank, NaN or anything else → None.
pub fn parse_reappointed_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "t" | "1" | "1.0" => Some(true),
        "false" | "no" | "n" | "f" | "0" | "0.0" => Some(false),
        _ => None,
    }
}

/// First run of exactly four digits in the file name
///
/// "appointments_2016.csv" → Some(2016)
pub fn year_from_file_name(path: &Path) -> Option<i32> {
    lazy_static::lazy_static! {
        // Four digits not embedded in a longer number
        static ref YEAR_IN_NAME: Regex = Regex::new(r"(?:^|\D)(\d{4})(?:\D|$)").unwrap();
    }

    let name = path.file_name()?.to_str()?;
    YEAR_IN_NAME
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

// ============================================================================
// LOADING
// ============================================================================

/// Load one appointments CSV
pub fn load_csv(csv_path: &Path) -> Result<Vec<AppointmentRecord>> {
    let file = File::open(csv_path)
        .with_context(|| format!("Failed to open file: {}", csv_path.display()))?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let filename = csv_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.csv")
        .to_string();

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read CSV headers in {}", filename))?
        .clone();
    let columns = ColumnMap::from_headers(&headers);

    let fallback_year = match columns.year {
        Some(_) => None,
        None => {
            let year = year_from_file_name(csv_path);
            match year {
                Some(y) => debug!("{}: no year column, using {} from file name", filename, y),
                None => warn!("{}: no year column and no year in file name", filename),
            }
            year
        }
    };

    if columns.organization.is_none() {
        warn!("{}: no org/organization column", filename);
    }

    let mut records = Vec::new();

    for (line_num, result) in reader.records().enumerate() {
        let row = result.with_context(|| {
            format!("Failed to parse CSV line {} in {}", line_num + 2, filename)
        })?;

        let year = match columns.year {
            Some(_) => field(&row, columns.year),
            None => fallback_year.map(|y| y.to_string()),
        };

        records.push(AppointmentRecord {
            name: field(&row, columns.name),
            position: field(&row, columns.position),
            organization: field(&row, columns.organization),
            year,
            source_reappointed: field(&row, columns.reappointed)
                .as_deref()
                .and_then(parse_reappointed_flag),
            source_file: filename.clone(),
            line_number: line_num + 2, // 1-indexed + header row
        });
    }

    debug!("Loaded {} records from {}", records.len(), filename);
    Ok(records)
}

/// CSV files directly inside `dir`, sorted by file name
pub fn csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
    {
        let path = entry?.path();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("csv"));

        if path.is_file() && is_csv {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Load and concatenate every CSV in a directory, in file-name order
pub fn load_directory(dir: &Path) -> Result<Vec<AppointmentRecord>> {
    let files = csv_files(dir)?;
    let mut records = Vec::new();

    for path in &files {
        records.extend(load_csv(path)?);
    }

    info!("Loaded {} records from {} files in {}", records.len(), files.len(), dir.display());
    Ok(records)
}

/// Load a single file or a whole directory
pub fn load_path(path: &Path) -> Result<Vec<AppointmentRecord>> {
    if path.is_dir() {
        load_directory(path)
    } else {
        load_csv(path)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_csv(dir: &TempDir, file_name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(file_name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_csv_with_year_column() {
        let dir = TempDir::new().unwrap();
        let path = create_test_csv(
            &dir,
            "appointments.csv",
            "name,position,org,year,reappointed\n\
             Alice,Clerk,DeptA,2013,False\n\
             Alice,Clerk,DeptA,2015,yes\n\
             Bob,Clerk,DeptA,2014,\n",
        );

        let records = load_csv(&path).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].name.as_deref(), Some("Alice"));
        assert_eq!(records[0].organization.as_deref(), Some("DeptA"));
        assert_eq!(records[1].year.as_deref(), Some("2015"));
        assert_eq!(records[0].source_reappointed, Some(false));
        assert_eq!(records[1].source_reappointed, Some(true));
        assert_eq!(records[2].source_reappointed, None);
        assert_eq!(records[2].source_file, "appointments.csv");
        assert_eq!(records[2].line_number, 4);
    }

    #[test]
    fn test_columns_matched_by_name_in_any_order() {
        let dir = TempDir::new().unwrap();
        let path = create_test_csv(
            &dir,
            "mixed.csv",
            "Year,Organization,Extra,Name,Position\n2016,Board,x,Carol,Chair\n",
        );

        let records = load_csv(&path).unwrap();

        assert_eq!(records[0].name.as_deref(), Some("Carol"));
        assert_eq!(records[0].position.as_deref(), Some("Chair"));
        assert_eq!(records[0].organization.as_deref(), Some("Board"));
        assert_eq!(records[0].year.as_deref(), Some("2016"));
    }

    #[test]
    fn test_year_from_file_name_when_column_missing() {
        let dir = TempDir::new().unwrap();
        let path = create_test_csv(&dir, "appointments_2018.csv", "name,position,org\nDan,Member,Board\n");

        let records = load_csv(&path).unwrap();

        assert_eq!(records[0].year.as_deref(), Some("2018"));
    }

    #[test]
    fn test_year_from_file_name() {
        assert_eq!(year_from_file_name(Path::new("appointments_2016.csv")), Some(2016));
        assert_eq!(year_from_file_name(Path::new("v12_2021_final.csv")), Some(2021));
        assert_eq!(year_from_file_name(Path::new("20160101.csv")), None);
        assert_eq!(year_from_file_name(Path::new("appointments.csv")), None);
        assert_eq!(year_from_file_name(Path::new("2019.csv")), Some(2019));
        assert_eq!(year_from_file_name(Path::new("a123456_2015_2016.csv")), Some(2015));
    }

    #[test]
    fn test_short_rows_become_absent_fields() {
        let dir = TempDir::new().unwrap();
        let path = create_test_csv(&dir, "short.csv", "name,position,org,year\nEve,Member\n");

        let records = load_csv(&path).unwrap();

        assert_eq!(records[0].name.as_deref(), Some("Eve"));
        assert_eq!(records[0].organization, None);
        assert_eq!(records[0].year, None);
    }

    #[test]
    fn test_parse_reappointed_flag() {
        for raw in ["True", "yes", "Y", "t", "1", " TRUE "] {
            assert_eq!(parse_reappointed_flag(raw), Some(true), "{}", raw);
        }
        for raw in ["false", "No", "n", "F", "0"] {
            assert_eq!(parse_reappointed_flag(raw), Some(false), "{}", raw);
        }
        for raw in ["", "NaN", "nan", "maybe"] {
            assert_eq!(parse_reappointed_flag(raw), None, "{}", raw);
        }
    }

    #[test]
    fn test_load_directory_in_file_name_order() {
        let dir = TempDir::new().unwrap();
        create_test_csv(&dir, "appointments_2014.csv", "name,position,org\nBob,Clerk,DeptA\n");
        create_test_csv(&dir, "appointments_2013.csv", "name,position,org\nAlice,Clerk,DeptA\n");
        create_test_csv(&dir, "notes.txt", "not a csv");

        let records = load_directory(dir.path()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name.as_deref(), Some("Alice"));
        assert_eq!(records[0].year.as_deref(), Some("2013"));
        assert_eq!(records[1].year.as_deref(), Some("2014"));

        let via_path = load_path(dir.path()).unwrap();
        assert_eq!(via_path, records);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = load_csv(Path::new("/nonexistent/appointments.csv"));
        assert!(result.is_err());
    }
}
