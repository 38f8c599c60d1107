// 📋 Appointment Records - the loader's output and the core's input
//
// Records are created once by the loader and never mutated afterwards.
// Every field is optional because source files are inconsistent across years.

use crate::config::YearRange;
use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// APPOINTMENT RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentRecord {
    // ========================================================================
    // IDENTITY FIELDS (free text, may be absent)
    // ========================================================================
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub position: Option<String>,

    #[serde(default)]
    pub organization: Option<String>,

    /// Raw year as found in the source (parsed lazily against a YearRange)
    #[serde(default)]
    pub year: Option<String>,

    // ========================================================================
    // SOURCE FLAG (unified to a strict boolean by the loader)
    // The core never trusts this; see marker::reconcile_with_source_flags
    // ========================================================================
    #[serde(default)]
    pub source_reappointed: Option<bool>,

    // ========================================================================
    // PROVENANCE
    // ========================================================================
    #[serde(default)]
    pub source_file: String,

    #[serde(default)]
    pub line_number: usize,
}

impl AppointmentRecord {
    /// Create a record with all identity fields and a numeric year
    pub fn new(name: &str, position: &str, organization: &str, year: i32) -> Self {
        AppointmentRecord {
            name: Some(name.to_string()),
            position: Some(position.to_string()),
            organization: Some(organization.to_string()),
            year: Some(year.to_string()),
            source_reappointed: None,
            source_file: String::new(),
            line_number: 0,
        }
    }

    /// Builder: replace the year with a raw (possibly unparseable) value
    pub fn with_raw_year(mut self, raw: Option<&str>) -> Self {
        self.year = raw.map(String::from);
        self
    }

    /// Builder: attach the source-provided reappointment flag
    pub fn with_source_flag(mut self, flag: Option<bool>) -> Self {
        self.source_reappointed = flag;
        self
    }

    /// Builder: attach provenance
    pub fn with_provenance(mut self, source_file: &str, line_number: usize) -> Self {
        self.source_file = source_file.to_string();
        self.line_number = line_number;
        self
    }

    /// Parse the year against the valid range.
    ///
    /// Absent or blank → MissingField; non-integer or out of range → UnparseableYear.
    /// Float renderings of whole numbers ("2016.0") are accepted.
    pub fn parse_year(&self, record_index: usize, range: &YearRange) -> Result<i32, AnalysisError> {
        let raw = match self.year.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => return Err(AnalysisError::missing_field(record_index, "year")),
        };

        let unparseable = || AnalysisError::UnparseableYear {
            record_index,
            raw: raw.to_string(),
        };

        let year = match raw.parse::<i32>() {
            Ok(y) => y,
            Err(_) => {
                let value: f64 = raw.parse().map_err(|_| unparseable())?;
                if !value.is_finite() || value.fract() != 0.0 {
                    return Err(unparseable());
                }
                value as i32
            }
        };

        if !range.contains(year) {
            return Err(unparseable());
        }

        Ok(year)
    }

    /// Organization as used for org-year grouping: trimmed, whitespace collapsed,
    /// case and punctuation preserved. None when blank.
    pub fn organization_key(&self) -> Option<String> {
        let org = self.organization.as_deref()?;
        let cleaned = org.split_whitespace().collect::<Vec<_>>().join(" ");
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        }
    }

    /// Stable fingerprint of the record's content (provenance excluded).
    ///
    /// The source flag is included: reconciliation can change results on it alone.
    pub fn content_hash(&self) -> String {
        let flag = match self.source_reappointed {
            Some(true) => "true",
            Some(false) => "false",
            None => "",
        };

        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
            self.name.as_deref().unwrap_or(""),
            self.position.as_deref().unwrap_or(""),
            self.organization.as_deref().unwrap_or(""),
            self.year.as_deref().unwrap_or(""),
            flag
        ));
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// CANONICAL IDENTITY
// ============================================================================

/// Normalized (name, position, organization) triple used for grouping
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalIdentity {
    pub name: String,
    pub position: String,
    pub organization: String,
}

impl CanonicalIdentity {
    /// All three components empty: excluded from reappointment logic
    pub fn is_degenerate(&self) -> bool {
        self.name.is_empty() && self.position.is_empty() && self.organization.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
