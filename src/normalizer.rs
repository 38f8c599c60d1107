// 🔤 Normalizer - canonical forms for identity matching
//
// lower-case, collapse whitespace, trim; names also lose one leading honorific.
// No punctuation rewriting, no synonyms ("Dept." stays "dept.").

use crate::config::IdentityConfig;
use crate::record::{AppointmentRecord, CanonicalIdentity};

/// Lower-case, collapse internal whitespace, trim. Absent → "".
pub fn normalize(text: Option<&str>) -> String {
    match text {
        Some(t) => t
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join(" "),
        None => String::new(),
    }
}

pub struct Normalizer {
    /// Lower-cased honorifics, in configured order
    honorifics: Vec<String>,
}

impl Normalizer {
    pub fn new(config: &IdentityConfig) -> Self {
        Normalizer {
            honorifics: config
                .honorifics
                .iter()
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    /// Normalize a name and strip a leading honorific.
    ///
    /// The honorific must be the whole first token and be followed by more text,
    /// so "Dr. Smith" → "smith" but "Dr." and "Drake" are left alone.
    pub fn normalize_name(&self, name: Option<&str>) -> String {
        let normalized = normalize(name);

        if let Some((first, rest)) = normalized.split_once(' ') {
            if self.honorifics.iter().any(|h| h == first) {
                return rest.to_string();
            }
        }

        normalized
    }

    pub fn canonical_identity(&self, record: &AppointmentRecord) -> CanonicalIdentity {
        CanonicalIdentity {
            name: self.normalize_name(record.name.as_deref()),
            position: normalize(record.position.as_deref()),
            organization: normalize(record.organization.as_deref()),
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(&IdentityConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize(Some("  Board   of\tDirectors ")), "board of directors");
        assert_eq!(normalize(Some("")), "");
        assert_eq!(normalize(None), "");
    }

    #[test]
    fn test_normalize_keeps_punctuation() {
        assert_eq!(normalize(Some("Dept. of Health")), "dept. of health");
        assert_ne!(normalize(Some("Dept. of Health")), normalize(Some("Department of Health")));
    }

    #[test]
    fn test_strip_honorifics() {
        let normalizer = Normalizer::default();

        assert_eq!(normalizer.normalize_name(Some("Dr. Jane Doe")), "jane doe");
        assert_eq!(normalizer.normalize_name(Some("DR Jane Doe")), "jane doe");
        assert_eq!(normalizer.normalize_name(Some("  Mrs.   Jane  Doe ")), "jane doe");
        assert_eq!(normalizer.normalize_name(Some("Prof Jane Doe")), "jane doe");
    }

    #[test]
    fn test_honorific_only_stripped_when_leading_token() {
        let normalizer = Normalizer::default();

        // Not followed by whitespace + more text
        assert_eq!(normalizer.normalize_name(Some("Dr.")), "dr.");
        // Prefix of a longer token
        assert_eq!(normalizer.normalize_name(Some("Drake Bell")), "drake bell");
        assert_eq!(normalizer.normalize_name(Some("Msiska John")), "msiska john");
        // Not leading
        assert_eq!(normalizer.normalize_name(Some("Jane Dr. Doe")), "jane dr. doe");
        // Only one honorific is removed
        assert_eq!(normalizer.normalize_name(Some("Dr. Prof. Doe")), "prof. doe");
    }

    #[test]
    fn test_custom_honorifics() {
        let normalizer = Normalizer::new(&IdentityConfig {
            honorifics: vec!["Hon.".to_string()],
        });

        assert_eq!(normalizer.normalize_name(Some("Hon. Jane Doe")), "jane doe");
        assert_eq!(normalizer.normalize_name(Some("Dr. Jane Doe")), "dr. jane doe");
    }

    #[test]
    fn test_canonical_identity() {
        let normalizer = Normalizer::default();
        let a = AppointmentRecord::new("Dr. Alice  Smith", "Board Member ", "DeptA", 2013);
        let b = AppointmentRecord::new("alice smith", "board member", " depta", 2015);

        assert_eq!(normalizer.canonical_identity(&a), normalizer.canonical_identity(&b));
    }

    #[test]
    fn test_degenerate_identity() {
        let normalizer = Normalizer::default();
        let mut record = AppointmentRecord::new("  ", "", "", 2013);
        record.position = None;

        assert!(normalizer.canonical_identity(&record).is_degenerate());
    }
}
