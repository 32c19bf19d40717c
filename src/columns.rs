//! Bibliographic column detection for uploaded exports.
//!
//! Literature databases export the same fields under wildly different column
//! names ("Article Title", "TI", "DocumentTitle", ...). This module maps a
//! table's column names onto the canonical field set using per-field alias
//! tables. Matching is exact after normalization; there is no scoring or
//! fuzzy matching. Alias sets are kept disjoint so detection does not depend
//! on iteration order.

use serde::{Deserialize, Serialize};

/// Canonical bibliographic fields detectable in an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Abstract,
    Journal,
    Year,
}

impl Field {
    /// All fields, in the order they are presented to the user.
    pub const ALL: [Field; 4] = [Field::Title, Field::Abstract, Field::Journal, Field::Year];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Abstract => "abstract",
            Field::Journal => "journal",
            Field::Year => "year",
        }
    }
}

/// Alias tables mapping canonical fields to known export column names.
///
/// The defaults cover the common PubMed/Scopus/Web of Science/EndNote export
/// headers; callers can supply their own tables to support additional
/// databases without code changes. Aliases are compared against
/// [`normalize_column_name`] output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnAliases {
    pub title: Vec<String>,
    pub abstract_text: Vec<String>,
    pub journal: Vec<String>,
    pub year: Vec<String>,
}

impl Default for ColumnAliases {
    fn default() -> Self {
        let list = |names: &[&str]| names.iter().map(|s| s.to_string()).collect();
        Self {
            title: list(&["title", "articletitle", "documenttitle", "primarytitle", "ti"]),
            // "abstact" is a typo that ships in some database exports
            abstract_text: list(&["abstract", "abstractnote", "ab", "summary", "abstact"]),
            journal: list(&[
                "journal",
                "journaltitle",
                "sourcetitle",
                "source",
                "publicationtitle",
                "venue",
                "so",
            ]),
            year: list(&["year", "publicationyear", "pubyear", "py", "yr"]),
        }
    }
}

impl ColumnAliases {
    /// Alias list for one canonical field.
    pub fn for_field(&self, field: Field) -> &[String] {
        match field {
            Field::Title => &self.title,
            Field::Abstract => &self.abstract_text,
            Field::Journal => &self.journal,
            Field::Year => &self.year,
        }
    }

    fn matches(&self, field: Field, normalized: &str) -> bool {
        self.for_field(field).iter().any(|a| a == normalized)
    }
}

/// Detected source column per canonical field; `None` means undetected.
///
/// Detection never fails. The title field is required downstream and must be
/// rejected by the caller when unmapped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedColumns {
    pub title_col: Option<String>,
    pub abstract_col: Option<String>,
    pub journal_col: Option<String>,
    pub year_col: Option<String>,
}

impl DetectedColumns {
    pub fn get(&self, field: Field) -> Option<&str> {
        match field {
            Field::Title => self.title_col.as_deref(),
            Field::Abstract => self.abstract_col.as_deref(),
            Field::Journal => self.journal_col.as_deref(),
            Field::Year => self.year_col.as_deref(),
        }
    }

    fn set(&mut self, field: Field, value: Option<String>) {
        match field {
            Field::Title => self.title_col = value,
            Field::Abstract => self.abstract_col = value,
            Field::Journal => self.journal_col = value,
            Field::Year => self.year_col = value,
        }
    }
}

/// Per-field manual override supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldOverride {
    /// Keep the detected column
    #[default]
    Auto,
    /// Use this source column, whatever was detected
    Use(String),
    /// Force the field to stay unmapped
    Unmapped,
}

/// Manual overrides for all four fields; `Auto` everywhere by default.
#[derive(Debug, Clone, Default)]
pub struct ColumnOverrides {
    pub title: FieldOverride,
    pub abstract_text: FieldOverride,
    pub journal: FieldOverride,
    pub year: FieldOverride,
}

impl ColumnOverrides {
    fn get(&self, field: Field) -> &FieldOverride {
        match field {
            Field::Title => &self.title,
            Field::Abstract => &self.abstract_text,
            Field::Journal => &self.journal,
            Field::Year => &self.year,
        }
    }
}

/// Normalize a source column name for alias comparison: lowercase with
/// spaces and underscores removed.
pub fn normalize_column_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| *c != ' ' && *c != '_')
        .collect()
}

/// Detect canonical fields among `columns` using the default alias tables.
pub fn resolve(columns: &[String]) -> DetectedColumns {
    resolve_with(&ColumnAliases::default(), columns)
}

/// Detect canonical fields among `columns` using caller-supplied alias tables.
///
/// The first source column (in input order) whose normalized name appears in
/// a field's alias set wins for that field.
pub fn resolve_with(aliases: &ColumnAliases, columns: &[String]) -> DetectedColumns {
    let mut detected = DetectedColumns::default();
    for field in Field::ALL {
        let hit = columns
            .iter()
            .find(|c| aliases.matches(field, &normalize_column_name(c)));
        detected.set(field, hit.cloned());
    }
    detected
}

/// Apply manual overrides on top of a detection result.
///
/// `Use` and `Unmapped` always take precedence over the detected column.
pub fn apply_overrides(detected: DetectedColumns, overrides: &ColumnOverrides) -> DetectedColumns {
    let mut resolved = detected;
    for field in Field::ALL {
        match overrides.get(field) {
            FieldOverride::Auto => {}
            FieldOverride::Use(column) => resolved.set(field, Some(column.clone())),
            FieldOverride::Unmapped => resolved.set(field, None),
        }
    }
    resolved
}
