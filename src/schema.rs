//! Canonical dataset schema.
//!
//! Every persisted record conforms to the fixed column set in [`FINAL_COLUMNS`],
//! in that order, regardless of which optional fields were populated. The
//! title is the deduplication key; [`title_key`] produces the normalized form
//! compared across merges.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed column order for the persisted project dataset.
pub const FINAL_COLUMNS: &[&str] = &[
    "database",
    "title",
    "journal",
    "year",
    "abstract",
    "abstract_source",
    "search_round",
    "search_start_year",
    "search_end_year",
    "run_date",
];

/// Historical column names upgraded on read: `(legacy, canonical)`.
///
/// Older datasets stored the round counter as `search_id`.
pub const LEGACY_COLUMNS: &[(&str, &str)] = &[("search_id", "search_round")];

/// Provenance tag for where a record's abstract came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbstractSource {
    /// Structured abstract from the PubMed efetch XML
    #[serde(rename = "pubmed_xml")]
    PubmedXml,
    /// PIP abstract scraped from the public article page
    #[serde(rename = "pip_web")]
    PipWeb,
    /// Abstract reconstructed from the OpenAlex inverted index
    #[serde(rename = "openalex")]
    OpenAlex,
    /// Summary from the arXiv Atom feed
    #[serde(rename = "arxiv_api")]
    ArxivApi,
    /// Abstract column of a manually imported CSV export
    #[serde(rename = "csv_import")]
    CsvImport,
    /// No abstract available
    #[default]
    #[serde(rename = "none")]
    None,
}

impl AbstractSource {
    /// Wire string stored in the dataset's `abstract_source` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            AbstractSource::PubmedXml => "pubmed_xml",
            AbstractSource::PipWeb => "pip_web",
            AbstractSource::OpenAlex => "openalex",
            AbstractSource::ArxivApi => "arxiv_api",
            AbstractSource::CsvImport => "csv_import",
            AbstractSource::None => "none",
        }
    }

    /// Parse a stored tag; unrecognized values read back as `None`.
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "pubmed_xml" => AbstractSource::PubmedXml,
            "pip_web" => AbstractSource::PipWeb,
            "openalex" => AbstractSource::OpenAlex,
            "arxiv_api" => AbstractSource::ArxivApi,
            "csv_import" => AbstractSource::CsvImport,
            _ => AbstractSource::None,
        }
    }
}

impl fmt::Display for AbstractSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bibliographic entry as stored in a project dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Source identifier (e.g. "pubmed", or a user-chosen label for imports)
    pub database: String,
    /// Article title; its normalized form is the dedup key
    pub title: String,
    /// Journal or venue name
    pub journal: Option<String>,
    /// Publication year, as exported by the source
    pub year: Option<String>,
    /// Abstract text
    pub abstract_text: Option<String>,
    /// Where the abstract came from
    pub abstract_source: AbstractSource,
    /// Ingestion batch that added this record, 1-based
    pub search_round: u32,
    /// Start of the query's publication-date window
    pub search_start_year: i32,
    /// End of the query's publication-date window
    pub search_end_year: i32,
    /// ISO date of the merge that added this record
    pub run_date: String,
    /// Caller-whitelisted extra columns carried outside the fixed schema
    pub extras: Vec<(String, String)>,
}

/// Normalized dedup key for a title: trimmed and case-folded.
pub fn title_key(title: &str) -> String {
    title.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_key_folds_case_and_whitespace() {
        assert_eq!(title_key("  Effects of X  "), "effects of x");
        assert_eq!(title_key("effects of x"), title_key("EFFECTS OF X"));
    }

    #[test]
    fn test_abstract_source_round_trip() {
        for source in [
            AbstractSource::PubmedXml,
            AbstractSource::PipWeb,
            AbstractSource::OpenAlex,
            AbstractSource::ArxivApi,
            AbstractSource::CsvImport,
            AbstractSource::None,
        ] {
            assert_eq!(AbstractSource::from_str_loose(source.as_str()), source);
        }
        assert_eq!(
            AbstractSource::from_str_loose("garbage"),
            AbstractSource::None
        );
    }

    #[test]
    fn test_final_columns_order() {
        assert_eq!(FINAL_COLUMNS[0], "database");
        assert_eq!(FINAL_COLUMNS[1], "title");
        assert_eq!(FINAL_COLUMNS[6], "search_round");
        assert_eq!(FINAL_COLUMNS.len(), 10);
    }
}
