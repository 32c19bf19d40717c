//! Conversion of source-shaped rows into candidate records.
//!
//! Fetchers and CSV uploads produce rows in their own shapes; this module
//! brings them to the candidate shape the merge engine accepts. CSV rows go
//! through the resolved column mapping; API rows use fixed per-source
//! conversions since their payload shapes are known, not discovered.

use crate::arxiv::ArxivRecord;
use crate::columns::DetectedColumns;
use crate::openalex::OpenAlexRecord;
use crate::pubmed::PubMedRecord;
use crate::schema::AbstractSource;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A candidate record awaiting dedup-merge.
///
/// Round, year window and run date are assigned at merge time. `database` is
/// `None` for sources that rely on the caller-supplied label.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewRecord {
    pub database: Option<String>,
    pub title: String,
    pub journal: Option<String>,
    pub year: Option<String>,
    pub abstract_text: Option<String>,
    pub abstract_source: AbstractSource,
    /// Whitelisted extra columns retained outside the fixed schema
    pub extras: Vec<(String, String)>,
}

/// Collapse runs of whitespace (including newlines) into single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    let re = Regex::new(r"\s+").unwrap_or_else(|_| Regex::new(r" ").expect("literal regex"));
    re.replace_all(text.trim(), " ").to_string()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Normalize one uploaded CSV row using a resolved column mapping.
///
/// Matched source columns are renamed to canonical fields; canonical fields
/// left unmapped become explicit `None`. Columns named in `keep` are carried
/// through as extras; everything else is discarded. Rows whose title is empty
/// after trimming are dropped later by the merge step.
pub fn from_csv_row(
    headers: &[String],
    row: &csv::StringRecord,
    resolved: &DetectedColumns,
    keep: &[String],
) -> NewRecord {
    let cell = |column: Option<&str>| -> Option<&str> {
        column
            .and_then(|name| headers.iter().position(|h| h.as_str() == name))
            .and_then(|idx| row.get(idx))
    };

    let title = cell(resolved.title_col.as_deref())
        .unwrap_or_default()
        .trim()
        .to_string();

    let mapped: Vec<&str> = [
        resolved.title_col.as_deref(),
        resolved.abstract_col.as_deref(),
        resolved.journal_col.as_deref(),
        resolved.year_col.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect();

    let extras = keep
        .iter()
        .filter(|name| !mapped.contains(&name.as_str()))
        .filter_map(|name| {
            headers
                .iter()
                .position(|h| h.as_str() == name.as_str())
                .map(|idx| (name.clone(), row.get(idx).unwrap_or_default().to_string()))
        })
        .collect();

    NewRecord {
        database: None,
        title,
        journal: non_empty(cell(resolved.journal_col.as_deref())),
        year: non_empty(cell(resolved.year_col.as_deref())),
        abstract_text: non_empty(cell(resolved.abstract_col.as_deref())),
        abstract_source: AbstractSource::CsvImport,
        extras,
    }
}

impl From<PubMedRecord> for NewRecord {
    /// Fixed PubMed mapping. The PMID is dropped at this boundary; the
    /// database label is left to the merge caller.
    fn from(record: PubMedRecord) -> Self {
        NewRecord {
            database: None,
            title: record.title.trim().to_string(),
            journal: record.journal,
            year: record.year,
            abstract_text: record.abstract_text,
            abstract_source: record.abstract_source,
            extras: Vec::new(),
        }
    }
}

impl From<OpenAlexRecord> for NewRecord {
    fn from(record: OpenAlexRecord) -> Self {
        let abstract_text = record.abstract_text.filter(|a| !a.is_empty());
        NewRecord {
            database: Some("openalex".to_string()),
            title: record.title.trim().to_string(),
            journal: record.journal,
            year: record.year.map(|y| y.to_string()),
            abstract_source: if abstract_text.is_some() {
                AbstractSource::OpenAlex
            } else {
                AbstractSource::None
            },
            abstract_text,
            extras: Vec::new(),
        }
    }
}

impl From<ArxivRecord> for NewRecord {
    /// Fixed arXiv mapping: the venue is always "arXiv" and the year is the
    /// first four characters of the published date.
    fn from(record: ArxivRecord) -> Self {
        let year = record
            .published
            .get(..4)
            .filter(|y| !y.is_empty())
            .map(str::to_string);
        let summary = collapse_whitespace(&record.summary);
        NewRecord {
            database: Some("arxiv".to_string()),
            title: collapse_whitespace(&record.title),
            journal: Some("arXiv".to_string()),
            year,
            abstract_source: if summary.is_empty() {
                AbstractSource::None
            } else {
                AbstractSource::ArxivApi
            },
            abstract_text: if summary.is_empty() { None } else { Some(summary) },
            extras: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(
            collapse_whitespace("  A\n  two-line\ttitle "),
            "A two-line title"
        );
    }

    #[test]
    fn test_from_csv_row_renames_and_nulls() {
        let header = headers(&["Article Title", "AB", "Source", "PY"]);
        let resolved = columns::resolve(&header);
        let row = csv::StringRecord::from(vec!["  Effects of X  ", "", "Nature", "2021"]);

        let record = from_csv_row(&header, &row, &resolved, &[]);
        assert_eq!(record.title, "Effects of X");
        assert_eq!(record.abstract_text, None);
        assert_eq!(record.journal.as_deref(), Some("Nature"));
        assert_eq!(record.year.as_deref(), Some("2021"));
        assert_eq!(record.abstract_source, AbstractSource::CsvImport);
        assert!(record.extras.is_empty());
    }

    #[test]
    fn test_from_csv_row_keeps_whitelisted_extras() {
        let header = headers(&["Title", "DOI", "Cited By"]);
        let resolved = columns::resolve(&header);
        let row = csv::StringRecord::from(vec!["Effects of X", "10.1/x", "42"]);

        let record = from_csv_row(
            &header,
            &row,
            &resolved,
            &["DOI".to_string(), "Missing".to_string()],
        );
        assert_eq!(
            record.extras,
            vec![("DOI".to_string(), "10.1/x".to_string())]
        );
    }

    #[test]
    fn test_pubmed_record_drops_pmid() {
        let record = NewRecord::from(PubMedRecord {
            pmid: "12345".to_string(),
            title: " Trial results ".to_string(),
            journal: Some("Lancet".to_string()),
            year: Some("2020".to_string()),
            abstract_text: Some("Background.".to_string()),
            abstract_source: AbstractSource::PubmedXml,
        });
        assert_eq!(record.title, "Trial results");
        assert_eq!(record.database, None);
        assert_eq!(record.abstract_source, AbstractSource::PubmedXml);
    }

    #[test]
    fn test_arxiv_record_mapping() {
        let record = NewRecord::from(ArxivRecord {
            arxiv_id: "2401.00001v1".to_string(),
            title: "Replication\n in stats".to_string(),
            summary: "We study\nreplication.".to_string(),
            published: "2024-01-02T00:00:00Z".to_string(),
        });
        assert_eq!(record.database.as_deref(), Some("arxiv"));
        assert_eq!(record.journal.as_deref(), Some("arXiv"));
        assert_eq!(record.year.as_deref(), Some("2024"));
        assert_eq!(record.title, "Replication in stats");
        assert_eq!(record.abstract_text.as_deref(), Some("We study replication."));
        assert_eq!(record.abstract_source, AbstractSource::ArxivApi);
    }

    #[test]
    fn test_openalex_record_without_abstract() {
        let record = NewRecord::from(OpenAlexRecord {
            title: "Effects of X".to_string(),
            journal: None,
            year: Some(2019),
            abstract_text: None,
        });
        assert_eq!(record.database.as_deref(), Some("openalex"));
        assert_eq!(record.year.as_deref(), Some("2019"));
        assert_eq!(record.abstract_source, AbstractSource::None);
    }
}
