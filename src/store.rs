//! Canonical dataset persistence.
//!
//! One CSV file per project, read in full before every merge and rewritten
//! in full afterwards. The header is always the fixed canonical column list,
//! with caller-whitelisted extra columns appended after it. Reads tolerate a
//! missing or empty file ("no records yet") and silently upgrade the legacy
//! round column. The read-merge-write sequence is serialized behind a mutex;
//! there is no cross-process locking.

use crate::error::Result;
use crate::merge::{self, MergeOutcome, RecordIdentity, SearchProvenance, TitleIdentity};
use crate::normalize::NewRecord;
use crate::schema::{AbstractSource, CanonicalRecord, FINAL_COLUMNS, LEGACY_COLUMNS};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Decode uploaded CSV bytes as UTF-8, falling back to Latin-1.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            debug!("Input is not valid UTF-8, decoding as Latin-1");
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

/// Store for one project's canonical dataset file.
pub struct DatasetStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DatasetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the dataset file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the full dataset; a missing or empty file means "no records yet".
    pub fn load(&self) -> Result<Vec<CanonicalRecord>> {
        let _guard = self.guard();
        self.read_records()
    }

    /// Overwrite the dataset file with `records` in canonical column order.
    pub fn save(&self, records: &[CanonicalRecord]) -> Result<()> {
        let _guard = self.guard();
        self.write_records(records)
    }

    /// Number of stored records.
    pub fn record_count(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    /// Merge a candidate batch into the dataset using title identity.
    ///
    /// This is the read-merge-write critical section: the dataset is loaded,
    /// merged and rewritten under the store lock, and the file is only
    /// touched after the merge has fully computed.
    pub fn merge_candidates(
        &self,
        candidates: Vec<NewRecord>,
        provenance: &SearchProvenance,
    ) -> Result<MergeOutcome> {
        self.merge_candidates_with(candidates, provenance, &TitleIdentity)
    }

    /// Merge a candidate batch with a caller-supplied identity function.
    pub fn merge_candidates_with(
        &self,
        candidates: Vec<NewRecord>,
        provenance: &SearchProvenance,
        identity: &dyn RecordIdentity,
    ) -> Result<MergeOutcome> {
        let _guard = self.guard();
        let mut records = self.read_records()?;
        let outcome = merge::merge_with_identity(&mut records, candidates, provenance, identity);
        self.write_records(&records)?;
        info!(
            path = %self.path.display(),
            total = records.len(),
            added = outcome.records_added,
            round = outcome.search_round,
            "Dataset updated"
        );
        Ok(outcome)
    }

    fn read_records(&self) -> Result<Vec<CanonicalRecord>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let text = decode_text(&bytes);
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(text.as_bytes());
        let mut headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut migrated = false;
        for (legacy, canonical) in LEGACY_COLUMNS {
            if !headers.iter().any(|h| h.as_str() == *canonical) {
                if let Some(pos) = headers.iter().position(|h| h.as_str() == *legacy) {
                    warn!(
                        column = *legacy,
                        renamed_to = *canonical,
                        "Upgrading legacy dataset column"
                    );
                    headers[pos] = canonical.to_string();
                    migrated = true;
                }
            }
        }

        let mut records = Vec::new();
        for row in reader.records() {
            records.push(record_from_row(&headers, &row?));
        }

        // Rewrite once so the upgrade does not repeat on the next read.
        if migrated {
            self.write_records(&records)?;
        }

        Ok(records)
    }

    fn write_records(&self, records: &[CanonicalRecord]) -> Result<()> {
        let mut extra_columns: Vec<String> = Vec::new();
        for record in records {
            for (name, _) in &record.extras {
                if !extra_columns.iter().any(|c| c == name) {
                    extra_columns.push(name.clone());
                }
            }
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&self.path)?;

        let header: Vec<&str> = FINAL_COLUMNS
            .iter()
            .copied()
            .chain(extra_columns.iter().map(String::as_str))
            .collect();
        writer.write_record(&header)?;

        for record in records {
            let mut row: Vec<String> = vec![
                record.database.clone(),
                record.title.clone(),
                record.journal.clone().unwrap_or_default(),
                record.year.clone().unwrap_or_default(),
                record.abstract_text.clone().unwrap_or_default(),
                record.abstract_source.as_str().to_string(),
                record.search_round.to_string(),
                record.search_start_year.to_string(),
                record.search_end_year.to_string(),
                record.run_date.clone(),
            ];
            for name in &extra_columns {
                let value = record
                    .extras
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                row.push(value);
            }
            writer.write_record(&row)?;
        }

        writer.flush()?;
        Ok(())
    }
}

fn record_from_row(headers: &[String], row: &csv::StringRecord) -> CanonicalRecord {
    let cell = |name: &str| -> &str {
        headers
            .iter()
            .position(|h| h.as_str() == name)
            .and_then(|idx| row.get(idx))
            .unwrap_or_default()
    };
    let optional = |name: &str| -> Option<String> {
        let value = cell(name);
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    };

    let extras = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| !FINAL_COLUMNS.contains(&h.as_str()))
        .map(|(idx, h)| (h.clone(), row.get(idx).unwrap_or_default().to_string()))
        .collect();

    CanonicalRecord {
        database: cell("database").to_string(),
        title: cell("title").to_string(),
        journal: optional("journal"),
        year: optional("year"),
        abstract_text: optional("abstract"),
        abstract_source: AbstractSource::from_str_loose(cell("abstract_source")),
        // A missing or unparseable round is stored as 0; the next merge then
        // allocates round 1 instead of failing.
        search_round: cell("search_round").parse().unwrap_or(0),
        search_start_year: cell("search_start_year").parse().unwrap_or(0),
        search_end_year: cell("search_end_year").parse().unwrap_or(0),
        run_date: cell("run_date").to_string(),
        extras,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns;
    use crate::normalize;
    use tempfile::TempDir;

    fn provenance(database: &str) -> SearchProvenance {
        SearchProvenance {
            database: database.to_string(),
            search_start_year: 2000,
            search_end_year: 2024,
        }
    }

    fn candidates_from_csv(text: &str, keep: &[String]) -> Vec<NewRecord> {
        let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
        let headers: Vec<String> = reader
            .headers()
            .expect("headers")
            .iter()
            .map(str::to_string)
            .collect();
        let resolved = columns::resolve(&headers);
        reader
            .records()
            .map(|row| normalize::from_csv_row(&headers, &row.expect("row"), &resolved, keep))
            .collect()
    }

    #[test]
    fn test_missing_file_is_empty_dataset() {
        let dir = TempDir::new().expect("tempdir");
        let store = DatasetStore::new(dir.path().join("data.csv"));
        assert!(store.load().expect("load").is_empty());
        assert_eq!(store.record_count().expect("count"), 0);
    }

    #[test]
    fn test_empty_file_is_empty_dataset() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "").expect("write");
        let store = DatasetStore::new(&path);
        assert!(store.load().expect("load").is_empty());
    }

    #[test]
    fn test_end_to_end_csv_import_twice() {
        let dir = TempDir::new().expect("tempdir");
        let store = DatasetStore::new(dir.path().join("data.csv"));
        let upload = "Article Title,AB,Source,PY\n\
                      Effects of X,Some abstract,Nature,2021\n\
                      Effects of Y,,Science,2022\n";

        let outcome = store
            .merge_candidates(candidates_from_csv(upload, &[]), &provenance("Web of Science"))
            .expect("merge");
        assert_eq!(outcome.records_added, 2);
        assert_eq!(outcome.search_round, 1);

        let outcome = store
            .merge_candidates(candidates_from_csv(upload, &[]), &provenance("Web of Science"))
            .expect("merge");
        assert_eq!(outcome.records_added, 0);
        assert_eq!(outcome.search_round, 2);

        let records = store.load().expect("load");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "Effects of X");
        assert_eq!(records[0].database, "Web of Science");
        assert_eq!(records[0].search_round, 1);
        assert_eq!(records[1].abstract_text, None);
    }

    #[test]
    fn test_persisted_header_is_canonical() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("data.csv");
        let store = DatasetStore::new(&path);
        let upload = "Title,AB,Unrelated Column\nEffects of X,Text,dropped\n";

        store
            .merge_candidates(candidates_from_csv(upload, &[]), &provenance("scopus"))
            .expect("merge");

        let written = std::fs::read_to_string(&path).expect("read");
        let header = written.lines().next().expect("header");
        assert_eq!(header, FINAL_COLUMNS.join(","));
        assert!(!written.contains("dropped"));
    }

    #[test]
    fn test_whitelisted_extras_follow_canonical_columns() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("data.csv");
        let store = DatasetStore::new(&path);
        let upload = "Title,DOI\nEffects of X,10.1/x\n";

        store
            .merge_candidates(
                candidates_from_csv(upload, &["DOI".to_string()]),
                &provenance("scopus"),
            )
            .expect("merge");

        let written = std::fs::read_to_string(&path).expect("read");
        let header = written.lines().next().expect("header");
        assert_eq!(header, format!("{},DOI", FINAL_COLUMNS.join(",")));

        let records = store.load().expect("load");
        assert_eq!(
            records[0].extras,
            vec![("DOI".to_string(), "10.1/x".to_string())]
        );
    }

    #[test]
    fn test_legacy_round_column_upgraded_once() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("data.csv");
        std::fs::write(
            &path,
            "database,title,journal,year,abstract,abstract_source,search_id,search_start_year,search_end_year,run_date\n\
             pubmed,Effects of X,Nature,2021,,none,3,2000,2024,2024-01-01\n",
        )
        .expect("write");

        let store = DatasetStore::new(&path);
        let records = store.load().expect("load");
        assert_eq!(records[0].search_round, 3);

        // The file itself was rewritten with the canonical column name.
        let written = std::fs::read_to_string(&path).expect("read");
        assert!(written.lines().next().expect("header").contains("search_round"));
        assert!(!written.contains("search_id"));

        // The next merge continues from the migrated counter.
        let outcome = store
            .merge_candidates(
                candidates_from_csv("Title\nPaper B\n", &[]),
                &provenance("pubmed"),
            )
            .expect("merge");
        assert_eq!(outcome.search_round, 4);
    }

    #[test]
    fn test_decode_text_latin1_fallback() {
        let bytes = b"Title\nEtude de la r\xe9plication\n";
        let text = decode_text(bytes);
        assert!(text.contains("réplication"));
        assert_eq!(decode_text("plain utf-8 é".as_bytes()), "plain utf-8 é");
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let store = DatasetStore::new(dir.path().join("data.csv"));
        let record = CanonicalRecord {
            database: "arxiv".to_string(),
            title: "Quoted, \"title\"".to_string(),
            journal: Some("arXiv".to_string()),
            year: Some("2024".to_string()),
            abstract_text: Some("Line one. Line two.".to_string()),
            abstract_source: AbstractSource::ArxivApi,
            search_round: 2,
            search_start_year: 2020,
            search_end_year: 2024,
            run_date: "2024-06-01".to_string(),
            extras: Vec::new(),
        };

        store.save(&[record.clone()]).expect("save");
        let loaded = store.load().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].title, record.title);
        assert_eq!(loaded[0].abstract_source, AbstractSource::ArxivApi);
        assert_eq!(loaded[0].search_round, 2);
    }
}
