//! Dedup-merge engine.
//!
//! Takes the existing project dataset plus a batch of candidate records,
//! allocates the next search round, drops candidates whose identity key is
//! already stored, stamps provenance metadata onto the survivors and appends
//! them. Candidates are only checked against the existing dataset, not
//! against each other; two candidates with the same title in one batch are
//! both kept.

use crate::normalize::NewRecord;
use crate::schema::{title_key, CanonicalRecord};
use chrono::Local;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

/// Identity key extraction for deduplication.
///
/// The default is title equality after normalization; a stronger key (DOI,
/// source identifier) can be plugged in without touching the merge logic.
pub trait RecordIdentity {
    /// Key for a candidate record; `None` drops the candidate.
    fn candidate_key(&self, record: &NewRecord) -> Option<String>;
    /// Key for an already-stored record.
    fn stored_key(&self, record: &CanonicalRecord) -> Option<String>;
}

/// Title-equality identity: trimmed, case-folded title strings.
pub struct TitleIdentity;

impl RecordIdentity for TitleIdentity {
    fn candidate_key(&self, record: &NewRecord) -> Option<String> {
        let key = title_key(&record.title);
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    fn stored_key(&self, record: &CanonicalRecord) -> Option<String> {
        let key = title_key(&record.title);
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }
}

/// Provenance stamped onto every record accepted in a merge call.
#[derive(Debug, Clone)]
pub struct SearchProvenance {
    /// Fallback database label for candidates that carry none of their own
    pub database: String,
    /// Start of the query's publication-date window
    pub search_start_year: i32,
    /// End of the query's publication-date window
    pub search_end_year: i32,
}

/// Result of one merge call.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MergeOutcome {
    /// Candidates accepted and appended
    pub records_added: usize,
    /// Round number allocated to this merge call
    pub search_round: u32,
}

/// Round allocated to the next merge: one past the highest stored round.
///
/// Rows whose round was missing or unreadable are stored as 0, so a dataset
/// without a usable counter starts over at round 1.
pub fn next_round(existing: &[CanonicalRecord]) -> u32 {
    existing
        .iter()
        .map(|r| r.search_round)
        .max()
        .unwrap_or(0)
        + 1
}

/// Merge candidates into the dataset using title-equality identity.
pub fn merge(
    existing: &mut Vec<CanonicalRecord>,
    candidates: Vec<NewRecord>,
    provenance: &SearchProvenance,
) -> MergeOutcome {
    merge_with_identity(existing, candidates, provenance, &TitleIdentity)
}

/// Merge candidates into the dataset with a caller-supplied identity.
///
/// The round advances on every call, including calls that add no rows.
/// Existing rows are never rewritten; accepted candidates are appended in
/// their input order.
pub fn merge_with_identity(
    existing: &mut Vec<CanonicalRecord>,
    candidates: Vec<NewRecord>,
    provenance: &SearchProvenance,
    identity: &dyn RecordIdentity,
) -> MergeOutcome {
    let search_round = next_round(existing);
    let run_date = Local::now().format("%Y-%m-%d").to_string();

    let existing_keys: HashSet<String> = existing
        .iter()
        .filter_map(|r| identity.stored_key(r))
        .collect();

    let candidate_count = candidates.len();
    let mut records_added = 0;

    for candidate in candidates {
        let Some(key) = identity.candidate_key(&candidate) else {
            continue;
        };
        if existing_keys.contains(&key) {
            debug!(title = %candidate.title, "Skipping duplicate of stored record");
            continue;
        }

        let database = candidate
            .database
            .clone()
            .unwrap_or_else(|| provenance.database.clone());

        existing.push(CanonicalRecord {
            database,
            title: candidate.title.trim().to_string(),
            journal: candidate.journal,
            year: candidate.year,
            abstract_text: candidate.abstract_text,
            abstract_source: candidate.abstract_source,
            search_round,
            search_start_year: provenance.search_start_year,
            search_end_year: provenance.search_end_year,
            run_date: run_date.clone(),
            extras: candidate.extras,
        });
        records_added += 1;
    }

    info!(
        round = search_round,
        candidates = candidate_count,
        added = records_added,
        skipped = candidate_count - records_added,
        "Merge complete"
    );

    MergeOutcome {
        records_added,
        search_round,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AbstractSource;

    fn candidate(title: &str) -> NewRecord {
        NewRecord {
            title: title.to_string(),
            ..Default::default()
        }
    }

    fn provenance() -> SearchProvenance {
        SearchProvenance {
            database: "pubmed".to_string(),
            search_start_year: 2000,
            search_end_year: 2024,
        }
    }

    #[test]
    fn test_first_merge_allocates_round_one() {
        let mut dataset = Vec::new();
        let outcome = merge(&mut dataset, vec![candidate("Effects of X")], &provenance());
        assert_eq!(outcome.search_round, 1);
        assert_eq!(outcome.records_added, 1);
        assert_eq!(dataset[0].search_round, 1);
        assert_eq!(dataset[0].database, "pubmed");
        assert_eq!(dataset[0].run_date.len(), 10);
    }

    #[test]
    fn test_round_is_monotonic_across_merges() {
        let mut dataset = Vec::new();
        for expected in 1..=4u32 {
            let outcome = merge(
                &mut dataset,
                vec![candidate(&format!("Paper {}", expected))],
                &provenance(),
            );
            assert_eq!(outcome.search_round, expected);
        }
    }

    #[test]
    fn test_round_advances_even_on_noop_merge() {
        let mut dataset = Vec::new();
        merge(&mut dataset, vec![candidate("Effects of X")], &provenance());

        let outcome = merge(&mut dataset, vec![candidate("Effects of X")], &provenance());
        assert_eq!(outcome.records_added, 0);
        assert_eq!(outcome.search_round, 2);
        assert_eq!(dataset.len(), 1);

        let outcome = merge(&mut dataset, vec![candidate("Paper B")], &provenance());
        assert_eq!(outcome.search_round, 3);
    }

    #[test]
    fn test_title_dedup_is_case_and_space_insensitive() {
        let mut dataset = Vec::new();
        merge(&mut dataset, vec![candidate("Effects of X")], &provenance());
        let outcome = merge(
            &mut dataset,
            vec![candidate("  effects of x  ")],
            &provenance(),
        );
        assert_eq!(outcome.records_added, 0);
        assert_eq!(dataset.len(), 1);
    }

    #[test]
    fn test_intra_batch_duplicates_are_both_kept() {
        // Candidates are only deduplicated against the stored dataset.
        let mut dataset = Vec::new();
        let outcome = merge(
            &mut dataset,
            vec![candidate("Effects of X"), candidate("effects of x")],
            &provenance(),
        );
        assert_eq!(outcome.records_added, 2);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset[0].search_round, dataset[1].search_round);
    }

    #[test]
    fn test_empty_titles_are_dropped_silently() {
        let mut dataset = Vec::new();
        let outcome = merge(
            &mut dataset,
            vec![candidate("   "), candidate(""), candidate("Kept")],
            &provenance(),
        );
        assert_eq!(outcome.records_added, 1);
        assert_eq!(dataset[0].title, "Kept");
    }

    #[test]
    fn test_per_record_database_beats_fallback() {
        let mut dataset = Vec::new();
        let mut labeled = candidate("From arXiv");
        labeled.database = Some("arxiv".to_string());
        merge(
            &mut dataset,
            vec![labeled, candidate("From PubMed")],
            &provenance(),
        );
        assert_eq!(dataset[0].database, "arxiv");
        assert_eq!(dataset[1].database, "pubmed");
    }

    #[test]
    fn test_unreadable_counter_resets_round_but_keeps_titles() {
        let mut dataset = vec![CanonicalRecord {
            database: "pubmed".to_string(),
            title: "Effects of X".to_string(),
            search_round: 0,
            ..Default::default()
        }];
        let outcome = merge(
            &mut dataset,
            vec![candidate("Effects of X"), candidate("Paper B")],
            &provenance(),
        );
        assert_eq!(outcome.search_round, 1);
        assert_eq!(outcome.records_added, 1);
        assert_eq!(dataset.len(), 2);
    }

    #[test]
    fn test_append_preserves_input_order() {
        let mut dataset = Vec::new();
        merge(&mut dataset, vec![candidate("A"), candidate("B")], &provenance());
        merge(&mut dataset, vec![candidate("C"), candidate("D")], &provenance());
        let titles: Vec<&str> = dataset.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_provenance_stamped_on_accepted_records() {
        let mut dataset = Vec::new();
        let mut with_abstract = candidate("Paper");
        with_abstract.abstract_text = Some("Background.".to_string());
        with_abstract.abstract_source = AbstractSource::CsvImport;
        merge(&mut dataset, vec![with_abstract], &provenance());
        let record = &dataset[0];
        assert_eq!(record.search_start_year, 2000);
        assert_eq!(record.search_end_year, 2024);
        assert_eq!(record.abstract_source, AbstractSource::CsvImport);
    }
}
