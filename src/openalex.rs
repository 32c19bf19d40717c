//! OpenAlex API client.
//!
//! Searches works via a `filter` expression built from title/abstract search
//! terms and excluded concepts, paginating with the opaque cursor the API
//! returns until it is exhausted or the page cap is hit.
//!
//! API notes (per OpenAlex docs):
//! - `per-page=200` is the maximum page size
//! - cursor pagination starts at `cursor=*`; an absent next_cursor ends it
//! - abstracts are served as an inverted index and reconstructed here

use crate::error::{LivrevError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// OpenAlex works endpoint
const OPENALEX_API_BASE: &str = "https://api.openalex.org/works";

/// Maximum results per page (OpenAlex limit)
const MAX_PER_PAGE: usize = 200;

/// Default cap on pages fetched per search
const DEFAULT_MAX_PAGES: usize = 5;

/// Delay between successive pages
const PAGE_SLEEP: Duration = Duration::from_millis(300);

/// Bearer token environment variable
const API_KEY_ENV: &str = "OPENALEX_API_KEY";

const USER_AGENT: &str = "livrev/1.0 (mailto:livrev@example.com)";

/// One work as returned by the search, in OpenAlex shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAlexRecord {
    pub title: String,
    pub journal: Option<String>,
    pub year: Option<i32>,
    pub abstract_text: Option<String>,
}

/// Search terms compiled into the filter expression.
#[derive(Debug, Clone)]
pub struct SearchTerms {
    /// Terms OR-ed into `title.search`
    pub title_terms: Vec<String>,
    /// Terms OR-ed into `abstract.search`
    pub abstract_terms: Vec<String>,
    /// Concepts excluded via `NOT concepts.display_name`
    pub exclude_terms: Vec<String>,
    /// Results per page, capped at the API maximum
    pub per_page: usize,
    /// Cap on pages fetched
    pub max_pages: usize,
}

impl Default for SearchTerms {
    fn default() -> Self {
        Self {
            title_terms: Vec::new(),
            abstract_terms: Vec::new(),
            exclude_terms: Vec::new(),
            per_page: MAX_PER_PAGE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

/// OpenAlex API response structures
#[derive(Debug, Deserialize)]
struct OpenAlexResponse {
    meta: OpenAlexMeta,
    results: Vec<OpenAlexWork>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexMeta {
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexWork {
    title: Option<String>,
    display_name: Option<String>,
    publication_year: Option<i32>,
    #[serde(rename = "abstract_inverted_index")]
    abstract_index: Option<serde_json::Value>,
    primary_location: Option<OpenAlexLocation>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexLocation {
    source: Option<OpenAlexSource>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexSource {
    display_name: Option<String>,
}

/// Query OpenAlex for works matching `terms`.
///
/// Pages are fetched sequentially through the cursor with a fixed delay in
/// between; a bearer token is attached when `OPENALEX_API_KEY` is set.
pub async fn query(terms: &SearchTerms) -> Result<Vec<OpenAlexRecord>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| LivrevError::Config(format!("Failed to build HTTP client: {}", e)))?;

    let filter = build_filter(terms);
    let api_key = std::env::var(API_KEY_ENV).ok();
    let per_page = terms.per_page.min(MAX_PER_PAGE);

    info!(
        filter = %filter,
        per_page = per_page,
        max_pages = terms.max_pages,
        "Starting OpenAlex query"
    );

    let mut records = Vec::new();
    let mut cursor = Some("*".to_string());
    let mut pages = 0;

    while let Some(current) = cursor {
        if pages >= terms.max_pages {
            debug!(pages = pages, "Page cap reached");
            break;
        }

        let params: Vec<(&str, String)> = vec![
            ("filter", filter.clone()),
            ("per-page", per_page.to_string()),
            ("cursor", current.clone()),
        ];
        let mut request = client.get(OPENALEX_API_BASE).query(&params);
        if let Some(ref key) = api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LivrevError::RateLimited(60));
        }
        if !status.is_success() {
            return Err(LivrevError::Api {
                code: status.as_u16() as i32,
                message: format!("OpenAlex API error: {}", status),
            });
        }

        let data: OpenAlexResponse = response
            .json()
            .await
            .map_err(|e| LivrevError::Parse(format!("Failed to parse OpenAlex response: {}", e)))?;

        let page_count = data.results.len();
        records.extend(data.results.into_iter().map(parse_work));
        pages += 1;
        debug!(page = pages, count = page_count, "Parsed OpenAlex page");

        cursor = data.meta.next_cursor.filter(|c| !c.is_empty());
        if cursor.is_some() {
            tokio::time::sleep(PAGE_SLEEP).await;
        }
    }

    info!(total = records.len(), pages = pages, "OpenAlex query complete");
    Ok(records)
}

/// Build the `filter` expression from search and exclusion terms.
fn build_filter(terms: &SearchTerms) -> String {
    let mut filters = Vec::new();

    if !terms.title_terms.is_empty() {
        filters.push(format!("title.search:{}", terms.title_terms.join("|")));
    }
    if !terms.abstract_terms.is_empty() {
        filters.push(format!(
            "abstract.search:{}",
            terms.abstract_terms.join("|")
        ));
    }
    for term in &terms.exclude_terms {
        filters.push(format!("NOT concepts.display_name:{}", term));
    }

    filters.join(",")
}

fn parse_work(work: OpenAlexWork) -> OpenAlexRecord {
    let title = work.display_name.or(work.title).unwrap_or_default();
    let journal = work
        .primary_location
        .and_then(|l| l.source)
        .and_then(|s| s.display_name);
    let abstract_text = work
        .abstract_index
        .map(|index| reconstruct_abstract(&index))
        .filter(|a| !a.is_empty());

    OpenAlexRecord {
        title,
        journal,
        year: work.publication_year,
        abstract_text,
    }
}

/// Reconstruct abstract text from the inverted index.
///
/// OpenAlex serves abstracts as word -> positions maps for legal reasons;
/// sorting the (position, word) pairs restores the plaintext.
fn reconstruct_abstract(inverted_index: &serde_json::Value) -> String {
    if let Some(obj) = inverted_index.as_object() {
        let mut words: Vec<(i64, &str)> = Vec::new();

        for (word, positions) in obj {
            if let Some(pos_array) = positions.as_array() {
                for pos in pos_array {
                    if let Some(p) = pos.as_i64() {
                        words.push((p, word.as_str()));
                    }
                }
            }
        }

        words.sort_by_key(|(pos, _)| *pos);
        words.iter().map(|(_, w)| *w).collect::<Vec<_>>().join(" ")
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(titles: &[&str], abstracts: &[&str], excludes: &[&str]) -> SearchTerms {
        SearchTerms {
            title_terms: titles.iter().map(|s| s.to_string()).collect(),
            abstract_terms: abstracts.iter().map(|s| s.to_string()).collect(),
            exclude_terms: excludes.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_filter_full() {
        let filter = build_filter(&terms(
            &["replication", "reproducibility"],
            &["meta-analysis"],
            &["Economics"],
        ));
        assert_eq!(
            filter,
            "title.search:replication|reproducibility,abstract.search:meta-analysis,NOT concepts.display_name:Economics"
        );
    }

    #[test]
    fn test_build_filter_title_only() {
        assert_eq!(
            build_filter(&terms(&["replication"], &[], &[])),
            "title.search:replication"
        );
    }

    #[test]
    fn test_reconstruct_abstract() {
        let index = serde_json::json!({
            "study": [2],
            "We": [0],
            "replication.": [3],
            "a": [1]
        });
        assert_eq!(reconstruct_abstract(&index), "We a study replication.");
    }

    #[test]
    fn test_parse_work_prefers_display_name() {
        let work = OpenAlexWork {
            title: Some("short".to_string()),
            display_name: Some("Full Display Title".to_string()),
            publication_year: Some(2022),
            abstract_index: None,
            primary_location: Some(OpenAlexLocation {
                source: Some(OpenAlexSource {
                    display_name: Some("Nature".to_string()),
                }),
            }),
        };
        let record = parse_work(work);
        assert_eq!(record.title, "Full Display Title");
        assert_eq!(record.journal.as_deref(), Some("Nature"));
        assert_eq!(record.year, Some(2022));
        assert_eq!(record.abstract_text, None);
    }
}
