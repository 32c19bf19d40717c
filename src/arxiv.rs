//! arXiv Atom API client.
//!
//! Single-page search against `export.arxiv.org/api/query` using arXiv's
//! native boolean query syntax (e.g. `(ti:replication OR abs:replication)
//! AND cat:stat.ME`), sorted by submission date descending. The Atom feed is
//! parsed into raw entries; the normalizer derives the canonical fields.

use crate::error::{LivrevError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const ARXIV_API_BASE: &str = "http://export.arxiv.org/api/query";

const USER_AGENT: &str = "livrev/1.0 (mailto:livrev@example.com)";

/// One feed entry in arXiv shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArxivRecord {
    pub arxiv_id: String,
    pub title: String,
    pub summary: String,
    /// Publication timestamp as served by the feed (ISO 8601)
    pub published: String,
}

/// Query parameters for one search.
#[derive(Debug, Clone)]
pub struct ArxivQuery {
    /// Query string in arXiv's native syntax
    pub query: String,
    /// Page size, single page only
    pub max_results: usize,
    /// Offset into the result list
    pub start: usize,
}

impl Default for ArxivQuery {
    fn default() -> Self {
        Self {
            query: String::new(),
            max_results: 200,
            start: 0,
        }
    }
}

/// Search arXiv and return one page of entries, newest submissions first.
pub async fn query(params: &ArxivQuery) -> Result<Vec<ArxivRecord>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| LivrevError::Config(format!("Failed to build HTTP client: {}", e)))?;

    info!(
        query = %params.query,
        max_results = params.max_results,
        "Starting arXiv query"
    );

    let url = build_search_url(params);
    let response = client.get(&url).send().await?;
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LivrevError::RateLimited(60));
    }
    if !status.is_success() {
        return Err(LivrevError::Api {
            code: status.as_u16() as i32,
            message: format!("arXiv API error: {}", status),
        });
    }

    let body = response.text().await?;
    let records = parse_atom(&body)?;
    info!(total = records.len(), "arXiv query complete");
    Ok(records)
}

/// Build the API query URL, sorted by submission date descending.
fn build_search_url(params: &ArxivQuery) -> String {
    format!(
        "{}?search_query={}&start={}&max_results={}&sortBy=submittedDate&sortOrder=descending",
        ARXIV_API_BASE,
        urlencoding::encode(&params.query),
        params.start,
        params.max_results,
    )
}

/// Parse the Atom feed into entries.
///
/// The feed-level `<title>` is ignored; only tags inside `<entry>` count.
fn parse_atom(xml: &str) -> Result<Vec<ArxivRecord>> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut records = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut current: Option<ArxivRecord> = None;
    let mut in_id = false;
    let mut in_title = false;
    let mut in_summary = false;
    let mut in_published = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"entry" => current = Some(ArxivRecord::default()),
                b"id" if current.is_some() => in_id = true,
                b"title" if current.is_some() => in_title = true,
                b"summary" if current.is_some() => in_summary = true,
                b"published" if current.is_some() => in_published = true,
                _ => {}
            },
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if let Some(ref mut record) = current {
                    if in_id {
                        record.arxiv_id.push_str(&text);
                    }
                    if in_title {
                        record.title.push_str(&text);
                    }
                    if in_summary {
                        record.summary.push_str(&text);
                    }
                    if in_published {
                        record.published.push_str(&text);
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"id" => in_id = false,
                b"title" => in_title = false,
                b"summary" => in_summary = false,
                b"published" => in_published = false,
                b"entry" => {
                    if let Some(record) = current.take() {
                        debug!(id = %record.arxiv_id, "Parsed arXiv entry");
                        records.push(record);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(LivrevError::Parse(format!(
                    "Failed to parse arXiv Atom feed: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}
