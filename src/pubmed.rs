//! PubMed E-utilities client.
//!
//! Endpoints used:
//!   esearch: https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi
//!   efetch:  https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi
//!
//! Two-step protocol: `search` submits a boolean query conjoined with a
//! publication-date range and returns one page of PMIDs plus the server-side
//! total hit count; `fetch` retrieves XML citation records in fixed batches.
//! Records whose XML carries no abstract get one scrape of the public
//! article page, accepted only when the text is a PIP abstract.
//!
//! Every request is followed by a fixed sleep. NCBI's usage policy caps
//! request rates; the delays are load-bearing, not tuning.

use crate::error::{LivrevError, OptionExt, Result};
use crate::normalize::collapse_whitespace;
use crate::schema::AbstractSource;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";
const ARTICLE_BASE: &str = "https://pubmed.ncbi.nlm.nih.gov";

/// PMIDs per efetch request
const EFETCH_BATCH_SIZE: usize = 50;

/// Delay between successive E-utilities calls
const ENTREZ_SLEEP: Duration = Duration::from_millis(300);

/// Delay after each article-page scrape
const SCRAPE_SLEEP: Duration = Duration::from_millis(500);

/// Marker identifying a usable fallback abstract on the article page
const PIP_MARKER: &str = "PIP:";

const TOOL: &str = "livrev";
const CONTACT_EMAIL: &str = "livrev@example.com";
const USER_AGENT: &str = "livrev/1.0 (mailto:livrev@example.com)";

/// One citation as parsed from the efetch XML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PubMedRecord {
    pub pmid: String,
    pub title: String,
    pub journal: Option<String>,
    pub year: Option<String>,
    pub abstract_text: Option<String>,
    pub abstract_source: AbstractSource,
}

/// One esearch result page.
///
/// `total_hits` is the server-reported hit count; the page holds at most
/// `retmax` identifiers, so the two can differ.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub pmids: Vec<String>,
    pub total_hits: u64,
}

/// E-utilities client with fixed inter-request delays.
pub struct PubMedClient {
    client: Client,
}

impl PubMedClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| LivrevError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Search PubMed for `query` within a publication-date window.
    pub async fn search(
        &self,
        query: &str,
        retmax: usize,
        start_year: i32,
        end_year: i32,
    ) -> Result<SearchPage> {
        let url = build_esearch_url(query, retmax, start_year, end_year)?;
        info!(url = %url, retmax = retmax, "Starting PubMed esearch");

        let response = self.client.get(url.as_str()).send().await?;
        check_status(&response, "esearch")?;
        let data: serde_json::Value = response.json().await?;

        let result = data
            .get("esearchresult")
            .ok_or_parse("esearch response missing esearchresult")?;
        let pmids: Vec<String> = result["idlist"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        let total_hits: u64 = result["count"]
            .as_str()
            .and_then(|c| c.parse().ok())
            .ok_or_parse("esearch response missing hit count")?;

        info!(page = pmids.len(), total = total_hits, "PubMed esearch complete");
        tokio::time::sleep(ENTREZ_SLEEP).await;
        Ok(SearchPage { pmids, total_hits })
    }

    /// Fetch full citation records for `pmids`, with PIP fallback for
    /// records the XML left without an abstract.
    ///
    /// Network or parse failures fail the whole fetch; there is no
    /// partial-result suppression.
    pub async fn fetch(&self, pmids: &[String]) -> Result<Vec<PubMedRecord>> {
        let mut records = Vec::new();
        if pmids.is_empty() {
            return Ok(records);
        }

        let batches: Vec<&[String]> = pmids.chunks(EFETCH_BATCH_SIZE).collect();
        let total_batches = batches.len();

        for (idx, batch) in batches.into_iter().enumerate() {
            debug!(
                batch = idx + 1,
                total_batches = total_batches,
                size = batch.len(),
                "Fetching citation XML"
            );
            let params: Vec<(&str, String)> = vec![
                ("db", "pubmed".to_string()),
                ("id", batch.join(",")),
                ("retmode", "xml".to_string()),
                ("tool", TOOL.to_string()),
                ("email", CONTACT_EMAIL.to_string()),
            ];
            let response = self.client.get(EFETCH_URL).query(&params).send().await?;
            check_status(&response, "efetch")?;
            let xml = response.text().await?;
            records.extend(parse_pubmed_xml(&xml)?);
            tokio::time::sleep(ENTREZ_SLEEP).await;
        }

        let missing = records.iter().filter(|r| r.abstract_text.is_none()).count();
        if missing > 0 {
            info!(missing = missing, "Scraping article pages for PIP abstracts");
        }
        for record in records.iter_mut().filter(|r| r.abstract_text.is_none()) {
            let html = self.fetch_article_html(&record.pmid).await?;
            if let Some(text) = extract_abstract_block(&html) {
                if text.starts_with(PIP_MARKER) {
                    debug!(pmid = %record.pmid, "Accepted PIP fallback abstract");
                    record.abstract_text = Some(text);
                    record.abstract_source = AbstractSource::PipWeb;
                }
            }
        }

        info!(total = records.len(), "PubMed fetch complete");
        Ok(records)
    }

    async fn fetch_article_html(&self, pmid: &str) -> Result<String> {
        let url = format!("{}/{}/", ARTICLE_BASE, pmid);
        let response = self.client.get(&url).send().await?;
        check_status(&response, "article page")?;
        let html = response.text().await?;
        tokio::time::sleep(SCRAPE_SLEEP).await;
        Ok(html)
    }
}

fn check_status(response: &reqwest::Response, endpoint: &str) -> Result<()> {
    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LivrevError::RateLimited(60));
    }
    if !status.is_success() {
        return Err(LivrevError::Api {
            code: status.as_u16() as i32,
            message: format!("PubMed {} error: {}", endpoint, status),
        });
    }
    Ok(())
}

/// Publication-date range predicate in E-utilities query syntax.
pub fn date_filter(start_year: i32, end_year: i32) -> String {
    format!(
        "(\"{}\"[Date - Publication] : \"{}\"[Date - Publication])",
        start_year, end_year
    )
}

/// Build the esearch URL: the query conjoined with the date-range predicate.
fn build_esearch_url(query: &str, retmax: usize, start_year: i32, end_year: i32) -> Result<Url> {
    let mut url = Url::parse(ESEARCH_URL)
        .map_err(|e| LivrevError::Config(format!("Invalid esearch URL: {}", e)))?;
    let term = format!("{} AND {}", query, date_filter(start_year, end_year));
    {
        let mut params = url.query_pairs_mut();
        params.append_pair("db", "pubmed");
        params.append_pair("term", &term);
        params.append_pair("retmax", &retmax.to_string());
        params.append_pair("retmode", "json");
        params.append_pair("tool", TOOL);
        params.append_pair("email", CONTACT_EMAIL);
    }
    Ok(url)
}

/// Parse efetch XML (`<PubmedArticleSet><PubmedArticle>...`) into records.
fn parse_pubmed_xml(xml: &str) -> Result<Vec<PubMedRecord>> {
    let mut records = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    // State machine over the citation structure. Journal title and year are
    // gated on their enclosing blocks: <Title> only counts inside <Journal>,
    // <Year> only inside <PubDate> (DateCompleted and friends also carry a
    // <Year>).
    let mut current: Option<PubMedRecord> = None;
    let mut abstract_segments: Vec<String> = Vec::new();
    let mut in_pmid = false;
    let mut in_article_title = false;
    let mut in_abstract = false;
    let mut in_abstract_text = false;
    let mut in_journal = false;
    let mut in_journal_title = false;
    let mut in_pub_date = false;
    let mut in_year = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"PubmedArticle" => {
                    current = Some(PubMedRecord::default());
                    abstract_segments.clear();
                }
                b"PMID" => in_pmid = true,
                b"ArticleTitle" => in_article_title = true,
                b"Abstract" => in_abstract = true,
                b"AbstractText" if in_abstract => {
                    abstract_segments.push(String::new());
                    in_abstract_text = true;
                }
                b"Journal" => in_journal = true,
                b"Title" if in_journal => in_journal_title = true,
                b"PubDate" => in_pub_date = true,
                b"Year" if in_pub_date => in_year = true,
                _ => {}
            },
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                if let Some(ref mut record) = current {
                    if in_pmid && record.pmid.is_empty() {
                        record.pmid = text.clone();
                    }
                    if in_article_title {
                        record.title.push_str(&text);
                    }
                    if in_abstract_text {
                        if let Some(segment) = abstract_segments.last_mut() {
                            segment.push_str(&text);
                        }
                    }
                    if in_journal_title {
                        record.journal.get_or_insert_with(String::new).push_str(&text);
                    }
                    if in_year && record.year.is_none() {
                        record.year = Some(text.clone());
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"PMID" => in_pmid = false,
                b"ArticleTitle" => in_article_title = false,
                b"Abstract" => in_abstract = false,
                b"AbstractText" => in_abstract_text = false,
                b"Journal" => in_journal = false,
                b"Title" => in_journal_title = false,
                b"PubDate" => in_pub_date = false,
                b"Year" => in_year = false,
                b"PubmedArticle" => {
                    if let Some(mut record) = current.take() {
                        let segments: Vec<String> = abstract_segments
                            .drain(..)
                            .filter(|s| !s.trim().is_empty())
                            .collect();
                        if !segments.is_empty() {
                            record.abstract_text = Some(segments.join(" "));
                            record.abstract_source = AbstractSource::PubmedXml;
                        }
                        records.push(record);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(LivrevError::Parse(format!(
                    "Failed to parse efetch XML: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

/// Extract the abstract block from a public article page.
///
/// Joins the block's paragraph texts; falls back to the block's own text
/// when it has no paragraphs. Returns `None` when the page has no abstract
/// block at all.
fn extract_abstract_block(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let section = Selector::parse("section.abstract").ok()?;
    let div = Selector::parse("div.abstract").ok()?;
    let block = document
        .select(&section)
        .next()
        .or_else(|| document.select(&div).next())?;

    let paragraph = Selector::parse("p").ok()?;
    let paragraphs: Vec<String> = block
        .select(&paragraph)
        .map(|p| collapse_whitespace(&p.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .collect();

    let text = if paragraphs.is_empty() {
        collapse_whitespace(&block.text().collect::<String>())
    } else {
        paragraphs.join(" ")
    };

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
