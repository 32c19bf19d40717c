//! livrev - Living Systematic Review Record Pipeline
//!
//! Accumulates bibliographic records across repeated searches of multiple
//! literature databases, deduplicating by title and stamping every batch
//! with a monotonically increasing search round.
//!
//! ## Usage
//!
//! ### CLI Mode
//! ```bash
//! livrev search "replication[tiab]" --dataset projects/demo/data.csv
//! livrev import export.csv --dataset projects/demo/data.csv --database "Web of Science"
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! livrev serve --port 3000
//! ```

use anyhow::{Context, Result};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::{Datelike, Local};
use clap::{Parser, Subcommand};
use livrev::columns::{self, ColumnOverrides, DetectedColumns, Field, FieldOverride};
use livrev::merge::{MergeOutcome, SearchProvenance};
use livrev::normalize::{self, NewRecord};
use livrev::store::{decode_text, DatasetStore};
use livrev::{arxiv, openalex, pubmed, LivrevError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Living Systematic Review Record Pipeline
#[derive(Parser)]
#[command(name = "livrev")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search a literature database and merge the results into a dataset
    Search {
        /// Search query (PubMed boolean syntax or arXiv native syntax)
        query: String,

        /// Search source
        #[arg(long, default_value = "pubmed", value_parser = ["pubmed", "openalex", "arxiv"])]
        source: String,

        /// Project dataset CSV
        #[arg(long)]
        dataset: PathBuf,

        /// Database label for records that carry none of their own
        /// (default: the source name)
        #[arg(long)]
        database: Option<String>,

        /// Search start year
        #[arg(long, default_value_t = 2000)]
        start_year: i32,

        /// Search end year (default: current year)
        #[arg(long)]
        end_year: Option<i32>,

        /// Identifier cap for PubMed, page size for OpenAlex/arXiv
        #[arg(long, default_value_t = 200)]
        retmax: usize,

        /// Page cap for OpenAlex cursor pagination
        #[arg(long, default_value_t = 5)]
        max_pages: usize,

        /// OpenAlex: comma-separated title search terms (default: the query)
        #[arg(long)]
        title_terms: Option<String>,

        /// OpenAlex: comma-separated abstract search terms
        #[arg(long)]
        abstract_terms: Option<String>,

        /// OpenAlex: comma-separated concepts to exclude
        #[arg(long)]
        exclude: Option<String>,
    },

    /// Import a CSV exported from a literature database
    Import {
        /// Path to the exported CSV
        csv: PathBuf,

        /// Project dataset CSV
        #[arg(long)]
        dataset: PathBuf,

        /// Name of the database that was searched
        #[arg(long)]
        database: String,

        /// Search start year
        #[arg(long, default_value_t = 2000)]
        start_year: i32,

        /// Search end year (default: current year)
        #[arg(long)]
        end_year: Option<i32>,

        /// Override the detected title column ("none" forces unmapped)
        #[arg(long)]
        title_col: Option<String>,

        /// Override the detected abstract column
        #[arg(long)]
        abstract_col: Option<String>,

        /// Override the detected journal column
        #[arg(long)]
        journal_col: Option<String>,

        /// Override the detected year column
        #[arg(long)]
        year_col: Option<String>,

        /// Comma-separated extra columns to retain next to the canonical schema
        #[arg(long)]
        keep: Option<String>,
    },

    /// Show which canonical fields are detected in an export's columns
    Resolve {
        /// Path to the exported CSV
        csv: PathBuf,
    },

    /// Run as HTTP server exposing the resolve and import contracts
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Commands::Search {
            query,
            source,
            dataset,
            database,
            start_year,
            end_year,
            retmax,
            max_pages,
            title_terms,
            abstract_terms,
            exclude,
        } => {
            run_search(
                query,
                source,
                dataset,
                database,
                start_year,
                end_year,
                retmax,
                max_pages,
                title_terms,
                abstract_terms,
                exclude,
            )
            .await
        }
        Commands::Import {
            csv,
            dataset,
            database,
            start_year,
            end_year,
            title_col,
            abstract_col,
            journal_col,
            year_col,
            keep,
        } => run_import(
            csv,
            dataset,
            database,
            start_year,
            end_year,
            title_col,
            abstract_col,
            journal_col,
            year_col,
            keep,
        ),
        Commands::Resolve { csv } => run_resolve(csv),
        Commands::Serve { port, host } => run_server(host, port).await,
    }
}

// ============================================================================
// Search Pipeline
// ============================================================================

#[allow(clippy::too_many_arguments)]
async fn run_search(
    query: String,
    source: String,
    dataset: PathBuf,
    database: Option<String>,
    start_year: i32,
    end_year: Option<i32>,
    retmax: usize,
    max_pages: usize,
    title_terms: Option<String>,
    abstract_terms: Option<String>,
    exclude: Option<String>,
) -> Result<()> {
    if query.trim().is_empty() {
        anyhow::bail!("Search query must not be empty");
    }
    let end_year = end_year.unwrap_or_else(|| Local::now().year());

    let candidates: Vec<NewRecord> = match source.as_str() {
        "pubmed" => {
            let client = pubmed::PubMedClient::new()?;
            let page = client.search(&query, retmax, start_year, end_year).await?;
            println!(
                "PubMed: fetched {} of {} total hits.",
                page.pmids.len(),
                page.total_hits
            );
            client
                .fetch(&page.pmids)
                .await?
                .into_iter()
                .map(NewRecord::from)
                .collect()
        }
        "openalex" => {
            let title_terms = {
                let parsed = parse_list(title_terms);
                if parsed.is_empty() {
                    vec![query.clone()]
                } else {
                    parsed
                }
            };
            let terms = openalex::SearchTerms {
                title_terms,
                abstract_terms: parse_list(abstract_terms),
                exclude_terms: parse_list(exclude),
                per_page: retmax,
                max_pages,
            };
            openalex::query(&terms)
                .await?
                .into_iter()
                .map(NewRecord::from)
                .collect()
        }
        "arxiv" => {
            let params = arxiv::ArxivQuery {
                query: query.clone(),
                max_results: retmax,
                ..Default::default()
            };
            arxiv::query(&params)
                .await?
                .into_iter()
                .map(NewRecord::from)
                .collect()
        }
        other => anyhow::bail!("Invalid source: {}", other),
    };

    let fetched = candidates.len();
    println!("Fetched {} records from {}.", fetched, source);

    let provenance = SearchProvenance {
        database: database.unwrap_or_else(|| source.clone()),
        search_start_year: start_year,
        search_end_year: end_year,
    };
    let store = DatasetStore::new(&dataset);
    let outcome = store
        .merge_candidates(candidates, &provenance)
        .context("Failed to merge search results")?;

    println!(
        "Added {} of {} fetched records (search round {}).",
        outcome.records_added, fetched, outcome.search_round
    );
    println!(
        "Dataset: {} ({} records)",
        dataset.display(),
        store.record_count()?
    );
    Ok(())
}

// ============================================================================
// CSV Import
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn run_import(
    csv: PathBuf,
    dataset: PathBuf,
    database: String,
    start_year: i32,
    end_year: Option<i32>,
    title_col: Option<String>,
    abstract_col: Option<String>,
    journal_col: Option<String>,
    year_col: Option<String>,
    keep: Option<String>,
) -> Result<()> {
    let end_year = end_year.unwrap_or_else(|| Local::now().year());
    let bytes = std::fs::read(&csv)
        .with_context(|| format!("Failed to read {}", csv.display()))?;
    let text = decode_text(&bytes);

    let overrides = ColumnOverrides {
        title: override_from(title_col),
        abstract_text: override_from(abstract_col),
        journal: override_from(journal_col),
        year: override_from(year_col),
    };
    let keep = parse_list(keep);

    let store = DatasetStore::new(&dataset);
    let outcome = import_csv_text(
        &text,
        &store,
        &database,
        start_year,
        end_year,
        &overrides,
        &keep,
    )?;

    println!(
        "Imported {} new records (search {}).",
        outcome.records_added, outcome.search_round
    );
    println!(
        "Dataset: {} ({} records)",
        dataset.display(),
        store.record_count()?
    );
    Ok(())
}

/// Resolve, normalize and merge one uploaded CSV export.
///
/// Rejected imports (missing database label, unresolvable title column,
/// unreadable rows) leave the dataset untouched.
fn import_csv_text(
    text: &str,
    store: &DatasetStore,
    database: &str,
    start_year: i32,
    end_year: i32,
    overrides: &ColumnOverrides,
    keep: &[String],
) -> livrev::Result<MergeOutcome> {
    if database.trim().is_empty() {
        return Err(LivrevError::Validation(
            "A database name is required to import records".to_string(),
        ));
    }

    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let resolved = columns::apply_overrides(columns::resolve(&headers), overrides);
    if resolved.title_col.is_none() {
        return Err(LivrevError::Validation(
            "A title column is required to import records".to_string(),
        ));
    }
    if resolved.abstract_col.is_none() {
        warn!("No abstract column resolved; records will be imported without abstracts");
    }

    let mut candidates = Vec::new();
    for row in reader.records() {
        candidates.push(normalize::from_csv_row(&headers, &row?, &resolved, keep));
    }

    let provenance = SearchProvenance {
        database: database.to_string(),
        search_start_year: start_year,
        search_end_year: end_year,
    };
    store.merge_candidates(candidates, &provenance)
}

fn run_resolve(csv: PathBuf) -> Result<()> {
    let bytes = std::fs::read(&csv)
        .with_context(|| format!("Failed to read {}", csv.display()))?;
    let text = decode_text(&bytes);

    let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(str::to_string)
        .collect();
    let detected = columns::resolve(&headers);

    println!("{:<10} {}", "Field", "Detected column");
    for field in Field::ALL {
        println!(
            "{:<10} {}",
            field.as_str(),
            detected.get(field).unwrap_or("(not detected)")
        );
    }
    Ok(())
}

/// Split a comma-separated flag value into trimmed, non-empty items
fn parse_list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Map a column override flag to a field override ("none" forces unmapped)
fn override_from(flag: Option<String>) -> FieldOverride {
    match flag {
        None => FieldOverride::Auto,
        Some(value) if value.eq_ignore_ascii_case("none") => FieldOverride::Unmapped,
        Some(value) => FieldOverride::Use(value),
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(host: String, port: u16) -> Result<()> {
    info!(host = %host, port = port, "Starting HTTP server");

    let app_state = Arc::new(AppState::default());

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/resolve", post(resolve_handler))
        .route("/import", post(import_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}

/// Shared server state: one store per dataset path, so concurrent imports
/// into the same project serialize on that store's lock.
#[derive(Default)]
struct AppState {
    stores: Mutex<HashMap<PathBuf, Arc<DatasetStore>>>,
}

impl AppState {
    fn store_for(&self, path: &Path) -> Arc<DatasetStore> {
        let mut stores = self
            .stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        stores
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(DatasetStore::new(path)))
            .clone()
    }
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Column resolution request body
#[derive(Debug, Deserialize)]
struct ResolveRequest {
    columns: Vec<String>,
}

/// Column resolution endpoint handler
async fn resolve_handler(Json(req): Json<ResolveRequest>) -> Json<DetectedColumns> {
    info!(columns = req.columns.len(), "Resolve request");
    Json(columns::resolve(&req.columns))
}

/// CSV import request body
#[derive(Debug, Deserialize)]
struct ImportRequest {
    /// Project dataset CSV path
    dataset: PathBuf,
    /// Name of the database that was searched
    database: String,
    search_start_year: i32,
    search_end_year: i32,
    /// Content of the exported CSV
    csv: String,
    #[serde(default)]
    title_col: Option<String>,
    #[serde(default)]
    abstract_col: Option<String>,
    #[serde(default)]
    journal_col: Option<String>,
    #[serde(default)]
    year_col: Option<String>,
    #[serde(default)]
    keep: Vec<String>,
}

/// CSV import response
#[derive(Debug, Serialize)]
struct ImportResponse {
    status: String,
    records_added: usize,
    search_round: u32,
}

/// CSV import endpoint handler
async fn import_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImportRequest>,
) -> Json<ImportResponse> {
    info!(
        dataset = %req.dataset.display(),
        database = %req.database,
        "Import request"
    );

    let store = state.store_for(&req.dataset);
    let overrides = ColumnOverrides {
        title: override_from(req.title_col),
        abstract_text: override_from(req.abstract_col),
        journal: override_from(req.journal_col),
        year: override_from(req.year_col),
    };

    match import_csv_text(
        &req.csv,
        &store,
        &req.database,
        req.search_start_year,
        req.search_end_year,
        &overrides,
        &req.keep,
    ) {
        Ok(outcome) => Json(ImportResponse {
            status: "success".to_string(),
            records_added: outcome.records_added,
            search_round: outcome.search_round,
        }),
        Err(e) => {
            error!(error = %e, "Import failed");
            Json(ImportResponse {
                status: format!("error: {}", e),
                records_added: 0,
                search_round: 0,
            })
        }
    }
}
