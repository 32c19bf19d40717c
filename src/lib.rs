//! # livrev
//!
//! Record ingestion pipeline for living systematic reviews
//!
//! ## Modules
//!
//! - [`pubmed`] - PubMed E-utilities client with PIP abstract fallback
//! - [`openalex`] - OpenAlex REST client with cursor pagination
//! - [`arxiv`] - arXiv Atom feed client
//! - [`columns`] - Bibliographic column detection for uploaded exports
//! - [`normalize`] - Conversion of source rows into candidate records
//! - [`merge`] - Dedup-merge engine and round allocation
//! - [`store`] - Canonical dataset persistence
//! - [`schema`] - Canonical record schema
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use livrev::merge::SearchProvenance;
//! use livrev::normalize::NewRecord;
//! use livrev::store::DatasetStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = livrev::pubmed::PubMedClient::new()?;
//!     let page = client.search("replication[tiab]", 200, 2000, 2024).await?;
//!     let candidates: Vec<NewRecord> = client
//!         .fetch(&page.pmids)
//!         .await?
//!         .into_iter()
//!         .map(NewRecord::from)
//!         .collect();
//!
//!     let store = DatasetStore::new("projects/demo/data.csv");
//!     let outcome = store.merge_candidates(
//!         candidates,
//!         &SearchProvenance {
//!             database: "pubmed".to_string(),
//!             search_start_year: 2000,
//!             search_end_year: 2024,
//!         },
//!     )?;
//!     println!("Added {} records in round {}", outcome.records_added, outcome.search_round);
//!     Ok(())
//! }
//! ```

pub mod arxiv;
pub mod columns;
pub mod error;
pub mod merge;
pub mod normalize;
pub mod openalex;
pub mod pubmed;
pub mod schema;
pub mod store;

pub use error::{LivrevError, Result};
