//! # medlit
//!
//! Federated clinical literature search over PubMed, PubMed Central and
//! KoreaMed, served as Model Context Protocol (MCP) tools.
//!
//! A structured patient presentation is turned into ranked queries, the
//! queries are fanned out to every database in parallel, and the merged
//! records are filtered, deduplicated and scored against the presentation.
//! The library surfaces literature; it never proposes a diagnosis.
//!
//! ## Architecture
//!
//! - [`models`]: Patient summaries, records, requests and results
//! - [`sources`]: Database adapters behind the [`Source`] trait
//! - [`search`]: Query generation, exclusion, scoring and orchestration
//! - [`mcp`]: MCP tool registry and server
//! - [`utils`]: HTTP client, retry, deduplication and markdown rendering
//! - [`config`]: Configuration management

pub mod config;
pub mod mcp;
pub mod models;
pub mod search;
pub mod sources;
pub mod utils;

pub use models::{PatientSummary, RawRecord, ScoredRecord, SearchResult};
pub use search::{SearchContext, SearchOrchestrator};
pub use sources::{Source, SourceRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
