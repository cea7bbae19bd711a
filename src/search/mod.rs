//! Query generation, exclusion, scoring and federated search orchestration.
//!
//! Data flows from a [`PatientSummary`](crate::models::PatientSummary) through
//! the [`QueryGenerator`], out to the adapters via the [`SearchOrchestrator`],
//! and back through the [`ExclusionFilter`] and [`RelevanceScorer`] into a ranked
//! [`SearchResult`](crate::models::SearchResult).

mod exclusion;
mod extract;
mod orchestrator;
mod query_gen;
mod scoring;

pub use exclusion::{filter, ExclusionFilter, SUBSTANCE_ABUSE_TERMS};
pub use extract::{extract_highlights, extract_summary, split_sentences, SUMMARY_MAX_WORDS};
pub use orchestrator::{OrchestratorSettings, SearchContext, SearchError, SearchOrchestrator};
pub use query_gen::{QueryGenerator, DEFAULT_FIELD_TAG};
pub use scoring::{compare_scored, sort_scored, RelevanceScorer};
