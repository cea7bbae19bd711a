//! Core data models for patient presentations, literature records and searches.

mod patient;
mod record;
mod search;

pub use patient::{split_query_groups, split_query_terms, ExclusionSet, PatientSummary};
pub use record::{
    CaseHighlights, DatabaseId, RawRecord, RawRecordBuilder, RelevanceBand, ScoredRecord,
};
pub use search::{
    default_publication_types, AdapterError, AdapterErrorKind, DatabaseReport,
    NoResultsCondition, Query, SearchOptions, SearchRequest, SearchResult, SearchRound,
    SearchStatus, Strategy, ValidationError, DEFAULT_MAX_RESULTS_PER_DB, DEFAULT_PUBLICATION_TYPE,
};
