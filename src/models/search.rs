//! Search request and result models.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::record::{DatabaseId, ScoredRecord};

/// Default number of records requested from each database
pub const DEFAULT_MAX_RESULTS_PER_DB: usize = 5;

/// Publication type requested when the caller does not specify one
pub const DEFAULT_PUBLICATION_TYPE: &str = "Case Reports";

/// A generated search query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Query string in PubMed syntax
    pub text: String,

    /// 1 = highest priority (narrowest)
    pub priority: u32,

    /// Which symptom subset and context this query covers
    pub scope_description: String,
}

impl Query {
    /// Create a new query
    pub fn new(text: impl Into<String>, priority: u32, scope_description: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            priority,
            scope_description: scope_description.into(),
        }
    }

    /// Wrap a caller-supplied query string
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(text, 1, "Caller-supplied query")
    }
}

/// Order in which generated queries are issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Start with the most specific query and broaden while results are weak
    NarrowToBroad,
    /// Start with the broadest query and narrow while results are weak
    BroadToNarrow,
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "narrow_to_broad" => Ok(Strategy::NarrowToBroad),
            "broad_to_narrow" => Ok(Strategy::BroadToNarrow),
            other => Err(format!("Unknown strategy '{}'", other)),
        }
    }
}

/// Database selection and limits shared by every query of a search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Databases to search
    pub databases: BTreeSet<DatabaseId>,

    /// Maximum records per database (must be > 0)
    pub max_results_per_db: usize,

    /// Per-database overrides of `max_results_per_db`
    #[serde(default)]
    pub max_results_by_db: BTreeMap<DatabaseId, usize>,

    /// Publication types to restrict to
    pub publication_types: BTreeSet<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            databases: DatabaseId::ALL.into_iter().collect(),
            max_results_per_db: DEFAULT_MAX_RESULTS_PER_DB,
            max_results_by_db: BTreeMap::new(),
            publication_types: default_publication_types(),
        }
    }
}

impl SearchOptions {
    /// Build a request for one query with these options
    pub fn request(&self, query: Query) -> SearchRequest {
        SearchRequest {
            query,
            databases: self.databases.clone(),
            max_results_per_db: self.max_results_per_db,
            max_results_by_db: self.max_results_by_db.clone(),
            publication_types: self.publication_types.clone(),
        }
    }
}

/// Request to search a set of databases with one query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Query to execute
    pub query: Query,

    /// Databases to search
    pub databases: BTreeSet<DatabaseId>,

    /// Maximum records per database (must be > 0)
    pub max_results_per_db: usize,

    /// Per-database overrides of `max_results_per_db`
    #[serde(default)]
    pub max_results_by_db: BTreeMap<DatabaseId, usize>,

    /// Publication types to restrict to
    pub publication_types: BTreeSet<String>,
}

impl SearchRequest {
    /// Create a request for all databases with default limits
    pub fn new(query: Query) -> Self {
        SearchOptions::default().request(query)
    }

    /// Set databases
    pub fn databases<I: IntoIterator<Item = DatabaseId>>(mut self, databases: I) -> Self {
        self.databases = databases.into_iter().collect();
        self
    }

    /// Set maximum results per database
    pub fn max_results_per_db(mut self, max: usize) -> Self {
        self.max_results_per_db = max;
        self
    }

    /// Override the maximum for one database
    pub fn max_results_for(mut self, database: DatabaseId, max: usize) -> Self {
        self.max_results_by_db.insert(database, max);
        self
    }

    /// Set publication types
    pub fn publication_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.publication_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Effective cap for a database
    pub fn cap_for(&self, database: DatabaseId) -> usize {
        self.max_results_by_db
            .get(&database)
            .copied()
            .unwrap_or(self.max_results_per_db)
    }

    /// Reject the request before any adapter is invoked
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.query.text.trim().is_empty() {
            return Err(ValidationError::new("query", "query text must not be empty"));
        }
        if self.databases.is_empty() {
            return Err(ValidationError::new(
                "databases",
                "at least one database must be selected",
            ));
        }
        if self.max_results_per_db == 0 {
            return Err(ValidationError::new(
                "max_results_per_db",
                "must be greater than 0",
            ));
        }
        if let Some((db, _)) = self.max_results_by_db.iter().find(|(_, max)| **max == 0) {
            return Err(ValidationError::new(
                "max_results_by_db",
                format!("limit for {} must be greater than 0", db.id()),
            ));
        }
        Ok(())
    }
}

/// The default publication type filter
pub fn default_publication_types() -> BTreeSet<String> {
    BTreeSet::from([DEFAULT_PUBLICATION_TYPE.to_string()])
}

/// A request field that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("Invalid '{field}': {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Why an adapter contributed no records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    Timeout,
    RateLimited,
    Malformed,
    Unreachable,
}

/// A captured adapter failure, attached to the result rather than raised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterError {
    pub source: DatabaseId,
    pub kind: AdapterErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(source: DatabaseId, kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self {
            source,
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?}): {}", self.source, self.kind, self.message)
    }
}

/// Valid empty outcome; carries a suggestion for the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoResultsCondition {
    pub suggestion: String,
}

impl NoResultsCondition {
    pub fn broaden_terms() -> Self {
        Self {
            suggestion: "No matching records. Broaden the search: drop secondary symptoms or \
                         context, use synonyms or MeSH terms, remove the publication type \
                         filter, or try the narrow_to_broad strategy."
                .to_string(),
        }
    }
}

/// Overall outcome of a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    /// Every adapter answered
    Complete,
    /// Some adapters failed; records come from the rest
    Partial,
    /// Every adapter failed
    AllFailed,
}

/// What one database did for one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseReport {
    /// Query string actually sent to the database
    pub executed_query: String,

    /// The engine's interpretation of the query, when reported
    pub query_translation: Option<String>,

    /// Records returned (after the per-database cap)
    pub record_count: usize,

    /// Link for browsing more results on the database's own site
    pub external_search_url: String,

    /// Whether this database failed for this query
    pub failed: bool,
}

/// One executed query and its per-database outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRound {
    pub query: Query,
    pub databases: BTreeMap<DatabaseId, DatabaseReport>,
}

/// Ranked, citation-complete result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Records ordered by score desc, year desc, source priority asc
    pub records: Vec<ScoredRecord>,

    /// Overall status
    pub status: SearchStatus,

    /// Records contributed by each database (summed over rounds)
    pub database_counts: BTreeMap<DatabaseId, usize>,

    /// Captured adapter failures
    pub errors: Vec<AdapterError>,

    /// Records dropped by the exclusion filter
    pub excluded_count: usize,

    /// Executed queries in issue order
    pub rounds: Vec<SearchRound>,

    /// Present when `records` is empty
    pub no_results: Option<NoResultsCondition>,

    /// When the search finished
    pub searched_at: chrono::DateTime<chrono::Utc>,
}

impl SearchResult {
    /// Queries issued, in order
    pub fn queries_issued(&self) -> Vec<&Query> {
        self.rounds.iter().map(|r| &r.query).collect()
    }

    /// Whether no records were found
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = SearchRequest::new(Query::from_text("fever"));
        assert_eq!(request.max_results_per_db, 5);
        assert_eq!(request.databases.len(), 3);
        assert!(request.publication_types.contains("Case Reports"));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_validation() {
        let err = SearchRequest::new(Query::from_text("fever"))
            .max_results_per_db(0)
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "max_results_per_db");

        let err = SearchRequest::new(Query::from_text("fever"))
            .databases(Vec::<DatabaseId>::new())
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "databases");

        let err = SearchRequest::new(Query::from_text("  "))
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "query");

        let err = SearchRequest::new(Query::from_text("fever"))
            .max_results_for(DatabaseId::Pmc, 0)
            .validate()
            .unwrap_err();
        assert_eq!(err.field, "max_results_by_db");
    }

    #[test]
    fn test_cap_for() {
        let request = SearchRequest::new(Query::from_text("fever"))
            .max_results_per_db(4)
            .max_results_for(DatabaseId::KoreaMed, 2);
        assert_eq!(request.cap_for(DatabaseId::PubMed), 4);
        assert_eq!(request.cap_for(DatabaseId::KoreaMed), 2);
    }

    #[test]
    fn test_options_request() {
        let mut options = SearchOptions::default();
        options.databases = BTreeSet::from([DatabaseId::Pmc]);
        options.max_results_per_db = 2;

        let request = options.request(Query::from_text("fever"));
        assert_eq!(request.databases, BTreeSet::from([DatabaseId::Pmc]));
        assert_eq!(request.cap_for(DatabaseId::Pmc), 2);
        assert_eq!(request.query.text, "fever");
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("broad_to_narrow".parse::<Strategy>(), Ok(Strategy::BroadToNarrow));
        assert_eq!("Narrow-To-Broad".parse::<Strategy>(), Ok(Strategy::NarrowToBroad));
        assert!("random".parse::<Strategy>().is_err());
    }
}
