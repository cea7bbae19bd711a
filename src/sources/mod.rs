//! Literature database adapters with a shared trait-based interface.
//!
//! This module defines the [`Source`] trait that every database adapter implements.
//! The search orchestrator depends only on this trait; request construction and
//! response parsing stay inside each adapter.
//!
//! # Feature Flags
//!
//! Individual adapters can be disabled at compile time using Cargo features:
//!
//! - `source-pubmed` - Enable the PubMed adapter (default: enabled)
//! - `source-pmc` - Enable the PubMed Central adapter (default: enabled)
//! - `source-koreamed` - Enable the KoreaMed adapter (default: enabled)
//!
//! # Runtime Configuration
//!
//! Adapters can also be disabled at runtime, and their endpoints and rate limits
//! overridden, through the `[sources.<id>]` tables of the configuration file or
//! `MEDLIT__SOURCES__<ID>__<KEY>` environment variables.
//!
//! # Failure Contract
//!
//! [`Source::search`] never fails: transport errors, throttling and unparseable
//! responses are captured in the returned [`AdapterOutcome`] so that one failing
//! database cannot abort a federated search.

#[cfg(feature = "source-koreamed")]
mod koreamed;
#[cfg(feature = "source-pmc")]
mod pmc;
#[cfg(feature = "source-pubmed")]
mod pubmed;
mod registry;
#[cfg(any(feature = "source-pubmed", feature = "source-pmc"))]
mod eutils;

pub mod mock;

#[cfg(feature = "source-koreamed")]
pub use koreamed::KoreaMedSource;
pub use mock::MockSource;
#[cfg(feature = "source-pmc")]
pub use pmc::PmcSource;
#[cfg(feature = "source-pubmed")]
pub use pubmed::PubMedSource;
pub use registry::{SourceCapabilities, SourceRegistry};

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::models::{AdapterError, AdapterErrorKind, DatabaseId, Query, RawRecord};

/// Records and metadata returned by a successful fetch
#[derive(Debug, Clone, Default)]
pub struct SourceResponse {
    /// Normalized records, in the order the database ranked them
    pub records: Vec<RawRecord>,

    /// The engine's interpretation of the query, when reported
    pub query_translation: Option<String>,
}

impl SourceResponse {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            query_translation: None,
        }
    }

    pub fn query_translation(mut self, translation: impl Into<String>) -> Self {
        self.query_translation = Some(translation.into());
        self
    }
}

/// Outcome of one adapter call: records plus an optional captured error
#[derive(Debug, Clone)]
pub struct AdapterOutcome {
    pub source: DatabaseId,
    pub records: Vec<RawRecord>,
    pub executed_query: String,
    pub query_translation: Option<String>,
    pub error: Option<AdapterError>,
}

impl AdapterOutcome {
    /// An outcome with no records and a captured error
    pub fn failed(source: DatabaseId, executed_query: impl Into<String>, error: AdapterError) -> Self {
        Self {
            source,
            records: Vec::new(),
            executed_query: executed_query.into(),
            query_translation: None,
            error: Some(error),
        }
    }
}

/// The Source trait defines the interface for all database adapters.
///
/// # Implementing a New Source
///
/// 1. Create a struct that implements `Source`
/// 2. Implement `id`, `external_search_url` and `fetch`
/// 3. Override `prepare_query` if the database needs its own query syntax
/// 4. Register it in `SourceRegistry::from_config`
#[async_trait]
pub trait Source: Send + Sync + std::fmt::Debug {
    /// Database this adapter serves
    fn id(&self) -> DatabaseId;

    /// Human-readable name of this source
    fn name(&self) -> &str {
        self.id().name()
    }

    /// Describe the capabilities of this source
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
    }

    /// Whether the database can restrict results by publication type
    fn supports_publication_type_filter(&self) -> bool {
        self.capabilities()
            .contains(SourceCapabilities::PUBLICATION_TYPE_FILTER)
    }

    /// Translate a generated query into this database's syntax
    fn prepare_query(&self, query: &Query) -> String {
        query.text.trim().to_string()
    }

    /// Link to the database's own search page for a query
    fn external_search_url(&self, executed_query: &str) -> String;

    /// Execute a prepared query against the remote database
    async fn fetch(
        &self,
        query: &str,
        max_results: usize,
        publication_types: &BTreeSet<String>,
    ) -> Result<SourceResponse, SourceError>;

    /// Search without ever failing
    ///
    /// Caps the returned records at `max_results` even if the database returned
    /// more, and turns any error into an [`AdapterError`].
    async fn search(
        &self,
        query: &Query,
        max_results: usize,
        publication_types: &BTreeSet<String>,
    ) -> AdapterOutcome {
        let executed_query = self.prepare_query(query);

        if executed_query.is_empty() {
            let error = SourceError::InvalidRequest("query is empty for this database".into());
            return AdapterOutcome::failed(self.id(), executed_query, error.into_adapter_error(self.id()));
        }

        match self
            .fetch(&executed_query, max_results, publication_types)
            .await
        {
            Ok(mut response) => {
                response.records.truncate(max_results);
                tracing::debug!(
                    source = %self.id(),
                    records = response.records.len(),
                    "Search completed"
                );
                AdapterOutcome {
                    source: self.id(),
                    records: response.records,
                    executed_query,
                    query_translation: response.query_translation,
                    error: None,
                }
            }
            Err(err) => {
                tracing::warn!(source = %self.id(), error = %err, "Search failed");
                AdapterOutcome::failed(self.id(), executed_query, err.into_adapter_error(self.id()))
            }
        }
    }
}

/// Errors that can occur when interacting with a source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The request did not complete in time
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The database throttled the request (HTTP 429)
    #[error("Rate limit exceeded")]
    RateLimited {
        /// Seconds the server asked us to wait
        retry_after: Option<u64>,
    },

    /// Server-side failure (HTTP 5xx)
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Client-side failure other than throttling (HTTP 4xx)
    #[error("Client error {status}: {message}")]
    Client { status: u16, message: String },

    /// Connection could not be established
    #[error("Network error: {0}")]
    Network(String),

    /// Parsing error (XML, JSON, HTML)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SourceError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::Timeout(_)
                | SourceError::RateLimited { .. }
                | SourceError::Server { .. }
                | SourceError::Network(_)
        )
    }

    /// Caller-visible failure kind
    pub fn kind(&self) -> AdapterErrorKind {
        match self {
            SourceError::Timeout(_) => AdapterErrorKind::Timeout,
            SourceError::RateLimited { .. } => AdapterErrorKind::RateLimited,
            SourceError::Parse(_)
            | SourceError::Client { .. }
            | SourceError::InvalidRequest(_) => AdapterErrorKind::Malformed,
            SourceError::Server { .. } | SourceError::Network(_) => AdapterErrorKind::Unreachable,
        }
    }

    /// Capture this error for the result set
    pub fn into_adapter_error(self, source: DatabaseId) -> AdapterError {
        AdapterError::new(source, self.kind(), self.to_string())
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(err.to_string())
        } else if err.is_decode() || err.is_body() {
            SourceError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            if status.is_server_error() {
                SourceError::Server {
                    status: status.as_u16(),
                    message: err.to_string(),
                }
            } else {
                SourceError::Client {
                    status: status.as_u16(),
                    message: err.to_string(),
                }
            }
        } else {
            SourceError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(format!("JSON: {}", err))
    }
}

impl From<quick_xml::DeError> for SourceError {
    fn from(err: quick_xml::DeError) -> Self {
        SourceError::Parse(format!("XML: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            SourceError::Timeout("slow".into()).kind(),
            AdapterErrorKind::Timeout
        );
        assert_eq!(
            SourceError::RateLimited { retry_after: None }.kind(),
            AdapterErrorKind::RateLimited
        );
        assert_eq!(
            SourceError::Client {
                status: 400,
                message: "bad term".into()
            }
            .kind(),
            AdapterErrorKind::Malformed
        );
        assert_eq!(
            SourceError::Server {
                status: 502,
                message: "bad gateway".into()
            }
            .kind(),
            AdapterErrorKind::Unreachable
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(SourceError::Network("refused".into()).is_transient());
        assert!(SourceError::RateLimited { retry_after: Some(1) }.is_transient());
        assert!(!SourceError::Parse("bad xml".into()).is_transient());
        assert!(!SourceError::Client {
            status: 404,
            message: "missing".into()
        }
        .is_transient());
    }

    #[tokio::test]
    async fn test_search_caps_and_captures() {
        let source = MockSource::new(DatabaseId::PubMed).with_records(
            (0..8)
                .map(|i| mock::make_record(DatabaseId::PubMed, &i.to_string(), "Fever", Some(2020)))
                .collect(),
        );
        let outcome = source
            .search(&Query::from_text("fever"), 3, &BTreeSet::new())
            .await;
        assert_eq!(outcome.records.len(), 3);
        assert!(outcome.error.is_none());

        let failing = MockSource::new(DatabaseId::Pmc).with_error(SourceError::Parse("x".into()));
        let outcome = failing
            .search(&Query::from_text("fever"), 3, &BTreeSet::new())
            .await;
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.error.unwrap().kind, AdapterErrorKind::Malformed);
    }
}
