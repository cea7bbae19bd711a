//! Mock source for testing purposes.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use crate::models::{DatabaseId, RawRecord, RawRecordBuilder};
use crate::sources::{Source, SourceCapabilities, SourceError, SourceResponse};

/// A mock source for testing that returns predefined responses.
///
/// Responses can be keyed by the exact query string; anything else falls back to
/// the default records or the configured error.
#[derive(Debug)]
pub struct MockSource {
    id: DatabaseId,
    records: Vec<RawRecord>,
    by_query: HashMap<String, Vec<RawRecord>>,
    error: Option<SourceError>,
    delay: Option<Duration>,
    queries: Mutex<Vec<String>>,
}

impl MockSource {
    /// Create a new mock source that returns no records.
    pub fn new(id: DatabaseId) -> Self {
        Self {
            id,
            records: Vec::new(),
            by_query: HashMap::new(),
            error: None,
            delay: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Return these records for any query without a specific response.
    pub fn with_records(mut self, records: Vec<RawRecord>) -> Self {
        self.records = records;
        self
    }

    /// Return these records only for this exact query.
    pub fn with_query_response(mut self, query: impl Into<String>, records: Vec<RawRecord>) -> Self {
        self.by_query.insert(query.into(), records);
        self
    }

    /// Fail every fetch with this error.
    pub fn with_error(mut self, error: SourceError) -> Self {
        self.error = Some(error);
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queries received so far, in call order.
    pub fn seen_queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Number of fetches received so far.
    pub fn call_count(&self) -> usize {
        self.queries.lock().map(|guard| guard.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Source for MockSource {
    fn id(&self) -> DatabaseId {
        self.id
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH | SourceCapabilities::PUBLICATION_TYPE_FILTER
    }

    fn external_search_url(&self, executed_query: &str) -> String {
        format!(
            "http://example.com/{}?term={}",
            self.id.id(),
            urlencoding::encode(executed_query)
        )
    }

    async fn fetch(
        &self,
        query: &str,
        _max_results: usize,
        _publication_types: &BTreeSet<String>,
    ) -> Result<SourceResponse, SourceError> {
        if let Ok(mut guard) = self.queries.lock() {
            guard.push(query.to_string());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        let records = self
            .by_query
            .get(query)
            .cloned()
            .unwrap_or_else(|| self.records.clone());

        Ok(SourceResponse::new(records).query_translation(query))
    }
}

/// Helper function to create a mock record for testing.
pub fn make_record(source: DatabaseId, id: &str, title: &str, year: Option<i32>) -> RawRecord {
    RawRecordBuilder::new(source, id, title, format!("http://example.com/{}/{}", source.id(), id))
        .year(year)
        .publication_type("Case Reports")
        .build()
}
