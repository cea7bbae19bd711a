//! Federated search orchestration.
//!
//! The orchestrator fans one query out to every requested database at once,
//! bounds each adapter call by its own timeout and by the overall deadline,
//! and merges whatever came back into one ranked [`SearchResult`]. Adapter
//! failures are values, never early returns: a search with one dead database
//! still returns the records of the others.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;

use crate::config::Config;
use crate::models::{
    AdapterError, AdapterErrorKind, DatabaseId, DatabaseReport, ExclusionSet, NoResultsCondition,
    PatientSummary, Query, RawRecord, RelevanceBand, ScoredRecord, SearchOptions, SearchRequest,
    SearchResult, SearchRound, SearchStatus, Strategy, ValidationError,
};
use crate::search::{ExclusionFilter, QueryGenerator, RelevanceScorer};
use crate::sources::{AdapterOutcome, SourceRegistry};
use crate::utils::deduplicate_records;

/// Errors that end a search without a result
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Search was cancelled")]
    Cancelled,
}

/// Timeouts and strategy limits
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Bound on each adapter call
    pub adapter_timeout: Duration,

    /// Bound on a whole orchestrator invocation
    pub overall_timeout: Duration,

    /// Records scoring >= 50 that end a strategy early
    /// (`None` uses the request's `max_results_per_db`)
    pub strategy_target: Option<usize>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            adapter_timeout: Duration::from_secs(10),
            overall_timeout: Duration::from_secs(30),
            strategy_target: None,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            adapter_timeout: config.adapter_timeout(),
            overall_timeout: config.overall_timeout(),
            strategy_target: config.search.strategy_target,
        }
    }
}

/// Scoring context and exclusions for one invocation
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    pub patient: PatientSummary,
    pub exclusions: ExclusionSet,
}

impl SearchContext {
    pub fn new(patient: PatientSummary, exclusions: ExclusionSet) -> Self {
        Self {
            patient,
            exclusions,
        }
    }
}

/// Everything gathered across the rounds of one invocation
#[derive(Debug, Default)]
struct Accumulator {
    raw: Vec<RawRecord>,
    rounds: Vec<SearchRound>,
    errors: Vec<AdapterError>,
    database_counts: BTreeMap<DatabaseId, usize>,
    caps: BTreeMap<DatabaseId, usize>,
    calls: usize,
    failed_calls: usize,
}

impl Accumulator {
    fn absorb(&mut self, request: &SearchRequest, outcomes: Vec<(AdapterOutcome, String)>) {
        let mut databases = BTreeMap::new();

        for &db in &request.databases {
            let cap = request.cap_for(db);
            self.caps
                .entry(db)
                .and_modify(|c| *c = (*c).max(cap))
                .or_insert(cap);
        }

        for (outcome, external_search_url) in outcomes {
            self.calls += 1;
            let failed = outcome.error.is_some();
            if let Some(error) = outcome.error {
                self.failed_calls += 1;
                self.errors.push(error);
            }

            *self.database_counts.entry(outcome.source).or_insert(0) += outcome.records.len();

            databases.insert(
                outcome.source,
                DatabaseReport {
                    executed_query: outcome.executed_query,
                    query_translation: outcome.query_translation,
                    record_count: outcome.records.len(),
                    external_search_url,
                    failed,
                },
            );

            // Outcomes arrive in database order, so the merge order is stable
            self.raw.extend(outcome.records);
        }

        self.rounds.push(SearchRound {
            query: request.query.clone(),
            databases,
        });
    }

    fn status(&self) -> SearchStatus {
        match (self.calls, self.failed_calls) {
            (calls, failed) if calls > 0 && failed == calls => SearchStatus::AllFailed,
            (_, 0) => SearchStatus::Complete,
            _ => SearchStatus::Partial,
        }
    }
}

/// Coordinates adapters, exclusion, deduplication and scoring
#[derive(Debug, Clone)]
pub struct SearchOrchestrator {
    registry: Arc<SourceRegistry>,
    settings: OrchestratorSettings,
    generator: QueryGenerator,
    scorer: RelevanceScorer,
}

impl SearchOrchestrator {
    pub fn new(registry: Arc<SourceRegistry>, settings: OrchestratorSettings) -> Self {
        Self {
            registry,
            settings,
            generator: QueryGenerator::new(),
            scorer: RelevanceScorer::new(),
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Candidate queries for a patient without touching the network
    pub fn generate_queries(
        &self,
        patient: &PatientSummary,
        exclusions: &ExclusionSet,
    ) -> Result<Vec<Query>, ValidationError> {
        self.generator.generate(patient, &exclusions.diagnoses)
    }

    /// Search every requested database with one query
    pub async fn search_all(
        &self,
        request: &SearchRequest,
        ctx: &SearchContext,
    ) -> Result<SearchResult, SearchError> {
        request.validate()?;

        let deadline = Instant::now() + self.settings.overall_timeout;
        tracing::info!(
            query = %request.query.text,
            databases = request.databases.len(),
            "Starting federated search"
        );

        let mut acc = Accumulator::default();
        let outcomes = self.run_round(request, deadline).await;
        acc.absorb(request, outcomes);

        Ok(self.finish(acc, ctx))
    }

    /// [`search_all`](Self::search_all), abandoned if `cancel` resolves first
    ///
    /// A cancelled search returns no partial result; completed adapter calls
    /// are discarded along with the in-flight ones.
    pub async fn search_all_until<F>(
        &self,
        request: &SearchRequest,
        ctx: &SearchContext,
        cancel: F,
    ) -> Result<SearchResult, SearchError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                tracing::info!(query = %request.query.text, "Search cancelled by caller");
                Err(SearchError::Cancelled)
            }
            result = self.search_all(request, ctx) => result,
        }
    }

    /// Issue generated queries in strategy order until enough strong records exist
    pub async fn search_with_strategy(
        &self,
        ctx: &SearchContext,
        strategy: Strategy,
        options: &SearchOptions,
    ) -> Result<SearchResult, SearchError> {
        let mut queries = self.generate_queries(&ctx.patient, &ctx.exclusions)?;
        if strategy == Strategy::BroadToNarrow {
            queries.reverse();
        }

        let requests: Vec<SearchRequest> = queries.into_iter().map(|q| options.request(q)).collect();
        for request in &requests {
            request.validate()?;
        }

        let target = self
            .settings
            .strategy_target
            .unwrap_or(options.max_results_per_db)
            .max(1);
        let deadline = Instant::now() + self.settings.overall_timeout;

        tracing::info!(?strategy, queries = requests.len(), target, "Starting strategy search");

        let mut acc = Accumulator::default();
        for request in requests {
            if Instant::now() >= deadline {
                tracing::warn!("Overall deadline reached; returning accumulated records");
                break;
            }

            let outcomes = self.run_round(&request, deadline).await;
            acc.absorb(&request, outcomes);

            let strong = self.strong_count(&acc, ctx);
            tracing::debug!(round = acc.rounds.len(), strong, "Strategy round finished");
            if strong >= target {
                break;
            }
        }

        Ok(self.finish(acc, ctx))
    }

    /// Run caller-supplied queries in order and merge their records
    ///
    /// When `ctx.patient` is empty the scoring context is derived from the
    /// query texts.
    pub async fn search_with_multiple_queries(
        &self,
        queries: &[String],
        ctx: &SearchContext,
        options: &SearchOptions,
    ) -> Result<SearchResult, SearchError> {
        if queries.is_empty() {
            return Err(ValidationError::new("queries", "at least one query is required").into());
        }

        let requests: Vec<SearchRequest> = queries
            .iter()
            .enumerate()
            .map(|(idx, text)| {
                options.request(Query::new(
                    text.trim(),
                    idx as u32 + 1,
                    format!("Caller-supplied query {} of {}", idx + 1, queries.len()),
                ))
            })
            .collect();
        for request in &requests {
            request.validate()?;
        }

        let ctx = if ctx.patient.is_empty() {
            SearchContext::new(
                PatientSummary::from_query_texts(queries),
                ctx.exclusions.clone(),
            )
        } else {
            ctx.clone()
        };

        let deadline = Instant::now() + self.settings.overall_timeout;
        tracing::info!(queries = requests.len(), "Starting multi-query search");

        let mut acc = Accumulator::default();
        for request in requests {
            if Instant::now() >= deadline {
                tracing::warn!("Overall deadline reached; skipping remaining queries");
                break;
            }
            let outcomes = self.run_round(&request, deadline).await;
            acc.absorb(&request, outcomes);
        }

        Ok(self.finish(acc, &ctx))
    }

    /// Call every requested adapter concurrently
    ///
    /// Outcomes are returned in database order with each adapter's external
    /// search link.
    async fn run_round(&self, request: &SearchRequest, deadline: Instant) -> Vec<(AdapterOutcome, String)> {
        let calls = request.databases.iter().map(|&db| {
            let source = self.registry.get(db).cloned();
            let cap = request.cap_for(db);
            let budget = self
                .settings
                .adapter_timeout
                .min(deadline.saturating_duration_since(Instant::now()));

            async move {
                let Some(source) = source else {
                    tracing::warn!(source = %db, "No adapter registered");
                    let error = AdapterError::new(
                        db,
                        AdapterErrorKind::Unreachable,
                        "No adapter is registered for this database",
                    );
                    return (
                        AdapterOutcome::failed(db, request.query.text.clone(), error),
                        String::new(),
                    );
                };

                let search = source.search(&request.query, cap, &request.publication_types);
                let outcome = match tokio::time::timeout(budget, search).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!(source = %db, timeout = ?budget, "Adapter timed out");
                        let error = AdapterError::new(
                            db,
                            AdapterErrorKind::Timeout,
                            format!("No response within {} ms", budget.as_millis()),
                        );
                        AdapterOutcome::failed(db, source.prepare_query(&request.query), error)
                    }
                };

                let url = source.external_search_url(&outcome.executed_query);
                (outcome, url)
            }
        });

        join_all(calls).await
    }

    /// Deduplicate, filter, score and cap everything accumulated so far
    ///
    /// Records gathered over several rounds compete for the same per-database
    /// cap, so the best-ranked records of each database are kept.
    fn rank(&self, acc: &Accumulator, ctx: &SearchContext) -> (Vec<ScoredRecord>, usize) {
        let unique = deduplicate_records(acc.raw.clone());
        let (kept, excluded) = ExclusionFilter::new(&ctx.exclusions).filter(unique);
        let scored = self.scorer.score_all(&kept, &ctx.patient);
        (cap_per_database(scored, &acc.caps), excluded)
    }

    fn strong_count(&self, acc: &Accumulator, ctx: &SearchContext) -> usize {
        let (scored, _) = self.rank(acc, ctx);
        let threshold = RelevanceBand::Partial.range().0;
        scored.iter().filter(|r| r.score >= threshold).count()
    }

    fn finish(&self, acc: Accumulator, ctx: &SearchContext) -> SearchResult {
        let (records, excluded_count) = self.rank(&acc, ctx);
        let status = acc.status();

        tracing::info!(
            records = records.len(),
            excluded = excluded_count,
            errors = acc.errors.len(),
            ?status,
            "Search finished"
        );

        let no_results = records.is_empty().then(NoResultsCondition::broaden_terms);

        SearchResult {
            records,
            status,
            database_counts: acc.database_counts,
            errors: acc.errors,
            excluded_count,
            rounds: acc.rounds,
            no_results,
            searched_at: chrono::Utc::now(),
        }
    }
}

/// Keep at most `caps[db]` records per database, preserving rank order
fn cap_per_database(
    records: Vec<ScoredRecord>,
    caps: &BTreeMap<DatabaseId, usize>,
) -> Vec<ScoredRecord> {
    let mut taken: BTreeMap<DatabaseId, usize> = BTreeMap::new();
    records
        .into_iter()
        .filter(|scored| {
            let source = scored.record.source;
            let Some(&cap) = caps.get(&source) else {
                return true;
            };
            let count = taken.entry(source).or_insert(0);
            if *count < cap {
                *count += 1;
                true
            } else {
                false
            }
        })
        .collect()
}
