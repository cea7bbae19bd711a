//! Typed tool handlers over the search orchestrator.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::tools::ToolHandler;
use crate::models::{
    default_publication_types, DatabaseId, ExclusionSet, PatientSummary, Query, SearchOptions,
    SearchResult, Strategy, DEFAULT_MAX_RESULTS_PER_DB,
};
use crate::search::{SearchContext, SearchError, SearchOrchestrator};
use crate::utils::{compact_table, detailed_markdown, execution_summary};

/// Defaults applied when a tool call omits a setting
#[derive(Debug, Clone)]
pub struct SearchDefaults {
    pub max_results_per_db: usize,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            max_results_per_db: DEFAULT_MAX_RESULTS_PER_DB,
        }
    }
}

/// How a search result is returned to the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnFormat {
    #[default]
    Json,
    Compact,
    Detailed,
}

/// Arguments shared by every tool that runs a search
#[derive(Debug, Default, Deserialize)]
pub struct SearchArgs {
    #[serde(default)]
    pub databases: Option<Vec<String>>,
    #[serde(default)]
    pub max_results_per_db: Option<usize>,
    #[serde(default)]
    pub max_results_by_db: BTreeMap<String, usize>,
    #[serde(default)]
    pub publication_types: Option<Vec<String>>,
    #[serde(default)]
    pub excluded_diagnoses: Vec<String>,
    #[serde(default)]
    pub excluded_terms: Vec<String>,
    #[serde(default)]
    pub substance_context_relevant: bool,
    #[serde(default)]
    pub return_format: ReturnFormat,
}

impl SearchArgs {
    /// Database selection and limits, validated for unknown database names
    pub fn options(&self, defaults: &SearchDefaults) -> Result<SearchOptions, String> {
        let mut options = SearchOptions {
            max_results_per_db: self
                .max_results_per_db
                .unwrap_or(defaults.max_results_per_db),
            ..Default::default()
        };

        if let Some(databases) = &self.databases {
            options.databases = parse_databases(databases)?;
        }

        for (name, max) in &self.max_results_by_db {
            let id = name.parse::<DatabaseId>()?;
            options.max_results_by_db.insert(id, *max);
        }

        options.publication_types = match &self.publication_types {
            Some(types) => types
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            None => default_publication_types(),
        };

        Ok(options)
    }

    pub fn exclusions(&self) -> ExclusionSet {
        ExclusionSet::with_diagnoses(self.excluded_diagnoses.iter().cloned())
            .terms(self.excluded_terms.iter().cloned())
            .substance_context_relevant(self.substance_context_relevant)
    }
}

/// Parse database names; "all" selects every database
fn parse_databases(names: &[String]) -> Result<BTreeSet<DatabaseId>, String> {
    let mut databases = BTreeSet::new();
    for name in names {
        if name.trim().eq_ignore_ascii_case("all") {
            databases.extend(DatabaseId::ALL);
        } else {
            databases.insert(name.parse::<DatabaseId>()?);
        }
    }
    Ok(databases)
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    // Clients may send no arguments at all for optional-only tools
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))
}

fn search_error(err: SearchError) -> String {
    match err {
        SearchError::Validation(e) => e.to_string(),
        SearchError::Cancelled => "Search was cancelled".to_string(),
    }
}

/// Serialize a result in the requested format
///
/// Every format carries the structured result and the execution summary.
pub fn render_result(result: &SearchResult, format: ReturnFormat) -> Result<Value, String> {
    let structured = serde_json::to_value(result).map_err(|e| e.to_string())?;
    let summary = execution_summary(result);

    Ok(match format {
        ReturnFormat::Json => json!({
            "format": "json",
            "execution_summary": summary,
            "result": structured,
        }),
        ReturnFormat::Compact => json!({
            "format": "compact",
            "content": compact_table(result),
            "execution_summary": summary,
            "result": structured,
        }),
        ReturnFormat::Detailed => json!({
            "format": "detailed",
            "content": detailed_markdown(result),
            "execution_summary": summary,
            "result": structured,
        }),
    })
}

#[derive(Debug, Deserialize)]
struct GenerateQueriesArgs {
    patient_summary: PatientSummary,
    #[serde(default)]
    excluded_diagnoses: Vec<String>,
}

/// Handler for `generate_search_queries_only`
#[derive(Debug)]
pub struct GenerateQueriesHandler {
    pub orchestrator: Arc<SearchOrchestrator>,
}

#[async_trait::async_trait]
impl ToolHandler for GenerateQueriesHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: GenerateQueriesArgs = parse_args(args)?;
        let exclusions = ExclusionSet::with_diagnoses(args.excluded_diagnoses);

        let queries = self
            .orchestrator
            .generate_queries(&args.patient_summary, &exclusions)
            .map_err(|e| e.to_string())?;

        Ok(json!({
            "count": queries.len(),
            "queries": queries,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct SearchAllArgs {
    #[serde(default)]
    clinical_query: Option<String>,
    #[serde(default)]
    patient_summary: Option<PatientSummary>,
    #[serde(flatten)]
    search: SearchArgs,
}

/// Handler for `search_all_databases`
#[derive(Debug)]
pub struct SearchAllHandler {
    pub orchestrator: Arc<SearchOrchestrator>,
    pub defaults: SearchDefaults,
}

#[async_trait::async_trait]
impl ToolHandler for SearchAllHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: SearchAllArgs = parse_args(args)?;
        let options = args.search.options(&self.defaults)?;
        let exclusions = args.search.exclusions();

        let clinical_query = args
            .clinical_query
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());

        let (query, patient) = match (clinical_query, args.patient_summary) {
            (Some(text), patient) => {
                let patient = patient
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| PatientSummary::from_query_texts(&[text.as_str()]));
                (Query::from_text(text), patient)
            }
            (None, Some(patient)) => {
                // A summary alone is searched with its highest-priority query
                let query = self
                    .orchestrator
                    .generate_queries(&patient, &exclusions)
                    .map_err(|e| e.to_string())?
                    .into_iter()
                    .next()
                    .ok_or("No query could be generated from the patient summary")?;
                (query, patient)
            }
            (None, None) => {
                return Err("Either 'clinical_query' or 'patient_summary' is required".to_string())
            }
        };

        let request = options.request(query);
        let ctx = SearchContext::new(patient, exclusions);
        let result = self
            .orchestrator
            .search_all(&request, &ctx)
            .await
            .map_err(search_error)?;

        render_result(&result, args.search.return_format)
    }
}

#[derive(Debug, Deserialize)]
struct SearchStrategyArgs {
    patient_summary: PatientSummary,
    #[serde(default = "default_strategy")]
    strategy: Strategy,
    #[serde(flatten)]
    search: SearchArgs,
}

fn default_strategy() -> Strategy {
    Strategy::NarrowToBroad
}

/// Handler for `search_with_strategy`
#[derive(Debug)]
pub struct SearchStrategyHandler {
    pub orchestrator: Arc<SearchOrchestrator>,
    pub defaults: SearchDefaults,
}

#[async_trait::async_trait]
impl ToolHandler for SearchStrategyHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: SearchStrategyArgs = parse_args(args)?;
        let options = args.search.options(&self.defaults)?;
        let ctx = SearchContext::new(args.patient_summary, args.search.exclusions());

        let result = self
            .orchestrator
            .search_with_strategy(&ctx, args.strategy, &options)
            .await
            .map_err(search_error)?;

        render_result(&result, args.search.return_format)
    }
}

#[derive(Debug, Deserialize)]
struct SearchMultipleArgs {
    queries: Vec<String>,
    #[serde(default)]
    patient_summary: Option<PatientSummary>,
    #[serde(flatten)]
    search: SearchArgs,
}

/// Handler for `search_with_multiple_queries`
#[derive(Debug)]
pub struct SearchMultipleHandler {
    pub orchestrator: Arc<SearchOrchestrator>,
    pub defaults: SearchDefaults,
}

#[async_trait::async_trait]
impl ToolHandler for SearchMultipleHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: SearchMultipleArgs = parse_args(args)?;
        let options = args.search.options(&self.defaults)?;
        let ctx = SearchContext::new(
            args.patient_summary.unwrap_or_default(),
            args.search.exclusions(),
        );

        let result = self
            .orchestrator
            .search_with_multiple_queries(&args.queries, &ctx, &options)
            .await
            .map_err(search_error)?;

        render_result(&result, args.search.return_format)
    }
}

const PUBMED_QUERY_GUIDE: &str = r#"# PubMed Query Construction

## Field tags
Use the full form so the same query also works in PMC.

| Tag | Searches |
|-----|----------|
| `[Title/Abstract]` | Title and abstract words |
| `[Title]` | Title only |
| `[MeSH Terms]` | MeSH descriptors, including narrower terms |
| `[Publication Type]` | e.g. `"Case Reports"[Publication Type]` |

`[tiab]` and `[ti]` are PubMed-only abbreviations.

## Pattern 1: required symptoms in case reports
```
"fever"[Title/Abstract] AND "rash"[Title/Abstract]
AND "Case Reports"[Publication Type]
```

## Pattern 2: excluding what has been ruled out
```
"vasculitis"[Title/Abstract]
AND ("fever"[Title/Abstract] OR "rash"[Title/Abstract])
NOT ("lupus"[Title/Abstract] OR "drug-induced"[Title/Abstract])
```

## Pattern 3: MeSH plus free text
```
("Scrub Typhus"[MeSH Terms] OR "tsutsugamushi"[Title/Abstract])
AND "eschar"[Title/Abstract]
```
MeSH catches indexed articles; the text word catches recent articles not yet indexed.

## Tips
- Quote multi-word phrases.
- Group OR-ed synonyms in parentheses before combining them with AND.
- Start narrow and drop refining terms if too few records come back.
"#;

/// Handler for `get_pubmed_query_guide`
#[derive(Debug)]
pub struct PubMedQueryGuideHandler;

#[async_trait::async_trait]
impl ToolHandler for PubMedQueryGuideHandler {
    async fn execute(&self, _args: Value) -> Result<Value, String> {
        Ok(json!({
            "guide_type": "PubMed Advanced Query Construction",
            "content": PUBMED_QUERY_GUIDE,
        }))
    }
}

const PUBMED_EXAMPLES: &str = r#"## PubMed Examples

### Basic case report search
```
"autoimmune encephalitis"[Title/Abstract]
AND ("seizure"[Title/Abstract] OR "confusion"[Title/Abstract])
AND "Case Reports"[Publication Type]
```

### Excluding common causes
```
"vasculitis"[Title/Abstract]
AND ("fever"[Title/Abstract] OR "rash"[Title/Abstract])
NOT ("lupus"[Title/Abstract] OR "drug-induced"[Title/Abstract])
```

### Recent publications
```
"sarcoidosis"[Title/Abstract] AND "last 5 years"[Date - Publication]
```
"#;

const PMC_EXAMPLES: &str = r#"## PMC Examples

PMC searches full text, so short queries already match many articles.

```
"autoimmune encephalitis" AND "case report"
vasculitis AND fever AND "case report"
```
"#;

const KOREAMED_EXAMPLES: &str = r#"## KoreaMed Examples

KoreaMed handles complex Boolean queries poorly. Use 1-3 plain keywords.

Recommended:
```
sarcoidosis
vasculitis AND fever
scrub typhus eschar
```

Not recommended:
```
((vasculitis OR inflammation) AND fever) NOT lupus
sarcoidosis[Title/Abstract] AND "case report"[Title]
```
"#;

const DATABASE_COMPARISON: &str = r#"## Key Differences

| Feature | PubMed | PMC | KoreaMed |
|---------|--------|-----|----------|
| Field tags | Full form | Full form | Not supported |
| Boolean operators | AND, OR, NOT | AND, OR, NOT | Simple AND only |
| Publication type filter | Yes | Yes | No |
| Searches | Title, abstract, MeSH | Full text | Title, abstract |
"#;

/// Example queries for one database, or all of them
pub fn query_examples(database: &str) -> Result<String, String> {
    let selected = database.trim().to_lowercase();
    let sections: Vec<&str> = match selected.as_str() {
        "all" | "" => vec![PUBMED_EXAMPLES, PMC_EXAMPLES, KOREAMED_EXAMPLES, DATABASE_COMPARISON],
        other => match other.parse::<DatabaseId>()? {
            DatabaseId::PubMed => vec![PUBMED_EXAMPLES],
            DatabaseId::Pmc => vec![PMC_EXAMPLES],
            DatabaseId::KoreaMed => vec![KOREAMED_EXAMPLES],
        },
    };

    let mut content = String::from("# Medical Literature Search Query Examples\n\n");
    content.push_str(
        "Examples use full-form field tags (`[Title/Abstract]`) so they work in both PubMed and PMC.\n\n",
    );
    content.push_str(&sections.join("\n"));
    Ok(content)
}

#[derive(Debug, Deserialize)]
struct QueryExamplesArgs {
    #[serde(default = "default_database")]
    database: String,
}

fn default_database() -> String {
    "all".to_string()
}

/// Handler for `get_query_examples`
#[derive(Debug)]
pub struct QueryExamplesHandler;

#[async_trait::async_trait]
impl ToolHandler for QueryExamplesHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: QueryExamplesArgs = parse_args(args)?;
        Ok(json!({
            "database": args.database,
            "content": query_examples(&args.database)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::OrchestratorSettings;
    use crate::sources::mock::make_record;
    use crate::sources::{MockSource, SourceRegistry};

    fn orchestrator() -> Arc<SearchOrchestrator> {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(MockSource::new(DatabaseId::PubMed).with_records(vec![
            make_record(DatabaseId::PubMed, "1", "Fever and rash in Korea", Some(2021)),
            make_record(DatabaseId::PubMed, "2", "Cocaine-induced rash", Some(2022)),
        ])));
        Arc::new(SearchOrchestrator::new(
            Arc::new(registry),
            OrchestratorSettings::default(),
        ))
    }

    #[test]
    fn test_search_args_options() {
        let args: SearchArgs = serde_json::from_value(json!({
            "databases": ["PubMed", "koreamed"],
            "max_results_by_db": {"koreamed": 2},
            "publication_types": ["Case Reports", " "],
        }))
        .unwrap();

        let options = args.options(&SearchDefaults::default()).unwrap();
        assert_eq!(
            options.databases,
            BTreeSet::from([DatabaseId::PubMed, DatabaseId::KoreaMed])
        );
        assert_eq!(options.max_results_per_db, 5);
        assert_eq!(options.max_results_by_db[&DatabaseId::KoreaMed], 2);
        assert_eq!(options.publication_types.len(), 1);
    }

    #[test]
    fn test_unknown_database_rejected() {
        let args: SearchArgs = serde_json::from_value(json!({"databases": ["scopus"]})).unwrap();
        assert!(args.options(&SearchDefaults::default()).is_err());
    }

    #[tokio::test]
    async fn test_generate_queries_handler() {
        let handler = GenerateQueriesHandler {
            orchestrator: orchestrator(),
        };
        let value = handler
            .execute(json!({
                "patient_summary": {"core_symptoms": ["fever", "rash"], "context": ["Korea"]},
                "excluded_diagnoses": ["malaria"]
            }))
            .await
            .unwrap();

        assert_eq!(value["count"], 2);
        assert_eq!(value["queries"][0]["priority"], 1);
    }

    #[tokio::test]
    async fn test_search_all_compact() {
        let handler = SearchAllHandler {
            orchestrator: orchestrator(),
            defaults: SearchDefaults::default(),
        };
        let value = handler
            .execute(json!({
                "clinical_query": "fever AND rash",
                "databases": ["pubmed"],
                "return_format": "compact"
            }))
            .await
            .unwrap();

        assert_eq!(value["format"], "compact");
        assert!(value["content"].as_str().unwrap().contains("Fever and rash in Korea"));
        // Substance-related records are excluded unless flagged relevant
        assert_eq!(value["result"]["excluded_count"], 1);
        assert_eq!(value["result"]["records"][0]["score"], 100);
    }

    #[tokio::test]
    async fn test_search_all_requires_query_or_summary() {
        let handler = SearchAllHandler {
            orchestrator: orchestrator(),
            defaults: SearchDefaults::default(),
        };
        let err = handler.execute(json!({"databases": ["pubmed"]})).await.unwrap_err();
        assert!(err.contains("clinical_query"));

        let err = handler
            .execute(json!({"clinical_query": "fever", "max_results_per_db": 0}))
            .await
            .unwrap_err();
        assert!(err.contains("max_results_per_db"));
    }

    #[tokio::test]
    async fn test_query_examples() {
        let value = QueryExamplesHandler
            .execute(json!({"database": "koreamed"}))
            .await
            .unwrap();
        let content = value["content"].as_str().unwrap();
        assert!(content.contains("1-3 plain keywords"));
        assert!(!content.contains("PMC Examples"));

        let value = QueryExamplesHandler.execute(Value::Null).await.unwrap();
        assert!(value["content"].as_str().unwrap().contains("Key Differences"));

        assert!(query_examples("scopus").is_err());
    }
}
