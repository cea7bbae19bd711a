//! Tool registry for MCP tools.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use super::handlers::{
    GenerateQueriesHandler, PubMedQueryGuideHandler, QueryExamplesHandler, SearchAllHandler,
    SearchDefaults, SearchMultipleHandler, SearchStrategyHandler,
};
use crate::search::SearchOrchestrator;

/// An MCP tool that can be called by the client
#[derive(Clone)]
pub struct Tool {
    /// Tool name (e.g., "search_all_databases")
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// JSON Schema for input parameters
    pub input_schema: serde_json::Value,

    /// Handler function to execute the tool
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// Handler for executing a tool
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync + std::fmt::Debug {
    /// Execute the tool with the given arguments
    async fn execute(&self, args: Value) -> Result<Value, String>;
}

/// Registry for all MCP tools
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
}

fn patient_summary_schema() -> Value {
    json!({
        "type": "object",
        "description": "Structured patient presentation",
        "properties": {
            "core_symptoms": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Cardinal symptoms, all required in the narrowest query"
            },
            "secondary_symptoms": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Supporting symptoms used as optional refining terms"
            },
            "context": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Exposures, demographics or region (e.g. 'Korea', 'farmer')"
            },
            "timeline": {
                "type": "string",
                "description": "Free-text course of illness"
            }
        }
    })
}

/// Properties shared by every tool that runs a search
fn search_properties(default_max: usize) -> serde_json::Map<String, Value> {
    let properties = json!({
        "databases": {
            "type": "array",
            "items": {"type": "string", "enum": ["pubmed", "pmc", "koreamed"]},
            "description": "Databases to search (default: all)"
        },
        "max_results_per_db": {
            "type": "integer",
            "minimum": 1,
            "description": "Maximum records per database",
            "default": default_max
        },
        "max_results_by_db": {
            "type": "object",
            "additionalProperties": {"type": "integer", "minimum": 1},
            "description": "Per-database overrides, e.g. {\"koreamed\": 3}"
        },
        "publication_types": {
            "type": "array",
            "items": {"type": "string"},
            "description": "Publication types to restrict to",
            "default": ["Case Reports"]
        },
        "excluded_diagnoses": {
            "type": "array",
            "items": {"type": "string"},
            "description": "Diagnoses already ruled out; never embedded in queries, matching records are dropped"
        },
        "excluded_terms": {
            "type": "array",
            "items": {"type": "string"},
            "description": "Other terms whose records are dropped"
        },
        "substance_context_relevant": {
            "type": "boolean",
            "description": "Keep substance-abuse related records (excluded by default)",
            "default": false
        },
        "return_format": {
            "type": "string",
            "enum": ["json", "compact", "detailed"],
            "description": "json (structured), compact (title/summary/link table) or detailed (markdown with abstracts)",
            "default": "json"
        }
    });

    match properties {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

fn schema_with(
    mut properties: serde_json::Map<String, Value>,
    extra: Value,
    required: &[&str],
) -> Value {
    if let Value::Object(extra) = extra {
        properties.extend(extra);
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

impl ToolRegistry {
    /// Create a registry exposing every search tool backed by `orchestrator`
    pub fn new(orchestrator: Arc<SearchOrchestrator>, defaults: SearchDefaults) -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
        };
        registry.register_search_tools(orchestrator, defaults);
        registry.register_guide_tools();
        registry
    }

    fn register_search_tools(&mut self, orchestrator: Arc<SearchOrchestrator>, defaults: SearchDefaults) {
        let databases = orchestrator
            .registry()
            .ids()
            .map(|id| id.name())
            .collect::<Vec<_>>()
            .join(", ");
        let max = defaults.max_results_per_db;

        self.register(Tool {
            name: "generate_search_queries_only".to_string(),
            description: "Generate 1-4 ranked PubMed-syntax queries from a patient summary \
                          without searching. Each query carries a scope description."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "patient_summary": patient_summary_schema(),
                    "excluded_diagnoses": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Diagnoses that must never appear in a query"
                    }
                },
                "required": ["patient_summary"]
            }),
            handler: Arc::new(GenerateQueriesHandler {
                orchestrator: orchestrator.clone(),
            }),
        });

        self.register(Tool {
            name: "search_all_databases".to_string(),
            description: format!(
                "Search {} in parallel for case reports matching a clinical query or patient \
                 summary, returning records ranked by relevance with justifications",
                databases
            ),
            input_schema: schema_with(
                search_properties(max),
                json!({
                    "clinical_query": {
                        "type": "string",
                        "description": "Query in PubMed syntax, e.g. \"fever\"[Title/Abstract] AND \"rash\"[Title/Abstract]"
                    },
                    "patient_summary": patient_summary_schema()
                }),
                &[],
            ),
            handler: Arc::new(SearchAllHandler {
                orchestrator: orchestrator.clone(),
                defaults: defaults.clone(),
            }),
        });

        self.register(Tool {
            name: "search_with_strategy".to_string(),
            description: "Generate queries from a patient summary and issue them narrow_to_broad \
                          or broad_to_narrow until enough relevant records are found"
                .to_string(),
            input_schema: schema_with(
                search_properties(max),
                json!({
                    "patient_summary": patient_summary_schema(),
                    "strategy": {
                        "type": "string",
                        "enum": ["narrow_to_broad", "broad_to_narrow"],
                        "default": "narrow_to_broad"
                    }
                }),
                &["patient_summary"],
            ),
            handler: Arc::new(SearchStrategyHandler {
                orchestrator: orchestrator.clone(),
                defaults: defaults.clone(),
            }),
        });

        self.register(Tool {
            name: "search_with_multiple_queries".to_string(),
            description: "Run several caller-written queries in order and merge their records \
                          into one ranked result"
                .to_string(),
            input_schema: schema_with(
                search_properties(max),
                json!({
                    "queries": {
                        "type": "array",
                        "items": {"type": "string"},
                        "minItems": 1,
                        "description": "Queries to run, in order"
                    },
                    "patient_summary": patient_summary_schema()
                }),
                &["queries"],
            ),
            handler: Arc::new(SearchMultipleHandler {
                orchestrator,
                defaults,
            }),
        });
    }

    fn register_guide_tools(&mut self) {
        self.register(Tool {
            name: "get_pubmed_query_guide".to_string(),
            description: "PubMed query construction guide: field tags, Boolean operators and MeSH"
                .to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
            handler: Arc::new(PubMedQueryGuideHandler),
        });

        self.register(Tool {
            name: "get_query_examples".to_string(),
            description: "Ready-to-use example queries for PubMed, PMC and KoreaMed".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "database": {
                        "type": "string",
                        "enum": ["pubmed", "pmc", "koreamed", "all"],
                        "default": "all"
                    }
                }
            }),
            handler: Arc::new(QueryExamplesHandler),
        });
    }

    /// Register a tool
    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// All tools, sorted by name
    pub fn all(&self) -> Vec<&Tool> {
        let mut tools: Vec<&Tool> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Tool names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.all().into_iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name
    pub async fn execute(&self, name: &str, args: Value) -> Result<Value, String> {
        let tool = self
            .get(name)
            .ok_or_else(|| format!("Unknown tool '{}'", name))?;
        tool.handler.execute(args).await
    }
}
