//! Configuration management.

mod file_config;

pub use file_config::{find_config_file, load_config, ConfigError, LOCAL_CONFIG_FILE};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::{DatabaseId, DEFAULT_MAX_RESULTS_PER_DB};
use crate::utils::{HttpSettings, RetryConfig};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// NCBI E-utilities credentials
    #[serde(default)]
    pub ncbi: NcbiConfig,

    /// Per-database adapter settings
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Orchestration limits
    #[serde(default)]
    pub search: SearchConfig,

    /// Locally mounted record store used by companion tools
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// NCBI E-utilities credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NcbiConfig {
    /// API key (raises the NCBI limit from 3 to 10 requests per second)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Contact email sent with every request
    #[serde(default)]
    pub email: Option<String>,

    /// Tool name sent with every request
    #[serde(default = "default_tool")]
    pub tool: String,
}

impl Default for NcbiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            email: None,
            tool: default_tool(),
        }
    }
}

fn default_tool() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

/// Settings of every database adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "SourceConfig::pubmed")]
    pub pubmed: SourceConfig,

    #[serde(default = "SourceConfig::pmc")]
    pub pmc: SourceConfig,

    #[serde(default = "SourceConfig::koreamed")]
    pub koreamed: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            pubmed: SourceConfig::pubmed(),
            pmc: SourceConfig::pmc(),
            koreamed: SourceConfig::koreamed(),
        }
    }
}

impl SourcesConfig {
    /// Settings for one database
    pub fn get(&self, id: DatabaseId) -> &SourceConfig {
        match id {
            DatabaseId::PubMed => &self.pubmed,
            DatabaseId::Pmc => &self.pmc,
            DatabaseId::KoreaMed => &self.koreamed,
        }
    }
}

/// Settings of one database adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Whether the adapter is registered
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Base URL of the database API
    pub endpoint: String,

    /// Requests allowed per second (0 means the NCBI default for the credentials)
    #[serde(default)]
    pub requests_per_second: u32,
}

impl SourceConfig {
    pub const NCBI_EUTILS: &'static str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
    pub const KOREAMED_SEARCH: &'static str = "https://koreamed.org/SearchBasic.php";

    fn pubmed() -> Self {
        Self::with_endpoint(Self::NCBI_EUTILS)
    }

    fn pmc() -> Self {
        Self::with_endpoint(Self::NCBI_EUTILS)
    }

    fn koreamed() -> Self {
        Self {
            requests_per_second: 1,
            ..Self::with_endpoint(Self::KOREAMED_SEARCH)
        }
    }

    /// Enabled adapter at a custom endpoint
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            enabled: true,
            endpoint: endpoint.into(),
            requests_per_second: 0,
        }
    }

    /// The endpoint as an absolute http(s) URL, without a trailing slash
    pub fn endpoint_url(&self) -> Result<String, String> {
        let parsed = url::Url::parse(self.endpoint.trim())
            .map_err(|e| format!("invalid endpoint '{}': {}", self.endpoint, e))?;

        match parsed.scheme() {
            "http" | "https" => Ok(parsed.as_str().trim_end_matches('/').to_string()),
            scheme => Err(format!(
                "endpoint '{}' must use http or https, not {}",
                self.endpoint, scheme
            )),
        }
    }
}

/// Orchestration limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Time bound of one adapter call
    #[serde(default = "default_adapter_timeout")]
    pub adapter_timeout_secs: u64,

    /// Time bound of a whole request, strategies included
    #[serde(default = "default_overall_timeout")]
    pub overall_timeout_secs: u64,

    /// Records requested per database when the caller does not say
    #[serde(default = "default_max_results")]
    pub max_results_per_db: usize,

    /// Attempts per HTTP request, including the first
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// First backoff delay
    #[serde(default = "default_retry_initial_delay")]
    pub retry_initial_delay_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Bound on one HTTP attempt (unset: the adapter timeout split across
    /// the retry attempts plus one backoff share)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,

    /// Records scoring >= 50 that end a strategy search early
    /// (unset: the request's `max_results_per_db`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_target: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_secs: default_adapter_timeout(),
            overall_timeout_secs: default_overall_timeout(),
            max_results_per_db: default_max_results(),
            retry_attempts: default_retry_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            request_timeout_ms: None,
            strategy_target: None,
        }
    }
}

fn default_adapter_timeout() -> u64 {
    10
}

fn default_overall_timeout() -> u64 {
    30
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS_PER_DB
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_initial_delay() -> u64 {
    500
}

fn default_retry_max_delay() -> u64 {
    4000
}

/// Record store settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory root of the locally mounted record store
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Retry policy shared by every adapter
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.search.retry_attempts.max(1),
            initial_delay: Duration::from_millis(self.search.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.search.retry_max_delay_ms),
            backoff_multiplier: 2.0,
        }
    }

    /// HTTP settings for one database adapter
    pub fn http_settings(&self, id: DatabaseId) -> HttpSettings {
        let source = self.sources.get(id);
        let requests_per_second = match (source.requests_per_second, id) {
            (0, DatabaseId::PubMed | DatabaseId::Pmc) if self.ncbi.api_key.is_some() => 10,
            (0, _) => 3,
            (rps, _) => rps,
        };

        HttpSettings {
            timeout: self.request_timeout(),
            requests_per_second,
            retry: self.retry_config(),
            ..Default::default()
        }
    }

    /// Adapter timeout
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.search.adapter_timeout_secs)
    }

    /// Bound on one HTTP attempt
    ///
    /// Shorter than the adapter timeout so that a hung attempt can still be
    /// retried inside the adapter's budget.
    pub fn request_timeout(&self) -> Duration {
        match self.search.request_timeout_ms {
            Some(ms) => Duration::from_millis(ms.max(1)),
            None => self.adapter_timeout() / (self.search.retry_attempts.max(1) + 1),
        }
    }

    /// Overall request ceiling
    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.search.overall_timeout_secs)
    }

    /// Fill unset values from conventional environment variables
    pub fn apply_env_fallbacks<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.ncbi.api_key.is_none() {
            self.ncbi.api_key = non_empty("NCBI_API_KEY");
        }
        if self.ncbi.email.is_none() {
            self.ncbi.email = non_empty("NCBI_EMAIL");
        }
        if self.storage.work_dir.is_none() {
            self.storage.work_dir = non_empty("LAB_WORK_DIR").map(PathBuf::from);
        }
    }
}
