//! Utility modules supporting federated search.
//!
//! - [`deduplicate_records`]: Collapse the same article reported by several databases
//! - [`find_duplicates`]: Find duplicate groups without modifying the list
//! - [`HttpClient`]: HTTP client with a per-adapter rate limiter and retries
//! - [`RetryConfig`]: Configuration for retry logic with exponential backoff
//! - [`with_retry`]: Execute an operation with automatic retry on transient errors
//! - [`compact_table`], [`detailed_markdown`], [`execution_summary`]: Markdown output
//!
//! # Deduplication
//!
//! ```rust
//! use medlit::models::{DatabaseId, RawRecordBuilder};
//! use medlit::utils::deduplicate_records;
//!
//! let pubmed = RawRecordBuilder::new(DatabaseId::PubMed, "1", "Scrub typhus", "u1")
//!     .year(Some(2020))
//!     .build();
//! let pmc = RawRecordBuilder::new(DatabaseId::Pmc, "PMC1", "Scrub Typhus.", "u2")
//!     .year(Some(2020))
//!     .build();
//!
//! assert_eq!(deduplicate_records(vec![pubmed, pmc]).len(), 1);
//! ```
//!
//! # Retry with Backoff
//!
//! ```rust,no_run
//! use medlit::sources::SourceError;
//! use medlit::utils::{with_retry, RetryConfig};
//!
//! # async fn fetch_data() -> Result<String, SourceError> { Ok("data".to_string()) }
//! # #[tokio::main]
//! # async fn main() -> Result<(), SourceError> {
//! let result = with_retry(RetryConfig::default(), || fetch_data()).await?;
//! # Ok(())
//! # }
//! ```

mod dedup;
mod http;
mod render;
mod retry;

pub use dedup::{deduplicate_records, find_duplicates, normalize_title};
pub use http::{HttpClient, HttpSettings};
pub use render::{
    compact_table, detailed_markdown, execution_summary, truncate_with_ellipsis,
    SUMMARY_QUERY_WIDTH,
};
pub use retry::{with_retry, RetryConfig, TransientError};
