//! KoreaMed source implementation.
//!
//! KoreaMed has no public API. Searches are a form POST to the basic search
//! page and results are scraped from the per-article share links, which carry
//! the record id (`RID`) and the title.

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeSet;

use crate::config::Config;
use crate::models::{split_query_groups, DatabaseId, Query, RawRecordBuilder};
use crate::sources::{Source, SourceError, SourceResponse};
use crate::utils::HttpClient;

const KOREAMED_ARTICLE_URL: &str = "https://koreamed.org/SearchBasic.php";

/// KoreaMed handles long boolean queries poorly
const MAX_KEYWORDS: usize = 3;

/// KoreaMed source
#[derive(Debug, Clone)]
pub struct KoreaMedSource {
    client: HttpClient,
    search_url: String,
}

impl KoreaMedSource {
    /// Create a KoreaMed source from configuration
    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        Ok(Self {
            client: HttpClient::new(&config.http_settings(DatabaseId::KoreaMed))?,
            search_url: config
                .sources
                .koreamed
                .endpoint_url()
                .map_err(SourceError::InvalidRequest)?,
        })
    }

    /// Reduce a PubMed-syntax query to at most three plain keywords
    ///
    /// Each AND-ed group contributes one keyword, its first alternative, so
    /// optional OR terms never become required ones. Non-ASCII keywords are
    /// dropped unless every keyword is non-ASCII, so a mixed Korean/English
    /// query is searched in English.
    pub fn simplify_query(query: &str) -> String {
        let clean = |term: &str| {
            term.replace(&['"', '(', ')'][..], " ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        };
        let groups: Vec<Vec<String>> = split_query_groups(query)
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|t| clean(t))
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|group| !group.is_empty())
            .collect();

        let all_non_ascii = groups.iter().flatten().all(|t| !t.is_ascii());
        let mut seen = BTreeSet::new();
        let mut keywords = Vec::new();

        for group in &groups {
            if keywords.len() == MAX_KEYWORDS {
                break;
            }
            let pick = group
                .iter()
                .find(|t| (all_non_ascii || t.is_ascii()) && !seen.contains(&t.to_lowercase()));
            if let Some(term) = pick {
                seen.insert(term.to_lowercase());
                keywords.push(term.as_str());
            }
        }

        keywords.join(" AND ")
    }

    /// Parse the search results page
    fn parse_results(html: &str, max_results: usize) -> Result<SourceResponse, SourceError> {
        let document = Html::parse_document(html);

        let share_links = Selector::parse(r#"a[href*="twitter.com/intent/tweet"]"#)
            .map_err(|e| SourceError::Parse(format!("Invalid selector: {:?}", e)))?;
        let query_input = Selector::parse(r#"input[name="query_search"]"#)
            .map_err(|e| SourceError::Parse(format!("Invalid selector: {:?}", e)))?;

        let rid_re = Regex::new(r"RID%3D(\d+)")
            .map_err(|e| SourceError::Parse(format!("Invalid pattern: {}", e)))?;
        let text_re = Regex::new(r"text=([^&]+)")
            .map_err(|e| SourceError::Parse(format!("Invalid pattern: {}", e)))?;
        let year_re = Regex::new(r"\b(19|20)\d{2}\b")
            .map_err(|e| SourceError::Parse(format!("Invalid pattern: {}", e)))?;

        let query_translation = document
            .select(&query_input)
            .next()
            .and_then(|input| input.value().attr("value"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let mut seen = BTreeSet::new();
        let mut records = Vec::new();

        for link in document.select(&share_links) {
            if records.len() >= max_results {
                break;
            }

            let href = link.value().attr("href").unwrap_or_default();
            let Some(rid) = rid_re.captures(href).map(|c| c[1].to_string()) else {
                continue;
            };
            if !seen.insert(rid.clone()) {
                continue;
            }

            let shared_text = text_re
                .captures(href)
                .map(|c| decode_share_text(&c[1]))
                .unwrap_or_default();
            let mut lines = shared_text.lines();
            let title = lines.next().map(str::trim).unwrap_or_default().to_string();
            let citation = lines.collect::<Vec<_>>().join(" ");
            let year = year_re
                .find(&citation)
                .and_then(|m| m.as_str().parse::<i32>().ok());

            let title = if title.is_empty() {
                "Unknown".to_string()
            } else {
                title
            };

            records.push(
                RawRecordBuilder::new(
                    DatabaseId::KoreaMed,
                    format!("KM{}", rid),
                    title,
                    format!("{}?RID={}", KOREAMED_ARTICLE_URL, rid),
                )
                .year(year)
                .build(),
            );
        }

        Ok(SourceResponse {
            records,
            query_translation,
        })
    }
}

/// Decode the form-encoded `text` parameter of a share link
fn decode_share_text(encoded: &str) -> String {
    let spaced = encoded.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

#[async_trait]
impl Source for KoreaMedSource {
    fn id(&self) -> DatabaseId {
        DatabaseId::KoreaMed
    }

    fn prepare_query(&self, query: &Query) -> String {
        Self::simplify_query(&query.text)
    }

    fn external_search_url(&self, executed_query: &str) -> String {
        format!(
            "{}?RID=0&DT=1&QY={}",
            KOREAMED_ARTICLE_URL,
            urlencoding::encode(executed_query)
        )
    }

    async fn fetch(
        &self,
        query: &str,
        max_results: usize,
        _publication_types: &BTreeSet<String>,
    ) -> Result<SourceResponse, SourceError> {
        let form = [("query_search", query.to_string())];
        let html = self.client.post_form_text(&self.search_url, &form).await?;

        let response = Self::parse_results(&html, max_results)?;
        tracing::debug!(records = response.records.len(), "KoreaMed search completed");
        Ok(response)
    }
}
