//! NCBI E-utilities client shared by the PubMed and PMC adapters.

use serde::Deserialize;
use std::collections::BTreeSet;

use crate::config::Config;
use crate::models::DatabaseId;
use crate::sources::SourceError;
use crate::utils::HttpClient;

/// Matches inline formatting elements that break serde text extraction
const INLINE_MARKUP: &str = r"</?(i|b|u|sup|sub|em|strong|sc|italic|bold)(\s[^>]*)?>";

/// ID list and engine translation from `esearch`
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ESearchOutcome {
    pub ids: Vec<String>,
    pub query_translation: Option<String>,
}

/// Client for one E-utilities database (`pubmed` or `pmc`)
#[derive(Debug, Clone)]
pub(crate) struct EUtils {
    client: HttpClient,
    base_url: String,
    db: &'static str,
    api_key: Option<String>,
    email: Option<String>,
    tool: String,
}

impl EUtils {
    pub fn from_config(config: &Config, id: DatabaseId) -> Result<Self, SourceError> {
        let source = config.sources.get(id);
        Ok(Self {
            client: HttpClient::new(&config.http_settings(id))?,
            base_url: source.endpoint_url().map_err(SourceError::InvalidRequest)?,
            db: id.id(),
            api_key: config.ncbi.api_key.clone(),
            email: config.ncbi.email.clone(),
            tool: config.ncbi.tool.clone(),
        })
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", self.db.to_string()), ("tool", self.tool.clone())];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        if let Some(email) = &self.email {
            params.push(("email", email.clone()));
        }
        params
    }

    /// Run `esearch` sorted by relevance
    pub async fn esearch(&self, term: &str, retmax: usize) -> Result<ESearchOutcome, SourceError> {
        let mut params = self.params();
        params.extend([
            ("term", term.to_string()),
            ("retmax", retmax.to_string()),
            ("retmode", "json".to_string()),
            ("sort", "relevance".to_string()),
        ]);

        let url = format!("{}/esearch.fcgi", self.base_url);
        let body = self.client.get_text(&url, &params).await?;
        parse_esearch(&body)
    }

    /// Run `efetch` for the given ids and return the XML body
    pub async fn efetch(&self, ids: &[String]) -> Result<String, SourceError> {
        let mut params = self.params();
        params.extend([("id", ids.join(",")), ("retmode", "xml".to_string())]);

        let url = format!("{}/efetch.fcgi", self.base_url);
        let body = self.client.get_text(&url, &params).await?;
        Ok(strip_inline_markup(&body))
    }
}

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(default)]
    querytranslation: Option<String>,
    #[serde(rename = "ERROR", default)]
    error: Option<String>,
}

/// Parse an `esearch` JSON body
pub(crate) fn parse_esearch(body: &str) -> Result<ESearchOutcome, SourceError> {
    let data: ESearchResponse = serde_json::from_str(body)?;
    let result = data.esearchresult;

    if let Some(error) = result.error.filter(|e| !e.trim().is_empty()) {
        if result.idlist.is_empty() {
            return Err(SourceError::InvalidRequest(format!("E-utilities: {}", error)));
        }
    }

    Ok(ESearchOutcome {
        ids: result.idlist,
        query_translation: result.querytranslation.filter(|t| !t.trim().is_empty()),
    })
}

/// Append a publication type restriction to a query
pub(crate) fn with_publication_types(query: &str, publication_types: &BTreeSet<String>) -> String {
    let clause = publication_types
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"[Publication Type]", t))
        .collect::<Vec<_>>();

    if clause.is_empty() {
        return query.to_string();
    }

    format!("({}) AND ({})", query, clause.join(" OR "))
}

/// Remove inline formatting elements so text nodes come out whole
pub(crate) fn strip_inline_markup(xml: &str) -> String {
    match regex::Regex::new(INLINE_MARKUP) {
        Ok(re) => re.replace_all(xml, "").into_owned(),
        Err(_) => xml.to_string(),
    }
}

/// First four-digit year in a date string such as "2019 Jan-Feb"
pub(crate) fn parse_year(date: &str) -> Option<i32> {
    let digits: String = date
        .trim()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take(4)
        .collect();

    if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}
