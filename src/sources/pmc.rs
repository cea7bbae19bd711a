//! PubMed Central (PMC) source implementation.

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeSet;

use super::eutils::{self, EUtils};
use crate::config::Config;
use crate::models::{DatabaseId, RawRecord, RawRecordBuilder};
use crate::sources::{Source, SourceCapabilities, SourceError, SourceResponse};

const PMC_BASE_URL: &str = "https://www.ncbi.nlm.nih.gov/pmc";
const PUBMED_ARTICLE_URL: &str = "https://pubmed.ncbi.nlm.nih.gov";

/// PMC source
///
/// Uses the E-utilities API with `db=pmc`. Full-text JATS XML is reduced to the
/// front matter with regular expressions.
#[derive(Debug, Clone)]
pub struct PmcSource {
    eutils: EUtils,
}

/// Compiled patterns for JATS front matter
struct JatsPatterns {
    article: Regex,
    article_type: Regex,
    article_id: Regex,
    contrib: Regex,
    kwd: Regex,
    tag: Regex,
}

impl JatsPatterns {
    fn new() -> Result<Self, SourceError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| SourceError::Parse(format!("Invalid pattern: {}", e)))
        };

        Ok(Self {
            article: compile(r"(?s)<article[\s>].*?</article>")?,
            article_type: compile(r#"^<article[^>]*\barticle-type\s*=\s*["']([^"']+)["']"#)?,
            article_id: compile(r#"<article-id[^>]*pub-id-type\s*=\s*["']([^"']+)["'][^>]*>\s*([^<]+?)\s*</article-id>"#)?,
            contrib: compile(r#"(?s)<contrib[^>]*contrib-type\s*=\s*["']author["'][^>]*>(.*?)</contrib>"#)?,
            kwd: compile(r"(?s)<kwd(?:\s[^>]*)?>(.*?)</kwd>")?,
            tag: compile(r"<[^>]+>")?,
        })
    }

    /// Text content of the first `tag_name` element, inner tags stripped
    fn text(&self, xml: &str, tag_name: &str) -> Option<String> {
        let open = Regex::new(&format!(r"<{}(?:\s[^>]*)?>", regex::escape(tag_name))).ok()?;
        let start = open.find(xml)?.end();
        let end_pattern = format!("</{}>", tag_name);
        let end = xml[start..].find(&end_pattern)? + start;

        let text = self.clean(&xml[start..end]);
        (!text.is_empty()).then_some(text)
    }

    /// Strip tags, decode entities and collapse whitespace
    fn clean(&self, fragment: &str) -> String {
        let text = self
            .tag
            .replace_all(fragment, " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        match quick_xml::escape::unescape(&text) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => text,
        }
    }
}

impl PmcSource {
    /// Create a PMC source from configuration
    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        Ok(Self {
            eutils: EUtils::from_config(config, DatabaseId::Pmc)?,
        })
    }

    /// Parse a `pmc-articleset` document
    ///
    /// Records come back in the order of `ids`; articles matching none of them
    /// follow in document order.
    fn parse_articles(xml: &str, ids: &[String]) -> Result<Vec<RawRecord>, SourceError> {
        if !xml.contains("<pmc-articleset") && !xml.contains("<article") {
            return Err(SourceError::Parse(
                "PMC response is not a JATS article set".to_string(),
            ));
        }

        let patterns = JatsPatterns::new()?;
        let mut parsed: Vec<(String, RawRecord)> = patterns
            .article
            .find_iter(xml)
            .filter_map(|article| Self::parse_article(&patterns, article.as_str()))
            .collect();

        let mut records = Vec::with_capacity(parsed.len());
        for id in ids {
            let id = id.trim_start_matches("PMC");
            if let Some(pos) = parsed.iter().position(|(key, _)| key == id) {
                records.push(parsed.remove(pos).1);
            }
        }
        records.extend(parsed.into_iter().map(|(_, record)| record));

        Ok(records)
    }

    /// Parse one `<article>`; the key is the bare numeric PMC id (or PMID)
    fn parse_article(patterns: &JatsPatterns, article: &str) -> Option<(String, RawRecord)> {
        let meta_start = article.find("<article-meta")?;
        let meta_end = article[meta_start..]
            .find("</article-meta>")
            .map(|end| meta_start + end)
            .unwrap_or(article.len());
        let meta = &article[meta_start..meta_end];

        let mut pmcid = None;
        let mut pmid = None;
        for caps in patterns.article_id.captures_iter(meta) {
            let value = caps[2].trim().to_string();
            match &caps[1] {
                "pmc" | "pmcid" => pmcid = Some(value.trim_start_matches("PMC").to_string()),
                "pmid" => pmid = Some(value),
                _ => {}
            }
        }

        let (key, id, url) = match (pmcid, pmid) {
            (Some(pmc), _) => (
                pmc.clone(),
                format!("PMC{}", pmc),
                format!("{}/articles/PMC{}/", PMC_BASE_URL, pmc),
            ),
            (None, Some(pmid)) => (
                pmid.clone(),
                format!("PMID:{}", pmid),
                format!("{}/{}/", PUBMED_ARTICLE_URL, pmid),
            ),
            (None, None) => return None,
        };

        let title = patterns.text(meta, "article-title").unwrap_or_default();
        let abstract_text = patterns.text(meta, "abstract").unwrap_or_default();
        let journal = patterns.text(article, "journal-title").unwrap_or_default();
        let year = patterns
            .text(meta, "year")
            .and_then(|y| eutils::parse_year(&y));

        let authors = patterns
            .contrib
            .captures_iter(meta)
            .filter_map(|caps| {
                let contrib = &caps[1];
                let surname = patterns.text(contrib, "surname")?;
                Some(match patterns.text(contrib, "given-names") {
                    Some(given) => format!("{} {}", surname, given),
                    None => surname,
                })
            })
            .collect::<Vec<_>>();

        let mut builder = RawRecordBuilder::new(DatabaseId::Pmc, id, title, url)
            .authors(authors)
            .journal(journal)
            .year(year)
            .abstract_text(abstract_text);

        for caps in patterns.kwd.captures_iter(meta) {
            builder = builder.mesh_term(patterns.clean(&caps[1]));
        }

        if let Some(caps) = patterns.article_type.captures(article) {
            let article_type = &caps[1];
            builder = builder.publication_type(match article_type {
                "case-report" => "Case Reports".to_string(),
                "review-article" => "Review".to_string(),
                "research-article" => "Journal Article".to_string(),
                other => other.to_string(),
            });
        }

        Some((key, builder.build()))
    }
}

#[async_trait]
impl Source for PmcSource {
    fn id(&self) -> DatabaseId {
        DatabaseId::Pmc
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
            | SourceCapabilities::FIELD_TAGS
            | SourceCapabilities::PUBLICATION_TYPE_FILTER
            | SourceCapabilities::QUERY_TRANSLATION
    }

    fn external_search_url(&self, executed_query: &str) -> String {
        format!("{}/?term={}", PMC_BASE_URL, urlencoding::encode(executed_query))
    }

    async fn fetch(
        &self,
        query: &str,
        max_results: usize,
        publication_types: &BTreeSet<String>,
    ) -> Result<SourceResponse, SourceError> {
        let term = eutils::with_publication_types(query, publication_types);
        let search = self.eutils.esearch(&term, max_results).await?;

        tracing::debug!(ids = search.ids.len(), "PMC esearch completed");

        let records = if search.ids.is_empty() {
            Vec::new()
        } else {
            let xml = self.eutils.efetch(&search.ids).await?;
            Self::parse_articles(&xml, &search.ids)?
        };

        Ok(SourceResponse {
            records,
            query_translation: search.query_translation,
        })
    }
}
