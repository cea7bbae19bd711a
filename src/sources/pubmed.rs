//! PubMed source implementation using the E-utilities API.

use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};

use super::eutils::{self, EUtils};
use crate::config::Config;
use crate::models::{DatabaseId, RawRecord, RawRecordBuilder};
use crate::sources::{Source, SourceCapabilities, SourceError, SourceResponse};

const PUBMED_ARTICLE_URL: &str = "https://pubmed.ncbi.nlm.nih.gov";

/// PubMed source
///
/// Runs `esearch` (JSON, relevance sort) for ids, then one batched `efetch`
/// for the MEDLINE XML of those ids.
#[derive(Debug, Clone)]
pub struct PubMedSource {
    eutils: EUtils,
}

impl PubMedSource {
    /// Create a PubMed source from configuration
    pub fn from_config(config: &Config) -> Result<Self, SourceError> {
        Ok(Self {
            eutils: EUtils::from_config(config, DatabaseId::PubMed)?,
        })
    }

    /// Parse E-utilities fetch response XML, keeping the order of `ids`
    fn parse_fetch_response(xml: &str, ids: &[String]) -> Result<Vec<RawRecord>, SourceError> {
        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct PubmedArticleSet {
            #[serde(rename = "PubmedArticle", default)]
            articles: Vec<PubmedArticle>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct PubmedArticle {
            MedlineCitation: Option<MedlineCitation>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct MedlineCitation {
            PMID: Option<Text>,
            Article: Option<Article>,
            MeshHeadingList: Option<MeshHeadingList>,
        }

        #[derive(Debug, Deserialize)]
        struct Text {
            #[serde(rename = "$text", default)]
            value: String,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct Article {
            Journal: Option<Journal>,
            ArticleTitle: Option<Text>,
            Abstract: Option<Abstract>,
            AuthorList: Option<AuthorList>,
            PublicationTypeList: Option<PublicationTypeList>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct Journal {
            Title: Option<Text>,
            JournalIssue: Option<JournalIssue>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct JournalIssue {
            PubDate: Option<PubDate>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct PubDate {
            Year: Option<Text>,
            MedlineDate: Option<Text>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct Abstract {
            #[serde(rename = "AbstractText", default)]
            abstract_texts: Vec<AbstractText>,
        }

        #[derive(Debug, Deserialize)]
        struct AbstractText {
            #[serde(rename = "@Label", default)]
            label: Option<String>,
            #[serde(rename = "$text", default)]
            text: String,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct AuthorList {
            #[serde(rename = "Author", default)]
            authors: Vec<Author>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct Author {
            LastName: Option<Text>,
            Initials: Option<Text>,
            CollectiveName: Option<Text>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct PublicationTypeList {
            #[serde(rename = "PublicationType", default)]
            types: Vec<Text>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct MeshHeadingList {
            #[serde(rename = "MeshHeading", default)]
            headings: Vec<MeshHeading>,
        }

        #[derive(Debug, Deserialize)]
        #[allow(non_snake_case)]
        struct MeshHeading {
            DescriptorName: Option<Text>,
        }

        let result: PubmedArticleSet = from_str(xml)
            .map_err(|e| SourceError::Parse(format!("Failed to parse PubMed fetch XML: {}", e)))?;

        let mut by_pmid = HashMap::new();

        for article in result.articles {
            let Some(citation) = article.MedlineCitation else {
                continue;
            };
            let Some(pmid) = citation.PMID.map(|p| p.value.trim().to_string()) else {
                continue;
            };
            let details = citation.Article;

            let title = details
                .as_ref()
                .and_then(|a| a.ArticleTitle.as_ref())
                .map(|t| t.value.trim().to_string())
                .unwrap_or_default();

            let authors = details
                .as_ref()
                .and_then(|a| a.AuthorList.as_ref())
                .map(|al| {
                    al.authors
                        .iter()
                        .map(|author| {
                            if let Some(collective) = &author.CollectiveName {
                                collective.value.trim().to_string()
                            } else {
                                let last = author.LastName.as_ref().map(|l| l.value.as_str()).unwrap_or("");
                                let initials = author.Initials.as_ref().map(|i| i.value.as_str()).unwrap_or("");
                                format!("{} {}", last, initials).trim().to_string()
                            }
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            let abstract_text = details
                .as_ref()
                .and_then(|a| a.Abstract.as_ref())
                .map(|ab| {
                    ab.abstract_texts
                        .iter()
                        .map(|at| match &at.label {
                            Some(label) if !label.is_empty() => {
                                format!("{}: {}", label, at.text.trim())
                            }
                            _ => at.text.trim().to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default();

            let journal = details
                .as_ref()
                .and_then(|a| a.Journal.as_ref())
                .and_then(|j| j.Title.as_ref())
                .map(|t| t.value.trim().to_string())
                .unwrap_or_default();

            let year = details
                .as_ref()
                .and_then(|a| a.Journal.as_ref())
                .and_then(|j| j.JournalIssue.as_ref())
                .and_then(|ji| ji.PubDate.as_ref())
                .and_then(|pd| pd.Year.as_ref().or(pd.MedlineDate.as_ref()))
                .and_then(|d| eutils::parse_year(&d.value));

            let url = format!("{}/{}/", PUBMED_ARTICLE_URL, pmid);
            let mut builder = RawRecordBuilder::new(DatabaseId::PubMed, pmid.clone(), title, url)
                .authors(authors)
                .journal(journal)
                .year(year)
                .abstract_text(abstract_text);

            if let Some(types) = details.as_ref().and_then(|a| a.PublicationTypeList.as_ref()) {
                for kind in &types.types {
                    builder = builder.publication_type(kind.value.as_str());
                }
            }

            if let Some(mesh) = &citation.MeshHeadingList {
                for heading in &mesh.headings {
                    if let Some(name) = &heading.DescriptorName {
                        builder = builder.mesh_term(name.value.as_str());
                    }
                }
            }

            by_pmid.insert(pmid, builder.build());
        }

        Ok(ids.iter().filter_map(|id| by_pmid.remove(id)).collect())
    }
}

#[async_trait]
impl Source for PubMedSource {
    fn id(&self) -> DatabaseId {
        DatabaseId::PubMed
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::SEARCH
            | SourceCapabilities::FIELD_TAGS
            | SourceCapabilities::PUBLICATION_TYPE_FILTER
            | SourceCapabilities::MESH_TERMS
            | SourceCapabilities::QUERY_TRANSLATION
    }

    fn external_search_url(&self, executed_query: &str) -> String {
        format!("{}/?term={}", PUBMED_ARTICLE_URL, urlencoding::encode(executed_query))
    }

    async fn fetch(
        &self,
        query: &str,
        max_results: usize,
        publication_types: &BTreeSet<String>,
    ) -> Result<SourceResponse, SourceError> {
        let term = eutils::with_publication_types(query, publication_types);
        let search = self.eutils.esearch(&term, max_results).await?;

        tracing::debug!(ids = search.ids.len(), "PubMed esearch completed");

        let records = if search.ids.is_empty() {
            Vec::new()
        } else {
            let xml = self.eutils.efetch(&search.ids).await?;
            Self::parse_fetch_response(&xml, &search.ids)?
        };

        Ok(SourceResponse {
            records,
            query_translation: search.query_translation,
        })
    }
}
