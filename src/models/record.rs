//! Literature record models shared by every database adapter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// The database a record was retrieved from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseId {
    PubMed,
    Pmc,
    KoreaMed,
}

impl DatabaseId {
    /// All supported databases, in merge order
    pub const ALL: [DatabaseId; 3] = [DatabaseId::PubMed, DatabaseId::Pmc, DatabaseId::KoreaMed];

    /// Returns the display name of the database
    pub fn name(&self) -> &'static str {
        match self {
            DatabaseId::PubMed => "PubMed",
            DatabaseId::Pmc => "PMC",
            DatabaseId::KoreaMed => "KoreaMed",
        }
    }

    /// Returns the identifier used in tool arguments and configuration
    pub fn id(&self) -> &'static str {
        match self {
            DatabaseId::PubMed => "pubmed",
            DatabaseId::Pmc => "pmc",
            DatabaseId::KoreaMed => "koreamed",
        }
    }

    /// Tie-break priority when two records share score and year (lower wins)
    pub fn priority(&self) -> u8 {
        match self {
            DatabaseId::PubMed => 0,
            DatabaseId::Pmc => 1,
            DatabaseId::KoreaMed => 2,
        }
    }
}

impl std::fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DatabaseId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pubmed" => Ok(DatabaseId::PubMed),
            "pmc" | "pubmed central" => Ok(DatabaseId::Pmc),
            "koreamed" => Ok(DatabaseId::KoreaMed),
            other => Err(format!("Unknown database '{}'", other)),
        }
    }
}

/// A literature record normalized from any source
///
/// `(source, id)` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Database the record came from
    pub source: DatabaseId,

    /// Source-specific identifier (PMID, PMC id, KoreaMed RID)
    pub id: String,

    /// Article title
    pub title: String,

    /// Author names in publication order
    #[serde(default)]
    pub authors: Vec<String>,

    /// Journal title
    #[serde(default)]
    pub journal: String,

    /// Publication year, if known
    #[serde(default)]
    pub year: Option<i32>,

    /// Abstract text
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,

    /// MeSH descriptors (or author keywords where MeSH is unavailable)
    #[serde(default)]
    pub mesh_terms: BTreeSet<String>,

    /// Fully-qualified article URL
    pub url: String,

    /// Publication types, e.g. "Case Reports"
    #[serde(default)]
    pub publication_types: BTreeSet<String>,
}

impl RawRecord {
    /// Create a new record with required fields
    pub fn new(source: DatabaseId, id: String, title: String, url: String) -> Self {
        Self {
            source,
            id,
            title,
            authors: Vec::new(),
            journal: String::new(),
            year: None,
            abstract_text: String::new(),
            mesh_terms: BTreeSet::new(),
            url,
            publication_types: BTreeSet::new(),
        }
    }

    /// The natural key of this record
    pub fn key(&self) -> (DatabaseId, &str) {
        (self.source, self.id.as_str())
    }

    /// Number of populated optional fields, used to keep the richer of two duplicates
    pub fn richness(&self) -> usize {
        [
            !self.authors.is_empty(),
            !self.journal.is_empty(),
            self.year.is_some(),
            !self.abstract_text.is_empty(),
            !self.mesh_terms.is_empty(),
            !self.publication_types.is_empty(),
        ]
        .iter()
        .filter(|populated| **populated)
        .count()
    }

    /// Lowercased title, abstract and MeSH terms for term matching
    pub fn searchable_text(&self) -> String {
        let mut text = String::with_capacity(self.title.len() + self.abstract_text.len() + 64);
        text.push_str(&self.title.to_lowercase());
        text.push('\n');
        text.push_str(&self.abstract_text.to_lowercase());
        for term in &self.mesh_terms {
            text.push('\n');
            text.push_str(&term.to_lowercase());
        }
        text
    }

    /// Authors formatted for display ("A, B, C et al.")
    pub fn author_line(&self) -> String {
        match self.authors.len() {
            0 => "N/A".to_string(),
            1..=3 => self.authors.join(", "),
            _ => format!("{} et al.", self.authors[..3].join(", ")),
        }
    }
}

/// Builder for constructing RawRecord objects
#[derive(Debug, Clone)]
pub struct RawRecordBuilder {
    record: RawRecord,
}

impl RawRecordBuilder {
    /// Create a new builder with required fields
    pub fn new(
        source: DatabaseId,
        id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            record: RawRecord::new(source, id.into(), title.into(), url.into()),
        }
    }

    /// Set authors
    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record.authors = authors
            .into_iter()
            .map(Into::into)
            .filter(|a: &String| !a.trim().is_empty())
            .collect();
        self
    }

    /// Set journal title
    pub fn journal(mut self, journal: impl Into<String>) -> Self {
        self.record.journal = journal.into();
        self
    }

    /// Set publication year
    pub fn year(mut self, year: Option<i32>) -> Self {
        self.record.year = year;
        self
    }

    /// Set abstract
    pub fn abstract_text(mut self, abstract_text: impl Into<String>) -> Self {
        self.record.abstract_text = abstract_text.into();
        self
    }

    /// Add a MeSH term
    pub fn mesh_term(mut self, term: impl Into<String>) -> Self {
        let term = term.into();
        if !term.trim().is_empty() {
            self.record.mesh_terms.insert(term.trim().to_string());
        }
        self
    }

    /// Add a publication type
    pub fn publication_type(mut self, kind: impl Into<String>) -> Self {
        let kind = kind.into();
        if !kind.trim().is_empty() {
            self.record.publication_types.insert(kind.trim().to_string());
        }
        self
    }

    /// Build the RawRecord
    pub fn build(self) -> RawRecord {
        self.record
    }
}

/// One of the five discrete relevance tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceBand {
    Minimal,
    Weak,
    Partial,
    Strong,
    Exact,
}

impl RelevanceBand {
    /// Inclusive score range of the band
    pub fn range(&self) -> (u8, u8) {
        match self {
            RelevanceBand::Exact => (90, 100),
            RelevanceBand::Strong => (70, 89),
            RelevanceBand::Partial => (50, 69),
            RelevanceBand::Weak => (30, 49),
            RelevanceBand::Minimal => (0, 29),
        }
    }

    /// Band label such as "90-100"
    pub fn label(&self) -> String {
        let (low, high) = self.range();
        format!("{}-{}", low, high)
    }
}

/// Clinical highlights pulled from an abstract
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseHighlights {
    /// Short summary (at most 70 words)
    pub summary: String,

    /// Proposed etiology or mechanism
    pub etiology: Option<String>,

    /// How the diagnosis was reached
    pub diagnostic_approach: Option<String>,

    /// Treatment and outcome
    pub treatment_outcome: Option<String>,
}

/// A record with its relevance score against a patient presentation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredRecord {
    #[serde(flatten)]
    pub record: RawRecord,

    /// Relevance score in [0, 100]
    pub score: u8,

    /// Band the score falls in
    pub band: RelevanceBand,

    /// Which matched terms drove the band selection
    pub justification: String,

    /// Core and secondary symptoms found in the record
    pub matching_symptoms: Vec<String>,

    #[serde(flatten)]
    pub highlights: CaseHighlights,
}
