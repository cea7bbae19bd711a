//! Exclusion filtering applied before scoring.

use crate::models::{ExclusionSet, RawRecord};

/// Standing exclusions applied unless substance-related context is marked relevant
pub const SUBSTANCE_ABUSE_TERMS: &[&str] = &[
    "substance abuse",
    "substance-related disorders",
    "substance use disorder",
    "drug abuse",
    "alcohol abuse",
    "alcoholism",
    "illicit drug",
    "methamphetamine",
    "cocaine",
    "heroin",
    "opioid use disorder",
    "overdose",
];

/// Drops records that mention excluded diagnoses or terms
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    needles: Vec<String>,
}

impl ExclusionFilter {
    /// Build a filter from an exclusion set
    ///
    /// The substance-abuse list is included unless the set explicitly marks
    /// that context as relevant. Blank entries are ignored.
    pub fn new(exclusions: &ExclusionSet) -> Self {
        let mut needles: Vec<String> = exclusions
            .diagnoses
            .iter()
            .chain(exclusions.terms.iter())
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        if !exclusions.substance_context_relevant {
            needles.extend(SUBSTANCE_ABUSE_TERMS.iter().map(|t| t.to_string()));
        }

        needles.sort();
        needles.dedup();

        Self { needles }
    }

    /// The first excluded string found in the record's title, abstract or MeSH terms
    pub fn matched_term(&self, record: &RawRecord) -> Option<&str> {
        let haystack = record.searchable_text();
        self.needles
            .iter()
            .find(|needle| haystack.contains(needle.as_str()))
            .map(String::as_str)
    }

    /// Whether the record must be dropped
    pub fn excludes(&self, record: &RawRecord) -> bool {
        self.matched_term(record).is_some()
    }

    /// Keep records that match no exclusion, preserving order
    ///
    /// Returns the surviving records and how many were dropped.
    pub fn filter(&self, records: Vec<RawRecord>) -> (Vec<RawRecord>, usize) {
        let before = records.len();
        let kept: Vec<RawRecord> = records
            .into_iter()
            .filter(|record| match self.matched_term(record) {
                Some(term) => {
                    tracing::debug!(
                        source = %record.source,
                        id = %record.id,
                        term,
                        "Excluded record"
                    );
                    false
                }
                None => true,
            })
            .collect();

        let excluded = before - kept.len();
        (kept, excluded)
    }
}

/// Filter records against an exclusion set in one call
pub fn filter(records: Vec<RawRecord>, exclusions: &ExclusionSet) -> Vec<RawRecord> {
    ExclusionFilter::new(exclusions).filter(records).0
}
