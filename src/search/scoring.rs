//! Deterministic relevance scoring of records against a patient presentation.

use std::cmp::Ordering;

use crate::models::{PatientSummary, RawRecord, RelevanceBand, ScoredRecord};
use crate::search::extract::extract_highlights;

/// Built-in synonym groups; a term matches if any member of its group does
const SYNONYM_GROUPS: &[&[&str]] = &[
    &["fever", "pyrexia", "febrile"],
    &["rash", "exanthem", "eruption"],
    &["seizure", "convulsion"],
    &["headache", "cephalgia", "cephalalgia"],
    &["arthralgia", "joint pain"],
    &["myalgia", "muscle pain"],
    &["vomiting", "emesis"],
    &["diarrhea", "diarrhoea"],
    &["dyspnea", "dyspnoea", "shortness of breath", "breathlessness"],
    &["jaundice", "icterus"],
    &["pruritus", "itching"],
    &["edema", "oedema"],
    &["anemia", "anaemia"],
    &["hematuria", "haematuria"],
    &["lymphadenopathy", "swollen lymph node"],
    &["confusion", "altered mental status", "encephalopathy"],
];

/// Result of matching one patient term against a record
#[derive(Debug, Clone)]
struct TermMatch {
    term: String,
    /// The variant found in the record, if it differs from the term itself
    via: Option<String>,
}

impl TermMatch {
    fn describe(&self) -> String {
        match &self.via {
            Some(via) => format!("{} (as \"{}\")", self.term, via),
            None => self.term.clone(),
        }
    }
}

/// Matched and total counts for one feature group
#[derive(Debug, Default)]
struct GroupMatch {
    matched: Vec<TermMatch>,
    total: usize,
}

impl GroupMatch {
    fn count(&self) -> usize {
        self.matched.len()
    }

    fn list(&self) -> String {
        if self.matched.is_empty() {
            "none".to_string()
        } else {
            self.matched
                .iter()
                .map(TermMatch::describe)
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

/// Scores records with the five-band rubric
#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    synonyms: Vec<Vec<String>>,
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self {
            synonyms: SYNONYM_GROUPS
                .iter()
                .map(|group| group.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }
}

impl RelevanceScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a synonym group
    pub fn with_synonyms<I, S>(mut self, group: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let group: Vec<String> = group
            .into_iter()
            .map(|s| s.into().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if group.len() > 1 {
            self.synonyms.push(group);
        }
        self
    }

    /// Score one record; the record itself is carried through unchanged
    pub fn score(&self, record: &RawRecord, patient: &PatientSummary) -> ScoredRecord {
        let haystack = record.searchable_text();

        let core_terms = usable(&patient.core_symptoms);
        let secondary_terms = usable(&patient.secondary_symptoms);
        let context_terms = usable(&patient.context);

        // Roles shift the same way the query generator shifts them
        let (core_terms, secondary_terms, context_terms) =
            match (core_terms.is_empty(), secondary_terms.is_empty()) {
                (false, _) => (core_terms, secondary_terms, context_terms),
                (true, false) => (secondary_terms, Vec::new(), context_terms),
                (true, true) => (context_terms, Vec::new(), Vec::new()),
            };

        let core = self.match_group(&core_terms, &haystack);
        let secondary = self.match_group(&secondary_terms, &haystack);
        let context = self.match_group(&context_terms, &haystack);

        let matched_all = core.count() + secondary.count() + context.count();
        let total_all = core.total + secondary.total + context.total;
        let supporting = secondary.count() + context.count();

        let (band, reason) = if core.total > 0
            && core.count() == core.total
            && (context.count() > 0 || context.total == 0)
        {
            let reason = if context.total == 0 {
                format!("all {} core symptoms matched", core.total)
            } else {
                format!("all {} core symptoms matched and context overlaps", core.total)
            };
            (RelevanceBand::Exact, reason)
        } else if core.count() > 0 && core.count() * 2 >= core.total {
            (
                RelevanceBand::Strong,
                format!("{} of {} core symptoms matched", core.count(), core.total),
            )
        } else if core.count() > 0 && supporting > 0 {
            (
                RelevanceBand::Partial,
                format!(
                    "{} core symptom and {} other clinical feature matched",
                    core.count(),
                    supporting
                ),
            )
        } else if matched_all > 0 {
            (
                RelevanceBand::Weak,
                format!(
                    "{} isolated feature shared, below the partial-match threshold",
                    matched_all
                ),
            )
        } else {
            (
                RelevanceBand::Minimal,
                "no shared core or secondary symptom".to_string(),
            )
        };

        let (low, high) = band.range();
        let (numerator, denominator) = if band == RelevanceBand::Minimal {
            word_overlap(
                core_terms
                    .iter()
                    .chain(secondary_terms.iter())
                    .chain(context_terms.iter()),
                &haystack,
            )
        } else {
            (matched_all, total_all)
        };
        let score = low + offset(high - low, numerator, denominator);

        let justification = format!(
            "{}: {}. Matched core: {}; secondary: {}; context: {}",
            band.label(),
            reason,
            core.list(),
            secondary.list(),
            context.list()
        );

        let matching_symptoms = core
            .matched
            .iter()
            .chain(secondary.matched.iter())
            .map(|m| m.term.clone())
            .collect();

        ScoredRecord {
            record: record.clone(),
            score,
            band,
            justification,
            matching_symptoms,
            highlights: extract_highlights(&record.abstract_text),
        }
    }

    /// Score records and return them in ranked order
    pub fn score_all(&self, records: &[RawRecord], patient: &PatientSummary) -> Vec<ScoredRecord> {
        let mut scored: Vec<ScoredRecord> = records
            .iter()
            .map(|record| self.score(record, patient))
            .collect();
        sort_scored(&mut scored);
        scored
    }

    fn match_group(&self, terms: &[String], haystack: &str) -> GroupMatch {
        GroupMatch {
            matched: terms
                .iter()
                .filter_map(|term| self.match_term(term, haystack))
                .collect(),
            total: terms.len(),
        }
    }

    fn match_term(&self, term: &str, haystack: &str) -> Option<TermMatch> {
        let lower = term.to_lowercase();
        if haystack.contains(&lower) {
            return Some(TermMatch {
                term: term.to_string(),
                via: None,
            });
        }

        for group in &self.synonyms {
            for member in group.iter().filter(|m| lower.contains(m.as_str())) {
                for other in group.iter().filter(|o| *o != member) {
                    let variant = lower.replace(member.as_str(), other);
                    if haystack.contains(&variant) {
                        return Some(TermMatch {
                            term: term.to_string(),
                            via: Some(variant),
                        });
                    }
                }
            }
        }

        None
    }
}

/// Trimmed, non-empty terms with case-insensitive duplicates removed
fn usable(terms: &[String]) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    terms
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .collect()
}

/// Individual words of patient terms found in the haystack
fn word_overlap<'a>(terms: impl Iterator<Item = &'a String>, haystack: &str) -> (usize, usize) {
    let words: std::collections::BTreeSet<String> = terms
        .flat_map(|t| t.split_whitespace())
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.chars().count() >= 3)
        .collect();

    let found = words.iter().filter(|w| haystack.contains(w.as_str())).count();
    (found, words.len())
}

/// Offset within a band, rounded to nearest
fn offset(span: u8, numerator: usize, denominator: usize) -> u8 {
    if denominator == 0 {
        return 0;
    }
    let numerator = numerator.min(denominator);
    let scaled = (span as usize * numerator * 2 + denominator) / (denominator * 2);
    scaled.min(span as usize) as u8
}

/// Ranking order: score desc, year desc (unknown last), source priority asc, id asc
pub fn compare_scored(a: &ScoredRecord, b: &ScoredRecord) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| match (a.record.year, b.record.year) {
            (Some(ya), Some(yb)) => yb.cmp(&ya),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.record.source.priority().cmp(&b.record.source.priority()))
        .then_with(|| a.record.id.cmp(&b.record.id))
}

/// Sort records into ranking order
pub fn sort_scored(records: &mut [ScoredRecord]) {
    records.sort_by(compare_scored);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DatabaseId, RawRecordBuilder};

    fn record(id: &str, title: &str, abstract_text: &str, year: Option<i32>) -> RawRecord {
        RawRecordBuilder::new(DatabaseId::PubMed, id, title, format!("http://example.com/{}", id))
            .abstract_text(abstract_text)
            .year(year)
            .build()
    }

    fn patient() -> PatientSummary {
        PatientSummary::new(["fever", "rash"])
            .secondary(["eschar", "headache"])
            .context(["Korea"])
    }

    #[test]
    fn test_all_core_with_context_is_exact() {
        let record = record(
            "1",
            "Fever and rash after hiking in Korea",
            "A farmer presented with an eschar.",
            Some(2021),
        );
        let scored = RelevanceScorer::new().score(&record, &patient());

        assert_eq!(scored.band, RelevanceBand::Exact);
        assert!(scored.score >= 90 && scored.score <= 100);
        assert!(scored.justification.contains("fever"));
        assert!(scored.justification.contains("rash"));
        assert!(scored.justification.contains("Korea"));
        assert_eq!(scored.matching_symptoms, vec!["fever", "rash", "eschar"]);
    }

    #[test]
    fn test_all_core_without_context_overlap_is_strong() {
        let record = record("1", "Fever and rash in a child", "", None);
        let scored = RelevanceScorer::new().score(&record, &patient());
        assert_eq!(scored.band, RelevanceBand::Strong);
    }

    #[test]
    fn test_no_context_given_counts_as_overlap() {
        let record = record("1", "Fever and rash in a child", "", None);
        let scored = RelevanceScorer::new().score(&record, &PatientSummary::new(["fever", "rash"]));
        assert_eq!(scored.band, RelevanceBand::Exact);
        assert_eq!(scored.score, 100);
    }

    #[test]
    fn test_synonym_match() {
        let record = record("1", "Pyrexia with exanthem", "", None);
        let scored = RelevanceScorer::new().score(&record, &PatientSummary::new(["fever", "rash"]));
        assert_eq!(scored.band, RelevanceBand::Exact);
        assert!(scored.justification.contains("fever (as \"pyrexia\")"));
    }

    #[test]
    fn test_partial_and_weak_bands() {
        let patient = PatientSummary::new(["fever", "rash", "myalgia"]).secondary(["eschar"]);

        let partial = record("1", "Fever with eschar", "", None);
        let scored = RelevanceScorer::new().score(&partial, &patient);
        assert_eq!(scored.band, RelevanceBand::Partial);
        assert!((50..=69).contains(&scored.score));

        let weak = record("2", "An eschar on the scalp", "", None);
        let scored = RelevanceScorer::new().score(&weak, &patient);
        assert_eq!(scored.band, RelevanceBand::Weak);
        assert!((30..=49).contains(&scored.score));
    }

    #[test]
    fn test_context_only_patient_scores_context_as_core() {
        let patient = PatientSummary::default().context(["Korea", "farmer"]);

        let both = record("1", "Scrub typhus in a Korean farmer", "Case from Korea.", None);
        let scored = RelevanceScorer::new().score(&both, &patient);
        assert_eq!(scored.band, RelevanceBand::Exact);

        let one = record("2", "Tick bites in Korea", "", None);
        let scored = RelevanceScorer::new().score(&one, &patient);
        assert_eq!(scored.band, RelevanceBand::Strong);
    }

    #[test]
    fn test_minimal_band() {
        let record = record("1", "Fracture of the distal radius", "", None);
        let scored = RelevanceScorer::new().score(&record, &patient());
        assert_eq!(scored.band, RelevanceBand::Minimal);
        assert!(scored.score < 30);
        assert!(scored.matching_symptoms.is_empty());
        assert!(scored.justification.starts_with("0-29"));
    }

    #[test]
    fn test_score_does_not_mutate_record() {
        let original = record("1", "Fever and rash", "Treated with doxycycline.", Some(2020));
        let scored = RelevanceScorer::new().score(&original, &patient());
        assert_eq!(scored.record, original);
    }

    #[test]
    fn test_ordering_tie_breaks() {
        let scorer = RelevanceScorer::new();
        let patient = PatientSummary::new(["fever"]);
        let records = vec![
            record("a", "Fever", "", None),
            record("b", "Fever", "", Some(2019)),
            RawRecordBuilder::new(DatabaseId::Pmc, "c", "Fever", "u")
                .year(Some(2023))
                .build(),
            record("d", "Fever", "", Some(2023)),
            record("e", "Nothing relevant", "", Some(2024)),
        ];

        let ranked = scorer.score_all(&records, &patient);
        let ids: Vec<&str> = ranked.iter().map(|r| r.record.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c", "b", "a", "e"]);
    }

    #[test]
    fn test_custom_synonyms() {
        let scorer = RelevanceScorer::new().with_synonyms(["sfts", "severe fever with thrombocytopenia"]);
        let record = record("1", "Severe fever with thrombocytopenia syndrome", "", None);
        let scored = scorer.score(&record, &PatientSummary::new(["SFTS"]));
        assert_eq!(scored.band, RelevanceBand::Exact);
    }
}
