//! Candidate query generation from a patient summary.
//!
//! Generation is a pure function of its inputs: no I/O and no randomness, so
//! identical summaries always produce identical queries.

use std::collections::BTreeSet;

use crate::models::{PatientSummary, Query, ValidationError};

/// Field tag applied to every term
pub const DEFAULT_FIELD_TAG: &str = "Title/Abstract";

/// How a term is written into the query string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rendering {
    /// `"term"[Title/Abstract]`
    Tagged,
    /// `"term"`
    Quoted,
    /// `term`
    Plain,
}

/// One query tier before rendering
struct Tier<'a> {
    secondary: &'a [String],
    context: &'a [String],
}

/// Builds ranked PubMed-syntax queries from a [`PatientSummary`]
#[derive(Debug, Clone, Default)]
pub struct QueryGenerator;

impl QueryGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate 1 to 4 queries, narrowest first
    ///
    /// Tiers are core AND secondary AND context, core AND secondary, core AND
    /// context, and core alone. Terms containing an excluded diagnosis are
    /// dropped, and no returned query contains an excluded diagnosis.
    pub fn generate(
        &self,
        patient: &PatientSummary,
        excluded_diagnoses: &BTreeSet<String>,
    ) -> Result<Vec<Query>, ValidationError> {
        let excluded: Vec<String> = excluded_diagnoses
            .iter()
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        let core = usable_terms(&patient.core_symptoms, &excluded);
        let secondary = usable_terms(&patient.secondary_symptoms, &excluded);
        let context = usable_terms(&patient.context, &excluded);

        // Promote the next non-empty group when there are no core symptoms
        let (core, secondary, context) = match (core.is_empty(), secondary.is_empty()) {
            (false, _) => (core, secondary, context),
            (true, false) => (secondary, Vec::new(), context),
            (true, true) => (context, Vec::new(), Vec::new()),
        };

        if core.is_empty() {
            return Err(ValidationError::new(
                "patient_summary",
                "no usable symptom or context terms after exclusions",
            ));
        }

        let tiers = [
            Tier {
                secondary: &secondary,
                context: &context,
            },
            Tier {
                secondary: &secondary,
                context: &[],
            },
            Tier {
                secondary: &[],
                context: &context,
            },
            Tier {
                secondary: &[],
                context: &[],
            },
        ];

        let mut queries: Vec<Query> = Vec::new();
        let mut seen = BTreeSet::new();

        for (idx, tier) in tiers.iter().enumerate() {
            // Tiers 1-3 exist only to add the refining groups they name
            let needs_secondary = idx == 0 || idx == 1;
            let needs_context = idx == 0 || idx == 2;
            if (needs_secondary && tier.secondary.is_empty())
                || (needs_context && tier.context.is_empty())
            {
                continue;
            }

            let Some(text) = self.render_safely(&core, tier, &excluded) else {
                tracing::debug!(tier = idx + 1, "Dropped query containing an excluded term");
                continue;
            };

            if !seen.insert(text.clone()) {
                continue;
            }

            let priority = queries.len() as u32 + 1;
            queries.push(Query::new(text, priority, describe(&core, tier)));
        }

        if queries.is_empty() {
            return Err(ValidationError::new(
                "excluded_diagnoses",
                "every candidate query contained an excluded diagnosis",
            ));
        }

        Ok(queries)
    }

    /// Render a tier, falling back to simpler renderings if an excluded string
    /// appears only through field tags or quoting
    fn render_safely(&self, core: &[String], tier: &Tier<'_>, excluded: &[String]) -> Option<String> {
        [Rendering::Tagged, Rendering::Quoted, Rendering::Plain]
            .into_iter()
            .map(|rendering| self.render(core, tier, rendering))
            .find(|text| {
                let lower = text.to_lowercase();
                !excluded.iter().any(|e| lower.contains(e.as_str()))
            })
    }

    fn render(&self, core: &[String], tier: &Tier<'_>, rendering: Rendering) -> String {
        let term = |t: &String| match rendering {
            Rendering::Tagged => format!("\"{}\"[{}]", t, DEFAULT_FIELD_TAG),
            Rendering::Quoted => format!("\"{}\"", t),
            Rendering::Plain => t.clone(),
        };

        let group = |terms: &[String]| -> String {
            let rendered = terms.iter().map(term).collect::<Vec<_>>();
            if rendered.len() == 1 {
                rendered[0].clone()
            } else {
                format!("({})", rendered.join(" OR "))
            }
        };

        let mut parts: Vec<String> = core.iter().map(term).collect();
        if !tier.secondary.is_empty() {
            parts.push(group(tier.secondary));
        }
        if !tier.context.is_empty() {
            parts.push(group(tier.context));
        }

        parts.join(" AND ")
    }
}

/// Trimmed, de-duplicated terms that do not contain an excluded string
fn usable_terms(terms: &[String], excluded: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    terms
        .iter()
        .map(|t| t.replace('"', " ").split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
        .filter(|t| {
            let lower = t.to_lowercase();
            !excluded.iter().any(|e| lower.contains(e.as_str()))
        })
        .filter(|t| seen.insert(t.to_lowercase()))
        .collect()
}

fn describe(core: &[String], tier: &Tier<'_>) -> String {
    let mut description = format!("All core symptoms: {}", core.join(", "));
    if !tier.secondary.is_empty() {
        description.push_str(&format!(
            "; any secondary symptom: {}",
            tier.secondary.join(", ")
        ));
    }
    if !tier.context.is_empty() {
        description.push_str(&format!("; any context: {}", tier.context.join(", ")));
    }
    if tier.secondary.is_empty() && tier.context.is_empty() {
        description.push_str(" (broadest)");
    }
    description
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient() -> PatientSummary {
        PatientSummary::new(["fever", "rash"])
            .secondary(["arthralgia", "conjunctivitis"])
            .context(["Korea"])
            .timeline("3 days after hiking")
    }

    fn excluded<const N: usize>(terms: [&str; N]) -> BTreeSet<String> {
        terms.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_generate_four_tiers() {
        let queries = QueryGenerator::new()
            .generate(&patient(), &BTreeSet::new())
            .unwrap();

        assert_eq!(queries.len(), 4);
        assert_eq!(
            queries[0].text,
            "\"fever\"[Title/Abstract] AND \"rash\"[Title/Abstract] AND \
             (\"arthralgia\"[Title/Abstract] OR \"conjunctivitis\"[Title/Abstract]) AND \
             \"Korea\"[Title/Abstract]"
        );
        assert_eq!(
            queries[3].text,
            "\"fever\"[Title/Abstract] AND \"rash\"[Title/Abstract]"
        );
        assert_eq!(
            queries.iter().map(|q| q.priority).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert!(queries[3].scope_description.contains("broadest"));
    }

    #[test]
    fn test_skips_empty_tiers() {
        let queries = QueryGenerator::new()
            .generate(&PatientSummary::new(["fever"]).context(["Korea"]), &BTreeSet::new())
            .unwrap();

        assert_eq!(queries.len(), 2);
        assert!(queries[0].text.contains("Korea"));
        assert_eq!(queries[1].text, "\"fever\"[Title/Abstract]");
    }

    #[test]
    fn test_excluded_terms_never_embedded() {
        let patient = PatientSummary::new(["fever", "rash"])
            .secondary(["lupus nephritis flare", "arthralgia"])
            .context(["Korea"]);
        let queries = QueryGenerator::new()
            .generate(&patient, &excluded(["Lupus", "abstract"]))
            .unwrap();

        for query in &queries {
            let lower = query.text.to_lowercase();
            assert!(!lower.contains("lupus"), "{}", query.text);
            assert!(!lower.contains("abstract"), "{}", query.text);
        }
        assert!(queries[0].text.starts_with("\"fever\" AND"));
    }

    #[test]
    fn test_secondary_promoted_when_core_empty() {
        let patient = PatientSummary::default().secondary(["headache"]);
        let queries = QueryGenerator::new()
            .generate(&patient, &BTreeSet::new())
            .unwrap();

        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].text, "\"headache\"[Title/Abstract]");
    }

    #[test]
    fn test_no_usable_terms() {
        let err = QueryGenerator::new()
            .generate(&PatientSummary::new(["lupus"]), &excluded(["lupus"]))
            .unwrap_err();
        assert_eq!(err.field, "patient_summary");

        let err = QueryGenerator::new()
            .generate(&PatientSummary::new(["fever", "rash"]), &excluded(["and"]))
            .unwrap_err();
        assert_eq!(err.field, "excluded_diagnoses");
    }

    #[test]
    fn test_deterministic() {
        let generator = QueryGenerator::new();
        let a = generator.generate(&patient(), &excluded(["malaria"])).unwrap();
        let b = generator.generate(&patient(), &excluded(["malaria"])).unwrap();
        assert_eq!(a, b);
    }
}
