//! Patient presentation and exclusion inputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Structured summary of a patient presentation
///
/// Constructed once per request and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientSummary {
    /// Cardinal symptoms, combined conjunctively when searching
    #[serde(default)]
    pub core_symptoms: Vec<String>,

    /// Supporting symptoms, used as optional refining terms
    #[serde(default)]
    pub secondary_symptoms: Vec<String>,

    /// Clinical context (exposures, demographics, region)
    #[serde(default)]
    pub context: Vec<String>,

    /// Free-text course of illness
    #[serde(default)]
    pub timeline: String,
}

impl PatientSummary {
    /// Create a summary from core symptoms only
    pub fn new<I, S>(core_symptoms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            core_symptoms: core_symptoms.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Set secondary symptoms
    pub fn secondary<I, S>(mut self, symptoms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.secondary_symptoms = symptoms.into_iter().map(Into::into).collect();
        self
    }

    /// Set clinical context
    pub fn context<I, S>(mut self, context: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context = context.into_iter().map(Into::into).collect();
        self
    }

    /// Set timeline
    pub fn timeline(mut self, timeline: impl Into<String>) -> Self {
        self.timeline = timeline.into();
        self
    }

    /// Whether no symptom or context term is present
    pub fn is_empty(&self) -> bool {
        [&self.core_symptoms, &self.secondary_symptoms, &self.context]
            .iter()
            .all(|terms| terms.iter().all(|t| t.trim().is_empty()))
    }

    /// Derive a scoring context from free-text queries
    ///
    /// Field tags, quotes and boolean operators are stripped. Terms of the first
    /// query become core symptoms; terms of later queries become secondary.
    pub fn from_query_texts<S: AsRef<str>>(queries: &[S]) -> Self {
        let mut summary = PatientSummary::default();
        let mut seen = BTreeSet::new();

        for (idx, query) in queries.iter().enumerate() {
            for term in split_query_terms(query.as_ref()) {
                if !seen.insert(term.to_lowercase()) {
                    continue;
                }
                if idx == 0 {
                    summary.core_symptoms.push(term);
                } else {
                    summary.secondary_symptoms.push(term);
                }
            }
        }

        summary
    }
}

/// Split a boolean query into its bare terms
///
/// NOT-clauses are discarded since they name what the caller does not want.
pub fn split_query_terms(query: &str) -> Vec<String> {
    let tag_re = regex::Regex::new(r"\[[^\]]*\]").ok();
    let without_tags = match &tag_re {
        Some(re) => re.replace_all(query, " ").to_string(),
        None => query.to_string(),
    };

    let mut terms = Vec::new();
    let mut skip_group = false;
    let mut depth_at_not = 0usize;
    let mut depth = 0usize;
    let mut current = String::new();

    let flush = |current: &mut String, terms: &mut Vec<String>, skip: bool| {
        let term = current
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == ',')
            .trim()
            .to_string();
        if !term.is_empty() && !skip {
            terms.push(term);
        }
        current.clear();
    };

    for token in tokenize(&without_tags) {
        match token.as_str() {
            "(" => {
                flush(&mut current, &mut terms, skip_group);
                depth += 1;
            }
            ")" => {
                flush(&mut current, &mut terms, skip_group);
                depth = depth.saturating_sub(1);
                if skip_group && depth <= depth_at_not {
                    skip_group = false;
                }
            }
            "," => flush(&mut current, &mut terms, skip_group),
            word if word.eq_ignore_ascii_case("and") || word.eq_ignore_ascii_case("or") => {
                flush(&mut current, &mut terms, skip_group);
                if skip_group && depth <= depth_at_not {
                    skip_group = false;
                }
            }
            word if word.eq_ignore_ascii_case("not") => {
                flush(&mut current, &mut terms, skip_group);
                skip_group = true;
                depth_at_not = depth;
            }
            word => {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
            }
        }
    }
    flush(&mut current, &mut terms, skip_group);

    terms
}

/// Split a boolean query into its AND-ed groups of OR alternatives
///
/// `a AND (b OR c) NOT d` yields `[[a], [b, c]]`. Inside parentheses every
/// term is treated as an alternative of the enclosing group.
pub fn split_query_groups(query: &str) -> Vec<Vec<String>> {
    let without_tags = match regex::Regex::new(r"\[[^\]]*\]") {
        Ok(re) => re.replace_all(query, " ").to_string(),
        Err(_) => query.to_string(),
    };

    let mut groups = Vec::new();
    let mut group: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut skip_group = false;
    let mut depth_at_not = 0usize;

    let flush = |current: &mut String, group: &mut Vec<String>, skip: bool| {
        let term = current
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == ',')
            .trim()
            .to_string();
        if !term.is_empty() && !skip {
            group.push(term);
        }
        current.clear();
    };
    let close = |group: &mut Vec<String>, groups: &mut Vec<Vec<String>>| {
        if !group.is_empty() {
            groups.push(std::mem::take(group));
        }
    };

    for token in tokenize(&without_tags) {
        match token.as_str() {
            "(" => {
                flush(&mut current, &mut group, skip_group);
                depth += 1;
            }
            ")" => {
                flush(&mut current, &mut group, skip_group);
                depth = depth.saturating_sub(1);
                if skip_group && depth <= depth_at_not {
                    skip_group = false;
                }
            }
            word if word.eq_ignore_ascii_case("or") || word == "," => {
                flush(&mut current, &mut group, skip_group);
            }
            word if word.eq_ignore_ascii_case("and") => {
                flush(&mut current, &mut group, skip_group);
                if skip_group && depth <= depth_at_not {
                    skip_group = false;
                }
                if depth == 0 {
                    close(&mut group, &mut groups);
                }
            }
            word if word.eq_ignore_ascii_case("not") => {
                flush(&mut current, &mut group, skip_group);
                if depth == 0 {
                    close(&mut group, &mut groups);
                }
                skip_group = true;
                depth_at_not = depth;
            }
            word => {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
            }
        }
    }
    flush(&mut current, &mut group, skip_group);
    close(&mut group, &mut groups);

    groups
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut in_quotes = false;

    for c in text.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                word.push(c);
            }
            '(' | ')' | ',' if !in_quotes => {
                if !word.is_empty() {
                    tokens.push(std::mem::take(&mut word));
                }
                tokens.push(c.to_string());
            }
            c if c.is_whitespace() && !in_quotes => {
                if !word.is_empty() {
                    tokens.push(std::mem::take(&mut word));
                }
            }
            c => word.push(c),
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }

    tokens
}

/// Diagnoses and terms to keep out of queries and results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionSet {
    /// Diagnoses already ruled out
    #[serde(default)]
    pub diagnoses: BTreeSet<String>,

    /// Any other unwanted terms
    #[serde(default)]
    pub terms: BTreeSet<String>,

    /// Caller-supplied flag that suppresses the standing substance-abuse exclusions
    /// (e.g. when regional clinical context makes them relevant)
    #[serde(default)]
    pub substance_context_relevant: bool,
}

impl ExclusionSet {
    /// Create an exclusion set from diagnoses
    pub fn with_diagnoses<I, S>(diagnoses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            diagnoses: diagnoses.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Add excluded terms
    pub fn terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terms.extend(terms.into_iter().map(Into::into));
        self
    }

    /// Mark substance-related context as relevant
    pub fn substance_context_relevant(mut self, relevant: bool) -> Self {
        self.substance_context_relevant = relevant;
        self
    }
}
