//! Deterministic clinical highlights pulled from abstracts.

use regex::Regex;

use crate::models::CaseHighlights;

/// Longest summary in words
pub const SUMMARY_MAX_WORDS: usize = 70;

/// Longest summary in sentences
pub const SUMMARY_MAX_SENTENCES: usize = 3;

const NO_ABSTRACT: &str = "No abstract available";

const ETIOLOGY_CUES: &[&str] = &[
    "caused by",
    "due to",
    "secondary to",
    "etiology",
    "aetiology",
    "mechanism",
    "induced by",
    "attributed to",
    "infection with",
    "pathogen",
];

const DIAGNOSTIC_CUES: &[&str] = &[
    "diagnosed",
    "diagnosis was",
    "confirmed by",
    "confirmed with",
    "biopsy",
    "pcr",
    "serolog",
    "culture",
    "imaging",
    "computed tomography",
    "magnetic resonance",
    "revealed",
];

const TREATMENT_CUES: &[&str] = &[
    "treated with",
    "treatment with",
    "was treated",
    "therapy",
    "administered",
    "recovered",
    "improved",
    "resolved",
    "discharged",
    "died",
];

/// Split text into sentences on terminal punctuation followed by whitespace
pub fn split_sentences(text: &str) -> Vec<String> {
    let boundary = match Regex::new(r"[.!?]\s+") {
        Ok(re) => re,
        Err(_) => return vec![text.trim().to_string()],
    };

    boundary
        .split(text.trim())
        .map(|s| s.trim().trim_end_matches(&['.', '!', '?'][..]).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Summary of at most 70 words and 3 sentences
///
/// When even the first sentence is too long it is cut at the word limit and
/// marked with an ellipsis.
pub fn extract_summary(abstract_text: &str) -> String {
    let sentences = split_sentences(abstract_text);
    if sentences.is_empty() {
        return NO_ABSTRACT.to_string();
    }

    let mut summary = Vec::new();
    let mut word_count = 0;

    for sentence in sentences.iter().take(SUMMARY_MAX_SENTENCES) {
        let words = sentence.split_whitespace().count();
        if word_count + words > SUMMARY_MAX_WORDS {
            break;
        }
        summary.push(format!("{}.", sentence));
        word_count += words;
    }

    if summary.is_empty() {
        let words = sentences[0]
            .split_whitespace()
            .take(SUMMARY_MAX_WORDS)
            .collect::<Vec<_>>();
        return format!("{}...", words.join(" "));
    }

    summary.join(" ")
}

fn first_sentence_with(sentences: &[String], cues: &[&str]) -> Option<String> {
    sentences
        .iter()
        .find(|sentence| {
            let lower = sentence.to_lowercase();
            cues.iter().any(|cue| lower.contains(cue))
        })
        .map(|sentence| format!("{}.", sentence))
}

/// Summary plus etiology, diagnostic approach and treatment outcome
pub fn extract_highlights(abstract_text: &str) -> CaseHighlights {
    let sentences = split_sentences(abstract_text);

    CaseHighlights {
        summary: extract_summary(abstract_text),
        etiology: first_sentence_with(&sentences, ETIOLOGY_CUES),
        diagnostic_approach: first_sentence_with(&sentences, DIAGNOSTIC_CUES),
        treatment_outcome: first_sentence_with(&sentences, TREATMENT_CUES),
    }
}
