//! Deduplication utilities for records across sources.

use std::collections::{HashMap, HashSet};
use strsim::jaro_winkler;

use crate::models::RawRecord;

/// Title similarity above which two cross-source records are the same article
const TITLE_SIMILARITY_THRESHOLD: f64 = 0.97;

/// Find duplicate records based on natural key and title+year similarity
///
/// Returns groups of record indices that are duplicates of each other, in
/// order of first appearance.
pub fn find_duplicates(records: &[RawRecord]) -> Vec<Vec<usize>> {
    let normalized: Vec<String> = records.iter().map(|r| normalize_title(&r.title)).collect();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut processed: HashSet<usize> = HashSet::new();

    for i in 0..records.len() {
        if processed.contains(&i) {
            continue;
        }

        let mut group = vec![i];

        for j in (i + 1)..records.len() {
            if processed.contains(&j) {
                continue;
            }

            if are_duplicates(&records[i], &records[j], &normalized[i], &normalized[j]) {
                group.push(j);
                processed.insert(j);
            }
        }

        if group.len() > 1 {
            groups.push(group);
        }

        processed.insert(i);
    }

    groups
}

/// Check if two records are the same article
fn are_duplicates(a: &RawRecord, b: &RawRecord, title_a: &str, title_b: &str) -> bool {
    if a.key() == b.key() {
        return true;
    }

    // Within one database ids are authoritative
    if a.source == b.source {
        return false;
    }

    if a.year != b.year || title_a.is_empty() || title_b.is_empty() {
        return false;
    }

    let same_title =
        title_a == title_b || jaro_winkler(title_a, title_b) >= TITLE_SIMILARITY_THRESHOLD;

    same_title && authors_match(a, b)
}

/// Check if authors approximately match, comparing surnames
fn authors_match(a: &RawRecord, b: &RawRecord) -> bool {
    let surnames = |record: &RawRecord| -> HashSet<String> {
        record
            .authors
            .iter()
            .filter_map(|name| name.split_whitespace().next())
            .map(|s| s.to_lowercase())
            .collect()
    };

    let authors_a = surnames(a);
    let authors_b = surnames(b);

    // Missing author info cannot contradict a title match
    if authors_a.is_empty() || authors_b.is_empty() {
        return true;
    }

    authors_a.intersection(&authors_b).count() > 0
}

/// Normalize a title for comparison
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Which of two duplicates to keep: the richer one, then the higher-priority source
fn prefer(kept: &RawRecord, candidate: &RawRecord) -> bool {
    let kept_rank = (kept.richness(), std::cmp::Reverse(kept.source.priority()));
    let candidate_rank = (
        candidate.richness(),
        std::cmp::Reverse(candidate.source.priority()),
    );
    candidate_rank > kept_rank
}

/// Remove duplicate records from a list
///
/// Each duplicate group collapses to its richest member, placed at the position
/// of the group's first appearance. Two records with the same `(source, id)`
/// never both survive.
pub fn deduplicate_records(records: Vec<RawRecord>) -> Vec<RawRecord> {
    let groups = find_duplicates(&records);

    if groups.is_empty() {
        return records;
    }

    let mut winner_of: HashMap<usize, usize> = HashMap::new();
    let mut to_remove: HashSet<usize> = HashSet::new();

    for group in groups {
        let first = group[0];
        let mut best = first;
        for &idx in group.iter().skip(1) {
            if prefer(&records[best], &records[idx]) {
                best = idx;
            }
            to_remove.insert(idx);
        }
        winner_of.insert(first, best);
    }

    let mut slots: Vec<Option<RawRecord>> = records.into_iter().map(Some).collect();
    let mut result = Vec::with_capacity(slots.len() - to_remove.len());

    for i in 0..slots.len() {
        if to_remove.contains(&i) {
            continue;
        }
        let source = winner_of.get(&i).copied().unwrap_or(i);
        if let Some(record) = slots[source].take() {
            result.push(record);
        }
    }

    result
}
