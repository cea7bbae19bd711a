//! Markdown rendering of search results for token-constrained callers.

use std::fmt::Write as _;

use crate::models::{ScoredRecord, SearchResult};

/// Longest query or translation shown in the execution summary
pub const SUMMARY_QUERY_WIDTH: usize = 50;

/// Truncate to `max_chars` characters, appending an ellipsis if anything was cut
///
/// ```
/// use medlit::utils::truncate_with_ellipsis;
///
/// assert_eq!(truncate_with_ellipsis("fever AND rash", 5), "fever...");
/// assert_eq!(truncate_with_ellipsis("fever", 8), "fever");
/// ```
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

/// Make text safe inside a markdown table cell
fn cell(text: &str) -> String {
    text.replace(&['\n', '\r'][..], " ").replace('|', "\\|")
}

/// Title, short summary and link per record
pub fn compact_table(result: &SearchResult) -> String {
    if result.records.is_empty() {
        return no_results(result);
    }

    let mut out = String::from("## Results\n\n");
    out.push_str("| Title | Summary (≤70 words) | Link |\n");
    out.push_str("|-------|---------------------|------|\n");

    for scored in &result.records {
        let record = &scored.record;
        let _ = writeln!(
            out,
            "| {} | {} | [{}]({}) |",
            cell(&record.title),
            cell(&scored.highlights.summary),
            record.id,
            record.url
        );
    }

    out
}

fn optional_line(out: &mut String, label: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        let _ = writeln!(out, "- **{}**: {}", label, value);
    }
}

fn detailed_record(out: &mut String, rank: usize, scored: &ScoredRecord) {
    let record = &scored.record;

    let _ = writeln!(out, "### {}. {}\n", rank, record.title);
    let _ = writeln!(
        out,
        "- **Relevance**: {} ({})",
        scored.score,
        scored.band.label()
    );
    let _ = writeln!(out, "- **Justification**: {}", scored.justification);
    let _ = writeln!(out, "- **Authors**: {}", record.author_line());
    optional_line(out, "Journal", Some(record.journal.as_str()));
    let year = record.year.map(|y| y.to_string());
    optional_line(out, "Year", year.as_deref());
    let _ = writeln!(out, "- **Source**: {} ({})", record.source, record.id);

    let symptoms = scored.matching_symptoms.join(", ");
    optional_line(out, "Matching symptoms", Some(symptoms.as_str()));
    let types = record
        .publication_types
        .iter()
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    optional_line(out, "Publication type", Some(types.as_str()));
    let mesh = record.mesh_terms.iter().cloned().collect::<Vec<_>>().join(", ");
    optional_line(out, "MeSH terms", Some(mesh.as_str()));

    optional_line(out, "Etiology", scored.highlights.etiology.as_deref());
    optional_line(
        out,
        "Diagnostic approach",
        scored.highlights.diagnostic_approach.as_deref(),
    );
    optional_line(
        out,
        "Treatment outcome",
        scored.highlights.treatment_outcome.as_deref(),
    );
    let _ = writeln!(out, "- **URL**: {}\n", record.url);

    if !record.abstract_text.is_empty() {
        let _ = writeln!(out, "**Abstract**: {}\n", record.abstract_text);
    }
}

/// Full per-record detail including abstracts and clinical highlights
pub fn detailed_markdown(result: &SearchResult) -> String {
    if result.records.is_empty() {
        return no_results(result);
    }

    let mut out = String::from("## Results\n\n");
    for (idx, scored) in result.records.iter().enumerate() {
        detailed_record(&mut out, idx + 1, scored);
    }
    out
}

fn no_results(result: &SearchResult) -> String {
    match &result.no_results {
        Some(condition) => format!("No results found.\n\n{}\n", condition.suggestion),
        None => "No results found.\n".to_string(),
    }
}

/// Executed queries, engine translations, counts and links for browsing further
pub fn execution_summary(result: &SearchResult) -> String {
    let mut out = String::from("## Search Execution Summary\n\n");
    out.push_str("| # | Database | Query Used | Query Translation | Results | Status |\n");
    out.push_str("|---|----------|------------|-------------------|---------|--------|\n");

    for (idx, round) in result.rounds.iter().enumerate() {
        for (db, report) in &round.databases {
            let translation = report
                .query_translation
                .as_deref()
                .map(|t| truncate_with_ellipsis(t, SUMMARY_QUERY_WIDTH))
                .unwrap_or_else(|| "N/A".to_string());
            let status = match (report.failed, report.record_count) {
                (true, _) => "Failed",
                (false, 0) => "No results",
                (false, _) => "Success",
            };

            let _ = writeln!(
                out,
                "| {} | {} | `{}` | {} | {} | {} |",
                idx + 1,
                db,
                cell(&truncate_with_ellipsis(&report.executed_query, SUMMARY_QUERY_WIDTH)),
                cell(&translation),
                report.record_count,
                status
            );
        }
    }
    out.push('\n');

    let links: Vec<String> = result
        .rounds
        .iter()
        .flat_map(|round| round.databases.iter())
        .filter(|(_, report)| report.record_count > 0 && !report.external_search_url.is_empty())
        .map(|(db, report)| format!("- **{}**: [Search on {}]({})", db, db, report.external_search_url))
        .collect();

    if !links.is_empty() {
        out.push_str("### Search More Results Externally\n\n");
        out.push_str("Only a subset of results is shown. Use these links to explore more:\n\n");
        for link in links {
            let _ = writeln!(out, "{}", link);
        }
        out.push('\n');
    }

    if !result.errors.is_empty() {
        out.push_str("### Database Errors\n\n");
        for error in &result.errors {
            let _ = writeln!(out, "- {}", error);
        }
        out.push('\n');
    }

    if result.excluded_count > 0 {
        let _ = writeln!(
            out,
            "{} record(s) removed by exclusion filters.\n",
            result.excluded_count
        );
    }

    out
}
