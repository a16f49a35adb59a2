//! Context Assembler (C9): formats the per-collection result sets produced
//! by the hybrid retriever into a single bounded, human-readable string.

use crate::types::SearchHit;
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const NO_CONTEXT: &str =
    "No relevant information was found in the knowledge base for this query.";

/// Assembles `results` (keyed by collection name) into a context string,
/// ordering collections by `signal_strength` descending, capping each at
/// `results_per_collection`, and truncating each result's content to
/// `truncate_chars`. Falls back to a minimal listing if formatting the rich
/// form fails, and to `NO_CONTEXT` if nothing survives.
pub fn assemble(
    results: &BTreeMap<String, Vec<SearchHit>>,
    signals: &BTreeMap<String, f32>,
    results_per_collection: usize,
    truncate_chars: usize,
) -> String {
    let mut collections: Vec<(&String, &Vec<SearchHit>)> =
        results.iter().filter(|(_, hits)| !hits.is_empty()).collect();
    if collections.is_empty() {
        return NO_CONTEXT.to_string();
    }

    collections.sort_by(|a, b| {
        let sa = signals.get(a.0).copied().unwrap_or(0.0);
        let sb = signals.get(b.0).copied().unwrap_or(0.0);
        sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
    });

    match assemble_rich(&collections, signals, results_per_collection, truncate_chars) {
        Some(s) => s,
        None => assemble_minimal(&collections),
    }
}

fn assemble_rich(
    collections: &[(&String, &Vec<SearchHit>)],
    signals: &BTreeMap<String, f32>,
    results_per_collection: usize,
    truncate_chars: usize,
) -> Option<String> {
    let mut out = String::from("Relevant context found:\n\n");
    let mut total_results = 0usize;
    let mut contributing = 0usize;

    for (name, hits) in collections {
        let strength = signals.get(*name).copied().unwrap_or(0.0);
        writeln!(out, "[{}] (relevance: {:.3})", name.to_uppercase(), strength).ok()?;

        let mut rank = 0usize;
        for hit in hits.iter().take(results_per_collection) {
            rank += 1;
            let similarity = hit.similarity();
            let mut content = hit.document.replace('\n', " ").trim().to_string();
            if content.is_empty() {
                content = "content unavailable".to_string();
            }
            if content.chars().count() > truncate_chars {
                content = content.chars().take(truncate_chars).collect::<String>() + "...";
            }

            write!(out, "  {rank}. [{similarity:.3}] {content}").ok()?;
            if let Some(date) = hit.metadata.get("timestamp").and_then(|v| v.as_str()) {
                if let Some(day) = lenient_date(date) {
                    write!(out, " [{day}]").ok()?;
                }
            }
            out.push('\n');
        }

        if rank > 0 {
            out.push('\n');
            total_results += rank;
            contributing += 1;
        }
    }

    if total_results == 0 {
        return None;
    }

    write!(
        out,
        "\nSummary: found {total_results} relevant result{} across {contributing} collection{}.",
        if total_results == 1 { "" } else { "s" },
        if contributing == 1 { "" } else { "s" },
    )
    .ok()?;

    Some(out.trim().to_string())
}

fn assemble_minimal(collections: &[(&String, &Vec<SearchHit>)]) -> String {
    let mut out = String::from("Information found:\n\n");
    for (name, hits) in collections {
        writeln!(out, "{}:", name.to_uppercase()).ok();
        for hit in hits.iter().take(2) {
            let content: String = hit.document.chars().take(200).collect();
            writeln!(out, "- {content}...").ok();
        }
        out.push('\n');
    }
    out.trim().to_string()
}

/// Parses an RFC3339-ish timestamp leniently, tolerating a trailing `Z`,
/// and returns just the date portion.
fn lenient_date(raw: &str) -> Option<String> {
    let normalized = raw.replacen('Z', "+00:00", 1);
    chrono::DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkMetadata;

    fn hit(document: &str, distance: f32) -> SearchHit {
        SearchHit {
            id: "id".to_string(),
            document: document.to_string(),
            metadata: ChunkMetadata::new(),
            distance,
        }
    }

    #[test]
    fn empty_results_yield_no_context_sentinel() {
        let results = BTreeMap::new();
        let signals = BTreeMap::new();
        assert_eq!(assemble(&results, &signals, 3, 300), NO_CONTEXT);
    }

    #[test]
    fn collections_are_ordered_by_signal_strength() {
        let mut results = BTreeMap::new();
        results.insert("documents".to_string(), vec![hit("doc content", 0.2)]);
        results.insert("profile".to_string(), vec![hit("profile content", 0.1)]);

        let mut signals = BTreeMap::new();
        signals.insert("documents".to_string(), 0.05);
        signals.insert("profile".to_string(), 0.2);

        let out = assemble(&results, &signals, 3, 300);
        let profile_pos = out.find("PROFILE").unwrap();
        let documents_pos = out.find("DOCUMENTS").unwrap();
        assert!(profile_pos < documents_pos);
    }

    #[test]
    fn long_content_is_truncated() {
        let mut results = BTreeMap::new();
        let long = "x".repeat(500);
        results.insert("documents".to_string(), vec![hit(&long, 0.1)]);
        let mut signals = BTreeMap::new();
        signals.insert("documents".to_string(), 0.1);

        let out = assemble(&results, &signals, 3, 300);
        assert!(out.contains("..."));
    }

    #[test]
    fn caps_results_per_collection() {
        let mut results = BTreeMap::new();
        results.insert(
            "documents".to_string(),
            vec![hit("a", 0.1), hit("b", 0.1), hit("c", 0.1), hit("d", 0.1)],
        );
        let mut signals = BTreeMap::new();
        signals.insert("documents".to_string(), 0.1);

        let out = assemble(&results, &signals, 3, 300);
        assert!(!out.contains("4."));
    }
}
