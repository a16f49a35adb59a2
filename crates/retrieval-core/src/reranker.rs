//! Re-ranker (C7): a pure function that re-scores candidates returned by a
//! vector query using intent, lexical and structural signals, on top of
//! their raw similarity from C2.

use crate::types::{ChunkMetadata, ChunkType, MetadataValue, SearchHit};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Price,
    Comparison,
    Specification,
    Availability,
    Calculation,
    None,
}

fn price_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(price|cost|cheap|expensive|\$|how much)\b").unwrap())
}

fn comparison_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(compare|versus|vs\.?|difference|better|cheaper|best)\b").unwrap())
}

fn specification_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(spec|specification|dimension|size|weight|capacity|model)\b").unwrap())
}

fn availability_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(available|stock|in stock|out of stock|when can|ship)\b").unwrap())
}

fn calculation_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(total|sum|how many|calculate|average|count)\b").unwrap())
}

fn price_term_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(price|cost|\$|usd|eur)\b").unwrap())
}

fn row_marker_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\brow:\s*\d+").unwrap())
}

fn number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(\.\d+)?").unwrap())
}

/// Classifies the query's dominant intent as the pattern with the highest
/// match-count-to-word-count ratio; ties and the all-zero case resolve to
/// `Intent::None`, leaving semantic/contextual boosts at their base values.
fn classify_intent(query: &str) -> Intent {
    let word_count = query.split_whitespace().count().max(1) as f64;
    let candidates: [(Intent, &Regex); 5] = [
        (Intent::Price, price_pattern()),
        (Intent::Comparison, comparison_pattern()),
        (Intent::Specification, specification_pattern()),
        (Intent::Availability, availability_pattern()),
        (Intent::Calculation, calculation_pattern()),
    ];

    let mut best = Intent::None;
    let mut best_score = 0.0f64;
    for (intent, pattern) in candidates {
        let matches = pattern.find_iter(query).count() as f64;
        if matches == 0.0 {
            continue;
        }
        let score = matches / word_count;
        if score > best_score {
            best_score = score;
            best = intent;
        }
    }
    best
}

fn is_tabular(chunk_type: Option<ChunkType>) -> bool {
    matches!(chunk_type, Some(ChunkType::SpreadsheetRow) | Some(ChunkType::Table))
}

fn chunk_type_of(metadata: &ChunkMetadata) -> Option<ChunkType> {
    match metadata.get("chunk_type").and_then(|v| v.as_str()) {
        Some("spreadsheet_row") => Some(ChunkType::SpreadsheetRow),
        Some("table") => Some(ChunkType::Table),
        Some("paragraph") => Some(ChunkType::Paragraph),
        Some("section") => Some(ChunkType::Section),
        Some("smart_chunk") => Some(ChunkType::SmartChunk),
        Some("form_fields") => Some(ChunkType::FormFields),
        _ => None,
    }
}

fn semantic_score(base_similarity: f32, intent: Intent, content: &str, metadata: &ChunkMetadata) -> f32 {
    let mut boost = 1.0f32;
    match intent {
        Intent::Price => {
            if content.chars().any(|c| c.is_ascii_digit()) {
                boost += 0.3;
            }
            if price_term_pattern().is_match(content) {
                boost += 0.2;
            }
        }
        Intent::Comparison => {
            let row_count = metadata.get("row_count").and_then(MetadataValue::as_i64).unwrap_or(0);
            if row_count > 3 {
                boost += 0.2;
            }
        }
        Intent::Calculation => {
            let distinct_numbers: std::collections::HashSet<&str> =
                number_pattern().find_iter(content).map(|m| m.as_str()).collect();
            if distinct_numbers.len() >= 2 {
                boost += 0.4;
            }
        }
        Intent::Specification | Intent::Availability | Intent::None => {}
    }

    let length_penalty = if content.len() < 50 {
        0.8
    } else if content.len() > 5_000 {
        0.9
    } else {
        1.0
    };

    (base_similarity * boost * length_penalty).clamp(0.0, 1.0)
}

fn term_coverage(query: &str, content: &str) -> f32 {
    let query_terms: std::collections::HashSet<String> =
        query.split_whitespace().map(|w| w.to_lowercase()).collect();
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_lower = content.to_lowercase();
    let content_terms: std::collections::HashSet<&str> = content_lower.split_whitespace().collect();
    let overlap = query_terms.iter().filter(|t| content_terms.contains(t.as_str())).count();
    overlap as f32 / query_terms.len() as f32
}

fn contextual_score(query: &str, content: &str, intent: Intent, chunk_type: Option<ChunkType>) -> f32 {
    let mut score = term_coverage(query, content);

    if is_tabular(chunk_type) && matches!(intent, Intent::Price | Intent::Calculation) {
        score += 0.3;
    }
    if matches!(intent, Intent::Price) && row_marker_pattern().is_match(content) {
        score += 0.2;
    }

    score.clamp(0.0, 1.0)
}

fn structural_score(content: &str, chunk_type: Option<ChunkType>, metadata: &ChunkMetadata) -> f32 {
    let mut score = 0.5f32;

    if is_tabular(chunk_type) {
        score += 0.2;

        let is_dense = content.len() > 200 && content.matches(':').count() > 3;
        if is_dense {
            score += 0.1;
        }

        let row_count = metadata.get("row_count").and_then(MetadataValue::as_i64).unwrap_or(0);
        if row_count > 10 {
            score += 0.1;
        } else if row_count > 3 {
            score += 0.05;
        }
    }

    if content.len() > 1_000 {
        score += 0.1;
    }

    score.clamp(0.0, 1.0)
}

/// Re-scores `candidates` in place of a fresh list: final score is
/// `0.4*semantic + 0.3*contextual + 0.2*structural + 0.1*original`, sorted
/// descending and truncated to `limit` (if given). A no-op below two
/// candidates, per I5 a permutation (possibly truncated) of the input.
pub fn rerank(query: &str, candidates: Vec<SearchHit>, limit: Option<usize>) -> Vec<SearchHit> {
    if candidates.len() < 2 {
        return match limit {
            Some(n) => candidates.into_iter().take(n).collect(),
            None => candidates,
        };
    }

    let intent = classify_intent(query);
    let mut scored: Vec<(f32, SearchHit)> = candidates
        .into_iter()
        .map(|hit| {
            let original = hit.similarity().clamp(0.0, 1.0);
            let chunk_type = chunk_type_of(&hit.metadata);
            let semantic = semantic_score(original, intent, &hit.document, &hit.metadata);
            let contextual = contextual_score(query, &hit.document, intent, chunk_type);
            let structural = structural_score(&hit.document, chunk_type, &hit.metadata);
            let final_score =
                (0.4 * semantic + 0.3 * contextual + 0.2 * structural + 0.1 * original).clamp(0.0, 1.0);
            (final_score, hit)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let reranked = scored.into_iter().map(|(_, hit)| hit);
    match limit {
        Some(n) => reranked.take(n).collect(),
        None => reranked.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn hit(document: &str, distance: f32, chunk_type: Option<&str>) -> SearchHit {
        let mut metadata = BTreeMap::new();
        if let Some(ct) = chunk_type {
            metadata.insert("chunk_type".to_string(), ct.into());
        }
        SearchHit {
            id: "id".to_string(),
            document: document.to_string(),
            metadata,
            distance,
        }
    }

    fn hit_with_row_count(document: &str, distance: f32, chunk_type: &str, row_count: i64) -> SearchHit {
        let mut hit = hit(document, distance, Some(chunk_type));
        hit.metadata
            .insert("row_count".to_string(), crate::types::MetadataValue::Int(row_count));
        hit
    }

    #[test]
    fn fewer_than_two_candidates_is_a_no_op() {
        let candidates = vec![hit("only one", 0.5, None)];
        let result = rerank("anything", candidates.clone(), None);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].document, candidates[0].document);
    }

    #[test]
    fn price_intent_boosts_content_with_digits_and_price_terms() {
        let priced = hit("Sheet: 'Items'. Row: 1. 'price': '$19.99'", 1.0, Some("spreadsheet_row"));
        let prose = hit("A long description with no numbers at all in it here", 1.0, Some("paragraph"));
        let result = rerank("what is the price of this item", vec![priced.clone(), prose], None);
        assert_eq!(result[0].document, priced.document);
    }

    #[test]
    fn output_is_a_permutation_never_dropping_candidates() {
        let candidates = vec![
            hit("alpha content here with enough length to not get penalized at all", 2.0, None),
            hit("beta content here with enough length to not get penalized at all too", 1.0, None),
            hit("gamma content here with enough length to not get penalized at all too", 0.5, None),
        ];
        let result = rerank("tell me something", candidates.clone(), None);
        assert_eq!(result.len(), candidates.len());
    }

    #[test]
    fn a_spreadsheet_row_from_a_large_sheet_scores_higher_than_a_single_row_sheet() {
        let small_sheet = hit_with_row_count(
            "Sheet: 'Items'. Row: 1. 'name': 'widget'",
            1.0,
            "spreadsheet_row",
            1,
        );
        let large_sheet = hit_with_row_count(
            "Sheet: 'Items'. Row: 2. 'name': 'gadget'",
            1.0,
            "spreadsheet_row",
            50,
        );
        let result = rerank("compare these items", vec![small_sheet.clone(), large_sheet.clone()], None);
        assert_eq!(result[0].document, large_sheet.document);
    }

    #[test]
    fn row_count_metadata_does_not_boost_non_tabular_chunks() {
        let paragraph = hit_with_row_count("A row: 99 mention inside ordinary prose text here", 1.0, "paragraph", 50);
        let score = structural_score(&paragraph.document, chunk_type_of(&paragraph.metadata), &paragraph.metadata);
        assert!(score < 0.8);
    }

    #[test]
    fn limit_truncates_after_sorting() {
        let candidates = vec![
            hit("alpha content here with enough length to not get penalized at all", 2.0, None),
            hit("beta content here with enough length to not get penalized at all too", 1.0, None),
            hit("gamma content here with enough length to not get penalized at all too", 0.5, None),
        ];
        let result = rerank("tell me something", candidates, Some(1));
        assert_eq!(result.len(), 1);
    }
}
