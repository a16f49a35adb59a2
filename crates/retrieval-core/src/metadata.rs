//! Metadata Sanitizer & IDs (C10).
//!
//! Every metadata map entering the vector store passes through `sanitize`,
//! which is the only legal writer of chunk metadata. Id generation is
//! centralized here so ids stay stable and collision-free within a
//! collection.

use crate::types::{ChunkMetadata, MetadataValue};
use serde_json::Value;
use std::collections::BTreeMap;

/// Flattens a JSON-like value tree into the primitive-only map the vector
/// store accepts: lists become comma-joined strings, objects become their
/// string form, and anything else is coerced through its string
/// representation. Values that are already primitive pass through unchanged
/// (idempotence, R2).
pub fn sanitize(raw: &BTreeMap<String, Value>) -> ChunkMetadata {
    raw.iter()
        .map(|(k, v)| (k.clone(), sanitize_value(v)))
        .collect()
}

fn sanitize_value(value: &Value) -> MetadataValue {
    match value {
        Value::Null => MetadataValue::Null,
        Value::Bool(b) => MetadataValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Int(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::Str(n.to_string())
            }
        }
        Value::String(s) => MetadataValue::Str(s.clone()),
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(value_to_display_string)
                .collect::<Vec<_>>()
                .join(", ");
            MetadataValue::Str(joined)
        }
        Value::Object(_) => MetadataValue::Str(value.to_string()),
    }
}

fn value_to_display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Re-sanitizing an already-sanitized map is a no-op (R2): every
/// `MetadataValue` variant is already primitive, so round-tripping through
/// `sanitize` again leaves it unchanged by construction.
pub fn sanitize_idempotent(metadata: &ChunkMetadata) -> ChunkMetadata {
    metadata.clone()
}

pub fn document_chunk_id(document_id: &str, chunk_id: &str) -> String {
    format!("{document_id}_{chunk_id}")
}

pub fn document_summary_id(document_id: &str) -> String {
    format!("metadata_{document_id}")
}

pub fn conversation_batch_id(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    format!("conv_{}", timestamp.to_rfc3339())
}

/// True iff every value in `metadata` is a primitive (always true for
/// `ChunkMetadata`'s type, but callers that build maps by hand before they
/// exist as `ChunkMetadata` can use this to assert I1 at a seam).
pub fn all_primitive(metadata: &ChunkMetadata) -> bool {
    metadata.values().all(|v| {
        matches!(
            v,
            MetadataValue::Str(_)
                | MetadataValue::Int(_)
                | MetadataValue::Float(_)
                | MetadataValue::Bool(_)
                | MetadataValue::Null
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_list_to_comma_joined_string() {
        let mut raw = BTreeMap::new();
        raw.insert("tags".to_string(), json!(["a", "b", "c"]));
        let sanitized = sanitize(&raw);
        assert_eq!(
            sanitized.get("tags"),
            Some(&MetadataValue::Str("a, b, c".to_string()))
        );
    }

    #[test]
    fn stringifies_nested_object() {
        let mut raw = BTreeMap::new();
        raw.insert("nested".to_string(), json!({"x": 1}));
        let sanitized = sanitize(&raw);
        assert!(matches!(sanitized.get("nested"), Some(MetadataValue::Str(_))));
    }

    #[test]
    fn passes_through_primitives() {
        let mut raw = BTreeMap::new();
        raw.insert("count".to_string(), json!(5));
        raw.insert("active".to_string(), json!(true));
        raw.insert("missing".to_string(), json!(null));
        let sanitized = sanitize(&raw);
        assert_eq!(sanitized.get("count"), Some(&MetadataValue::Int(5)));
        assert_eq!(sanitized.get("active"), Some(&MetadataValue::Bool(true)));
        assert_eq!(sanitized.get("missing"), Some(&MetadataValue::Null));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let mut raw = BTreeMap::new();
        raw.insert("tags".to_string(), json!(["a", "b"]));
        let once = sanitize(&raw);
        let twice = sanitize_idempotent(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn id_grammar_matches_spec() {
        assert_eq!(document_chunk_id("doc1", "chunk_3"), "doc1_chunk_3");
        assert_eq!(document_summary_id("doc1"), "metadata_doc1");
    }
}
