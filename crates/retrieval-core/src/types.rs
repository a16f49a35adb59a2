use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A primitive value permitted in sanitized metadata. The vector store never
/// sees anything else: lists and maps are flattened to strings before a
/// value reaches this type (see `metadata::sanitize`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Str(s.to_string())
    }
}
impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Str(s)
    }
}
impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}
impl From<usize> for MetadataValue {
    fn from(v: usize) -> Self {
        MetadataValue::Int(v as i64)
    }
}
impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}
impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

/// Open, primitive-keyed-and-valued metadata map. `BTreeMap` keeps
/// serialization and predicate construction deterministic.
pub type ChunkMetadata = BTreeMap<String, MetadataValue>;

/// The kind of retrieval unit a chunk represents, driving both re-ranker
/// structural scoring and context-assembly formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Paragraph,
    Table,
    SpreadsheetRow,
    Section,
    SmartChunk,
    FormFields,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Paragraph => "paragraph",
            ChunkType::Table => "table",
            ChunkType::SpreadsheetRow => "spreadsheet_row",
            ChunkType::Section => "section",
            ChunkType::SmartChunk => "smart_chunk",
            ChunkType::FormFields => "form_fields",
        }
    }
}

/// The unit of retrieval, pre-storage. `document_id` is stable once the
/// chunk is indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub content: String,
    pub chunk_type: ChunkType,
    pub heading: Option<String>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn tokens(&self) -> usize {
        self.content.len() / 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Processed,
    Failed,
}

/// One record per ingested file, persisted as JSON under the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub file_name: String,
    pub file_type: String,
    pub processed_at: i64,
    pub chunk_count: usize,
    pub total_tokens: usize,
    pub vectorized: bool,
    pub status: DocumentStatus,
    /// Ordered list of the chunks this document was split into, persisted
    /// alongside the record so a document can be inspected or re-embedded
    /// without re-running extraction.
    pub chunks: Vec<Chunk>,
}

/// Raw extraction output of a format-specific extractor (C3).
#[derive(Debug, Clone, Default)]
pub struct ExtractedDocument {
    pub content: String,
    pub metadata: ChunkMetadata,
    /// Pre-computed chunks for formats where the extractor knows the
    /// natural retrieval unit better than the generic text chunker
    /// (spreadsheets; structured PDFs with recovered form fields/tables).
    pub chunks: Option<Vec<Chunk>>,
}

/// A single turn of conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// A single hit returned from a vector store query, before re-ranking.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub document: String,
    pub metadata: ChunkMetadata,
    pub distance: f32,
}

impl SearchHit {
    /// I4: the only similarity transform the core relies on.
    pub fn similarity(&self) -> f32 {
        1.0 / (1.0 + self.distance.max(0.0))
    }
}

/// Result surfaced by `search_documents`, after re-ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    pub metadata: BTreeMap<String, MetadataValue>,
    pub similarity: f32,
    pub document_id: String,
    pub chunk_id: String,
    pub file_name: String,
}
