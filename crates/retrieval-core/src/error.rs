use thiserror::Error;

/// Error taxonomy for the retrieval core. Ingestion-time errors propagate to
/// the caller; retrieval-time errors are absorbed into a soft-degraded
/// context string by the retriever and never reach this far up.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unsupported format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("file too large: {size} bytes (limit {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("PDF is encrypted and cannot be read without a password: {path}")]
    EncryptedPdf { path: String },

    #[error("extraction failed for {path}: {reason}")]
    ExtractionFailed { path: String, reason: String },

    #[error("embedding unavailable: primary and fallback providers both failed ({reason})")]
    EmbeddingUnavailable { reason: String },

    #[error("vector store error on collection {collection}: {reason}")]
    VectorStoreError { collection: String, reason: String },

    #[error("metadata type violation: key {key} carried a non-primitive value after sanitization")]
    MetadataTypeViolation { key: String },

    #[error("config invalid: {0}")]
    Config(#[from] ConfigError),

    #[error("document record not found: {document_id}")]
    DocumentNotFound { document_id: String },

    #[error("record store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: i64 },

    #[error("min_chunk_size ({min}) must be less than max_chunk_size ({max})")]
    ChunkSizeOrdering { min: usize, max: usize },

    #[error("{field} must lie in [0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f32 },

    #[error("cache capacity must be at least 1")]
    ZeroCacheCapacity,
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
