//! Retrieval core: document ingestion, chunking, embedding, multi-collection
//! vector storage, and two-phase hybrid retrieval with re-ranking and
//! context assembly. The transport layer (HTTP, CLI, etc.) wraps this crate;
//! nothing here talks to the network beyond the embedder's remote fallback.

pub mod config;
pub mod context;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod memory;
pub mod metadata;
pub mod processing;
pub mod reranker;
pub mod retriever;
pub mod storage;
pub mod types;

pub use config::CoreConfig;
pub use engine::RetrievalCore;
pub use error::{CoreError, CoreResult};
pub use ingest::DocumentIngestor;
pub use memory::ConversationMemory;
pub use retriever::HybridRetriever;
pub use types::{
    Chunk, ChunkMetadata, ChunkType, ConversationTurn, DocumentRecord, DocumentStatus,
    ExtractedDocument, MetadataValue, SearchHit, SearchResult, TurnRole,
};
