use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub ingestion: IngestionConfig,
    pub conversation: ConversationConfig,
    pub retrieval: RetrievalConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model_dir: PathBuf,
    pub dimension: usize,
    pub provider: EmbeddingProviderKind,
    pub remote_api_key: Option<String>,
    pub remote_endpoint: Option<String>,
}

/// Which provider is primary; the other of the pair is always the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbeddingProviderKind {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Approximate tokens (len/4), not characters.
    pub max_chunk_size: usize,
    pub min_chunk_size: usize,
    pub overlap_size: usize,
    pub max_rows_per_sheet: usize,
    pub max_columns_per_sheet: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    pub max_file_size_bytes: u64,
    pub embed_batch_size: usize,
    pub min_chunk_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Number of most-recent turns kept for prompt construction.
    pub window_size: usize,
    /// Pending turns accumulated before a batch is vectorized and flushed.
    pub batch_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub discovery_k: usize,
    pub targeted_k: usize,
    pub fallback_k: usize,
    pub discovery_threshold: f32,
    pub fallback_threshold: f32,
    pub min_results_for_context: usize,
    pub results_per_collection: usize,
    pub snippet_truncate_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub capacity: usize,
}

impl CoreConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding.dimension == 0 {
            return Err(ConfigError::NotPositive {
                field: "embedding.dimension",
                value: 0,
            });
        }
        if self.chunking.max_chunk_size == 0 {
            return Err(ConfigError::NotPositive {
                field: "chunking.max_chunk_size",
                value: 0,
            });
        }
        if self.chunking.min_chunk_size >= self.chunking.max_chunk_size {
            return Err(ConfigError::ChunkSizeOrdering {
                min: self.chunking.min_chunk_size,
                max: self.chunking.max_chunk_size,
            });
        }
        if self.chunking.max_rows_per_sheet == 0 {
            return Err(ConfigError::NotPositive {
                field: "chunking.max_rows_per_sheet",
                value: 0,
            });
        }
        if self.chunking.max_columns_per_sheet == 0 {
            return Err(ConfigError::NotPositive {
                field: "chunking.max_columns_per_sheet",
                value: 0,
            });
        }
        if self.ingestion.embed_batch_size == 0 {
            return Err(ConfigError::NotPositive {
                field: "ingestion.embed_batch_size",
                value: 0,
            });
        }
        if self.conversation.window_size == 0 {
            return Err(ConfigError::NotPositive {
                field: "conversation.window_size",
                value: 0,
            });
        }
        if self.conversation.batch_threshold == 0 {
            return Err(ConfigError::NotPositive {
                field: "conversation.batch_threshold",
                value: 0,
            });
        }
        if !(0.0..=1.0).contains(&self.retrieval.discovery_threshold) {
            return Err(ConfigError::OutOfUnitRange {
                field: "retrieval.discovery_threshold",
                value: self.retrieval.discovery_threshold,
            });
        }
        if !(0.0..=1.0).contains(&self.retrieval.fallback_threshold) {
            return Err(ConfigError::OutOfUnitRange {
                field: "retrieval.fallback_threshold",
                value: self.retrieval.fallback_threshold,
            });
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        Ok(())
    }

    /// Load config from a JSON file, then validate it.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("retrieval-core");

        let model_dir = if Path::new("models").exists() {
            PathBuf::from("models")
        } else if let Ok(env_path) = std::env::var("LOCAL_MODEL_PATH") {
            PathBuf::from(env_path)
        } else {
            data_dir.join("models")
        };

        let provider = match std::env::var("EMBEDDING_PROVIDER").as_deref() {
            Ok("remote") => EmbeddingProviderKind::Remote,
            _ => EmbeddingProviderKind::Local,
        };

        Self {
            data_dir,
            embedding: EmbeddingConfig {
                model_dir,
                dimension: 384,
                provider,
                remote_api_key: std::env::var("REMOTE_EMBEDDING_API_KEY").ok(),
                remote_endpoint: std::env::var("REMOTE_EMBEDDING_ENDPOINT").ok(),
            },
            chunking: ChunkingConfig {
                max_chunk_size: 1000,
                min_chunk_size: 100,
                overlap_size: 100,
                max_rows_per_sheet: 10_000,
                max_columns_per_sheet: 50,
            },
            ingestion: IngestionConfig {
                max_file_size_bytes: 50 * 1024 * 1024,
                embed_batch_size: 5,
                min_chunk_chars: 10,
            },
            conversation: ConversationConfig {
                window_size: 10,
                batch_threshold: 10,
            },
            retrieval: RetrievalConfig {
                discovery_k: 2,
                targeted_k: 5,
                fallback_k: 2,
                discovery_threshold: 0.08,
                fallback_threshold: 0.04,
                min_results_for_context: 1,
                results_per_collection: 3,
                snippet_truncate_chars: 300,
            },
            cache: CacheConfig {
                ttl_seconds: 300,
                capacity: 100,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(CoreConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_min_chunk_size_above_max() {
        let mut cfg = CoreConfig::default();
        cfg.chunking.min_chunk_size = cfg.chunking.max_chunk_size;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_cache_capacity() {
        let mut cfg = CoreConfig::default();
        cfg.cache.capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut cfg = CoreConfig::default();
        cfg.retrieval.discovery_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_rows_per_sheet() {
        let mut cfg = CoreConfig::default();
        cfg.chunking.max_rows_per_sheet = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_columns_per_sheet() {
        let mut cfg = CoreConfig::default();
        cfg.chunking.max_columns_per_sheet = 0;
        assert!(cfg.validate().is_err());
    }
}
