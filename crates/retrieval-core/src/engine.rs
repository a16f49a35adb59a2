//! Retrieval Core facade: wires C1–C10 together behind the external
//! interface described in the system's §6 (ingest, list/get/delete
//! documents, search, retrieve context).

use crate::config::{CoreConfig, EmbeddingProviderKind};
use crate::embeddings::local::{LocalEmbedder, LocalModelConfig};
use crate::embeddings::remote::RemoteEmbedder;
use crate::embeddings::{EmbeddingProvider, Embedder};
use crate::error::{CoreError, CoreResult};
use crate::ingest::DocumentIngestor;
use crate::memory::ConversationMemory;
use crate::reranker;
use crate::retriever::HybridRetriever;
use crate::storage::lance_store::LanceVectorStore;
use crate::storage::{Filter, VectorStore, DOCUMENTS};
use crate::types::{DocumentRecord, MetadataValue, SearchResult, TurnRole};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct RetrievalCore {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
    ingestor: DocumentIngestor,
    retriever: HybridRetriever,
    memory: ConversationMemory,
    records_dir: PathBuf,
    records: RwLock<HashMap<String, DocumentRecord>>,
}

impl RetrievalCore {
    pub async fn new(config: CoreConfig) -> CoreResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let lance_path = config.data_dir.join("lance_data");
        let store: Arc<dyn VectorStore> = Arc::new(
            LanceVectorStore::open(
                lance_path.to_str().unwrap_or("./lance_data"),
                config.embedding.dimension,
            )
            .await
            .map_err(|e| CoreError::VectorStoreError {
                collection: "init".to_string(),
                reason: e.to_string(),
            })?,
        );

        let (primary, fallback) = build_providers(&config)?;
        let embedder = Arc::new(Embedder::new(primary, fallback));

        let records_dir = config.data_dir.join("documents");
        std::fs::create_dir_all(&records_dir)?;
        let records = load_records(&records_dir)?;

        let ingestor = DocumentIngestor::new(
            store.clone(),
            embedder.clone(),
            config.chunking.clone(),
            config.ingestion.clone(),
        );
        let retriever = HybridRetriever::new(
            store.clone(),
            embedder.clone(),
            config.retrieval.clone(),
            config.cache.clone(),
        );
        let memory = ConversationMemory::new(
            store.clone(),
            embedder.clone(),
            config.conversation.clone(),
            "local",
        );

        Ok(Self {
            store,
            embedder,
            ingestor,
            retriever,
            memory,
            records_dir,
            records: RwLock::new(records),
        })
    }

    pub async fn ingest_document(&self, path: &Path, document_id: &str) -> CoreResult<DocumentRecord> {
        let record = self.ingestor.ingest_file(path, document_id).await?;
        self.records
            .write()
            .insert(record.document_id.clone(), record.clone());
        self.persist_record(&record)?;
        Ok(record)
    }

    /// Sorted by `processed_at` descending.
    pub fn list_documents(&self) -> Vec<DocumentRecord> {
        let mut records: Vec<DocumentRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        records
    }

    pub fn get_document(&self, document_id: &str) -> CoreResult<DocumentRecord> {
        self.records
            .read()
            .get(document_id)
            .cloned()
            .ok_or_else(|| CoreError::DocumentNotFound {
                document_id: document_id.to_string(),
            })
    }

    /// Every stored chunk (and the summary entry) belonging to `document_id`,
    /// as raw hits with zero distance — this is a metadata lookup, not a
    /// similarity query.
    pub async fn get_chunks(&self, document_id: &str) -> CoreResult<Vec<crate::types::SearchHit>> {
        self.store
            .get(DOCUMENTS, &Filter::new().eq("document_id", document_id))
            .await
    }

    pub async fn delete_document(&self, document_id: &str) -> CoreResult<usize> {
        let removed = self.ingestor.delete_document(document_id).await?;
        self.records.write().remove(document_id);
        self.remove_record_file(document_id)?;
        Ok(removed)
    }

    /// `limit` is clamped to `[1, 50]` per the external interface contract.
    pub async fn search_documents(
        &self,
        query: &str,
        document_id: Option<&str>,
        limit: usize,
    ) -> CoreResult<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let limit = limit.clamp(1, 50);

        let vector = self.embedder.embed(query)?;
        let filter = document_id.map(|id| Filter::new().eq("document_id", id));
        let hits = self
            .store
            .query(DOCUMENTS, &vector, limit * 4, filter.as_ref())
            .await?;

        let reranked = reranker::rerank(query, hits, Some(limit));
        Ok(reranked
            .into_iter()
            .map(|hit| {
                let similarity = hit.similarity();
                let document_id = hit
                    .metadata
                    .get("document_id")
                    .and_then(MetadataValue::as_str)
                    .unwrap_or_default()
                    .to_string();
                let file_name = hit
                    .metadata
                    .get("file_name")
                    .and_then(MetadataValue::as_str)
                    .unwrap_or_default()
                    .to_string();
                SearchResult {
                    content: hit.document,
                    metadata: hit.metadata,
                    similarity,
                    document_id,
                    chunk_id: hit.id,
                    file_name,
                }
            })
            .collect())
    }

    pub async fn retrieve_context(&self, query: &str) -> String {
        self.retriever.search(query).await
    }

    pub async fn add_conversation_turn(&self, role: TurnRole, content: &str) -> CoreResult<()> {
        self.memory.add_turn(role, content).await
    }

    pub async fn close_conversation_session(&self) -> CoreResult<()> {
        self.memory.close_session().await
    }

    fn record_path(&self, document_id: &str) -> PathBuf {
        self.records_dir.join(format!("{document_id}.json"))
    }

    fn persist_record(&self, record: &DocumentRecord) -> CoreResult<()> {
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(self.record_path(&record.document_id), json)?;
        Ok(())
    }

    fn remove_record_file(&self, document_id: &str) -> CoreResult<()> {
        let path = self.record_path(document_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Reads every `{document_id}.json` file under `dir` into the in-memory
/// index. A file that fails to parse is skipped rather than aborting
/// startup, so one corrupt record doesn't take the whole store down.
fn load_records(dir: &Path) -> CoreResult<HashMap<String, DocumentRecord>> {
    let mut records = HashMap::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read document record directory, starting fresh");
            return Ok(records);
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read document record, skipping");
                continue;
            }
        };
        match serde_json::from_str::<DocumentRecord>(&content) {
            Ok(record) => {
                records.insert(record.document_id.clone(), record);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt document record, skipping");
            }
        }
    }
    Ok(records)
}

/// Builds the primary/fallback embedding provider pair from configuration.
/// The configured provider becomes primary; the other provider becomes
/// fallback when it can actually be constructed, otherwise the primary
/// doubles as its own fallback (a double failure then surfaces as
/// `EmbeddingUnavailable` rather than panicking at startup).
fn build_providers(config: &CoreConfig) -> CoreResult<(Box<dyn EmbeddingProvider>, Box<dyn EmbeddingProvider>)> {
    let local = LocalModelConfig::discover(&config.embedding.model_dir, config.embedding.dimension)
        .and_then(|c| LocalEmbedder::new(c).ok())
        .map(|e| Box::new(e) as Box<dyn EmbeddingProvider>);

    let remote = match (&config.embedding.remote_endpoint, &config.embedding.remote_api_key) {
        (Some(endpoint), Some(api_key)) => RemoteEmbedder::new(
            endpoint.clone(),
            api_key.clone(),
            "text-embedding".to_string(),
            config.embedding.dimension,
        )
        .ok()
        .map(|e| Box::new(e) as Box<dyn EmbeddingProvider>),
        _ => None,
    };

    match config.embedding.provider {
        EmbeddingProviderKind::Local => match local {
            Some(primary) => {
                let fallback = remote.unwrap_or_else(|| {
                    boxed_unavailable("local model present but no remote fallback configured")
                });
                Ok((primary, fallback))
            }
            None => Err(CoreError::EmbeddingUnavailable {
                reason: format!(
                    "no local embedding model found under {}",
                    config.embedding.model_dir.display()
                ),
            }),
        },
        EmbeddingProviderKind::Remote => match remote {
            Some(primary) => {
                let fallback = local.unwrap_or_else(|| {
                    boxed_unavailable("remote endpoint configured but no local fallback model found")
                });
                Ok((primary, fallback))
            }
            None => Err(CoreError::EmbeddingUnavailable {
                reason: "remote embedding endpoint/api key not configured".to_string(),
            }),
        },
    }
}

/// A provider that always fails, used as a last-resort fallback so a
/// missing secondary provider degrades to a clear `EmbeddingUnavailable`
/// error instead of making the primary single-point-of-failure implicit.
struct UnavailableProvider {
    reason: &'static str,
}

impl EmbeddingProvider for UnavailableProvider {
    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("{}", self.reason)
    }

    fn dimension(&self) -> usize {
        0
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

fn boxed_unavailable(reason: &'static str) -> Box<dyn EmbeddingProvider> {
    Box::new(UnavailableProvider { reason })
}
