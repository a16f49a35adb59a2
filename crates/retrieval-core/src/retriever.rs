//! Hybrid Retriever (C8): a two-phase query pipeline (discovery then
//! targeted search) across every collection, with fallback logic and a
//! query-result cache.

use crate::config::{CacheConfig, RetrievalConfig};
use crate::context;
use crate::embeddings::Embedder;
use crate::reranker;
use crate::storage::{VectorStore, ALL_COLLECTIONS};
use crate::types::SearchHit;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

struct CacheEntry {
    context: String,
    inserted_at: i64,
}

/// Signal strength and a one-result preview recorded during the discovery
/// phase, reused as a fallback if a collection's targeted query fails.
#[derive(Clone)]
struct Signal {
    strength: f32,
    preview: Vec<SearchHit>,
    errored: bool,
}

pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
    config: RetrievalConfig,
    cache_config: CacheConfig,
    cache: Mutex<lru::LruCache<String, CacheEntry>>,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<Embedder>,
        config: RetrievalConfig,
        cache_config: CacheConfig,
    ) -> Self {
        let capacity = std::num::NonZeroUsize::new(cache_config.capacity.max(1)).unwrap();
        Self {
            store,
            embedder,
            config,
            cache: Mutex::new(lru::LruCache::new(capacity)),
            cache_config,
        }
    }

    fn cache_key(query: &str) -> String {
        let normalized = query.to_lowercase();
        format!("{:x}", md5::compute(normalized.trim().as_bytes()))
    }

    /// Runs the full two-phase pipeline, returning an assembled context
    /// string. Always returns a string, never propagates a retrieval-time
    /// error up (§ error taxonomy note on `CoreError`).
    pub async fn search(&self, query: &str) -> String {
        if query.trim().is_empty() {
            return context::NO_CONTEXT.to_string();
        }

        let key = Self::cache_key(query);
        let now = chrono::Utc::now().timestamp();
        {
            let mut cache = self.cache.lock();
            if let Some(entry) = cache.get(&key) {
                if now - entry.inserted_at <= self.cache_config.ttl_seconds as i64 {
                    return entry.context.clone();
                }
            }
        }

        let vector = match self.embedder.embed(query) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "embedding unavailable during retrieval");
                return context::NO_CONTEXT.to_string();
            }
        };

        let signals = self.discovery_phase(&vector).await;
        let assembled = self.targeted_phase(query, &vector, signals).await;

        let mut cache = self.cache.lock();
        cache.put(
            key,
            CacheEntry {
                context: assembled.clone(),
                inserted_at: now,
            },
        );
        assembled
    }

    /// Shallow, concurrent query (k=2) across every collection; per-collection
    /// failures are isolated and recorded as a zero-strength, errored signal.
    async fn discovery_phase(&self, vector: &[f32]) -> BTreeMap<String, Signal> {
        let futures = ALL_COLLECTIONS
            .iter()
            .map(|name| self.store.query(name, vector, self.config.discovery_k, None));
        let results = futures::future::join_all(futures).await;

        let mut signals = BTreeMap::new();
        for (name, result) in ALL_COLLECTIONS.iter().zip(results) {
            let signal = match result {
                Ok(hits) if !hits.is_empty() => {
                    let strength = hits.iter().map(|h| h.similarity()).sum::<f32>() / hits.len() as f32;
                    Signal {
                        strength,
                        preview: hits.into_iter().take(1).collect(),
                        errored: false,
                    }
                }
                Ok(_) => Signal {
                    strength: 0.0,
                    preview: Vec::new(),
                    errored: false,
                },
                Err(e) => {
                    tracing::warn!(collection = *name, error = %e, "discovery query failed");
                    Signal {
                        strength: 0.0,
                        preview: Vec::new(),
                        errored: true,
                    }
                }
            };
            signals.insert(name.to_string(), signal);
        }
        signals
    }

    async fn targeted_phase(
        &self,
        query: &str,
        vector: &[f32],
        signals: BTreeMap<String, Signal>,
    ) -> String {
        let primary: Vec<&String> = signals
            .iter()
            .filter(|(_, s)| s.strength >= self.config.discovery_threshold)
            .map(|(name, _)| name)
            .collect();

        let mut collection_results: BTreeMap<String, Vec<SearchHit>> = BTreeMap::new();

        if !primary.is_empty() {
            let futures = primary
                .iter()
                .map(|name| self.store.query(name, vector, self.config.targeted_k, None));
            let deep_results = futures::future::join_all(futures).await;

            for (name, result) in primary.iter().zip(deep_results) {
                match result {
                    Ok(hits) => {
                        collection_results.insert((*name).clone(), hits);
                    }
                    Err(e) => {
                        tracing::warn!(collection = *name, error = %e, "targeted query failed, using preview");
                        if let Some(signal) = signals.get(*name) {
                            collection_results.insert((*name).clone(), signal.preview.clone());
                        }
                    }
                }
            }
        }

        let total_results: usize = collection_results.values().map(|v| v.len()).sum();
        if total_results < self.config.min_results_for_context {
            for (name, signal) in &signals {
                if collection_results.contains_key(name) || signal.errored {
                    continue;
                }
                if signal.strength >= self.config.fallback_threshold {
                    let hits = if !signal.preview.is_empty() {
                        signal.preview.clone()
                    } else {
                        self.store
                            .query(name, vector, self.config.fallback_k, None)
                            .await
                            .unwrap_or_default()
                    };
                    if !hits.is_empty() {
                        collection_results.insert(name.clone(), hits);
                    }
                }
            }
        }

        collection_results.retain(|_, hits| !hits.is_empty());
        if collection_results.is_empty() {
            return context::NO_CONTEXT.to_string();
        }

        for hits in collection_results.values_mut() {
            let taken = std::mem::take(hits);
            *hits = reranker::rerank(query, taken, None);
        }

        let signal_strengths: BTreeMap<String, f32> =
            signals.into_iter().map(|(name, s)| (name, s.strength)).collect();

        context::assemble(
            &collection_results,
            &signal_strengths,
            self.config.results_per_collection,
            self.config.snippet_truncate_chars,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::fakes::FakeEmbedder;
    use crate::storage::fakes::InMemoryStore;
    use crate::storage::{VectorEntry, DOCUMENTS};
    use crate::types::ChunkMetadata;

    fn retriever() -> (HybridRetriever, Arc<dyn VectorStore>) {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(Embedder::new(
            Box::new(FakeEmbedder { dimension: 32, fail: false }),
            Box::new(FakeEmbedder { dimension: 32, fail: false }),
        ));
        let retriever = HybridRetriever::new(
            store.clone(),
            embedder,
            RetrievalConfig {
                discovery_k: 2,
                targeted_k: 5,
                fallback_k: 2,
                discovery_threshold: 0.08,
                fallback_threshold: 0.04,
                min_results_for_context: 1,
                results_per_collection: 3,
                snippet_truncate_chars: 300,
            },
            CacheConfig { ttl_seconds: 300, capacity: 100 },
        );
        (retriever, store)
    }

    #[tokio::test]
    async fn empty_query_returns_no_context_sentinel() {
        let (retriever, _store) = retriever();
        assert_eq!(retriever.search("   ").await, context::NO_CONTEXT);
    }

    #[tokio::test]
    async fn empty_store_returns_no_context_sentinel() {
        let (retriever, _store) = retriever();
        assert_eq!(retriever.search("anything at all").await, context::NO_CONTEXT);
    }

    #[tokio::test]
    async fn finds_a_matching_document_after_ingestion() {
        let (retriever, store) = retriever();
        store.ensure_collection(DOCUMENTS).await.unwrap();
        store
            .add(
                DOCUMENTS,
                vec![VectorEntry {
                    id: "chunk-1".to_string(),
                    vector: crate::embeddings::fakes::hash_embed("gardening and soil health basics", 32),
                    document: "gardening and soil health basics".to_string(),
                    metadata: ChunkMetadata::new(),
                }],
            )
            .await
            .unwrap();

        let result = retriever.search("gardening and soil health basics").await;
        assert!(result.contains("gardening"));
    }

    #[tokio::test]
    async fn repeated_query_hits_the_cache() {
        let (retriever, store) = retriever();
        store.ensure_collection(DOCUMENTS).await.unwrap();
        store
            .add(
                DOCUMENTS,
                vec![VectorEntry {
                    id: "chunk-1".to_string(),
                    vector: crate::embeddings::fakes::hash_embed("ocean currents and tides", 32),
                    document: "ocean currents and tides".to_string(),
                    metadata: ChunkMetadata::new(),
                }],
            )
            .await
            .unwrap();

        let first = retriever.search("ocean currents and tides").await;
        let second = retriever.search("Ocean Currents And Tides  ").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn discovery_phase_is_deterministic_for_an_unchanged_store() {
        let (retriever, store) = retriever();
        store.ensure_collection(DOCUMENTS).await.unwrap();
        store
            .add(
                DOCUMENTS,
                vec![VectorEntry {
                    id: "chunk-1".to_string(),
                    vector: crate::embeddings::fakes::hash_embed("volcanic rock formations", 32),
                    document: "volcanic rock formations".to_string(),
                    metadata: ChunkMetadata::new(),
                }],
            )
            .await
            .unwrap();

        let vector = crate::embeddings::fakes::hash_embed("volcanic rock formations", 32);
        let first = retriever.discovery_phase(&vector).await;
        let second = retriever.discovery_phase(&vector).await;

        assert_eq!(first.len(), second.len());
        for (name, signal) in &first {
            let other = &second[name];
            assert_eq!(signal.strength, other.strength);
            assert_eq!(signal.errored, other.errored);
        }
    }
}
