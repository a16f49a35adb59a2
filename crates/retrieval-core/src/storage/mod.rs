//! Vector Store (C2): a typed, named-collection abstraction over an
//! embedded LanceDB database.

pub mod lance_store;

use crate::error::CoreResult;
use crate::types::{ChunkMetadata, SearchHit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One vector entry being written: `(id, vector, document, metadata)`.
pub struct VectorEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub document: String,
    pub metadata: ChunkMetadata,
}

/// Equality filter over metadata keys, used by `query`/`get`.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub equals: Vec<(String, String)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }
}

/// The three collections that exist by convention (§3).
pub const DOCUMENTS: &str = "documents";
pub const CONVERSATIONS: &str = "conversations";
pub const PROFILE: &str = "profile";
pub const ALL_COLLECTIONS: [&str; 3] = [DOCUMENTS, CONVERSATIONS, PROFILE];

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn ensure_collection(&self, name: &str) -> CoreResult<()>;

    /// Duplicate ids within a collection overwrite. A zero-length `items`
    /// is a no-op.
    async fn add(&self, name: &str, items: Vec<VectorEntry>) -> CoreResult<()>;

    /// Up to `k` nearest entries ordered by ascending distance. Querying a
    /// missing collection returns an empty result, not an error.
    async fn query(
        &self,
        name: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> CoreResult<Vec<SearchHit>>;

    async fn get(&self, name: &str, filter: &Filter) -> CoreResult<Vec<SearchHit>>;

    /// Deleting absent ids is silent.
    async fn delete(&self, name: &str, ids: &[String]) -> CoreResult<usize>;

    async fn count(&self, name: &str) -> CoreResult<usize>;

    /// Maintenance operation: remove entries whose `created_at` predates
    /// `cutoff`. Entries without a timestamp are exempt.
    async fn cleanup_older_than(&self, name: &str, cutoff: DateTime<Utc>) -> CoreResult<usize>;
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use parking_lot::RwLock;
    use std::collections::HashMap;

    struct StoredEntry {
        vector: Vec<f32>,
        document: String,
        metadata: ChunkMetadata,
        created_at: i64,
    }

    /// In-memory `VectorStore` used throughout the test suite. Distance is
    /// Euclidean, matching the contract real implementations must honor.
    #[derive(Default)]
    pub struct InMemoryStore {
        collections: RwLock<HashMap<String, HashMap<String, StoredEntry>>>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    fn euclidean(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }

    fn matches(metadata: &ChunkMetadata, filter: &Filter) -> bool {
        filter.equals.iter().all(|(k, v)| {
            metadata
                .get(k)
                .and_then(|val| val.as_str())
                .map(|s| s == v)
                .unwrap_or(false)
        })
    }

    #[async_trait]
    impl VectorStore for InMemoryStore {
        async fn ensure_collection(&self, name: &str) -> CoreResult<()> {
            self.collections
                .write()
                .entry(name.to_string())
                .or_default();
            Ok(())
        }

        async fn add(&self, name: &str, items: Vec<VectorEntry>) -> CoreResult<()> {
            if items.is_empty() {
                return Ok(());
            }
            let mut guard = self.collections.write();
            let collection = guard.entry(name.to_string()).or_default();
            for item in items {
                let created_at = item
                    .metadata
                    .get("created_at")
                    .or_else(|| item.metadata.get("timestamp"))
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0);
                collection.insert(
                    item.id,
                    StoredEntry {
                        vector: item.vector,
                        document: item.document,
                        metadata: item.metadata,
                        created_at,
                    },
                );
            }
            Ok(())
        }

        async fn query(
            &self,
            name: &str,
            vector: &[f32],
            k: usize,
            filter: Option<&Filter>,
        ) -> CoreResult<Vec<SearchHit>> {
            let guard = self.collections.read();
            let Some(collection) = guard.get(name) else {
                return Ok(Vec::new());
            };
            let mut hits: Vec<SearchHit> = collection
                .iter()
                .filter(|(_, entry)| filter.map(|f| matches(&entry.metadata, f)).unwrap_or(true))
                .map(|(id, entry)| SearchHit {
                    id: id.clone(),
                    document: entry.document.clone(),
                    metadata: entry.metadata.clone(),
                    distance: euclidean(vector, &entry.vector),
                })
                .collect();
            hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
            hits.truncate(k);
            Ok(hits)
        }

        async fn get(&self, name: &str, filter: &Filter) -> CoreResult<Vec<SearchHit>> {
            let guard = self.collections.read();
            let Some(collection) = guard.get(name) else {
                return Ok(Vec::new());
            };
            Ok(collection
                .iter()
                .filter(|(_, entry)| matches(&entry.metadata, filter))
                .map(|(id, entry)| SearchHit {
                    id: id.clone(),
                    document: entry.document.clone(),
                    metadata: entry.metadata.clone(),
                    distance: 0.0,
                })
                .collect())
        }

        async fn delete(&self, name: &str, ids: &[String]) -> CoreResult<usize> {
            let mut guard = self.collections.write();
            let Some(collection) = guard.get_mut(name) else {
                return Ok(0);
            };
            let mut removed = 0;
            for id in ids {
                if collection.remove(id).is_some() {
                    removed += 1;
                }
            }
            Ok(removed)
        }

        async fn count(&self, name: &str) -> CoreResult<usize> {
            Ok(self
                .collections
                .read()
                .get(name)
                .map(|c| c.len())
                .unwrap_or(0))
        }

        async fn cleanup_older_than(&self, name: &str, cutoff: DateTime<Utc>) -> CoreResult<usize> {
            let mut guard = self.collections.write();
            let Some(collection) = guard.get_mut(name) else {
                return Ok(0);
            };
            let cutoff_ts = cutoff.timestamp();
            let before = collection.len();
            collection.retain(|_, entry| entry.created_at == 0 || entry.created_at >= cutoff_ts);
            Ok(before - collection.len())
        }
    }
}
