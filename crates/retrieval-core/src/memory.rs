//! Conversation Memory (C6): a sliding window of recent turns for prompt
//! construction, plus a pending buffer that is batch-vectorized into the
//! `conversations` collection.

use crate::config::ConversationConfig;
use crate::embeddings::Embedder;
use crate::error::CoreResult;
use crate::metadata::conversation_batch_id;
use crate::storage::{VectorEntry, VectorStore, CONVERSATIONS};
use crate::types::{ChunkMetadata, ConversationTurn, TurnRole};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

/// Holds a sliding window of the last `window_size` turns and a pending
/// buffer that accumulates until `batch_threshold` turns are ready to be
/// embedded and flushed into durable storage.
pub struct ConversationMemory {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
    config: ConversationConfig,
    window: RwLock<VecDeque<ConversationTurn>>,
    pending: RwLock<Vec<ConversationTurn>>,
    provider: String,
}

impl ConversationMemory {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<Embedder>,
        config: ConversationConfig,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            window: RwLock::new(VecDeque::new()),
            pending: RwLock::new(Vec::new()),
            provider: provider.into(),
        }
    }

    /// Appends a turn to both the prompt window and the pending buffer,
    /// flushing the pending buffer if it has reached `batch_threshold`.
    pub async fn add_turn(&self, role: TurnRole, content: &str) -> CoreResult<()> {
        let turn = ConversationTurn {
            role,
            content: content.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        };

        {
            let mut window = self.window.write();
            window.push_back(turn.clone());
            while window.len() > self.config.window_size {
                window.pop_front();
            }
        }

        let should_flush = {
            let mut pending = self.pending.write();
            pending.push(turn);
            pending.len() >= self.config.batch_threshold
        };

        if should_flush {
            self.flush().await?;
        }
        Ok(())
    }

    /// The last `window_size` turns, oldest first, for direct use in prompt
    /// construction (no embedding involved).
    pub fn window(&self) -> Vec<ConversationTurn> {
        self.window.read().iter().cloned().collect()
    }

    /// Forces a flush regardless of the pending buffer's size. A no-op when
    /// nothing is pending.
    pub async fn close_session(&self) -> CoreResult<()> {
        self.flush().await
    }

    /// Concatenates the pending turns into one document, embeds it, and
    /// inserts it into `conversations`. On failure the pending buffer is
    /// left untouched so the next attempt retries the same turns.
    async fn flush(&self) -> CoreResult<()> {
        let batch: Vec<ConversationTurn> = {
            let pending = self.pending.read();
            pending.clone()
        };
        if batch.is_empty() {
            return Ok(());
        }

        let document = batch
            .iter()
            .map(|t| format!("{}: {}", t.role.as_str(), t.content))
            .collect::<Vec<_>>()
            .join("\n");

        let vector = self.embedder.embed(&document)?;

        let first_timestamp = batch.first().map(|t| t.timestamp).unwrap_or(0);
        let last_timestamp = batch.last().map(|t| t.timestamp).unwrap_or(0);
        let date = chrono::DateTime::from_timestamp(first_timestamp, 0)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        let mut metadata = ChunkMetadata::new();
        metadata.insert("date".to_string(), date.into());
        metadata.insert("provider".to_string(), self.provider.clone().into());
        metadata.insert("message_count".to_string(), (batch.len() as i64).into());
        metadata.insert("first_timestamp".to_string(), first_timestamp.into());
        metadata.insert("last_timestamp".to_string(), last_timestamp.into());

        self.store.ensure_collection(CONVERSATIONS).await?;
        self.store
            .add(
                CONVERSATIONS,
                vec![VectorEntry {
                    id: conversation_batch_id(
                        chrono::DateTime::from_timestamp(first_timestamp, 0).unwrap_or_default(),
                    ),
                    vector,
                    document,
                    metadata,
                }],
            )
            .await?;

        self.pending.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::fakes::FakeEmbedder;
    use crate::storage::fakes::InMemoryStore;

    fn memory(batch_threshold: usize) -> ConversationMemory {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(Embedder::new(
            Box::new(FakeEmbedder { dimension: 16, fail: false }),
            Box::new(FakeEmbedder { dimension: 16, fail: false }),
        ));
        ConversationMemory::new(
            store,
            embedder,
            ConversationConfig { window_size: 10, batch_threshold },
            "test-provider",
        )
    }

    #[tokio::test]
    async fn window_keeps_only_the_most_recent_turns() {
        let memory = memory(100);
        for i in 0..15 {
            memory
                .add_turn(TurnRole::User, &format!("turn {i}"))
                .await
                .unwrap();
        }
        let window = memory.window();
        assert_eq!(window.len(), 10);
        assert_eq!(window[0].content, "turn 5");
        assert_eq!(window[9].content, "turn 14");
    }

    #[tokio::test]
    async fn reaching_batch_threshold_flushes_and_clears_pending() {
        let memory = memory(3);
        memory.add_turn(TurnRole::User, "hello").await.unwrap();
        memory.add_turn(TurnRole::Assistant, "hi there").await.unwrap();
        assert_eq!(memory.pending.read().len(), 2);
        memory.add_turn(TurnRole::User, "how are you").await.unwrap();
        assert_eq!(memory.pending.read().len(), 0);

        let count = memory.store.count(CONVERSATIONS).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn close_session_forces_a_flush_below_threshold() {
        let memory = memory(100);
        memory.add_turn(TurnRole::User, "only one turn").await.unwrap();
        memory.close_session().await.unwrap();
        assert_eq!(memory.pending.read().len(), 0);
        assert_eq!(memory.store.count(CONVERSATIONS).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn close_session_on_empty_pending_is_a_no_op() {
        let memory = memory(100);
        memory.close_session().await.unwrap();
        assert_eq!(memory.store.count(CONVERSATIONS).await.unwrap(), 0);
    }
}
