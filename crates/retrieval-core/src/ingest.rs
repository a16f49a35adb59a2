//! Document Ingestor (C5): extract → chunk → embed → store, persisting a
//! `DocumentRecord` for every attempt.

use crate::config::{ChunkingConfig, IngestionConfig};
use crate::embeddings::Embedder;
use crate::error::{CoreError, CoreResult};
use crate::metadata::{document_chunk_id, document_summary_id};
use crate::processing;
use crate::storage::{Filter, VectorEntry, VectorStore, DOCUMENTS};
use crate::types::{Chunk, ChunkMetadata, DocumentRecord, DocumentStatus, MetadataValue};
use std::path::Path;
use std::sync::Arc;

pub struct DocumentIngestor {
    store: Arc<dyn VectorStore>,
    embedder: Arc<Embedder>,
    chunking: ChunkingConfig,
    ingestion: IngestionConfig,
}

impl DocumentIngestor {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<Embedder>,
        chunking: ChunkingConfig,
        ingestion: IngestionConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            chunking,
            ingestion,
        }
    }

    /// Ingests `path`, re-ingestion-idempotent: any previously stored chunks
    /// for `document_id` are deleted before the new ones are inserted.
    pub async fn ingest_file(&self, path: &Path, document_id: &str) -> CoreResult<DocumentRecord> {
        if !path.exists() {
            return Err(CoreError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("untitled")
            .to_string();
        let file_type = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let now = chrono::Utc::now().timestamp();

        let extracted = match processing::extract(path, self.ingestion.max_file_size_bytes, &self.chunking) {
            Ok(e) => e,
            Err(err @ (CoreError::UnsupportedFormat { .. }
            | CoreError::FileTooLarge { .. }
            | CoreError::FileNotFound { .. }
            | CoreError::EncryptedPdf { .. })) => return Err(err),
            Err(CoreError::ExtractionFailed { .. }) => {
                return Ok(DocumentRecord {
                    document_id: document_id.to_string(),
                    file_name,
                    file_type,
                    processed_at: now,
                    chunk_count: 0,
                    total_tokens: 0,
                    vectorized: false,
                    status: DocumentStatus::Failed,
                    chunks: Vec::new(),
                });
            }
            Err(other) => return Err(other),
        };

        let mut chunks: Vec<Chunk> = extracted.chunks.unwrap_or_default();
        if chunks.is_empty() {
            chunks = processing::chunk_content(&extracted.content, &self.chunking);
        }

        // Idempotent re-ingestion: drop everything previously stored for
        // this document before inserting its fresh chunks.
        let existing = self
            .store
            .get(DOCUMENTS, &Filter::new().eq("document_id", document_id))
            .await?;
        if !existing.is_empty() {
            let ids: Vec<String> = existing.into_iter().map(|h| h.id).collect();
            self.store.delete(DOCUMENTS, &ids).await?;
        }

        if chunks.is_empty() {
            return Ok(DocumentRecord {
                document_id: document_id.to_string(),
                file_name,
                file_type,
                processed_at: now,
                chunk_count: 0,
                total_tokens: 0,
                vectorized: false,
                status: DocumentStatus::Processed,
                chunks: Vec::new(),
            });
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.ingestion.embed_batch_size.max(1)) {
            let mut embedded = self.embedder.embed_many(batch)?;
            vectors.append(&mut embedded);
        }

        let total_tokens: usize = chunks.iter().map(|c| c.tokens()).sum();
        let mut entries = Vec::with_capacity(chunks.len());

        for (index, (chunk, vector)) in chunks.iter().zip(vectors.into_iter()).enumerate() {
            let mut metadata: ChunkMetadata = chunk.metadata.clone();
            metadata.insert("document_id".to_string(), document_id.into());
            metadata.insert("processed_at".to_string(), MetadataValue::Int(now));
            metadata.insert("chunk_index".to_string(), MetadataValue::Int(index as i64));
            metadata.insert("chunk_type".to_string(), chunk.chunk_type.as_str().into());
            metadata.insert("tokens".to_string(), MetadataValue::Int(chunk.tokens() as i64));
            metadata.insert("length".to_string(), MetadataValue::Int(chunk.content.len() as i64));
            metadata.insert("file_name".to_string(), file_name.clone().into());
            if let Some(heading) = &chunk.heading {
                metadata.insert("heading".to_string(), heading.clone().into());
            }

            entries.push(VectorEntry {
                id: document_chunk_id(document_id, &chunk.chunk_id),
                vector,
                document: chunk.content.clone(),
                metadata,
            });
        }

        self.store.ensure_collection(DOCUMENTS).await?;

        // A partial embed/insert failure still leaves the record `processed`
        // with whatever chunks made it in (§4.5 failure policy); the core
        // does not retry.
        let insert_result = self.store.add(DOCUMENTS, entries).await;
        let vectorized = insert_result.is_ok();
        if let Err(e) = insert_result {
            tracing::warn!(document_id, error = %e, "partial failure inserting chunks");
        }

        let summary_text = build_summary(&file_name, &file_type, &extracted.metadata);
        let summary_vector = self.embedder.embed(&summary_text)?;
        let mut summary_metadata = ChunkMetadata::new();
        summary_metadata.insert("document_id".to_string(), document_id.into());
        summary_metadata.insert("file_name".to_string(), file_name.clone().into());
        summary_metadata.insert("processed_at".to_string(), MetadataValue::Int(now));
        summary_metadata.insert("chunk_type".to_string(), "summary".into());
        let _ = self
            .store
            .add(
                DOCUMENTS,
                vec![VectorEntry {
                    id: document_summary_id(document_id),
                    vector: summary_vector,
                    document: summary_text,
                    metadata: summary_metadata,
                }],
            )
            .await;

        Ok(DocumentRecord {
            document_id: document_id.to_string(),
            file_name,
            file_type,
            processed_at: now,
            chunk_count: chunks.len(),
            total_tokens,
            vectorized,
            status: DocumentStatus::Processed,
            chunks,
        })
    }

    /// Deletes every chunk and the summary entry belonging to `document_id`.
    pub async fn delete_document(&self, document_id: &str) -> CoreResult<usize> {
        let hits = self
            .store
            .get(DOCUMENTS, &Filter::new().eq("document_id", document_id))
            .await?;
        let ids: Vec<String> = hits.into_iter().map(|h| h.id).collect();
        self.store.delete(DOCUMENTS, &ids).await
    }
}

/// Builds a short, human-readable summary of a document from its
/// file-level extraction metadata (name, type, page/sheet counts, title,
/// author) rather than from its raw content, so the summary entry stored
/// alongside a document's chunks stays meaningful even for files whose
/// body text is dense or mostly numeric.
fn build_summary(file_name: &str, file_type: &str, metadata: &ChunkMetadata) -> String {
    let get = |key: &str| metadata.get(key).and_then(MetadataValue::as_str);

    let mut summary = format!("'{file_name}' is a {file_type} document");
    if let Some(pages) = get("page_count") {
        summary.push_str(&format!(" with {pages} page(s)"));
    }
    if let Some(sheets) = get("sheet_count") {
        summary.push_str(&format!(" with {sheets} sheet(s)"));
    }
    if let Some(paragraphs) = get("paragraph_count") {
        summary.push_str(&format!(" containing {paragraphs} paragraph(s)"));
    }
    match (get("pdf_info.title"), get("pdf_info.author")) {
        (Some(title), Some(author)) => summary.push_str(&format!(", titled '{title}' by {author}")),
        (Some(title), None) => summary.push_str(&format!(", titled '{title}'")),
        (None, Some(author)) => summary.push_str(&format!(" by {author}")),
        (None, None) => {}
    }
    if let Some(sheet_names) = get("sheet_names") {
        summary.push_str(&format!(". Sheets: {sheet_names}"));
    }
    summary.push('.');
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::fakes::FakeEmbedder;
    use crate::storage::fakes::InMemoryStore;
    use std::io::Write;

    fn ingestor() -> DocumentIngestor {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(Embedder::new(
            Box::new(FakeEmbedder {
                dimension: 32,
                fail: false,
            }),
            Box::new(FakeEmbedder {
                dimension: 32,
                fail: false,
            }),
        ));
        DocumentIngestor::new(
            store,
            embedder,
            ChunkingConfig {
                max_chunk_size: 1000,
                min_chunk_size: 5,
                overlap_size: 20,
                max_rows_per_sheet: 10_000,
                max_columns_per_sheet: 50,
            },
            IngestionConfig {
                max_file_size_bytes: 50 * 1024 * 1024,
                embed_batch_size: 5,
                min_chunk_chars: 10,
            },
        )
    }

    #[test]
    fn summary_mentions_title_and_author_but_not_raw_content() {
        let mut metadata = ChunkMetadata::new();
        metadata.insert("page_count".to_string(), "12".into());
        metadata.insert("pdf_info.title".to_string(), "Q3 Report".into());
        metadata.insert("pdf_info.author".to_string(), "J. Rivera".into());

        let summary = build_summary("report.pdf", "pdf", &metadata);
        assert!(summary.contains("12 page(s)"));
        assert!(summary.contains("titled 'Q3 Report' by J. Rivera"));
    }

    #[test]
    fn summary_without_metadata_still_names_the_file() {
        let summary = build_summary("notes.txt", "txt", &ChunkMetadata::new());
        assert_eq!(summary, "'notes.txt' is a txt document.");
    }

    #[tokio::test]
    async fn ingests_a_text_file_and_produces_a_processed_record() {
        let ingestor = ingestor();
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(file, "A short document about gardening and soil health.").unwrap();

        let record = ingestor.ingest_file(file.path(), "doc-1").await.unwrap();
        assert_eq!(record.status, DocumentStatus::Processed);
        assert!(record.vectorized);
        assert!(record.chunk_count >= 1);
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let ingestor = ingestor();
        let file = tempfile::Builder::new().suffix(".exe").tempfile().unwrap();
        let err = ingestor.ingest_file(file.path(), "doc-2").await.unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn reingesting_the_same_document_id_replaces_chunks() {
        let ingestor = ingestor();
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(file, "First version of the document content.").unwrap();

        let first = ingestor.ingest_file(file.path(), "doc-3").await.unwrap();

        let mut file2 = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(file2, "Second version with entirely different words about oceans.").unwrap();
        let second = ingestor.ingest_file(file2.path(), "doc-3").await.unwrap();

        assert_eq!(first.document_id, second.document_id);
        assert!(second.vectorized);
    }

    #[tokio::test]
    async fn deleting_a_document_removes_every_chunk_and_its_summary_entry() {
        let ingestor = ingestor();
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        writeln!(
            file,
            "Paragraph one about rivers.\n\nParagraph two about lakes and streams."
        )
        .unwrap();
        let record = ingestor.ingest_file(file.path(), "doc-4").await.unwrap();
        assert!(record.chunk_count >= 1);

        let before = ingestor
            .store
            .get(DOCUMENTS, &Filter::new().eq("document_id", "doc-4"))
            .await
            .unwrap();
        assert!(!before.is_empty());

        let removed = ingestor.delete_document("doc-4").await.unwrap();
        assert_eq!(removed, before.len());

        let after = ingestor
            .store
            .get(DOCUMENTS, &Filter::new().eq("document_id", "doc-4"))
            .await
            .unwrap();
        assert!(after.is_empty());
    }
}
