//! Extractors (C3) and Chunkers (C4): turning a file on disk into chunks
//! ready for embedding.

pub mod chunker;
pub mod lopdf_parser;
pub mod parser;
pub mod tabular;

pub use chunker::TextChunker;
pub use lopdf_parser::LoPdfParser;
pub use parser::{DocumentParser, ParsedDocument};
pub use tabular::chunk_spreadsheet_rows;

use crate::config::ChunkingConfig;
use crate::error::{CoreError, CoreResult};
use crate::metadata::sanitize;
use crate::types::{Chunk, ChunkMetadata, ChunkType, ExtractedDocument, MetadataValue};
use std::path::Path;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "xlsx", "xls", "txt", "md"];

/// Validates the extension and size cap, then dispatches to the format
/// parser, producing an `ExtractedDocument`. Spreadsheets carry their
/// pre-computed `spreadsheet_row` chunks inline on `chunks`; structured PDFs
/// (recovered via the object-level fallback parser) carry `table`/
/// `form_fields` chunks the same way.
pub fn extract(path: &Path, max_file_size: u64, chunking: &ChunkingConfig) -> CoreResult<ExtractedDocument> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(CoreError::UnsupportedFormat { extension });
    }

    let size = std::fs::metadata(path)
        .map_err(|_| CoreError::FileNotFound {
            path: path.display().to_string(),
        })?
        .len();
    if size > max_file_size {
        return Err(CoreError::FileTooLarge {
            size,
            limit: max_file_size,
        });
    }

    let parser = DocumentParser::new();
    let parsed = parser.parse_file(path).map_err(|e| {
        if e.to_string().to_lowercase().contains("encrypt") {
            CoreError::EncryptedPdf {
                path: path.display().to_string(),
            }
        } else {
            CoreError::ExtractionFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    let mut metadata: ChunkMetadata = parsed
        .metadata
        .into_iter()
        .map(|(k, v)| (k, MetadataValue::Str(v)))
        .collect();
    metadata.insert("file_name".to_string(), parsed.title.clone().into());
    metadata.insert("extractor_version".to_string(), "1".into());

    let chunks = if let Some(chunks) = parsed.chunks {
        Some(chunks)
    } else if extension == "xlsx" || extension == "xls" {
        let rows = tabular::chunk_spreadsheet_rows(
            path,
            chunking.max_rows_per_sheet,
            chunking.max_columns_per_sheet,
        )
        .unwrap_or_default();
        if rows.is_empty() {
            None
        } else {
            Some(rows)
        }
    } else {
        None
    };

    Ok(ExtractedDocument {
        content: parsed.content,
        metadata,
        chunks,
    })
}

/// Runs the text chunker over `content` when the extractor produced no
/// pre-computed chunks (i.e. any format other than a spreadsheet).
pub fn chunk_content(content: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let chunker = TextChunker::new(config.max_chunk_size, config.overlap_size, config.min_chunk_size);
    chunker
        .chunk(content)
        .into_iter()
        .map(|c| Chunk {
            chunk_id: c.id.to_string(),
            content: c.text,
            chunk_type: ChunkType::Paragraph,
            heading: c.heading,
            metadata: sanitize(&Default::default()),
        })
        .collect()
}
