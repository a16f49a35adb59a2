//! Format-specific extraction (C3) for the supported extensions
//! (pdf, docx, xlsx, xls, txt, md).

use crate::types::{Chunk, ChunkType};
use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub content: String,
    pub title: String,
    pub metadata: HashMap<String, String>,
    /// Pre-computed chunks the extractor recovered directly (spreadsheet
    /// rows are attached by the caller; PDF form/table structure is
    /// attached here, when the object-level fallback parser found any).
    pub chunks: Option<Vec<Chunk>>,
}

/// What a single format branch of `parse_file` contributes: text, its
/// format-specific metadata fields, and any pre-computed chunks.
struct ExtractionOutput {
    content: String,
    metadata: HashMap<String, String>,
    chunks: Option<Vec<Chunk>>,
}

pub struct DocumentParser;

impl DocumentParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_file(&self, path: &Path) -> Result<ParsedDocument> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("txt")
            .to_lowercase();

        let title = path
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or("untitled")
            .to_string();

        let output = match extension.as_str() {
            "pdf" => self.parse_pdf(path)?,
            "docx" => self.parse_docx(path)?,
            "xlsx" | "xls" => self.parse_spreadsheet(path)?,
            _ => self.parse_text(path)?,
        };

        let mut metadata = output.metadata;
        metadata.insert("file_path".to_string(), path.display().to_string());
        metadata.insert("file_extension".to_string(), extension.clone());
        if let Ok(meta) = std::fs::metadata(path) {
            metadata.insert("file_size".to_string(), meta.len().to_string());
            if let Ok(modified) = meta.modified() {
                if let Ok(since_epoch) = modified.duration_since(std::time::UNIX_EPOCH) {
                    metadata.insert("modified_time".to_string(), since_epoch.as_secs().to_string());
                }
            }
        }

        Ok(ParsedDocument {
            content: output.content,
            title,
            metadata,
            chunks: output.chunks,
        })
    }

    /// Reads plain text with a UTF-8 fallback when lossy decoding was needed
    /// (stand-in for full confidence-scored encoding detection).
    fn parse_text(&self, path: &Path) -> Result<ExtractionOutput> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("reading text file: {}", path.display()))?;
        let (content, encoding) = match String::from_utf8(bytes.clone()) {
            Ok(s) => (s, "utf-8"),
            Err(_) => (String::from_utf8_lossy(&bytes).into_owned(), "utf-8 (lossy)"),
        };
        let mut metadata = HashMap::new();
        metadata.insert("encoding".to_string(), encoding.to_string());
        metadata.insert("line_count".to_string(), content.lines().count().to_string());
        Ok(ExtractionOutput {
            content,
            metadata,
            chunks: None,
        })
    }

    /// Primary extraction via the pure-Rust text extractor; a garbled
    /// result (or none at all) falls back to the object-level parser, which
    /// also supplies `pdf_info`/`page_count` metadata and any recovered
    /// form/table structure regardless of which path wins.
    fn parse_pdf(&self, path: &Path) -> Result<ExtractionOutput> {
        let bytes =
            std::fs::read(path).with_context(|| format!("reading PDF: {}", path.display()))?;

        if lopdf::Document::load_mem(&bytes)
            .map(|doc| doc.is_encrypted())
            .unwrap_or(false)
        {
            return Err(anyhow::anyhow!("encrypted"));
        }

        let structured = super::lopdf_parser::LoPdfParser::parse(path).ok();

        let mut metadata = HashMap::new();
        if let Some(doc) = &structured {
            metadata.insert("page_count".to_string(), doc.page_count().to_string());
            if let Some(title) = &doc.title {
                metadata.insert("pdf_info.title".to_string(), title.clone());
            }
            if let Some(author) = &doc.author {
                metadata.insert("pdf_info.author".to_string(), author.clone());
            }
            if let Some(subject) = &doc.subject {
                metadata.insert("pdf_info.subject".to_string(), subject.clone());
            }
            if let Some(creator) = &doc.creator {
                metadata.insert("pdf_info.creator".to_string(), creator.clone());
            }
        }

        let mut content = pdf_extract::extract_text_from_mem(&bytes).ok().and_then(|text| {
            let cleaned = text
                .lines()
                .map(|line| line.trim())
                .filter(|line| !line.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            if cleaned.is_empty() {
                return None;
            }
            let garble_score = Self::column_garble_score(&cleaned);
            if garble_score < 0.25 {
                Some(cleaned)
            } else {
                tracing::info!(
                    garble_score = format!("{:.2}", garble_score),
                    path = %path.display(),
                    "PDF extraction looks garbled, falling back to object-level parser"
                );
                None
            }
        });

        if content.is_none() {
            if let Some(doc) = &structured {
                let text = doc.full_text();
                if !text.trim().is_empty() {
                    content = Some(text);
                }
            }
        }

        let chunks = structured.as_ref().map(|doc| doc.structured_chunks()).filter(|c| !c.is_empty());
        if let Some(chunks) = &chunks {
            let table_count = chunks.iter().filter(|c| c.chunk_type == ChunkType::Table).count();
            metadata.insert("table_count".to_string(), table_count.to_string());
        }

        let content = content.ok_or_else(|| {
            anyhow::anyhow!(
                "PDF contains no extractable text (scanned/image-based): {}",
                path.display()
            )
        })?;

        Ok(ExtractionOutput {
            content,
            metadata,
            chunks,
        })
    }

    /// Score how likely the extracted text is garbled from column merging.
    /// Returns 0.0 (clean) to 1.0 (heavily garbled).
    fn column_garble_score(text: &str) -> f64 {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() < 3 {
            return 0.0;
        }

        let mut garbled_lines = 0usize;
        let mut scored_lines = 0usize;

        for line in &lines {
            if line.len() < 15 {
                continue;
            }
            scored_lines += 1;

            let gap_count = line
                .as_bytes()
                .windows(3)
                .filter(|w| w.iter().all(|&b| b == b' '))
                .count();
            let tab_count = line.chars().filter(|&c| c == '\t').count();

            if gap_count >= 1 || tab_count >= 2 {
                garbled_lines += 1;
            }
        }

        if scored_lines == 0 {
            return 0.0;
        }
        garbled_lines as f64 / scored_lines as f64
    }

    fn parse_docx(&self, path: &Path) -> Result<ExtractionOutput> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening DOCX: {}", path.display()))?;
        let mut archive = zip::ZipArchive::new(file)
            .with_context(|| format!("reading DOCX as zip: {}", path.display()))?;

        let mut xml_content = String::new();
        {
            let mut document_xml = archive
                .by_name("word/document.xml")
                .with_context(|| format!("DOCX missing word/document.xml: {}", path.display()))?;
            use std::io::Read;
            document_xml
                .read_to_string(&mut xml_content)
                .context("reading document.xml from DOCX")?;
        }

        let text = extract_docx_paragraphs(&xml_content);
        if text.is_empty() {
            return Err(anyhow::anyhow!(
                "DOCX contains no extractable text: {}",
                path.display()
            ));
        }
        let paragraph_count = text.split('\n').filter(|p| !p.trim().is_empty()).count();
        let mut metadata = HashMap::new();
        metadata.insert("paragraph_count".to_string(), paragraph_count.to_string());
        Ok(ExtractionOutput {
            content: text,
            metadata,
            chunks: None,
        })
    }

    /// Flattens every sheet into `content`, separating sheets with a
    /// `--- Sheet: {name} ---` marker when there is more than one.
    fn parse_spreadsheet(&self, path: &Path) -> Result<ExtractionOutput> {
        let mut workbook = open_workbook_auto(path)
            .with_context(|| format!("opening spreadsheet: {}", path.display()))?;

        let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
        if sheet_names.is_empty() {
            return Err(anyhow::anyhow!("spreadsheet has no sheets: {}", path.display()));
        }

        let mut all_text = String::new();
        for sheet_name in &sheet_names {
            let range = match workbook.worksheet_range(sheet_name) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if range.is_empty() {
                continue;
            }
            if sheet_names.len() > 1 {
                all_text.push_str(&format!("\n--- Sheet: {} ---\n", sheet_name));
            }
            for row in range.rows() {
                let cells: Vec<String> = row.iter().map(cell_to_string).collect();
                if cells.iter().all(|c| c.is_empty()) {
                    continue;
                }
                all_text.push_str(&cells.join(" | "));
                all_text.push('\n');
            }
        }

        if all_text.trim().is_empty() {
            return Err(anyhow::anyhow!("spreadsheet contains no data: {}", path.display()));
        }

        let mut metadata = HashMap::new();
        metadata.insert("sheet_count".to_string(), sheet_names.len().to_string());
        metadata.insert("sheet_names".to_string(), sheet_names.join(", "));
        Ok(ExtractionOutput {
            content: all_text,
            metadata,
            chunks: None,
        })
    }
}

impl Default for DocumentParser {
    fn default() -> Self {
        Self::new()
    }
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                (*f as i64).to_string()
            } else {
                format!("{:.4}", f).trim_end_matches('0').trim_end_matches('.').to_string()
            }
        }
        Data::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Data::Error(e) => format!("#ERR:{:?}", e),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

/// Extracts text from DOCX XML by scanning `<w:p>`...`</w:p>` paragraph
/// blocks, concatenating `<w:t>` runs within each. No general XML parser
/// dependency: this mirrors the structural extraction contract, not
/// full-fidelity rendering.
fn extract_docx_paragraphs(xml: &str) -> String {
    let mut result = String::new();
    let mut pos = 0;

    while pos < xml.len() {
        let Some(p_start) = xml[pos..].find("<w:p") else {
            break;
        };
        let abs_p_start = pos + p_start;
        let p_end = xml[abs_p_start..]
            .find("</w:p>")
            .map(|e| abs_p_start + e + 6)
            .unwrap_or(xml.len());

        let paragraph = &xml[abs_p_start..p_end];
        let mut para_text = String::new();
        let mut t_pos = 0;

        while t_pos < paragraph.len() {
            let Some(t_start) = paragraph[t_pos..].find("<w:t") else {
                break;
            };
            let abs_t_start = t_pos + t_start;
            let Some(tag_end) = paragraph[abs_t_start..].find('>') else {
                t_pos = abs_t_start + 4;
                continue;
            };
            let content_start = abs_t_start + tag_end + 1;
            if let Some(t_end) = paragraph[content_start..].find("</w:t>") {
                para_text.push_str(&paragraph[content_start..content_start + t_end]);
                t_pos = content_start + t_end + 6;
            } else {
                t_pos = content_start;
            }
        }

        if !para_text.is_empty() {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str(&para_text);
        }
        pos = p_end;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_from_minimal_docx_xml() {
        let xml = r#"<w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t> world</w:t></w:r></w:p>"#;
        assert_eq!(extract_docx_paragraphs(xml), "Hello world");
    }

    #[test]
    fn multiple_paragraphs_join_with_newline() {
        let xml = r#"<w:p><w:t>First</w:t></w:p><w:p><w:t>Second</w:t></w:p>"#;
        assert_eq!(extract_docx_paragraphs(xml), "First\nSecond");
    }

    #[test]
    fn garble_score_is_zero_for_clean_prose() {
        let text = "This is a normal sentence.\nAnother normal line of prose here.\nAnd a third one for good measure.";
        assert!(DocumentParser::column_garble_score(text) < 0.1);
    }
}
