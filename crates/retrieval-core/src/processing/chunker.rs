//! Text chunker (C4): paragraph/section-aware splitting with sentence-level
//! greedy packing and word-overlap continuity between adjacent chunks.

use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

fn paragraph_breaks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").unwrap())
}

fn section_headers() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)\n#{1,6}\s+.+\n|^\d+\.\s+.+$").unwrap())
}

fn sentence_endings() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+\s+").unwrap())
}

#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub id: Uuid,
    pub text: String,
    pub index: usize,
    pub heading: Option<String>,
}

struct Section {
    content: String,
}

/// Splits text into chunks of approximately `max_chunk_size` tokens
/// (`tokens = len(text) / 4`), never below `min_chunk_size` except possibly
/// the final chunk of a section (I7), with `overlap_size`-token continuity
/// carried forward as whole words.
pub struct TextChunker {
    max_chunk_size: usize,
    overlap_size: usize,
    min_chunk_size: usize,
}

impl TextChunker {
    pub fn new(max_chunk_size: usize, overlap_size: usize, min_chunk_size: usize) -> Self {
        Self {
            max_chunk_size,
            overlap_size,
            min_chunk_size,
        }
    }

    fn tokens(text: &str) -> usize {
        text.len() / 4
    }

    pub fn chunk(&self, text: &str) -> Vec<ChunkResult> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        if Self::tokens(trimmed) <= self.max_chunk_size {
            return vec![ChunkResult {
                id: Uuid::new_v4(),
                text: trimmed.to_string(),
                index: 0,
                heading: extract_heading(trimmed),
            }];
        }

        let sections = self.detect_sections(trimmed);
        let mut chunks = Vec::new();

        for section in &sections {
            let section_tokens = Self::tokens(&section.content);
            if section_tokens <= self.max_chunk_size {
                if section_tokens >= self.min_chunk_size {
                    chunks.push(ChunkResult {
                        id: Uuid::new_v4(),
                        text: section.content.clone(),
                        index: chunks.len(),
                        heading: extract_heading(&section.content),
                    });
                }
            } else {
                for mut sub in self.split_large_section(&section.content) {
                    sub.index = chunks.len();
                    chunks.push(sub);
                }
            }
        }

        chunks
    }

    /// Groups paragraphs into sections, starting a new section whenever a
    /// paragraph matches the markdown-header / numbered-heading pattern.
    fn detect_sections(&self, text: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        let mut current = String::new();

        for paragraph in paragraph_breaks().split(text) {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }

            if section_headers().is_match(paragraph) {
                if !current.is_empty() {
                    sections.push(Section {
                        content: current.trim().to_string(),
                    });
                }
                current = paragraph.to_string();
            } else if current.is_empty() {
                current = paragraph.to_string();
            } else {
                current.push_str("\n\n");
                current.push_str(paragraph);
            }
        }

        if !current.is_empty() {
            sections.push(Section {
                content: current.trim().to_string(),
            });
        }

        if sections.is_empty() {
            sections.push(Section {
                content: text.to_string(),
            });
        }
        sections
    }

    /// Greedily packs sentences up to `max_chunk_size` tokens, carrying the
    /// last ~15 words of each finished chunk forward as overlap.
    fn split_large_section(&self, text: &str) -> Vec<ChunkResult> {
        let mut chunks = Vec::new();
        let mut current = String::new();

        for sentence in sentence_endings().split(text) {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }

            let candidate = if current.is_empty() {
                sentence.to_string()
            } else {
                format!("{current} {sentence}")
            };

            if Self::tokens(&candidate) <= self.max_chunk_size {
                current = candidate;
            } else if !current.is_empty() && Self::tokens(&current) >= self.min_chunk_size {
                chunks.push(ChunkResult {
                    id: Uuid::new_v4(),
                    text: current.clone(),
                    index: chunks.len(),
                    heading: extract_heading(&current),
                });
                let overlap = overlap_words(&current, self.overlap_size_words());
                current = format!("{overlap} {sentence}");
            } else {
                current = candidate;
            }
        }

        if !current.is_empty() && Self::tokens(&current) >= self.min_chunk_size {
            chunks.push(ChunkResult {
                id: Uuid::new_v4(),
                text: current,
                index: chunks.len(),
                heading: None,
            });
        } else if !current.is_empty() && chunks.is_empty() {
            // The whole section was smaller than min_chunk_size: keep it
            // rather than silently dropping the only chunk (I7 exception).
            chunks.push(ChunkResult {
                id: Uuid::new_v4(),
                text: current,
                index: 0,
                heading: None,
            });
        }

        chunks
    }

    /// `overlap_size` is configured in tokens; ~4 chars/token and ~5
    /// chars/word gives a rough word count, capped at 15 as the reference
    /// implementation's fixed overlap window.
    fn overlap_size_words(&self) -> usize {
        (self.overlap_size / 4 * 4 / 5).clamp(1, 15)
    }
}

fn overlap_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    words[words.len() - max_words..].join(" ")
}

fn extract_heading(text: &str) -> Option<String> {
    let first_line = text.lines().next()?;
    let trimmed = first_line.trim_start();
    if trimmed.starts_with('#') {
        Some(trimmed.trim_start_matches('#').trim().to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunker = TextChunker::new(1000, 100, 20);
        let chunks = chunker.chunk("A short sentence that fits in one chunk.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn empty_text_produces_no_chunks() {
        let chunker = TextChunker::new(1000, 100, 100);
        assert!(chunker.chunk("   ").is_empty());
    }

    #[test]
    fn long_text_is_split_into_multiple_chunks() {
        let chunker = TextChunker::new(40, 8, 5);
        let sentence = "This is one sentence about gardening and soil health. ";
        let text = sentence.repeat(20);
        let chunks = chunker.chunk(&text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(TextChunker::tokens(&c.text) <= 40);
        }
    }

    #[test]
    fn markdown_header_starts_a_new_section() {
        let chunker = TextChunker::new(1000, 100, 1);
        let text = "Intro paragraph.\n\n# Section One\n\nBody of section one.";
        let chunks = chunker.chunk(text);
        assert!(chunks.iter().any(|c| c.heading.as_deref() == Some("Section One")));
    }
}
