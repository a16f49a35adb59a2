//! Minimal SentencePiece-style Unigram tokenizer, enough to drive the ONNX
//! local embedder without pulling in a full tokenizer runtime for a single
//! model family.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

#[derive(serde::Deserialize)]
struct TokenizerFile {
    model: UnigramModel,
    added_tokens: Vec<SpecialToken>,
}

#[derive(serde::Deserialize)]
struct UnigramModel {
    unk_id: u32,
    vocab: Vec<(String, f32)>,
}

#[derive(serde::Deserialize)]
struct SpecialToken {
    id: u32,
    content: String,
}

const WORD_BOUNDARY: char = '\u{2581}'; // '▁'
const MAX_PIECE_LEN: usize = 32;

pub struct SubwordTokenizer {
    piece_ids: HashMap<String, u32>,
    piece_scores: HashMap<u32, f32>,
    bos: u32,
    eos: u32,
    pad: u32,
    unk: u32,
}

impl SubwordTokenizer {
    pub fn from_model_dir(model_dir: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(model_dir.join("tokenizer.json"))
            .context("reading tokenizer.json")?;
        let file: TokenizerFile = serde_json::from_str(&raw).context("parsing tokenizer.json")?;

        let mut piece_ids = HashMap::with_capacity(file.model.vocab.len());
        let mut piece_scores = HashMap::with_capacity(file.model.vocab.len());
        for (idx, (piece, score)) in file.model.vocab.into_iter().enumerate() {
            let id = idx as u32;
            piece_ids.insert(piece, id);
            piece_scores.insert(id, score);
        }

        let (mut bos, mut eos, mut pad) = (0u32, 2u32, 1u32);
        let mut unk = file.model.unk_id;
        for token in &file.added_tokens {
            piece_ids.insert(token.content.clone(), token.id);
            piece_scores.entry(token.id).or_insert(0.0);
            match token.content.as_str() {
                "<s>" => bos = token.id,
                "</s>" => eos = token.id,
                "<pad>" => pad = token.id,
                "<unk>" => unk = token.id,
                _ => {}
            }
        }

        Ok(Self {
            piece_ids,
            piece_scores,
            bos,
            eos,
            pad,
            unk,
        })
    }

    /// Encodes `text` with leading/trailing sentence markers.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut ids = Vec::with_capacity(text.len() / 3 + 2);
        ids.push(self.bos);
        ids.extend(self.segment(text));
        ids.push(self.eos);
        Ok(ids)
    }

    pub fn pad(&self, ids: &[u32], target_len: usize) -> (Vec<i64>, Vec<i64>) {
        let keep = ids.len().min(target_len);
        let mut out_ids = Vec::with_capacity(target_len);
        let mut out_mask = Vec::with_capacity(target_len);
        for &id in &ids[..keep] {
            out_ids.push(id as i64);
            out_mask.push(1i64);
        }
        for _ in keep..target_len {
            out_ids.push(self.pad as i64);
            out_mask.push(0i64);
        }
        (out_ids, out_mask)
    }

    /// Viterbi segmentation over the Unigram language model: best_score[j]
    /// is the highest-scoring way to cover the first `j` characters, and
    /// best_edge[j] records where the last piece started.
    fn segment(&self, text: &str) -> Vec<u32> {
        if text.is_empty() {
            return Vec::new();
        }
        let normalized: String = format!("{WORD_BOUNDARY}{}", text.replace(' ', &WORD_BOUNDARY.to_string()));
        let chars: Vec<char> = normalized.chars().collect();
        let n = chars.len();

        let mut best_score = vec![f32::NEG_INFINITY; n + 1];
        let mut best_edge = vec![0usize; n + 1];
        best_score[0] = 0.0;

        for end in 1..=n {
            let earliest_start = end.saturating_sub(MAX_PIECE_LEN.min(end));
            for start in earliest_start..end {
                let piece: String = chars[start..end].iter().collect();
                if let Some(&id) = self.piece_ids.get(&piece) {
                    let candidate = best_score[start] + self.piece_scores.get(&id).copied().unwrap_or(0.0);
                    if candidate > best_score[end] {
                        best_score[end] = candidate;
                        best_edge[end] = start;
                    }
                }
            }
            if best_score[end].is_infinite() && best_score[end - 1].is_finite() {
                best_score[end] = best_score[end - 1] - 10.0;
                best_edge[end] = end - 1;
            }
        }

        let mut pieces = Vec::new();
        let mut pos = n;
        while pos > 0 {
            let start = best_edge[pos];
            let piece: String = chars[start..pos].iter().collect();
            pieces.push(self.piece_ids.get(&piece).copied().unwrap_or(self.unk));
            pos = start;
        }
        pieces.reverse();
        pieces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_tokenizer() -> SubwordTokenizer {
        let mut piece_ids = HashMap::new();
        let mut piece_scores = HashMap::new();
        for (i, piece) in ["\u{2581}hi", "\u{2581}there", "<s>", "</s>", "<pad>", "<unk>"]
            .iter()
            .enumerate()
        {
            piece_ids.insert(piece.to_string(), i as u32);
            piece_scores.insert(i as u32, -1.0);
        }
        SubwordTokenizer {
            piece_ids,
            piece_scores,
            bos: 2,
            eos: 3,
            pad: 4,
            unk: 5,
        }
    }

    #[test]
    fn segments_known_vocabulary() {
        let tok = tiny_tokenizer();
        let ids = tok.encode("hi there").unwrap();
        assert_eq!(ids.first(), Some(&2));
        assert_eq!(ids.last(), Some(&3));
    }

    #[test]
    fn padding_marks_real_tokens_in_mask() {
        let tok = tiny_tokenizer();
        let ids = tok.encode("hi").unwrap();
        let (padded, mask) = tok.pad(&ids, 8);
        assert_eq!(padded.len(), 8);
        assert_eq!(mask.iter().filter(|&&m| m == 1).count(), ids.len());
    }
}
