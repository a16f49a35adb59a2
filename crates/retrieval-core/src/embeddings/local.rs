//! On-device embedding provider: a multilingual sentence-transformer run
//! through an ONNX session with a matching subword tokenizer.

use super::tokenizer::SubwordTokenizer;
use super::EmbeddingProvider;
use anyhow::{anyhow, Context, Result};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MAX_SEQUENCE_LENGTH: usize = 512;
const MAX_INFERENCE_BATCH: usize = 8;

#[derive(Clone)]
pub struct LocalModelConfig {
    pub model_path: PathBuf,
    pub dimension: usize,
    pub max_length: usize,
    pub normalize: bool,
}

impl LocalModelConfig {
    /// Looks for `model.onnx` (or a quantized/optimized variant) and
    /// `tokenizer.json` directly under `model_dir`. Returns `None` rather
    /// than erroring so callers can fall back to the remote provider when
    /// no local model has been provisioned.
    pub fn discover(model_dir: &Path, dimension: usize) -> Option<Self> {
        if !model_dir.exists() {
            return None;
        }
        let candidates = [
            "model_qint8_avx512_vnni.onnx",
            "model_O4.onnx",
            "model.onnx",
        ];
        let model_path = candidates
            .iter()
            .map(|name| model_dir.join(name))
            .find(|path| path.exists())?;
        if !model_dir.join("tokenizer.json").exists() {
            return None;
        }
        Some(Self {
            model_path,
            dimension,
            max_length: MAX_SEQUENCE_LENGTH,
            normalize: true,
        })
    }
}

enum Prefix {
    Query,
    Passage,
}

impl Prefix {
    fn apply(&self, text: &str) -> String {
        match self {
            Prefix::Query => format!("query: {text}"),
            Prefix::Passage => format!("passage: {text}"),
        }
    }
}

/// Wraps an ONNX session behind the `EmbeddingProvider` contract.
/// `embed` is always treated as a passage embedding since the core only
/// ever calls providers to embed stored content or the query text passed
/// to C2's `query`; the query/passage prefix distinction is an encoding
/// detail of this particular model family, not part of the trait surface.
pub struct LocalEmbedder {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<SubwordTokenizer>,
    config: LocalModelConfig,
}

impl LocalEmbedder {
    pub fn new(config: LocalModelConfig) -> Result<Self> {
        ort::init().with_name("retrieval-core-local-embedder").commit();

        let model_bytes = std::fs::read(&config.model_path)
            .with_context(|| format!("reading local model at {}", config.model_path.display()))?;
        let model_dir = config
            .model_path
            .parent()
            .ok_or_else(|| anyhow!("local model path has no parent directory"))?;

        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(num_threads)?
            .with_inter_threads(1)?
            .with_memory_pattern(true)?
            .commit_from_memory(&model_bytes)
            .context("loading local embedding model")?;

        let tokenizer = SubwordTokenizer::from_model_dir(model_dir)?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            config,
        })
    }

    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text, Prefix::Query)
    }

    fn embed_one(&self, text: &str, prefix: Prefix) -> Result<Vec<f32>> {
        let prepared = prefix.apply(text);
        let max_len = self.config.max_length.min(MAX_SEQUENCE_LENGTH);

        let mut token_ids = self.tokenizer.encode(&prepared)?;
        token_ids.truncate(max_len);
        let (ids, mask) = self.tokenizer.pad(&token_ids, max_len);

        let shape = vec![1, max_len];
        let input_ids = Value::from_array((shape.clone(), ids))?;
        let attention_mask = Value::from_array((shape, mask.clone()))?;

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![
            "input_ids" => input_ids,
            "attention_mask" => attention_mask,
        ])?;

        let embedding = extract_pooled(&outputs, &mask)?;
        self.normalize(embedding)
    }

    fn embed_batch(&self, texts: &[&str], prefix_for: impl Fn(usize) -> Prefix) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(texts.len());

        for (batch_start, batch) in texts.chunks(MAX_INFERENCE_BATCH).enumerate() {
            let mut token_sets = Vec::with_capacity(batch.len());
            let mut max_len = 0usize;
            for (i, text) in batch.iter().enumerate() {
                let prepared = prefix_for(batch_start * MAX_INFERENCE_BATCH + i).apply(text);
                let mut ids = self.tokenizer.encode(&prepared)?;
                ids.truncate(self.config.max_length.min(MAX_SEQUENCE_LENGTH));
                max_len = max_len.max(ids.len());
                token_sets.push(ids);
            }
            let padded_len = max_len.max(1);
            let batch_size = token_sets.len();

            let mut ids_flat = Vec::with_capacity(batch_size * padded_len);
            let mut mask_flat = Vec::with_capacity(batch_size * padded_len);
            for ids in &token_sets {
                let (padded_ids, padded_mask) = self.tokenizer.pad(ids, padded_len);
                ids_flat.extend(padded_ids);
                mask_flat.extend(padded_mask);
            }

            let shape = vec![batch_size, padded_len];
            let input_ids = Value::from_array((shape.clone(), ids_flat))?;
            let attention_mask = Value::from_array((shape, mask_flat.clone()))?;

            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
            ])?;

            for sample in 0..batch_size {
                let sample_mask = &mask_flat[sample * padded_len..(sample + 1) * padded_len];
                let pooled = extract_pooled_sample(&outputs, sample, padded_len, sample_mask)?;
                results.push(self.normalize(pooled)?);
            }
        }

        Ok(results)
    }

    fn normalize(&self, mut vector: Vec<f32>) -> Result<Vec<f32>> {
        if self.config.normalize {
            let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 1e-12 {
                for x in &mut vector {
                    *x /= norm;
                }
            }
        }
        Ok(vector)
    }
}

fn extract_pooled(outputs: &ort::session::SessionOutputs, mask: &[i64]) -> Result<Vec<f32>> {
    extract_pooled_sample(outputs, 0, mask.len(), mask)
}

/// Prefers a pre-pooled `sentence_embedding` output; otherwise mean-pools
/// `last_hidden_state`/`token_embeddings` over non-padding positions.
fn extract_pooled_sample(
    outputs: &ort::session::SessionOutputs,
    sample: usize,
    seq_len_hint: usize,
    mask: &[i64],
) -> Result<Vec<f32>> {
    if let Some((_, _)) = outputs.iter().find(|(name, _)| *name == "sentence_embedding") {
        let (shape, data) = outputs["sentence_embedding"].try_extract_tensor::<f32>()?;
        let hidden_dim = shape[1] as usize;
        let offset = sample * hidden_dim;
        return Ok(data[offset..offset + hidden_dim].to_vec());
    }

    let output_name = outputs
        .iter()
        .find(|(name, _)| *name == "last_hidden_state" || *name == "token_embeddings")
        .map(|(name, _)| name.to_string())
        .ok_or_else(|| anyhow!("model produced no recognizable embedding output"))?;

    let (shape, data) = outputs[output_name.as_str()].try_extract_tensor::<f32>()?;
    let seq_len = shape[1] as usize;
    let hidden_dim = shape[2] as usize;
    let sample_offset = sample * seq_len * hidden_dim;

    let mut pooled = vec![0.0f32; hidden_dim];
    let mut mask_sum = 0.0f32;
    for pos in 0..seq_len.min(seq_len_hint.max(seq_len)) {
        let m = mask.get(pos).copied().unwrap_or(0) as f32;
        if m <= 0.0 {
            continue;
        }
        mask_sum += m;
        let offset = sample_offset + pos * hidden_dim;
        for dim in 0..hidden_dim {
            pooled[dim] += data[offset + dim] * m;
        }
    }
    if mask_sum > 0.0 {
        for v in &mut pooled {
            *v /= mask_sum;
        }
    }
    Ok(pooled)
}

impl EmbeddingProvider for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text, Prefix::Passage)
    }

    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(texts, |_| Prefix::Passage)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
