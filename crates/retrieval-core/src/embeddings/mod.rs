//! Embedder (C1): maps text to a fixed-dimension vector, with a
//! primary/fallback provider policy.

pub mod local;
pub mod remote;
pub mod tokenizer;

use crate::error::{CoreError, CoreResult};
use tracing::warn;

/// A single embedding backend. Implementations never apply provider
/// fallback themselves — that's `Embedder`'s job.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Default sequential batching; providers that can amortize model
    /// overhead across a batch (e.g. a local ONNX session) should override.
    fn embed_many(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// Wires a primary and fallback `EmbeddingProvider` together. `embed`/
/// `embed_many` try the primary first; on any error they try the fallback;
/// `EmbeddingUnavailable` is raised only when both fail (§4.1).
pub struct Embedder {
    primary: Box<dyn EmbeddingProvider>,
    fallback: Box<dyn EmbeddingProvider>,
}

impl Embedder {
    pub fn new(primary: Box<dyn EmbeddingProvider>, fallback: Box<dyn EmbeddingProvider>) -> Self {
        Self { primary, fallback }
    }

    pub fn dimension(&self) -> usize {
        self.primary.dimension()
    }

    pub fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
        match self.primary.embed(text) {
            Ok(v) => Ok(v),
            Err(primary_err) => {
                warn!(
                    provider = self.primary.name(),
                    error = %primary_err,
                    "primary embedding provider failed, trying fallback"
                );
                self.fallback.embed(text).map_err(|fallback_err| {
                    CoreError::EmbeddingUnavailable {
                        reason: format!(
                            "primary({}): {primary_err}; fallback({}): {fallback_err}",
                            self.primary.name(),
                            self.fallback.name()
                        ),
                    }
                })
            }
        }
    }

    /// Batch embedding. Preserves input order; a partial failure fails the
    /// whole batch (the caller decides whether to retry).
    pub fn embed_many(&self, texts: &[&str]) -> CoreResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self.primary.embed_many(texts) {
            Ok(v) => Ok(v),
            Err(primary_err) => {
                warn!(
                    provider = self.primary.name(),
                    error = %primary_err,
                    "primary batch embedding failed, trying fallback"
                );
                self.fallback.embed_many(texts).map_err(|fallback_err| {
                    CoreError::EmbeddingUnavailable {
                        reason: format!(
                            "primary({}): {primary_err}; fallback({}): {fallback_err}",
                            self.primary.name(),
                            self.fallback.name()
                        ),
                    }
                })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::EmbeddingProvider;

    /// Deterministic hash-based fake used throughout the test suite so
    /// retrieval logic can be exercised without a real model or network.
    pub struct FakeEmbedder {
        pub dimension: usize,
        pub fail: bool,
    }

    impl EmbeddingProvider for FakeEmbedder {
        fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            if self.fail {
                anyhow::bail!("fake embedder configured to fail");
            }
            Ok(hash_embed(text, self.dimension))
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    /// Hashes overlapping trigrams into a bag-of-features vector so that
    /// textually similar inputs land closer together in Euclidean space
    /// than unrelated ones — enough structure for retrieval tests without
    /// needing a real model.
    pub fn hash_embed(text: &str, dimension: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dimension];
        let lower = text.to_lowercase();
        let bytes: Vec<u8> = lower.bytes().collect();
        if bytes.is_empty() {
            return v;
        }
        let window = 3usize.min(bytes.len());
        for i in 0..=(bytes.len() - window) {
            let gram = &bytes[i..i + window];
            let mut h: u64 = 1469598103934665603;
            for &b in gram {
                h ^= b as u64;
                h = h.wrapping_mul(1099511628211);
            }
            let idx = (h as usize) % dimension;
            v[idx] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 1e-9 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }

    #[test]
    fn identical_text_yields_identical_vector() {
        let a = hash_embed("hello world", 64);
        let b = hash_embed("hello world", 64);
        assert_eq!(a, b);
    }
}
