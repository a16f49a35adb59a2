//! Hosted embedding API provider, used as the fallback when the local
//! model is unavailable (or as primary, per configuration).

use super::EmbeddingProvider;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [&'a str],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    index: usize,
}

pub struct RemoteEmbedder {
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
    client: reqwest::blocking::Client,
}

impl RemoteEmbedder {
    pub fn new(endpoint: String, api_key: String, model: String, dimension: usize) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("building remote embedding HTTP client")?;
        Ok(Self {
            endpoint,
            api_key,
            model,
            dimension,
            client,
        })
    }

    fn call(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            input: texts,
            model: &self.model,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .with_context(|| format!("calling remote embedding endpoint {}", self.endpoint))?;

        let status = response.status();
        let raw = response
            .text()
            .with_context(|| format!("reading response body from {}", self.endpoint))?;

        let trimmed = raw.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(anyhow!(
                "remote embedding endpoint returned HTML instead of JSON (HTTP {status}): {preview}"
            ));
        }
        if !status.is_success() {
            let preview: String = raw.chars().take(300).collect();
            return Err(anyhow!("remote embedding endpoint returned HTTP {status}: {preview}"));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&raw).with_context(|| {
            let preview: String = raw.chars().take(300).collect();
            format!("parsing remote embedding response: {preview}")
        })?;

        let mut ordered = vec![Vec::new(); texts.len()];
        for item in parsed.data {
            if item.index < ordered.len() {
                ordered[item.index] = item.embedding;
            }
        }
        Ok(ordered)
    }
}

impl EmbeddingProvider for RemoteEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.call(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("remote embedding endpoint returned no results"))
    }

    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.call(texts)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
