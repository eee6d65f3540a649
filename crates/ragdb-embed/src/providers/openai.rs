use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use ragdb_core::config::{EmbeddingConfig, EmbeddingProviderKind};
use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::{Error, Result};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DASHSCOPE_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

/// Client for any OpenAI-compatible `/embeddings` endpoint.
///
/// `qwen` differs from `openai` only by its default base URL and key variable.
pub struct OpenAiEmbedder {
    id: String,
    model: String,
    api_key: String,
    base_url: String,
    dim: usize,
    max_len: usize,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Resolution order for the key: `embedding.api_key` > provider env var > empty.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let (name, default_url, key_var) = match config.provider {
            EmbeddingProviderKind::Qwen => ("qwen", DASHSCOPE_BASE_URL, "DASHSCOPE_API_KEY"),
            EmbeddingProviderKind::Openai => ("openai", OPENAI_BASE_URL, "OPENAI_API_KEY"),
            EmbeddingProviderKind::Hash => {
                return Err(Error::InvalidConfig("hash provider is not an HTTP embedder".into()));
            }
        };
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(key_var).ok())
            .unwrap_or_default();
        let base_url = config
            .base_url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| default_url.to_string())
            .trim_end_matches('/')
            .to_string();
        let mut builder = reqwest::Client::builder();
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        let client = builder.build().map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self {
            id: format!("{name}:{}:d{}", config.model, config.dimension),
            model: config.model.clone(),
            api_key,
            base_url,
            dim: config.dimension,
            max_len: config.max_input_chars,
            client,
        })
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_key)
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn max_len(&self) -> usize {
        self.max_len
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": texts,
            "dimensions": self.dim,
            "encoding_format": "float",
        });
        let resp = self
            .apply_auth(self.client.post(&url).json(&body))
            .send()
            .await
            .with_context(|| format!("{} connection failed ({url})", self.id))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned {status}: {text}", self.id));
        }
        let mut parsed: EmbeddingsResponse = resp.json().await.context("malformed embeddings response")?;
        if parsed.data.iter().all(|row| row.index.is_some()) {
            parsed.data.sort_by_key(|row| row.index);
        }
        Ok(parsed.data.into_iter().map(|row| row.embedding).collect())
    }
}
