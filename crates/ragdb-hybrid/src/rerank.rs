//! Second-stage reordering of fused candidates.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ragdb_core::config::RerankerConfig;
use ragdb_core::traits::{RerankHit, RerankProvider};
use ragdb_core::types::{SearchResult, SourceKind};
use ragdb_core::{CallContext, Degradation, Error, Outcome, Result};

/// Client for a DashScope-style rerank endpoint.
pub struct HttpRerankProvider {
    id: String,
    model: String,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct RerankResponse {
    #[serde(default)]
    output: Option<RerankOutput>,
    #[serde(default)]
    results: Option<Vec<RerankRow>>,
}

#[derive(Deserialize)]
struct RerankOutput {
    results: Vec<RerankRow>,
}

#[derive(Deserialize)]
struct RerankRow {
    index: usize,
    relevance_score: f32,
}

impl HttpRerankProvider {
    /// Key resolution: `reranker.api_key` > `DASHSCOPE_API_KEY` > empty.
    pub fn from_config(config: &RerankerConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(Error::InvalidConfig("reranker.url is empty".into()));
        }
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("DASHSCOPE_API_KEY").ok())
            .unwrap_or_default();
        let mut builder = reqwest::Client::builder();
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        let client = builder.build().map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self {
            id: format!("http:{}", config.model),
            model: config.model.clone(),
            url: config.url.clone(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl RerankProvider for HttpRerankProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn rerank(&self, query: &str, documents: &[String], top_n: usize) -> anyhow::Result<Vec<RerankHit>> {
        let body = json!({
            "model": self.model,
            "query": query,
            "documents": documents,
            "top_n": top_n,
        });
        let mut req = self.client.post(&self.url).json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        let resp = req.send().await.context("rerank request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("rerank endpoint returned {status}: {text}");
        }
        let parsed: RerankResponse = resp.json().await.context("malformed rerank response")?;
        let rows = match (parsed.output, parsed.results) {
            (Some(output), _) => output.results,
            (None, Some(results)) => results,
            (None, None) => bail!("rerank response carries no results"),
        };
        Ok(rows.into_iter().map(|r| RerankHit { index: r.index, score: r.relevance_score }).collect())
    }
}

/// Either truncation only, or a remote relevance model.
#[derive(Clone)]
pub enum Reranker {
    NoOp,
    Remote { provider: Arc<dyn RerankProvider>, timeout: Option<Duration> },
}

impl Reranker {
    pub fn from_config(config: &RerankerConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(Reranker::NoOp);
        }
        let provider = HttpRerankProvider::from_config(config)?;
        let timeout = (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs));
        Ok(Reranker::Remote { provider: Arc::new(provider), timeout })
    }

    pub fn remote(provider: Arc<dyn RerankProvider>) -> Self {
        Reranker::Remote { provider, timeout: None }
    }

    pub fn name(&self) -> &str {
        match self {
            Reranker::NoOp => "noop",
            Reranker::Remote { provider, .. } => provider.id(),
        }
    }

    /// Reorders `results` by provider relevance and keeps `top_n`.
    ///
    /// Scores are overwritten with the provider's relevance. Results with
    /// empty content are not sent and cannot be returned. Out-of-range or
    /// repeated indices are skipped. Any provider failure returns the first
    /// `top_n` inputs unchanged.
    pub async fn rerank(
        &self,
        ctx: &CallContext,
        query: &str,
        mut results: Vec<SearchResult>,
        top_n: usize,
    ) -> Outcome<Vec<SearchResult>> {
        let Reranker::Remote { provider, timeout } = self else {
            results.truncate(top_n);
            return Outcome::ok(results);
        };
        if results.is_empty() || top_n == 0 {
            results.truncate(top_n);
            return Outcome::ok(results);
        }

        let positions: Vec<usize> = results.iter().enumerate().filter(|(_, r)| !r.content.is_empty()).map(|(i, _)| i).collect();
        if positions.is_empty() {
            results.truncate(top_n);
            return Outcome::ok(results);
        }
        let documents: Vec<String> = positions.iter().map(|&i| results[i].content.clone()).collect();
        let ask = top_n.min(documents.len());

        let failure = match ctx.bounded(*timeout).guard(provider.rerank(query, &documents, ask)).await {
            Ok(Ok(hits)) => {
                let mut seen = HashSet::new();
                let mut reranked = Vec::with_capacity(ask);
                for hit in hits {
                    let Some(&at) = positions.get(hit.index) else {
                        tracing::warn!(reranker = provider.id(), index = hit.index, "rerank index out of range");
                        continue;
                    };
                    if !seen.insert(at) {
                        continue;
                    }
                    reranked.push(SearchResult { score: hit.score, source: SourceKind::Reranked, ..results[at].clone() });
                }
                reranked.truncate(top_n);
                tracing::debug!(reranker = provider.id(), candidates = documents.len(), kept = reranked.len(), "reranked");
                return Outcome::ok(reranked);
            }
            Ok(Err(e)) => {
                tracing::warn!(reranker = provider.id(), error = %e, "rerank failed, keeping retrieval order");
                Degradation::Provider(format!("rerank failed: {e}"))
            }
            Err(why) => {
                tracing::warn!(reranker = provider.id(), %why, "rerank interrupted, keeping retrieval order");
                Degradation::Interrupted(why)
            }
        };
        results.truncate(top_n);
        Outcome::degraded(results, failure)
    }
}
