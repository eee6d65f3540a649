//! Engine configuration.
//!
//! Figment merges built-in defaults, `config.toml`, `config.<env>.toml` and
//! `RAGDB_*` env vars (nested keys split on `__`). The merged tree is resolved
//! once: `${VAR}` and `${VAR:-default}` placeholders in string values are
//! expanded, the result is extracted into an immutable [`RagConfig`] and
//! validated before anything is constructed from it.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    Simple,
    ParentChild,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingConfig {
    pub strategy: ChunkStrategy,
    pub parent_size: usize,
    pub parent_overlap: usize,
    pub child_size: usize,
    pub child_overlap: usize,
    pub separators: Vec<String>,
}

pub fn default_separators() -> Vec<String> {
    ["\n\n", "\n", "。", "！", "？", ".", "!", "?", " ", ""].iter().map(|s| s.to_string()).collect()
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::ParentChild,
            parent_size: 1000,
            parent_overlap: 200,
            child_size: 300,
            child_overlap: 100,
            separators: default_separators(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    /// Deterministic token-hash vectors, no network.
    Hash,
    Openai,
    Qwen,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub dimension: usize,
    pub batch_size: usize,
    pub max_input_chars: usize,
    pub concurrency: usize,
    pub cache_capacity: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Hash,
            model: "text-embedding-v3".into(),
            api_key: None,
            base_url: None,
            dimension: 1024,
            batch_size: 32,
            max_input_chars: 8192,
            concurrency: 4,
            cache_capacity: 10_000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    Rrf,
    Vector,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub hybrid: bool,
    pub vector_top_k: usize,
    pub bm25_top_k: usize,
    pub fusion: FusionMethod,
    pub rrf_k: f32,
    pub k1: f32,
    pub b: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { hybrid: true, vector_top_k: 50, bm25_top_k: 50, fusion: FusionMethod::Rrf, rrf_k: 60.0, k1: 1.5, b: 0.75 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub model: String,
    pub api_key: Option<String>,
    pub url: String,
    pub top_n: usize,
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "rerank-v2".into(),
            api_key: None,
            url: "https://dashscope.aliyuncs.com/api/v1/services/rerank/rerank/v1".into(),
            top_n: 5,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackendKind {
    Memory,
    Lancedb,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cosine,
    /// Inner product.
    Ip,
    L2,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VectorDbConfig {
    pub backend: VectorBackendKind,
    pub collection: String,
    pub metric: Metric,
    /// Storage location for persistent backends.
    pub uri: String,
    pub timeout_secs: u64,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackendKind::Memory,
            collection: "knowledge_base".into(),
            metric: Metric::Cosine,
            uri: "./data/lancedb".into(),
            timeout_secs: 30,
        }
    }
}

pub const DEFAULT_CONTEXT_TEMPLATE: &str =
    "Answer the question using the context below.\n\nContext:\n{context}\n\nQuestion: {question}";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Candidate multiplier applied to `top_k` before reranking.
    pub rerank_overfetch: usize,
    pub default_top_k: usize,
    pub operation_timeout_secs: u64,
    pub context_template: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rerank_overfetch: 4,
            default_top_k: 5,
            operation_timeout_secs: 60,
            context_template: DEFAULT_CONTEXT_TEMPLATE.into(),
        }
    }
}

impl PipelineConfig {
    pub fn operation_timeout(&self) -> Option<Duration> {
        (self.operation_timeout_secs > 0).then(|| Duration::from_secs(self.operation_timeout_secs))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub reranker: RerankerConfig,
    pub vector_db: VectorDbConfig,
    pub pipeline: PipelineConfig,
}

impl RagConfig {
    /// Loads from the current directory. See [`RagConfig::load_from`].
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Merges defaults, `<dir>/config.toml`, `<dir>/config.<env>.toml` and
    /// `RAGDB_*` env vars. Missing files are skipped.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(RagConfig::default())).merge(Toml::file(dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("RAGDB_").split("__"));

        Self::resolve(figment)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::resolve(Figment::from(Serialized::defaults(RagConfig::default())).merge(Toml::string(toml)))
    }

    fn resolve(figment: Figment) -> Result<Self> {
        let mut tree: serde_json::Value =
            figment.extract().map_err(|e| Error::InvalidConfig(format!("failed to read configuration: {e}")))?;
        expand_placeholders(&mut tree);
        let config: RagConfig =
            serde_json::from_value(tree).map_err(|e| Error::InvalidConfig(format!("failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings no component can run with.
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.child_size == 0 || c.parent_size == 0 {
            return Err(Error::InvalidConfig("chunk sizes must be positive".into()));
        }
        if c.child_overlap >= c.child_size {
            return Err(Error::InvalidConfig(format!(
                "child_overlap ({}) must be smaller than child_size ({})",
                c.child_overlap, c.child_size
            )));
        }
        if c.strategy == ChunkStrategy::ParentChild && c.parent_overlap >= c.parent_size {
            return Err(Error::InvalidConfig(format!(
                "parent_overlap ({}) must be smaller than parent_size ({})",
                c.parent_overlap, c.parent_size
            )));
        }

        let e = &self.embedding;
        if e.dimension == 0 {
            return Err(Error::InvalidConfig("embedding dimension must be positive".into()));
        }
        if e.batch_size == 0 || e.concurrency == 0 {
            return Err(Error::InvalidConfig("embedding batch_size and concurrency must be positive".into()));
        }
        if e.max_input_chars == 0 {
            return Err(Error::InvalidConfig("embedding max_input_chars must be positive".into()));
        }

        let r = &self.retrieval;
        if r.rrf_k.is_nan() || r.rrf_k <= 0.0 {
            return Err(Error::InvalidConfig("rrf_k must be positive".into()));
        }
        if r.k1.is_nan() || r.k1 < 0.0 || !(0.0..=1.0).contains(&r.b) {
            return Err(Error::InvalidConfig("bm25 requires k1 >= 0 and 0 <= b <= 1".into()));
        }

        if self.vector_db.collection.trim().is_empty() {
            return Err(Error::InvalidConfig("vector_db.collection must not be empty".into()));
        }
        if self.pipeline.rerank_overfetch == 0 {
            return Err(Error::InvalidConfig("pipeline.rerank_overfetch must be positive".into()));
        }
        Ok(())
    }
}

fn expand_placeholders(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) if s.contains('$') => {
            let expanded = shellexpand::env_with_context_no_errors(s.as_str(), |name| env::var(name).ok());
            *s = expanded.into_owned();
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(expand_placeholders),
        serde_json::Value::Object(map) => map.values_mut().for_each(expand_placeholders),
        _ => {}
    }
}

/// Expand a user-provided path string:
/// - Expands ${VAR} and $VAR environment variables
/// - Expands leading '~' to the user's home directory
/// - Does not canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against `base` after expansion.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() {
        p
    } else {
        base.join(p)
    }
}
