//! `ragdb` - ingest documents and search them from the command line.
//!
//! ```bash
//! ragdb ingest ./notes --kb notes
//! ragdb search "solar panels" --ingest ./notes -n 5
//! ragdb query "how do I reset the router?" --ingest ./manuals
//! ragdb stats --json
//! ```
//!
//! With the default in-memory vector backend nothing outlives the process,
//! so `search`, `query` and `stats` accept `--ingest <dir>` to load a corpus
//! first. Persistent backends rebuild the lexical index from storage instead.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use ragdb_core::config::{RagConfig, VectorBackendKind};
use ragdb_core::loader::list_supported_files;
use ragdb_core::types::{Meta, SearchResult};
use ragdb_core::CallContext;
use ragdb_hybrid::{IngestReport, RagPipeline, SearchRequest};

#[derive(Parser)]
#[command(name = "ragdb", version, about = "Hybrid (vector + BM25) retrieval over local documents")]
struct Cli {
    /// Directory holding config.toml / config.<env>.toml
    #[arg(long, env = "RAGDB_CONFIG_DIR", default_value = ".")]
    config_dir: PathBuf,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every supported file under a directory
    Ingest {
        dir: PathBuf,
        #[arg(long, default_value = "default")]
        kb: String,
        #[arg(long)]
        json: bool,
    },
    /// Hybrid search
    Search {
        query: String,
        #[arg(short = 'n', long)]
        top_k: Option<usize>,
        /// Restrict to these knowledge bases (repeatable)
        #[arg(long = "kb")]
        kbs: Vec<String>,
        #[arg(long)]
        rerank: bool,
        /// Ingest this directory before searching
        #[arg(long)]
        ingest: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Retrieve context and print the rendered prompt
    Query {
        question: String,
        #[arg(short = 'n', long)]
        top_k: Option<usize>,
        #[arg(long)]
        ingest: Option<PathBuf>,
    },
    /// Collection and index statistics
    Stats {
        #[arg(long)]
        ingest: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Rebuild the lexical index from the vector store
    Reindex,
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

async fn ingest_dir(pipeline: &RagPipeline, ctx: &CallContext, dir: &Path, kb: &str) -> Result<Vec<IngestReport>> {
    anyhow::ensure!(dir.is_dir(), "not a directory: {}", dir.display());
    let files = list_supported_files(dir, pipeline.loader().as_ref());
    let bar = ProgressBar::new(files.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    let mut reports = Vec::with_capacity(files.len());
    for path in &files {
        bar.set_message(path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default());
        reports.push(pipeline.ingest_file(ctx, path, kb, Meta::new()).await);
        bar.inc(1);
    }
    bar.finish_and_clear();
    Ok(reports)
}

fn print_reports(reports: &[IngestReport]) {
    let ok = reports.iter().filter(|r| r.is_success()).count();
    let chunks: usize = reports.iter().map(|r| r.chunks_inserted).sum();
    for r in reports.iter().filter(|r| !r.is_success()) {
        eprintln!("  failed: {} ({})", r.source.as_deref().unwrap_or(&r.doc_id), r.error.as_deref().unwrap_or("unknown error"));
    }
    println!("Ingested {ok}/{} files, {chunks} chunks", reports.len());
}

fn print_results(query: &str, results: &[SearchResult]) {
    println!("Found {} results for \"{query}\"", results.len());
    for (i, r) in results.iter().enumerate() {
        let filename = r.metadata.as_ref().and_then(|m| m.get("filename")).and_then(|v| v.as_str()).unwrap_or("-");
        println!("\n  {}. score={:.4}  id={}  kb={}  file={}", i + 1, r.score, r.chunk_id, r.kb_id().unwrap_or("-"), filename);
        let snippet: String = r.content.chars().take(200).collect();
        println!("     {}", snippet.replace('\n', " "));
    }
}

async fn prepare(pipeline: &RagPipeline, ctx: &CallContext, ingest: Option<&Path>) -> Result<()> {
    if let Some(dir) = ingest {
        let reports = ingest_dir(pipeline, ctx, dir, "default").await?;
        print_reports(&reports);
    } else if pipeline.config().vector_db.backend != VectorBackendKind::Memory {
        let rebuilt = pipeline.reindex_from_store(ctx).await;
        tracing::info!(chunks = rebuilt.value, degraded = rebuilt.is_degraded(), "lexical index loaded from store");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = RagConfig::load_from(&cli.config_dir).context("loading configuration")?;
    let pipeline = RagPipeline::from_config(config).await.context("building pipeline")?;
    let ctx = CallContext::background();

    match cli.command {
        Command::Ingest { dir, kb, json } => {
            if pipeline.config().vector_db.backend == VectorBackendKind::Memory {
                tracing::warn!("memory backend: ingested data is discarded on exit");
            }
            let reports = ingest_dir(&pipeline, &ctx, &dir, &kb).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                print_reports(&reports);
            }
        }
        Command::Search { query, top_k, kbs, rerank, ingest, json } => {
            prepare(&pipeline, &ctx, ingest.as_deref()).await?;
            let mut request = SearchRequest::new(query.clone()).rerank(rerank);
            request.top_k = top_k;
            if !kbs.is_empty() {
                request = request.kb_ids(kbs);
            }
            let out = pipeline.search(&ctx, request).await;
            for issue in &out.issues {
                tracing::warn!(%issue, "search degraded");
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&out.value)?);
            } else {
                print_results(&query, &out.value);
            }
        }
        Command::Query { question, top_k, ingest } => {
            prepare(&pipeline, &ctx, ingest.as_deref()).await?;
            let answer = pipeline.query(&ctx, &question, top_k, None).await;
            println!("{}", answer.formatted_prompt);
        }
        Command::Stats { ingest, json } => {
            prepare(&pipeline, &ctx, ingest.as_deref()).await?;
            let stats = pipeline.get_stats(&ctx).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Collection: {} ({})", stats.collection, stats.backend);
                println!("Vectors: {}  Lexical chunks: {}", stats.vector_count, stats.lexical_chunks);
                println!("Embedder: {} (dim {})  Strategy: {:?}  Reranker: {}", stats.embedder, stats.dimension, stats.chunk_strategy, stats.reranker);
                for kb in &stats.knowledge_bases {
                    println!("  kb {} [{:?}] docs={} chunks={}", kb.kb_id, kb.status, kb.doc_count, kb.chunk_count);
                }
            }
        }
        Command::Reindex => {
            let rebuilt = pipeline.reindex_from_store(&ctx).await;
            anyhow::ensure!(!rebuilt.is_degraded(), "reindex failed: {:?}", rebuilt.issues);
            println!("Rebuilt lexical index over {} chunks", rebuilt.value);
        }
    }
    Ok(())
}
