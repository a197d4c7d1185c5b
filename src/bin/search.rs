use anyhow::{Context, Result};
use clap::Parser;
use ragindex::embeddings::create_embedder;
use ragindex::rerank::create_reranker;
use ragindex::{Config, Retriever, VectorStore};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "search")]
#[command(about = "Query the persisted ragindex index and print merged passages")]
struct Args {
    /// Query text
    query: String,

    /// Number of nearest chunks to consider (defaults to retrieval.top_k)
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Rerank candidates with the configured reranker
    #[arg(short, long)]
    rerank: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    if args.query.trim().is_empty() {
        anyhow::bail!("Query cannot be empty");
    }

    let config = Config::load()?;
    let store = VectorStore::load(config.index_path())
        .with_context(|| "No usable index; run `ingest` first")?;
    let embedder = create_embedder(&config.embeddings)?;

    let reranker = if args.rerank {
        let reranker = create_reranker(&config.rerank)?;
        if reranker.is_none() {
            log::warn!("--rerank given but rerank.provider is \"none\"; using score threshold");
        }
        reranker
    } else {
        None
    };

    let retriever = Retriever::new(Arc::new(store), embedder, &config.retrieval)
        .with_query_cache(config.embeddings.query_cache_capacity);
    let top_k = args.top_k.unwrap_or(config.retrieval.top_k);

    let start = Instant::now();
    let passages = retriever
        .retrieve_passages(&args.query, top_k, reranker.as_deref())
        .await?;
    let duration = start.elapsed();

    println!("\nQuery: \"{}\"\n", args.query);
    if passages.is_empty() {
        println!("No relevant content found.");
    }
    for (i, passage) in passages.iter().enumerate() {
        println!("─────────────────────────────────────────────────────────────────────────────");
        println!(
            "#{} {} (chunks {}..={})",
            i + 1,
            passage.source,
            passage.start,
            passage.end
        );
        println!("{}\n", passage.text);
    }
    println!("Passages: {}", passages.len());
    println!("Latency: {:?}", duration);

    Ok(())
}
