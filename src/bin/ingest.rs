use anyhow::Result;
use clap::Parser;
use ragindex::{Config, IndexBuilder};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Build or update the ragindex vector index (incremental by default)")]
struct Args {
    /// Re-ingest every source, ignoring the manifest
    #[arg(short, long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();

    let config = Config::load()?;
    log::info!("Configuration loaded successfully");
    log::info!("Manifest: {}", config.manifest_path().display());
    log::info!("Index: {}", config.index_path().display());
    log::info!("Cache mode: {:?}", config.cache.mode);

    let builder = IndexBuilder::from_config(&config)?;

    let start = Instant::now();
    let build = builder.build(args.force);
    let (index, report) = match config.index.build_timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), build)
            .await
            .map_err(|_| anyhow::anyhow!("Index build exceeded {}s", secs))??,
        None => build.await?,
    };
    let duration = start.elapsed();

    println!("\nIngestion summary");
    println!("  {}", report);
    for (key, reason) in &report.failed {
        println!("  failed: {} ({})", key, reason);
    }
    match index {
        Some(index) => println!(
            "  index: {} vectors, dimension {}",
            index.ntotal(),
            index.dimension().unwrap_or(0)
        ),
        None => println!("  index: none (nothing to index)"),
    }
    println!("  time: {:?}", duration);

    Ok(())
}
