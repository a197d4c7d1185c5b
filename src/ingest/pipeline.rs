//! Bounded-concurrency ingestion: fetch → extract → chunk → embed per source.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::chunker::Chunker;
use super::extract::Extractor;
use crate::cache::{CacheManager, SourceHandle};
use crate::embeddings::Embedder;
use crate::error::{RagindexError, Result};
use crate::manifest::{ManifestEntry, ManifestStore};
use crate::search::Chunk;
use crate::source::SourceKey;

/// Aggregated result of one pipeline run
#[derive(Debug, Default)]
pub struct IngestOutput {
    /// Chunks of every successful source; `vectors[i]` belongs to `chunks[i]`
    pub chunks: Vec<Chunk>,
    pub vectors: Vec<Vec<f32>>,
    /// Sources that produced at least one chunk
    pub indexed: Vec<SourceKey>,
    /// Sources that completed with nothing to index
    pub empty: Vec<SourceKey>,
    /// Sources that failed, with the reason; no new manifest entry was written
    pub failed: Vec<(SourceKey, String)>,
}

/// What one completed job contributes
struct SourceOutcome {
    key: SourceKey,
    entry: ManifestEntry,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

/// Shared per-run state handed to every job
struct Job {
    cache: Arc<CacheManager>,
    extractor: Arc<dyn Extractor>,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn Embedder>,
}

/// Worker pool over source keys
pub struct IngestionPipeline {
    cache: Arc<CacheManager>,
    manifest: Arc<ManifestStore>,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn Embedder>,
    max_workers: usize,
    job_timeout: Option<Duration>,
}

impl IngestionPipeline {
    pub fn new(
        cache: Arc<CacheManager>,
        manifest: Arc<ManifestStore>,
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn Embedder>,
        max_workers: usize,
    ) -> Self {
        Self {
            cache,
            manifest,
            chunker,
            embedder,
            max_workers: max_workers.max(1),
            job_timeout: None,
        }
    }

    /// Fail any single source that takes longer than `timeout`
    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Ingest `keys` with at most `max_workers` sources in flight.
    ///
    /// A source's failure is logged and contributes nothing; it never aborts
    /// the run. Manifest entries are written here, one finished job at a
    /// time, so an entry exists only for a source whose work fully completed.
    /// A source whose entry cannot be written is reported as failed and its
    /// chunks are dropped. Dropping the returned future aborts all in-flight
    /// jobs.
    pub async fn run(
        &self,
        keys: &[SourceKey],
        extractor: Arc<dyn Extractor>,
    ) -> Result<IngestOutput> {
        self.run_prefetched(keys, extractor, HashMap::new()).await
    }

    /// [`IngestionPipeline::run`], reusing handles already resolved for some
    /// of `keys` instead of fetching them again
    pub async fn run_prefetched(
        &self,
        keys: &[SourceKey],
        extractor: Arc<dyn Extractor>,
        mut prefetched: HashMap<SourceKey, SourceHandle>,
    ) -> Result<IngestOutput> {
        let mut output = IngestOutput::default();
        if keys.is_empty() {
            return Ok(output);
        }

        let start = Instant::now();
        log::info!(
            "Ingesting {} sources with {} workers",
            keys.len(),
            self.max_workers
        );

        let job = Arc::new(Job {
            cache: Arc::clone(&self.cache),
            extractor,
            chunker: Arc::clone(&self.chunker),
            embedder: Arc::clone(&self.embedder),
        });
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();

        for key in keys {
            let key = key.clone();
            let job = Arc::clone(&job);
            let semaphore = Arc::clone(&semaphore);
            let job_timeout = self.job_timeout;
            let handle = prefetched.remove(&key);

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => match job_timeout {
                        Some(limit) => {
                            tokio::time::timeout(limit, ingest_source(&job, &key, handle))
                                .await
                                .unwrap_or_else(|_| {
                                    Err(RagindexError::Timeout(format!(
                                        "{} exceeded {:?}",
                                        key, limit
                                    )))
                                })
                        }
                        None => ingest_source(&job, &key, handle).await,
                    },
                    Err(e) => Err(RagindexError::InvalidInput(format!(
                        "worker pool closed: {}",
                        e
                    ))),
                };
                (key, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (key, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!("Ingestion task panicked: {}", e);
                    output.failed.push(("<unknown>".to_string(), e.to_string()));
                    continue;
                }
            };

            match result {
                Ok(outcome) => self.commit(outcome, &mut output).await,
                Err(e) => {
                    log::warn!("Failed to ingest {}: {}", key, e);
                    output.failed.push((key, e.to_string()));
                }
            }
        }

        log::info!(
            "Ingestion finished in {:?}: {} indexed, {} empty, {} failed, {} chunks",
            start.elapsed(),
            output.indexed.len(),
            output.empty.len(),
            output.failed.len(),
            output.chunks.len()
        );
        Ok(output)
    }

    async fn commit(&self, outcome: SourceOutcome, output: &mut IngestOutput) {
        let manifest = Arc::clone(&self.manifest);
        let key = outcome.key.clone();
        let entry = outcome.entry;
        let written = tokio::task::spawn_blocking(move || manifest.upsert(&key, entry))
            .await
            .map_err(RagindexError::from)
            .and_then(|r| r);
        if let Err(e) = written {
            log::error!("Failed to record {} in the manifest: {}", outcome.key, e);
            output
                .failed
                .push((outcome.key, format!("manifest update failed: {}", e)));
            return;
        }

        if outcome.chunks.is_empty() {
            log::info!("Nothing to index in {}", outcome.key);
            output.empty.push(outcome.key);
        } else {
            log::debug!("Indexed {} ({} chunks)", outcome.key, outcome.chunks.len());
            output.chunks.extend(outcome.chunks);
            output.vectors.extend(outcome.vectors);
            output.indexed.push(outcome.key);
        }
    }
}

async fn ingest_source(
    job: &Job,
    key: &str,
    prefetched: Option<SourceHandle>,
) -> Result<SourceOutcome> {
    let handle = match prefetched {
        Some(handle) => handle,
        None => job.cache.resolve(key).await?,
    };
    let origin = job.cache.corpus().origin();

    let content = handle.content().clone();
    let extractor = Arc::clone(&job.extractor);
    let chunker = Arc::clone(&job.chunker);
    let owned_key = key.to_string();
    let (content_hash, byte_size, texts) = tokio::task::spawn_blocking(move || {
        let hash = content.hash()?;
        let size = content.byte_size()?;
        let text = extractor.extract(&owned_key, &content)?;
        let texts = if text.trim().is_empty() {
            Vec::new()
        } else {
            chunker.chunk(&text)
        };
        Ok::<_, RagindexError>((hash, size, texts))
    })
    .await??;

    if texts.is_empty() {
        return Ok(SourceOutcome {
            key: key.to_string(),
            entry: ManifestEntry::new(content_hash, 0, 0, byte_size, origin),
            chunks: Vec::new(),
            vectors: Vec::new(),
        });
    }

    let vectors = job.embedder.embed(&texts).await?;
    if vectors.len() != texts.len() {
        return Err(RagindexError::Embedding(format!(
            "{} embeddings for {} chunks of {}",
            vectors.len(),
            texts.len(),
            key
        )));
    }

    let chunks: Vec<Chunk> = texts
        .into_iter()
        .enumerate()
        .map(|(position, text)| Chunk::new(key, position, text).with_content_hash(&content_hash))
        .collect();
    let entry = ManifestEntry::new(content_hash, chunks.len(), vectors.len(), byte_size, origin);

    // Ephemeral cache file goes away with the handle
    drop(handle);

    Ok(SourceOutcome {
        key: key.to_string(),
        entry,
        chunks,
        vectors,
    })
}
