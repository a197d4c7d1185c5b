//! Index build orchestration.
//!
//! A build lists the corpus, prunes the manifest, detects changes, ingests
//! what changed and rebuilds the vector store wholesale from the carried-over
//! rows of unchanged sources plus the freshly embedded rows.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::chunker::WindowChunker;
use super::extract::{Extractor, ExtractorRegistry};
use super::incremental::{detect_changes, ChangeSet};
use super::pipeline::IngestionPipeline;
use crate::cache::CacheManager;
use crate::config::Config;
use crate::embeddings::create_embedder;
use crate::error::{RagindexError, Result};
use crate::manifest::ManifestStore;
use crate::search::{Chunk, VectorStore};
use crate::source::{create_corpus, SourceKey};

/// Counts describing one build
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub sources: usize,
    pub stale: usize,
    pub selected: usize,
    pub indexed: usize,
    pub empty: usize,
    pub failed: Vec<(SourceKey, String)>,
    pub carried_chunks: usize,
    pub new_chunks: usize,
    pub total_chunks: usize,
    /// False when the persisted index was reused as-is
    pub rebuilt: bool,
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sources ({} stale removed), {} selected: {} indexed, {} empty, {} failed; {} chunks ({} carried, {} new){}",
            self.sources,
            self.stale,
            self.selected,
            self.indexed,
            self.empty,
            self.failed.len(),
            self.total_chunks,
            self.carried_chunks,
            self.new_chunks,
            if self.rebuilt { "" } else { "; index unchanged" }
        )
    }
}

/// Builds and persists the index for one corpus
pub struct IndexBuilder {
    cache: Arc<CacheManager>,
    manifest: Arc<ManifestStore>,
    pipeline: IngestionPipeline,
    extractor: Arc<dyn Extractor>,
    index_path: PathBuf,
}

impl IndexBuilder {
    pub fn new(
        cache: Arc<CacheManager>,
        manifest: Arc<ManifestStore>,
        pipeline: IngestionPipeline,
        extractor: Arc<dyn Extractor>,
        index_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cache,
            manifest,
            pipeline,
            extractor,
            index_path: index_path.into(),
        }
    }

    /// Wire the built-in collaborators selected by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let corpus = create_corpus(&config.source)?;
        let cache = Arc::new(CacheManager::new(
            corpus,
            &config.index.cache_dir,
            config.cache.mode,
        ));
        let manifest = Arc::new(ManifestStore::new(config.manifest_path()));
        let embedder = create_embedder(&config.embeddings)?;
        let chunker = Arc::new(WindowChunker::new(
            config.ingest.chunk_size_tokens,
            config.ingest.chunk_overlap_tokens,
        ));
        let pipeline = IngestionPipeline::new(
            Arc::clone(&cache),
            Arc::clone(&manifest),
            chunker,
            embedder,
            config.ingest.workers(),
        )
        .with_job_timeout(config.ingest.job_timeout_secs.map(Duration::from_secs));

        Ok(Self::new(
            cache,
            manifest,
            pipeline,
            Arc::new(ExtractorRegistry::new()),
            config.index_path(),
        ))
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn manifest(&self) -> &ManifestStore {
        &self.manifest
    }

    /// Bring the persisted index up to date with the corpus.
    ///
    /// Returns `None` when there is nothing to index: the corpus is empty or
    /// every source failed or produced no text.
    pub async fn build_index(&self, force: bool) -> Result<Option<VectorStore>> {
        Ok(self.build(force).await?.0)
    }

    /// [`IndexBuilder::build_index`] bounded by `limit`. On expiry in-flight
    /// ingestion is aborted and no index is written. Manifest entries of
    /// sources that completed before the deadline are kept; the next build
    /// still reingests them because the persisted rows carry the old hash.
    pub async fn build_index_with_timeout(
        &self,
        force: bool,
        limit: Duration,
    ) -> Result<Option<VectorStore>> {
        tokio::time::timeout(limit, self.build_index(force))
            .await
            .map_err(|_| RagindexError::Timeout(format!("index build exceeded {:?}", limit)))?
    }

    /// Build and report what happened
    pub async fn build(&self, force: bool) -> Result<(Option<VectorStore>, BuildReport)> {
        let mut report = BuildReport::default();

        let keys = self.cache.corpus().list().await?;
        report.sources = keys.len();

        let (manifest, stale) = self.manifest.prune(&keys)?;
        report.stale = stale.len();
        if !stale.is_empty() {
            self.cache.evict(&stale);
        }

        if keys.is_empty() {
            log::warn!("Corpus is empty; removing any persisted index");
            VectorStore::remove_files(&self.index_path)?;
            report.rebuilt = true;
            return Ok((None, report));
        }

        let existing = if force { None } else { self.load_existing() };
        let stale = with_orphans(stale, existing.as_ref(), &keys);
        let mut changes =
            detect_changes(&keys, &manifest, stale, force, &self.cache, existing.as_ref()).await;
        report.stale = changes.stale.len();

        if !changes.rebuild_required() {
            log::info!("No changes detected; reusing persisted index");
            report.total_chunks = existing.as_ref().map_or(0, VectorStore::ntotal);
            return Ok((existing, report));
        }

        report.rebuilt = true;
        report.selected = changes.selected().len();
        let prefetched = changes.take_prefetched();
        let output = self
            .pipeline
            .run_prefetched(changes.selected(), Arc::clone(&self.extractor), prefetched)
            .await?;
        report.indexed = output.indexed.len();
        report.empty = output.empty.len();
        report.failed = output.failed;

        let mut store = VectorStore::new();
        if let Some(previous) = &existing {
            let (vectors, chunks) = carried_rows(previous, &keys, &changes);
            report.carried_chunks = chunks.len();
            store.add(vectors, chunks)?;
        }
        report.new_chunks = output.chunks.len();
        store.add(output.vectors, output.chunks)?;
        report.total_chunks = store.ntotal();

        if store.is_empty() {
            log::warn!("No chunks produced; removing any persisted index");
            VectorStore::remove_files(&self.index_path)?;
            return Ok((None, report));
        }

        store.save(&self.index_path)?;
        log::info!("Index build complete: {}", report);
        Ok((Some(store), report))
    }

    fn load_existing(&self) -> Option<VectorStore> {
        match VectorStore::load(&self.index_path) {
            Ok(store) => Some(store),
            Err(RagindexError::MissingArtifact(path)) => {
                log::info!("No persisted index ({} missing)", path.display());
                None
            }
            Err(e) => {
                log::warn!("Persisted index unusable, rebuilding: {}", e);
                None
            }
        }
    }
}

/// Add sources that still have rows in `existing` but are no longer listed.
/// Their manifest entries may already be gone if an earlier build was
/// interrupted after pruning.
fn with_orphans(
    mut stale: Vec<SourceKey>,
    existing: Option<&VectorStore>,
    keys: &[SourceKey],
) -> Vec<SourceKey> {
    let Some(store) = existing else {
        return stale;
    };
    let listed: HashSet<&str> = keys.iter().map(String::as_str).collect();
    for source in store.sources() {
        if !listed.contains(source) && !stale.iter().any(|s| s == source) {
            log::info!("Index still holds rows of removed source {}", source);
            stale.push(source.to_string());
        }
    }
    stale
}

/// Rows of sources that are still in the corpus and were not reselected
fn carried_rows(
    previous: &VectorStore,
    keys: &[SourceKey],
    changes: &ChangeSet,
) -> (Vec<Vec<f32>>, Vec<Chunk>) {
    let selected: HashSet<&str> = changes.selected().iter().map(String::as_str).collect();
    let mut vectors = Vec::new();
    let mut chunks = Vec::new();
    for key in keys.iter().filter(|k| !selected.contains(k.as_str())) {
        for (chunk, vector) in previous.rows_for_source(key) {
            vectors.push(vector.to_vec());
            chunks.push(chunk.clone());
        }
    }
    (vectors, chunks)
}
