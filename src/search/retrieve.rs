//! Query-time retrieval: embed, search, gate or rerank, then merge.

use std::sync::Arc;

use super::merge::{merge_adjacent_chunks, MergeOptions, Passage};
use super::vector::{Chunk, VectorStore};
use crate::cache::EmbeddingCache;
use crate::config::RetrievalConfig;
use crate::embeddings::Embedder;
use crate::error::{RagindexError, Result};
use crate::rerank::Reranker;

/// Read-only query engine over a fully built [`VectorStore`]
pub struct Retriever {
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    query_cache: Option<EmbeddingCache>,
    score_threshold: f32,
    top_n_rerank: usize,
    merge: MergeOptions,
}

impl Retriever {
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn Embedder>, config: &RetrievalConfig) -> Self {
        Self {
            store,
            embedder,
            query_cache: None,
            score_threshold: config.score_threshold,
            top_n_rerank: config.top_n_rerank,
            merge: MergeOptions::from_config(config),
        }
    }

    /// Memoise query embeddings; a capacity of 0 disables the cache
    pub fn with_query_cache(mut self, capacity: usize) -> Self {
        self.query_cache = (capacity > 0).then(|| EmbeddingCache::new(capacity));
        self
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Embed a query, consulting the cache first
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.query_cache {
            if let Some(hit) = cache.get(query) {
                log::debug!("Query embedding cache hit");
                return Ok(hit);
            }
        }

        let mut vectors = self.embedder.embed(&[query.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| RagindexError::Embedding("no embedding returned for query".to_string()))?;

        if let Some(cache) = &self.query_cache {
            cache.put(query.to_string(), vector.clone());
        }
        Ok(vector)
    }

    /// Merged context passages for `query`, or an empty list when nothing in
    /// the index is relevant.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        reranker: Option<&dyn Reranker>,
    ) -> Result<Vec<String>> {
        Ok(self
            .retrieve_passages(query, top_k, reranker)
            .await?
            .into_iter()
            .map(|p| p.text)
            .collect())
    }

    /// Like [`Retriever::retrieve`] but keeps each passage's source and span.
    ///
    /// Without a reranker, the best similarity must reach the score threshold
    /// or nothing is returned. With a reranker the threshold is not applied
    /// and the reranker's top `top_n_rerank` chunks are merged instead.
    pub async fn retrieve_passages(
        &self,
        query: &str,
        top_k: usize,
        reranker: Option<&dyn Reranker>,
    ) -> Result<Vec<Passage>> {
        if query.trim().is_empty() {
            return Err(RagindexError::InvalidInput("Query cannot be empty".to_string()));
        }
        if self.store.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self.embed_query(query).await?;
        let results = self.store.search(&query_vec, top_k)?;
        let Some(best) = results.first().map(|r| r.score) else {
            return Ok(Vec::new());
        };

        let selected: Vec<Chunk> = match reranker {
            None => {
                if best < self.score_threshold {
                    log::info!(
                        "Best score {:.3} below threshold {:.3}; no relevant content",
                        best,
                        self.score_threshold
                    );
                    return Ok(Vec::new());
                }
                results.into_iter().map(|r| r.chunk).collect()
            }
            Some(reranker) => {
                let candidates: Vec<String> = results.iter().map(|r| r.chunk.text.clone()).collect();
                let reranked = reranker.rerank(query, &candidates, self.top_n_rerank).await?;
                log::debug!(
                    "Reranked {} candidates to {} with {}",
                    candidates.len(),
                    reranked.len(),
                    reranker.model_name()
                );
                reranked
                    .into_iter()
                    .filter_map(|c| results.get(c.index).map(|r| r.chunk.clone()))
                    .collect()
            }
        };

        let passages = merge_adjacent_chunks(&selected, self.store.chunks(), &self.merge);
        log::info!(
            "Retrieved {} chunks, merged into {} passages",
            selected.len(),
            passages.len()
        );
        Ok(passages)
    }
}
