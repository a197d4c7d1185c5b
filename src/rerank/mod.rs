//! Optional relevance reranking applied after similarity search.

pub mod cohere;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::RerankConfig;
use crate::error::{RagindexError, Result};

pub use cohere::CohereReranker;

/// One candidate as ordered by a [`Reranker`]
#[derive(Debug, Clone, PartialEq)]
pub struct RerankedCandidate {
    /// Position of the candidate in the input slice
    pub index: usize,
    pub text: String,
    pub score: f32,
}

/// Reorders candidate passages by relevance to a query.
///
/// Results are sorted by descending score and hold at most
/// `min(top_n, candidates.len())` entries.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankedCandidate>>;

    fn model_name(&self) -> &str;
}

/// Build the reranker selected by `rerank.provider`; `"none"` yields `None`
pub fn create_reranker(config: &RerankConfig) -> Result<Option<Arc<dyn Reranker>>> {
    match config.provider.as_str() {
        "none" | "" => Ok(None),
        "cohere" => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                RagindexError::Config(format!(
                    "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                    config.api_key_env
                ))
            })?;
            let reranker = CohereReranker::new(api_key, config.model.clone())?;
            Ok(Some(Arc::new(reranker)))
        }
        other => Err(RagindexError::Config(format!(
            "Unsupported rerank provider: {}",
            other
        ))),
    }
}

/// Sort by score descending, drop out-of-range indices, cap at `top_n`
pub(crate) fn finalize(
    mut scored: Vec<(usize, f32)>,
    candidates: &[String],
    top_n: usize,
) -> Vec<RerankedCandidate> {
    scored.retain(|(index, _)| *index < candidates.len());
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_n.min(candidates.len()));
    scored
        .into_iter()
        .map(|(index, score)| RerankedCandidate {
            index,
            text: candidates[index].clone(),
            score,
        })
        .collect()
}
