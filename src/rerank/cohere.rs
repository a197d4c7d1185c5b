use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{finalize, RerankedCandidate, Reranker};
use crate::error::{RagindexError, Result};

const RERANK_URL: &str = "https://api.cohere.ai/v1/rerank";

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

/// Cohere rerank API client
pub struct CohereReranker {
    client: Client,
    api_key: String,
    model: String,
}

impl CohereReranker {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RagindexError::Rerank(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Reranker for CohereReranker {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankedCandidate>> {
        if candidates.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }
        if query.trim().is_empty() {
            return Err(RagindexError::InvalidInput("Query cannot be empty".to_string()));
        }

        let request = RerankRequest {
            model: &self.model,
            query,
            documents: candidates,
            top_n: top_n.min(candidates.len()),
        };

        let response = self
            .client
            .post(RERANK_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagindexError::Rerank(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(RagindexError::Rerank(format!(
                "Cohere API error {}: {}",
                status.as_u16(),
                body
            )));
        }

        let result: RerankResponse = response
            .json()
            .await
            .map_err(|e| RagindexError::Rerank(format!("Failed to parse response: {}", e)))?;

        let scored = result
            .results
            .into_iter()
            .map(|r| (r.index, r.relevance_score))
            .collect();
        Ok(finalize(scored, candidates, top_n))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
