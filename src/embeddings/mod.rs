pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbeddingsConfig;
use crate::error::{RagindexError, Result};

pub use openai::OpenAIEmbedder;

/// Turns text into fixed-dimension vectors.
///
/// Output length equals input length and every vector from one instance has
/// the same dimension. Embedding an empty slice returns an empty list.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn model_name(&self) -> &str;
}

/// Build the embedder selected by `embeddings.provider`
pub fn create_embedder(config: &EmbeddingsConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                RagindexError::Config(format!(
                    "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                    config.api_key_env
                ))
            })?;
            let embedder = OpenAIEmbedder::new(api_key, config.model.clone(), config.batch_size)?
                .with_dimensions(config.dimensions);
            Ok(Arc::new(embedder))
        }
        other => Err(RagindexError::Config(format!(
            "Unsupported embeddings provider: {}",
            other
        ))),
    }
}
