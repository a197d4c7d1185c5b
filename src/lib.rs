pub mod cache;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod manifest;
pub mod rerank;
pub mod search;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{RagindexError, Result};
pub use ingest::{BuildReport, IndexBuilder};
pub use manifest::{Manifest, ManifestEntry, ManifestStore};
pub use search::{Retriever, VectorStore};
pub use source::SourceKey;
