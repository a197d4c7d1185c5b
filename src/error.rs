use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ragindex
#[derive(Error, Debug)]
pub enum RagindexError {
    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest or chunk artifact (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Remote object store errors (listing, fetching)
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Text extraction failed for one source
    #[error("Extraction failed for {key}: {reason}")]
    Extraction { key: String, reason: String },

    /// Embedding API errors
    #[error("Embedding API error: {0}")]
    Embedding(String),

    /// Reranking API errors
    #[error("Rerank error: {0}")]
    Rerank(String),

    /// A vector does not match the dimension fixed by the vector store
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// One of the paired index artifacts is absent
    #[error("Missing index artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// Index artifacts are present but unreadable or inconsistent
    #[error("Corrupt index artifact: {0}")]
    CorruptArtifact(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A blocking background task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A bounded operation ran out of time
    #[error("Timed out: {0}")]
    Timeout(String),
}

/// Convenient Result type using RagindexError
pub type Result<T> = std::result::Result<T, RagindexError>;
