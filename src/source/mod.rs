//! Backing corpus access: listing source keys and fetching their bytes.

pub mod local;
pub mod object;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::config::{SourceConfig, SourceKind};
use crate::error::{RagindexError, Result};

pub use local::LocalCorpus;
pub use object::ObjectStoreCorpus;

/// Stable identifier of one document within the corpus (a `/`-separated path)
pub type SourceKey = String;

/// Where a source's bytes come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

/// A backing corpus of documents.
///
/// `list` is a pure query; `fetch` and `size` read one source.
#[async_trait]
pub trait Corpus: Send + Sync {
    /// Where this corpus' bytes live
    fn origin(&self) -> Origin;

    /// Enumerate every source key currently present, sorted
    async fn list(&self) -> Result<Vec<SourceKey>>;

    /// Read a source's full contents
    async fn fetch(&self, key: &str) -> Result<Bytes>;

    /// Size of a source in bytes, without reading it
    async fn size(&self, key: &str) -> Result<u64>;

    /// Local file backing `key`, when the corpus is already on disk
    fn local_path(&self, _key: &str) -> Option<PathBuf> {
        None
    }
}

/// Build the corpus selected by configuration
pub fn create_corpus(config: &SourceConfig) -> Result<Arc<dyn Corpus>> {
    match config.kind {
        SourceKind::Local => {
            let root = config.root.clone().ok_or_else(|| {
                RagindexError::Config("source.root is required for a local corpus".to_string())
            })?;
            Ok(Arc::new(LocalCorpus::new(root, config.extensions.clone())))
        }
        SourceKind::S3 => {
            let bucket = config.bucket.as_deref().ok_or_else(|| {
                RagindexError::Config("source.bucket is required for an s3 corpus".to_string())
            })?;
            let corpus =
                ObjectStoreCorpus::s3(bucket, config.prefix.clone(), config.extensions.clone())?;
            Ok(Arc::new(corpus))
        }
    }
}

/// True if `key` ends with one of `extensions` (case-insensitive).
/// An empty allow-list accepts everything.
pub fn has_allowed_extension(key: &str, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let ext = Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext))
}

/// Join a source key under `base`, rejecting absolute keys and `..` traversal.
pub fn resolve_under(base: &Path, key: &str) -> Result<PathBuf> {
    let relative = Path::new(key);
    if key.is_empty()
        || relative.is_absolute()
        || relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::Prefix(_) | Component::RootDir
            )
        })
    {
        return Err(RagindexError::InvalidInput(format!(
            "source key escapes its root: {}",
            key
        )));
    }
    Ok(base.join(relative))
}
