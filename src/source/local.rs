use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use walkdir::WalkDir;

use super::{has_allowed_extension, resolve_under, Corpus, Origin, SourceKey};
use crate::error::{RagindexError, Result};

/// A corpus rooted at a local directory.
///
/// Keys are paths relative to the root with `/` separators. Files are read in
/// place; nothing is ever copied into the cache for a local corpus.
pub struct LocalCorpus {
    root: PathBuf,
    extensions: Vec<String>,
}

impl LocalCorpus {
    pub fn new(root: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            root: root.into(),
            extensions,
        }
    }

    /// Recursively walk the root and collect the keys of allowed files
    fn discover(&self) -> Result<Vec<SourceKey>> {
        let mut keys = Vec::new();

        for entry in WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let relative = path.strip_prefix(&self.root).map_err(|_| {
                RagindexError::Config(format!(
                    "Failed to compute relative path for: {}",
                    path.display()
                ))
            })?;
            let key = relative.to_string_lossy().replace('\\', "/");

            if !has_allowed_extension(&key, &self.extensions) {
                continue;
            }
            keys.push(key);
        }

        keys.sort();
        log::info!("Discovered {} sources in {}", keys.len(), self.root.display());
        Ok(keys)
    }
}

#[async_trait]
impl Corpus for LocalCorpus {
    fn origin(&self) -> Origin {
        Origin::Local
    }

    async fn list(&self) -> Result<Vec<SourceKey>> {
        self.discover()
    }

    async fn fetch(&self, key: &str) -> Result<Bytes> {
        let path = resolve_under(&self.root, key)?;
        let content = tokio::fs::read(&path).await?;
        Ok(Bytes::from(content))
    }

    async fn size(&self, key: &str) -> Result<u64> {
        let path = resolve_under(&self.root, key)?;
        Ok(tokio::fs::metadata(&path).await?.len())
    }

    fn local_path(&self, key: &str) -> Option<PathBuf> {
        resolve_under(&self.root, key).ok()
    }
}
