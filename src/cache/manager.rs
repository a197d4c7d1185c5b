//! Resolves source keys to local files or in-memory bytes under a caching policy.

use bytes::Bytes;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::hash::{hash_bytes, hash_file};
use crate::error::Result;
use crate::source::{resolve_under, Corpus, SourceKey};

/// Caching policy for fetched sources
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Keep fetched bytes at a deterministic local path across builds
    #[default]
    Full,
    /// Fetch to the local path, delete when the handle is dropped
    Ephemeral,
    /// Stream into memory; never touch local storage
    None,
}

/// The resolved bytes of one source
#[derive(Debug, Clone)]
pub enum SourceContent {
    Path(PathBuf),
    Bytes(Bytes),
}

impl SourceContent {
    /// SHA-256 hex digest of the content
    pub fn hash(&self) -> Result<String> {
        match self {
            SourceContent::Path(path) => hash_file(path),
            SourceContent::Bytes(bytes) => Ok(hash_bytes(bytes)),
        }
    }

    /// Load the full content into memory
    pub fn read(&self) -> Result<Bytes> {
        match self {
            SourceContent::Path(path) => Ok(Bytes::from(std::fs::read(path)?)),
            SourceContent::Bytes(bytes) => Ok(bytes.clone()),
        }
    }

    /// Length of the content in bytes
    pub fn byte_size(&self) -> Result<u64> {
        match self {
            SourceContent::Path(path) => Ok(std::fs::metadata(path)?.len()),
            SourceContent::Bytes(bytes) => Ok(bytes.len() as u64),
        }
    }
}

/// Deletes its file when dropped
#[derive(Debug)]
struct EphemeralFile(PathBuf);

impl Drop for EphemeralFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => log::debug!("Deleted ephemeral cache file: {}", self.0.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "Failed to delete ephemeral cache file {}: {}",
                self.0.display(),
                e
            ),
        }
    }
}

/// A resolved source. In ephemeral mode the cached file lives exactly as
/// long as the handle.
#[derive(Debug)]
pub struct SourceHandle {
    key: SourceKey,
    content: SourceContent,
    cleanup: Option<EphemeralFile>,
}

impl SourceHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn content(&self) -> &SourceContent {
        &self.content
    }

    pub fn is_ephemeral(&self) -> bool {
        self.cleanup.is_some()
    }

    /// Hash the content off the async runtime
    pub async fn content_hash(&self) -> Result<String> {
        let content = self.content.clone();
        tokio::task::spawn_blocking(move || content.hash()).await?
    }
}

/// Fetches sources from the corpus and applies the configured cache mode
pub struct CacheManager {
    corpus: Arc<dyn Corpus>,
    cache_dir: PathBuf,
    mode: CacheMode,
}

impl CacheManager {
    pub fn new(corpus: Arc<dyn Corpus>, cache_dir: impl Into<PathBuf>, mode: CacheMode) -> Self {
        Self {
            corpus,
            cache_dir: cache_dir.into(),
            mode,
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn corpus(&self) -> &Arc<dyn Corpus> {
        &self.corpus
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Deterministic cache location for `key`
    pub fn cache_path(&self, key: &str) -> Result<PathBuf> {
        resolve_under(&self.cache_dir, key)
    }

    /// Resolve `key` under the configured mode
    pub async fn resolve(&self, key: &str) -> Result<SourceHandle> {
        self.resolve_with(key, self.mode).await
    }

    /// Resolve `key` under an explicit mode
    pub async fn resolve_with(&self, key: &str, mode: CacheMode) -> Result<SourceHandle> {
        if mode == CacheMode::None {
            let bytes = self.corpus.fetch(key).await?;
            return Ok(SourceHandle {
                key: key.to_string(),
                content: SourceContent::Bytes(bytes),
                cleanup: None,
            });
        }

        // On-disk corpora are read in place and never deleted
        if let Some(path) = self.corpus.local_path(key) {
            return Ok(SourceHandle {
                key: key.to_string(),
                content: SourceContent::Path(path),
                cleanup: None,
            });
        }

        let path = self.cache_path(key)?;
        if self.is_fresh(key, &path).await? {
            log::debug!("Cache hit: {}", key);
        } else {
            self.download(key, &path).await?;
        }

        let cleanup = (mode == CacheMode::Ephemeral).then(|| EphemeralFile(path.clone()));
        Ok(SourceHandle {
            key: key.to_string(),
            content: SourceContent::Path(path),
            cleanup,
        })
    }

    /// Delete cached copies of `keys`. Returns how many files were removed.
    pub fn evict(&self, keys: &[SourceKey]) -> usize {
        let mut removed = 0;
        for key in keys {
            let Ok(path) = self.cache_path(key) else {
                continue;
            };
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    log::debug!("Deleted stale cache file: {}", path.display());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!(
                    "Failed to delete stale cache file {}: {}",
                    path.display(),
                    e
                ),
            }
        }
        removed
    }

    /// A cached copy is reused when present and the same size as the remote object
    async fn is_fresh(&self, key: &str, path: &Path) -> Result<bool> {
        let local_len = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        Ok(local_len == self.corpus.size(key).await?)
    }

    async fn download(&self, key: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = self.corpus.fetch(key).await?;
        let tmp = partial_path(path);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        log::debug!("Fetched {} ({} bytes) into cache", key, bytes.len());
        Ok(())
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{LocalCorpus, ObjectStoreCorpus};
    use object_store::memory::InMemory;
    use object_store::path::Path as ObjPath;
    use object_store::{ObjectStore, PutPayload};
    use tempfile::TempDir;

    async fn remote_corpus(files: &[(&str, &'static str)]) -> (Arc<dyn Corpus>, Arc<dyn ObjectStore>) {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        for (key, body) in files {
            store
                .put(&ObjPath::from(*key), PutPayload::from_bytes(Bytes::from_static(body.as_bytes())))
                .await
                .unwrap();
        }
        let corpus: Arc<dyn Corpus> =
            Arc::new(ObjectStoreCorpus::with_store(Arc::clone(&store), None, vec![]));
        (corpus, store)
    }

    #[tokio::test]
    async fn test_full_mode_caches_and_reuses() {
        let cache_dir = TempDir::new().unwrap();
        let (corpus, _store) = remote_corpus(&[("reports/q1.pdf", "quarterly")]).await;
        let manager = CacheManager::new(corpus, cache_dir.path(), CacheMode::Full);

        let handle = manager.resolve("reports/q1.pdf").await.unwrap();
        let cached = cache_dir.path().join("reports/q1.pdf");
        assert!(matches!(handle.content(), SourceContent::Path(p) if *p == cached));
        assert!(!handle.is_ephemeral());
        drop(handle);
        assert!(cached.exists());

        // Same-size local copy is reused, not refetched
        std::fs::write(&cached, "QUARTERLY").unwrap();
        manager.resolve("reports/q1.pdf").await.unwrap();
        assert_eq!(std::fs::read_to_string(&cached).unwrap(), "QUARTERLY");
    }

    #[tokio::test]
    async fn test_full_mode_refetches_when_size_changes() {
        let cache_dir = TempDir::new().unwrap();
        let (corpus, store) = remote_corpus(&[("a.md", "first")]).await;
        let manager = CacheManager::new(corpus, cache_dir.path(), CacheMode::Full);
        manager.resolve("a.md").await.unwrap();

        store
            .put(&ObjPath::from("a.md"), PutPayload::from_bytes(Bytes::from_static(b"second version")))
            .await
            .unwrap();
        let handle = manager.resolve("a.md").await.unwrap();
        assert_eq!(handle.content_hash().await.unwrap(), hash_bytes(b"second version"));
    }

    #[tokio::test]
    async fn test_ephemeral_mode_deletes_on_drop() {
        let cache_dir = TempDir::new().unwrap();
        let (corpus, _store) = remote_corpus(&[("a.md", "alpha")]).await;
        let manager = CacheManager::new(corpus, cache_dir.path(), CacheMode::Ephemeral);

        let handle = manager.resolve("a.md").await.unwrap();
        let cached = cache_dir.path().join("a.md");
        assert!(handle.is_ephemeral());
        assert!(cached.exists());
        assert_eq!(handle.content_hash().await.unwrap(), hash_bytes(b"alpha"));

        drop(handle);
        assert!(!cached.exists());
    }

    #[tokio::test]
    async fn test_ephemeral_cleanup_on_error_path() {
        let cache_dir = TempDir::new().unwrap();
        let (corpus, _store) = remote_corpus(&[("a.md", "alpha")]).await;
        let manager = CacheManager::new(corpus, cache_dir.path(), CacheMode::Ephemeral);
        let cached = cache_dir.path().join("a.md");

        let outcome: Result<()> = async {
            let _handle = manager.resolve("a.md").await?;
            Err(crate::error::RagindexError::InvalidInput("extraction blew up".into()))
        }
        .await;
        assert!(outcome.is_err());
        assert!(!cached.exists());
    }

    #[tokio::test]
    async fn test_none_mode_stays_in_memory() {
        let cache_dir = TempDir::new().unwrap();
        let (corpus, _store) = remote_corpus(&[("a.md", "alpha")]).await;
        let manager = CacheManager::new(corpus, cache_dir.path(), CacheMode::None);

        let handle = manager.resolve("a.md").await.unwrap();
        assert!(matches!(handle.content(), SourceContent::Bytes(b) if b.as_ref() == b"alpha"));
        assert_eq!(handle.content_hash().await.unwrap(), hash_bytes(b"alpha"));
        assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_local_corpus_is_never_deleted() {
        let corpus_dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        std::fs::write(corpus_dir.path().join("a.txt"), "local").unwrap();
        let corpus: Arc<dyn Corpus> = Arc::new(LocalCorpus::new(corpus_dir.path(), vec![]));
        let manager = CacheManager::new(corpus, cache_dir.path(), CacheMode::Ephemeral);

        let handle = manager.resolve("a.txt").await.unwrap();
        assert!(!handle.is_ephemeral());
        drop(handle);
        assert!(corpus_dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_evict_removes_cached_copies() {
        let cache_dir = TempDir::new().unwrap();
        let (corpus, _store) = remote_corpus(&[("a.md", "alpha"), ("b.md", "bravo")]).await;
        let manager = CacheManager::new(corpus, cache_dir.path(), CacheMode::Full);
        manager.resolve("a.md").await.unwrap();
        manager.resolve("b.md").await.unwrap();

        let removed = manager.evict(&["a.md".to_string(), "never-cached.md".to_string()]);
        assert_eq!(removed, 1);
        assert!(!cache_dir.path().join("a.md").exists());
        assert!(cache_dir.path().join("b.md").exists());
    }

    #[test]
    fn test_cache_mode_deserializes() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: CacheMode,
        }
        let parsed: Wrapper = toml::from_str("mode = \"none\"").unwrap();
        assert_eq!(parsed.mode, CacheMode::None);
    }
}
