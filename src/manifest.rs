//! Persisted record of which sources have been indexed and with what content.
//!
//! The manifest is a single JSON document mapping each source key to its
//! [`ManifestEntry`]. It is rewritten wholesale on every change through a
//! temporary file and rename, so a reader never observes a half-written file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;
use crate::source::{Origin, SourceKey};

/// Metadata recorded for one successfully ingested source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub content_hash: String,
    pub indexed_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub embedding_count: usize,
    pub byte_size: u64,
    pub origin: Origin,
}

impl ManifestEntry {
    /// Build an entry stamped with the current time
    pub fn new(
        content_hash: String,
        chunk_count: usize,
        embedding_count: usize,
        byte_size: u64,
        origin: Origin,
    ) -> Self {
        Self {
            content_hash,
            indexed_at: Utc::now(),
            chunk_count,
            embedding_count,
            byte_size,
            origin,
        }
    }
}

/// SourceKey → ManifestEntry. Ordered so the persisted file is stable.
pub type Manifest = BTreeMap<SourceKey, ManifestEntry>;

/// Owner of the persisted manifest file.
///
/// All mutations go through a process-local lock and perform a full
/// load-modify-save cycle, so concurrent ingestion tasks never interleave
/// their writes.
pub struct ManifestStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest. A missing or unreadable file yields an empty manifest.
    pub fn load(&self) -> Manifest {
        if !self.path.exists() {
            return Manifest::new();
        }

        let parsed = std::fs::read_to_string(&self.path)
            .map_err(crate::error::RagindexError::from)
            .and_then(|raw| serde_json::from_str::<Manifest>(&raw).map_err(Into::into));

        match parsed {
            Ok(manifest) => manifest,
            Err(e) => {
                log::warn!(
                    "Failed to load manifest {} ({}); treating every source as new",
                    self.path.display(),
                    e
                );
                Manifest::new()
            }
        }
    }

    /// Persist the whole manifest
    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        let _guard = self.lock();
        self.write(manifest)
    }

    /// Insert or overwrite one entry and persist immediately
    pub fn upsert(&self, key: &str, entry: ManifestEntry) -> Result<()> {
        let _guard = self.lock();
        let mut manifest = self.load();
        manifest.insert(key.to_string(), entry);
        self.write(&manifest)
    }

    /// Remove entries whose key is not in `current_keys`.
    ///
    /// The pruned manifest is persisted before returning. Returns the pruned
    /// manifest and the removed keys (sorted).
    pub fn prune(&self, current_keys: &[SourceKey]) -> Result<(Manifest, Vec<SourceKey>)> {
        let _guard = self.lock();
        let mut manifest = self.load();
        let current: HashSet<&str> = current_keys.iter().map(String::as_str).collect();

        let stale: Vec<SourceKey> = manifest
            .keys()
            .filter(|k| !current.contains(k.as_str()))
            .cloned()
            .collect();

        if !stale.is_empty() {
            log::info!("Pruning {} stale manifest entries", stale.len());
            for key in &stale {
                manifest.remove(key);
            }
            self.write(&manifest)?;
        }

        Ok((manifest, stale))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        // The guarded data is (); a poisoned lock carries no broken state.
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self, manifest: &Manifest) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(manifest)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
