//! Change detection: decide which sources need (re)ingestion by comparing
//! fresh content hashes with the manifest and the loaded index.

use std::collections::HashMap;

use crate::cache::{CacheManager, CacheMode, SourceHandle};
use crate::manifest::Manifest;
use crate::search::VectorStore;
use crate::source::SourceKey;

/// Classification of the corpus against the manifest
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// No manifest entry
    pub new: Vec<SourceKey>,
    /// Content hash differs from the manifest
    pub modified: Vec<SourceKey>,
    /// Hash matches and the index holds the recorded rows
    pub unchanged: Vec<SourceKey>,
    /// Cache mode `none`: always reingested
    pub streamed: Vec<SourceKey>,
    /// Hash matches but the index does not hold the rows recorded for it
    pub out_of_sync: Vec<SourceKey>,
    /// Selected because the build was forced
    pub forced: Vec<SourceKey>,
    /// Removed from the corpus since the last build
    pub stale: Vec<SourceKey>,
    selected: Vec<SourceKey>,
    /// Ephemeral downloads made while hashing, kept for the pipeline
    prefetched: HashMap<SourceKey, SourceHandle>,
}

impl ChangeSet {
    /// Keys to ingest, in corpus order
    pub fn selected(&self) -> &[SourceKey] {
        &self.selected
    }

    /// Whether the persisted index no longer reflects the corpus
    pub fn rebuild_required(&self) -> bool {
        !self.selected.is_empty() || !self.stale.is_empty()
    }

    /// Hand over the sources fetched during detection so they are not
    /// downloaded a second time. Dropping a handle deletes its file.
    pub fn take_prefetched(&mut self) -> HashMap<SourceKey, SourceHandle> {
        std::mem::take(&mut self.prefetched)
    }
}

fn select(selected: &mut Vec<SourceKey>, bucket: &mut Vec<SourceKey>, key: &SourceKey) {
    bucket.push(key.clone());
    selected.push(key.clone());
}

/// Classify `keys` (already pruned) against `manifest`.
///
/// A key is unchanged only when its freshly computed hash matches the
/// manifest and `existing` holds exactly `embedding_count` rows for it, all
/// cut from content with that same hash. A manifest entry written by a build
/// that never saved its index therefore does not vouch for stale rows. With
/// no loaded index every previously embedded key is out of sync. A key whose
/// content cannot be fetched or hashed is selected so the pipeline records
/// the failure.
pub async fn detect_changes(
    keys: &[SourceKey],
    manifest: &Manifest,
    stale: Vec<SourceKey>,
    force: bool,
    cache: &CacheManager,
    existing: Option<&VectorStore>,
) -> ChangeSet {
    let mut changes = ChangeSet {
        stale,
        ..ChangeSet::default()
    };

    for key in keys {
        if force {
            select(&mut changes.selected, &mut changes.forced, key);
            continue;
        }
        if cache.mode() == CacheMode::None {
            select(&mut changes.selected, &mut changes.streamed, key);
            continue;
        }
        let Some(entry) = manifest.get(key) else {
            select(&mut changes.selected, &mut changes.new, key);
            continue;
        };

        let (handle, current_hash) = match cache.resolve(key).await {
            Ok(handle) => {
                let hash = handle.content_hash().await;
                (Some(handle), hash)
            }
            Err(e) => (None, Err(e)),
        };
        match current_hash {
            Ok(hash) if hash != entry.content_hash => {
                log::debug!("Modified: {}", key);
                select(&mut changes.selected, &mut changes.modified, key);
                if let Some(handle) = handle.filter(SourceHandle::is_ephemeral) {
                    changes.prefetched.insert(key.clone(), handle);
                }
            }
            Ok(hash) => {
                let rows = existing.map_or(0, |store| store.chunk_count_for(key));
                let rows_current =
                    existing.map_or(true, |store| store.rows_match_hash(key, &hash));
                if rows == entry.embedding_count && rows_current {
                    changes.unchanged.push(key.clone());
                } else {
                    log::info!(
                        "Out of sync: {} (manifest records {} embeddings, index holds {}{})",
                        key,
                        entry.embedding_count,
                        rows,
                        if rows_current { "" } else { " from older content" }
                    );
                    select(&mut changes.selected, &mut changes.out_of_sync, key);
                    if let Some(handle) = handle.filter(SourceHandle::is_ephemeral) {
                        changes.prefetched.insert(key.clone(), handle);
                    }
                }
            }
            Err(e) => {
                log::warn!("Could not hash {} during change detection: {}", key, e);
                select(&mut changes.selected, &mut changes.modified, key);
            }
        }
    }

    log::info!(
        "Change detection: {} new, {} modified, {} unchanged, {} streamed, {} out of sync, {} forced, {} stale",
        changes.new.len(),
        changes.modified.len(),
        changes.unchanged.len(),
        changes.streamed.len(),
        changes.out_of_sync.len(),
        changes.forced.len(),
        changes.stale.len()
    );

    changes
}
