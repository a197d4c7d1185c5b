use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjPath;
use object_store::{ObjectMeta, ObjectStore};
use std::sync::Arc;

use super::{has_allowed_extension, Corpus, Origin, SourceKey};
use crate::error::Result;

/// A corpus held in a remote object store (S3 or anything `object_store` speaks).
///
/// Keys are the object locations, including any configured prefix.
pub struct ObjectStoreCorpus {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
    extensions: Vec<String>,
}

impl ObjectStoreCorpus {
    /// Wrap an existing store
    pub fn with_store(
        store: Arc<dyn ObjectStore>,
        prefix: Option<String>,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            store,
            prefix: prefix.filter(|p| !p.is_empty()),
            extensions,
        }
    }

    /// S3 bucket; credentials and region come from the standard AWS environment variables
    pub fn s3(bucket: &str, prefix: Option<String>, extensions: Vec<String>) -> Result<Self> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()?;
        log::info!("Using S3 corpus: bucket={}, prefix={:?}", bucket, prefix);
        Ok(Self::with_store(Arc::new(store), prefix, extensions))
    }
}

#[async_trait]
impl Corpus for ObjectStoreCorpus {
    fn origin(&self) -> Origin {
        Origin::Remote
    }

    async fn list(&self) -> Result<Vec<SourceKey>> {
        let prefix = self.prefix.as_deref().map(ObjPath::from);
        let objects: Vec<ObjectMeta> = self.store.list(prefix.as_ref()).try_collect().await?;

        let mut keys: Vec<SourceKey> = objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .filter(|key| has_allowed_extension(key, &self.extensions))
            .collect();
        keys.sort();

        log::info!("Discovered {} sources in object store", keys.len());
        Ok(keys)
    }

    async fn fetch(&self, key: &str) -> Result<Bytes> {
        let result = self.store.get(&ObjPath::from(key)).await?;
        Ok(result.bytes().await?)
    }

    async fn size(&self, key: &str) -> Result<u64> {
        let meta = self.store.head(&ObjPath::from(key)).await?;
        Ok(meta.size as u64)
    }
}
