//! Blob store wrappers for failure injection.

use async_trait::async_trait;
use bytes::Bytes;
use curator_core::{AssetKey, Namespace};
use curator_storage::{
    BlobMeta, BlobStore, DeleteOutcome, DeleteStatus, ListingCapabilities, ListingOptions,
    ListingResume, PageStream, StorageResult,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Reports `Failed` from batched deletes for chosen keys.
#[allow(dead_code)]
pub struct FailingDeletes {
    inner: Arc<dyn BlobStore>,
    failing: Mutex<HashSet<String>>,
}

#[allow(dead_code)]
impl FailingDeletes {
    pub fn new<'a>(inner: Arc<dyn BlobStore>, keys: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            inner,
            failing: Mutex::new(keys.into_iter().map(str::to_string).collect()),
        }
    }
}

#[async_trait]
impl BlobStore for FailingDeletes {
    async fn put(
        &self,
        key: &AssetKey,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        self.inner.put(key, data, content_type).await
    }

    async fn get(&self, key: &AssetKey) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn head(&self, key: &AssetKey) -> StorageResult<BlobMeta> {
        self.inner.head(key).await
    }

    async fn delete(&self, key: &AssetKey) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn delete_many(&self, keys: &[AssetKey]) -> StorageResult<Vec<DeleteOutcome>> {
        let failing = self.failing.lock().unwrap().clone();
        let (doomed, allowed): (Vec<AssetKey>, Vec<AssetKey>) = keys
            .iter()
            .cloned()
            .partition(|key| failing.contains(&key.to_string()));
        let mut outcomes = self.inner.delete_many(&allowed).await?;
        outcomes.extend(doomed.into_iter().map(|key| DeleteOutcome {
            key,
            status: DeleteStatus::Failed("access denied".to_string()),
        }));
        Ok(outcomes)
    }

    fn list_pages<'a>(
        &'a self,
        namespace: &Namespace,
        options: ListingOptions,
        resume: Option<ListingResume>,
    ) -> PageStream<'a> {
        self.inner.list_pages(namespace, options, resume)
    }

    fn backend_name(&self) -> &'static str {
        "failing-deletes"
    }

    fn listing_capabilities(&self) -> ListingCapabilities {
        self.inner.listing_capabilities()
    }
}
