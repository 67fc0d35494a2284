//! Asset-level view over a blob store.
//!
//! [`AssetStore`] is what the lifecycle layer talks to. It adds public URLs,
//! whole-namespace listing with placeholder filtering, and the rule that
//! deleting a missing object is not an error.

use crate::error::{StorageError, StorageResult};
use crate::retrying::RetryingStore;
use crate::traits::{
    BlobMeta, BlobStore, DeleteOutcome, DeleteStatus, ListEntry, ListingOptions,
    DEFAULT_PAGE_SIZE,
};
use bytes::Bytes;
use curator_core::{AssetKey, Namespace, PublicUrlResolver, RetryPolicy};
use futures::TryStreamExt;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::instrument;

/// A stored asset reported by [`AssetStore::list_namespace`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedAsset {
    pub key: AssetKey,
    pub size: Option<u64>,
    pub last_modified: Option<OffsetDateTime>,
}

/// Blob store adapter used by the coordinators and the reconciliation engine.
#[derive(Clone)]
pub struct AssetStore {
    blobs: Arc<dyn BlobStore>,
    resolver: PublicUrlResolver,
    policy: RetryPolicy,
    page_size: usize,
}

impl AssetStore {
    /// Wrap `backend` with transient-error retries under `policy`.
    pub fn new(backend: Arc<dyn BlobStore>, resolver: PublicUrlResolver, policy: RetryPolicy) -> Self {
        Self {
            blobs: Arc::new(RetryingStore::new(backend, policy)),
            resolver,
            policy,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the listing page size (clamped by the backend).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn resolver(&self) -> &PublicUrlResolver {
        &self.resolver
    }

    pub fn backend_name(&self) -> &'static str {
        self.blobs.backend_name()
    }

    /// Store `data` under `key` and return its public URL.
    #[instrument(skip(self, data), fields(key = %key, size = data.len()))]
    pub async fn put(
        &self,
        key: &AssetKey,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        self.blobs.put(key, data, content_type).await?;
        Ok(self.public_url(key))
    }

    /// Public URL of `key`. Stable for the lifetime of the object.
    pub fn public_url(&self, key: &AssetKey) -> String {
        self.resolver.url_for(key)
    }

    pub async fn get(&self, key: &AssetKey) -> StorageResult<Bytes> {
        self.blobs.get(key).await
    }

    pub async fn head(&self, key: &AssetKey) -> StorageResult<BlobMeta> {
        self.blobs.head(key).await
    }

    /// Every entry in `namespace` as the backend reports it, placeholders
    /// included, across all pages.
    pub async fn list_raw(&self, namespace: &Namespace) -> StorageResult<Vec<ListEntry>> {
        self.policy
            .run("blob.list", StorageError::is_transient, || async {
                let mut pages = self
                    .blobs
                    .list_pages(namespace, ListingOptions::new(self.page_size), None);
                let mut entries = Vec::new();
                while let Some(page) = pages.try_next().await? {
                    entries.extend(page.entries);
                }
                Ok(entries)
            })
            .await
    }

    /// Every real asset in `namespace`.
    ///
    /// Folder placeholders and entries that are not well-formed keys of this
    /// namespace are dropped.
    #[instrument(skip(self), fields(namespace = %namespace.as_str()))]
    pub async fn list_namespace(&self, namespace: &Namespace) -> StorageResult<Vec<ListedAsset>> {
        let entries = self.list_raw(namespace).await?;
        let total = entries.len();
        let mut placeholders = 0usize;
        let mut foreign = 0usize;

        let assets: Vec<ListedAsset> = entries
            .into_iter()
            .filter_map(|entry| {
                if entry.is_placeholder() {
                    placeholders += 1;
                    return None;
                }
                match entry.asset_key() {
                    Some(key) if key.namespace() == namespace => Some(ListedAsset {
                        key,
                        size: entry.size,
                        last_modified: entry.last_modified,
                    }),
                    _ => {
                        foreign += 1;
                        None
                    }
                }
            })
            .collect();

        tracing::debug!(
            total,
            assets = assets.len(),
            placeholders,
            foreign,
            "listed namespace"
        );
        Ok(assets)
    }

    /// Delete `keys`, reporting the outcome per key.
    ///
    /// `NotFound` outcomes count as success.
    #[instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn delete_keys(&self, keys: &[AssetKey]) -> StorageResult<Vec<DeleteOutcome>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.blobs.delete_many(keys).await
    }

    /// Delete one key. A missing object is reported as
    /// [`DeleteStatus::NotFound`], not as an error.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn delete(&self, key: &AssetKey) -> StorageResult<DeleteStatus> {
        match self.blobs.delete(key).await {
            Ok(()) => Ok(DeleteStatus::Deleted),
            Err(StorageError::NotFound(_)) => Ok(DeleteStatus::NotFound),
            Err(e) => Err(e),
        }
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        self.blobs.health_check().await
    }
}
