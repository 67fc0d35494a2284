//! Retry decorator for blob stores.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    BlobMeta, BlobStore, DeleteOutcome, ListingCapabilities, ListingOptions, ListingResume,
    PageStream,
};
use async_trait::async_trait;
use bytes::Bytes;
use curator_core::{AssetKey, Namespace, RetryPolicy};
use std::sync::Arc;

/// Wraps a [`BlobStore`] and retries transient failures.
///
/// Only errors for which [`StorageError::is_transient`] holds are retried.
/// Listing streams are passed through untouched; callers that need a retried
/// listing restart it from the beginning.
pub struct RetryingStore {
    inner: Arc<dyn BlobStore>,
    policy: RetryPolicy,
}

impl RetryingStore {
    pub fn new(inner: Arc<dyn BlobStore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &Arc<dyn BlobStore> {
        &self.inner
    }
}

#[async_trait]
impl BlobStore for RetryingStore {
    async fn put(
        &self,
        key: &AssetKey,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        self.policy
            .run("blob.put", StorageError::is_transient, || {
                self.inner.put(key, data.clone(), content_type)
            })
            .await
    }

    async fn get(&self, key: &AssetKey) -> StorageResult<Bytes> {
        self.policy
            .run("blob.get", StorageError::is_transient, || self.inner.get(key))
            .await
    }

    async fn head(&self, key: &AssetKey) -> StorageResult<BlobMeta> {
        self.policy
            .run("blob.head", StorageError::is_transient, || self.inner.head(key))
            .await
    }

    async fn delete(&self, key: &AssetKey) -> StorageResult<()> {
        self.policy
            .run("blob.delete", StorageError::is_transient, || {
                self.inner.delete(key)
            })
            .await
    }

    async fn delete_many(&self, keys: &[AssetKey]) -> StorageResult<Vec<DeleteOutcome>> {
        self.policy
            .run("blob.delete_many", StorageError::is_transient, || {
                self.inner.delete_many(keys)
            })
            .await
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
        self.inner.backend_name()
    }

    fn listing_capabilities(&self) -> ListingCapabilities {
        self.inner.listing_capabilities()
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` puts with the given error kind.
    struct Flaky {
        inner: MemoryBackend,
        failures: u32,
        calls: AtomicU32,
        transient: bool,
    }

    #[async_trait]
    impl BlobStore for Flaky {
        async fn put(
            &self,
            key: &AssetKey,
            data: Bytes,
            content_type: Option<&str>,
        ) -> StorageResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(if self.transient {
                    StorageError::Timeout("slow".to_string())
                } else {
                    StorageError::Rejected("too large".to_string())
                });
            }
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

        fn list_pages<'a>(
            &'a self,
            namespace: &Namespace,
            options: ListingOptions,
            resume: Option<ListingResume>,
        ) -> PageStream<'a> {
            self.inner.list_pages(namespace, options, resume)
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }

        fn listing_capabilities(&self) -> ListingCapabilities {
            self.inner.listing_capabilities()
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    fn flaky(failures: u32, transient: bool) -> Arc<Flaky> {
        Arc::new(Flaky {
            inner: MemoryBackend::new(),
            failures,
            calls: AtomicU32::new(0),
            transient,
        })
    }

    #[tokio::test]
    async fn test_transient_put_is_retried() {
        let backend = flaky(2, true);
        let store = RetryingStore::new(backend.clone(), policy());
        let key = AssetKey::parse("gallery/a.jpg").unwrap();

        store.put(&key, Bytes::from("a"), None).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert!(store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let backend = flaky(1, false);
        let store = RetryingStore::new(backend.clone(), policy());
        let key = AssetKey::parse("gallery/a.jpg").unwrap();

        let err = store.put(&key, Bytes::from("a"), None).await.unwrap_err();
        assert!(matches!(err, StorageError::Rejected(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let backend = flaky(10, true);
        let store = RetryingStore::new(backend.clone(), policy());
        let key = AssetKey::parse("gallery/a.jpg").unwrap();

        assert!(store.put(&key, Bytes::from("a"), None).await.is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }
}
