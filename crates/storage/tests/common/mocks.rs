use async_trait::async_trait;
use bytes::Bytes;
use curator_core::{AssetKey, Namespace};
use curator_storage::error::{StorageError, StorageResult};
use curator_storage::traits::{
    BlobMeta, BlobStore, ContinuationToken, ListEntry, ListingCapabilities, ListingOptions,
    ListingPage, ListingResume, PageStream,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;

/// Read-only backend that generates a namespace listing on the fly.
///
/// Every `placeholder_every`-th entry is a folder marker, mimicking backends
/// that materialize empty folders. Pages fetched are counted.
#[allow(dead_code)]
pub struct SyntheticListingBackend {
    pub total_entries: usize,
    pub placeholder_every: Option<usize>,
    pub pages_fetched: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl SyntheticListingBackend {
    pub fn new(total_entries: usize, placeholder_every: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            total_entries,
            placeholder_every,
            pages_fetched: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn pages(&self) -> usize {
        self.pages_fetched.load(Ordering::SeqCst)
    }

    fn entry(&self, prefix: &str, i: usize) -> ListEntry {
        let is_placeholder = self
            .placeholder_every
            .is_some_and(|every| every > 0 && i % every == 0);
        let key = if is_placeholder {
            format!("{prefix}sub{i}/.emptyFolderPlaceholder")
        } else {
            format!("{prefix}{i:08}.jpg")
        };
        ListEntry {
            key,
            size: Some(1),
            last_modified: Some(OffsetDateTime::UNIX_EPOCH),
        }
    }
}

#[async_trait]
impl BlobStore for SyntheticListingBackend {
    async fn put(&self, _key: &AssetKey, _data: Bytes, _ct: Option<&str>) -> StorageResult<()> {
        Err(StorageError::Rejected("synthetic backend is read-only".to_string()))
    }

    async fn get(&self, key: &AssetKey) -> StorageResult<Bytes> {
        Err(StorageError::NotFound(key.to_string()))
    }

    async fn head(&self, key: &AssetKey) -> StorageResult<BlobMeta> {
        Err(StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, _key: &AssetKey) -> StorageResult<()> {
        Err(StorageError::Rejected("synthetic backend is read-only".to_string()))
    }

    fn list_pages<'a>(
        &'a self,
        namespace: &Namespace,
        options: ListingOptions,
        resume: Option<ListingResume>,
    ) -> PageStream<'a> {
        let page_size = options.normalized_page_size();
        let prefix = namespace.prefix();

        let start_index = resume
            .and_then(|r| String::from_utf8(r.start_token.as_bytes().to_vec()).ok())
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);

        Box::pin(async_stream::try_stream! {
            let mut index = start_index;
            loop {
                self.pages_fetched.fetch_add(1, Ordering::SeqCst);
                let end = (index + page_size).min(self.total_entries);
                let entries: Vec<ListEntry> = (index..end).map(|i| self.entry(&prefix, i)).collect();
                let next_token = if end < self.total_entries {
                    Some(ContinuationToken::new(end.to_string().into_bytes())?)
                } else {
                    None
                };
                let done = next_token.is_none();
                yield ListingPage { entries, next_token };
                if done {
                    break;
                }
                index = end;
            }
        })
    }

    fn backend_name(&self) -> &'static str {
        "synthetic"
    }

    fn listing_capabilities(&self) -> ListingCapabilities {
        ListingCapabilities { resumable: true }
    }
}
