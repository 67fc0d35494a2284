//! In-process storage backend.
//!
//! Objects live in a sorted map and are stamped with the injected clock, so
//! tests can control object ages precisely. Listings are resumable: the
//! continuation token is the last key of the previous page.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    BlobMeta, BlobStore, ContinuationToken, ListEntry, ListingCapabilities, ListingOptions,
    ListingPage, ListingResume, PageStream,
};
use async_trait::async_trait;
use bytes::Bytes;
use curator_core::{AssetKey, Clock, Namespace, SystemClock};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};
use time::OffsetDateTime;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    last_modified: OffsetDateTime,
}

/// Memory-backed blob store.
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    clock: Arc<dyn Clock>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            clock,
        }
    }

    /// Store a raw entry under any key, bypassing key validation.
    ///
    /// Used to seed folder placeholders and foreign objects.
    pub fn insert_raw(&self, key: impl Into<String>, data: Bytes) {
        let object = StoredObject {
            data,
            content_type: None,
            last_modified: self.clock.now(),
        };
        self.write().insert(key.into(), object);
    }

    /// Number of stored entries, placeholders included.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }

    fn page_after(
        &self,
        prefix: &str,
        after: Option<&str>,
        page_size: usize,
    ) -> (Vec<ListEntry>, Option<String>) {
        let objects = self.read();
        let lower = match after {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Included(prefix.to_string()),
        };
        let mut entries: Vec<ListEntry> = objects
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(page_size + 1)
            .map(|(key, object)| ListEntry {
                key: key.clone(),
                size: Some(object.data.len() as u64),
                last_modified: Some(object.last_modified),
            })
            .collect();

        let next = if entries.len() > page_size {
            entries.truncate(page_size);
            entries.last().map(|e| e.key.clone())
        } else {
            None
        };
        (entries, next)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBackend {
    async fn put(
        &self,
        key: &AssetKey,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        let object = StoredObject {
            data,
            content_type: content_type.map(str::to_string),
            last_modified: self.clock.now(),
        };
        self.write().insert(key.to_key_string(), object);
        Ok(())
    }

    async fn get(&self, key: &AssetKey) -> StorageResult<Bytes> {
        self.read()
            .get(&key.to_key_string())
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn head(&self, key: &AssetKey) -> StorageResult<BlobMeta> {
        self.read()
            .get(&key.to_key_string())
            .map(|o| BlobMeta {
                size: o.data.len() as u64,
                last_modified: Some(o.last_modified),
                content_type: o.content_type.clone(),
            })
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &AssetKey) -> StorageResult<()> {
        self.write()
            .remove(&key.to_key_string())
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn list_pages<'a>(
        &'a self,
        namespace: &Namespace,
        options: ListingOptions,
        resume: Option<ListingResume>,
    ) -> PageStream<'a> {
        let prefix = namespace.prefix();
        let page_size = options.normalized_page_size();

        Box::pin(async_stream::try_stream! {
            let mut after = match resume {
                Some(resume) => {
                    let raw = String::from_utf8(resume.start_token.as_bytes().to_vec())
                        .map_err(|e| StorageError::InvalidContinuationToken(e.to_string()))?;
                    if !raw.starts_with(&prefix) {
                        Err(StorageError::InvalidContinuationToken(
                            "token belongs to a different namespace".to_string(),
                        ))?;
                    }
                    Some(raw)
                }
                None => None,
            };

            loop {
                let (entries, next) = self.page_after(&prefix, after.as_deref(), page_size);
                let next_token = match &next {
                    Some(last) => Some(ContinuationToken::new(last.as_bytes().to_vec())?),
                    None => None,
                };
                yield ListingPage { entries, next_token };
                match next {
                    Some(last) => after = Some(last),
                    None => break,
                }
            }
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn listing_capabilities(&self) -> ListingCapabilities {
        ListingCapabilities { resumable: true }
    }
}
