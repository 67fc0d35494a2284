//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use curator_core::{AssetKey, Namespace};
use futures::Stream;
use std::pin::Pin;
use time::OffsetDateTime;

/// A boxed stream of listing pages.
pub type PageStream<'a> = Pin<Box<dyn Stream<Item = StorageResult<ListingPage>> + Send + 'a>>;

/// Page size constraints for listing operations.
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const MIN_PAGE_SIZE: usize = 100;
pub const MAX_PAGE_SIZE: usize = 10000;

/// Maximum size for continuation tokens (2 KB).
pub const MAX_TOKEN_SIZE: usize = 2048;

/// Object names some backends create to make an empty folder visible.
pub const PLACEHOLDER_NAMES: &[&str] = &[".emptyFolderPlaceholder", ".keep", ".gitkeep"];

/// An opaque continuation token for resuming listing operations.
///
/// Backend-specific; never parsed or modified by callers. Maximum size is
/// 2 KB.
#[derive(Clone, PartialEq, Eq)]
pub struct ContinuationToken(Vec<u8>);

impl ContinuationToken {
    /// Create a new continuation token from raw bytes.
    pub fn new(data: Vec<u8>) -> StorageResult<Self> {
        if data.len() > MAX_TOKEN_SIZE {
            return Err(StorageError::InvalidContinuationToken(format!(
                "continuation token too large: {} bytes (max: {})",
                data.len(),
                MAX_TOKEN_SIZE
            )));
        }
        Ok(Self(data))
    }

    /// Get the raw token bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Convert to base64 for serialization.
    pub fn to_base64(&self) -> String {
        use base64::{Engine as _, engine::general_purpose};
        general_purpose::STANDARD.encode(&self.0)
    }

    /// Parse from base64.
    pub fn from_base64(s: &str) -> StorageResult<Self> {
        // Reject before decoding; 2x covers base64 expansion plus padding.
        const MAX_BASE64_INPUT: usize = MAX_TOKEN_SIZE * 2;
        if s.len() > MAX_BASE64_INPUT {
            return Err(StorageError::InvalidContinuationToken(format!(
                "continuation token base64 too large: {} bytes (max: {})",
                s.len(),
                MAX_BASE64_INPUT
            )));
        }

        use base64::{Engine as _, engine::general_purpose};
        let data = general_purpose::STANDARD.decode(s).map_err(|e| {
            StorageError::InvalidContinuationToken(format!(
                "invalid continuation token base64: {e}"
            ))
        })?;
        Self::new(data)
    }
}

impl std::fmt::Debug for ContinuationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ContinuationToken")
            .field(&"<redacted>")
            .finish()
    }
}

/// One object as reported by a listing, placeholders included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    /// Full key relative to the store root (`gallery/a.jpg`).
    pub key: String,
    pub size: Option<u64>,
    /// Creation / last modification time, when the backend reports one.
    pub last_modified: Option<OffsetDateTime>,
}

impl ListEntry {
    /// Whether this entry is a folder marker rather than a stored asset.
    pub fn is_placeholder(&self) -> bool {
        if self.key.is_empty() || self.key.ends_with('/') {
            return true;
        }
        let name = self.key.rsplit('/').next().unwrap_or_default();
        PLACEHOLDER_NAMES.contains(&name)
    }

    /// The entry's key, if it is a well-formed asset key.
    pub fn asset_key(&self) -> Option<AssetKey> {
        AssetKey::parse(&self.key).ok()
    }
}

/// A single page of listing results.
#[derive(Clone, Debug)]
pub struct ListingPage {
    /// Entries in this page, in backend order, placeholders included.
    pub entries: Vec<ListEntry>,

    /// Continuation token for the next page; `None` on the last page.
    pub next_token: Option<ContinuationToken>,
}

/// Backend capabilities for listing operations.
#[derive(Clone, Debug)]
pub struct ListingCapabilities {
    /// Whether the backend can resume a listing from a continuation token.
    pub resumable: bool,
}

/// Options for listing operations.
#[derive(Clone, Debug)]
pub struct ListingOptions {
    /// Number of keys to fetch per page, clamped to
    /// [MIN_PAGE_SIZE, MAX_PAGE_SIZE].
    pub page_size: usize,
}

impl ListingOptions {
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    /// Get the normalized page size.
    pub fn normalized_page_size(&self) -> usize {
        self.page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
    }
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Resume options for listing operations.
#[derive(Clone, Debug)]
pub struct ListingResume {
    /// Continuation token from a previous page of the same listing.
    pub start_token: ContinuationToken,
}

impl ListingResume {
    pub fn new(start_token: ContinuationToken) -> Self {
        Self { start_token }
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct BlobMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<OffsetDateTime>,
    /// Content type (if available).
    pub content_type: Option<String>,
}

/// Result of deleting one key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteStatus {
    Deleted,
    /// The object was already absent. Callers treat this as success.
    NotFound,
    Failed(String),
}

/// Per-key outcome of a batched delete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub key: AssetKey,
    pub status: DeleteStatus,
}

impl DeleteOutcome {
    /// Whether the object is gone after the call.
    pub fn is_success(&self) -> bool {
        !matches!(self.status, DeleteStatus::Failed(_))
    }
}

/// Namespaced blob storage backend.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store an object, replacing any existing object with the same key.
    async fn put(&self, key: &AssetKey, data: Bytes, content_type: Option<&str>)
    -> StorageResult<()>;

    /// Get an object's content.
    async fn get(&self, key: &AssetKey) -> StorageResult<Bytes>;

    /// Get an object's metadata without fetching content.
    async fn head(&self, key: &AssetKey) -> StorageResult<BlobMeta>;

    /// Check if an object exists.
    async fn exists(&self, key: &AssetKey) -> StorageResult<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete an object. Returns `NotFound` if it does not exist.
    async fn delete(&self, key: &AssetKey) -> StorageResult<()>;

    /// Delete several objects, reporting the outcome per key.
    ///
    /// An `Err` means the whole call failed and nothing can be assumed about
    /// individual keys. The default implementation deletes one key at a time.
    async fn delete_many(&self, keys: &[AssetKey]) -> StorageResult<Vec<DeleteOutcome>> {
        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let status = match self.delete(key).await {
                Ok(()) => DeleteStatus::Deleted,
                Err(StorageError::NotFound(_)) => DeleteStatus::NotFound,
                Err(e) => DeleteStatus::Failed(e.to_string()),
            };
            outcomes.push(DeleteOutcome {
                key: key.clone(),
                status,
            });
        }
        Ok(outcomes)
    }

    /// List a namespace page by page.
    ///
    /// Entries are reported exactly as the backend stores them, folder
    /// placeholders included; see [`ListEntry::is_placeholder`]. The stream
    /// ends after the page whose `next_token` is `None`.
    ///
    /// # Errors
    ///
    /// Yields an error if a `resume` token is given to a backend that cannot
    /// resume, if the token is invalid, or on backend failure.
    fn list_pages<'a>(
        &'a self,
        namespace: &Namespace,
        options: ListingOptions,
        resume: Option<ListingResume>,
    ) -> PageStream<'a>;

    /// Static backend identifier used in logs and metrics.
    fn backend_name(&self) -> &'static str;

    fn listing_capabilities(&self) -> ListingCapabilities;

    /// Verify storage backend connectivity.
    ///
    /// Called during server startup. The default implementation returns
    /// `Ok(())`.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str) -> ListEntry {
        ListEntry {
            key: key.to_string(),
            size: None,
            last_modified: None,
        }
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(entry("gallery/.emptyFolderPlaceholder").is_placeholder());
        assert!(entry("gallery/.keep").is_placeholder());
        assert!(entry("gallery/").is_placeholder());
        assert!(entry("gallery/sub/").is_placeholder());
        assert!(!entry("gallery/a.jpg").is_placeholder());
    }

    #[test]
    fn test_entry_asset_key() {
        assert!(entry("gallery/a.jpg").asset_key().is_some());
        assert!(entry("gallery/nested/a.jpg").asset_key().is_none());
        assert!(entry("gallery/.emptyFolderPlaceholder").asset_key().is_none());
    }

    #[test]
    fn test_continuation_token_from_base64_rejects_oversized_input() {
        let huge_base64 = "A".repeat(5000);
        let err = ContinuationToken::from_base64(&huge_base64).unwrap_err();
        assert!(err.to_string().contains("base64 too large"));
    }

    #[test]
    fn test_continuation_token_debug_is_redacted() {
        let token = ContinuationToken::new(b"secret-position".to_vec()).unwrap();
        assert!(!format!("{token:?}").contains("secret"));
        let decoded = ContinuationToken::from_base64(&token.to_base64()).unwrap();
        assert_eq!(decoded, token);
    }

    #[test]
    fn test_page_size_is_clamped() {
        assert_eq!(ListingOptions::new(1).normalized_page_size(), MIN_PAGE_SIZE);
        assert_eq!(ListingOptions::new(1_000_000).normalized_page_size(), MAX_PAGE_SIZE);
        assert_eq!(ListingOptions::default().normalized_page_size(), DEFAULT_PAGE_SIZE);
    }
}
