//! Namespaced blob storage for curator.
//!
//! This crate provides:
//! - The [`BlobStore`] backend trait with paginated, placeholder-aware listing
//! - Backends: local filesystem, S3-compatible and in-memory
//! - [`RetryingStore`], which retries transient backend failures
//! - [`AssetStore`], the adapter the lifecycle layer works against

pub mod adapter;
pub mod backends;
pub mod error;
pub mod retrying;
pub mod traits;

pub use adapter::{AssetStore, ListedAsset};
pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use retrying::RetryingStore;
pub use traits::{
    BlobMeta, BlobStore, ContinuationToken, DeleteOutcome, DeleteStatus, ListEntry,
    ListingCapabilities, ListingOptions, ListingPage, ListingResume, PageStream,
};

use curator_core::Clock;
use curator_core::config::StorageConfig;
use std::sync::Arc;

/// Create a blob store from configuration.
///
/// `clock` stamps objects in the memory backend; other backends use the
/// timestamps their storage reports.
pub async fn from_config(
    config: &StorageConfig,
    clock: Arc<dyn Clock>,
) -> StorageResult<Arc<dyn BlobStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Memory => {
            tracing::warn!("using in-memory blob storage; contents are lost on restart");
            Ok(Arc::new(MemoryBackend::with_clock(clock)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use curator_core::{AssetKey, SystemClock};
    use tempfile::tempdir;

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            path: temp.path().join("blobs"),
        };

        let store = from_config(&config, Arc::new(SystemClock)).await.unwrap();
        let key = AssetKey::parse("gallery/hello.txt").unwrap();
        store.put(&key, Bytes::from_static(b"hi"), None).await.unwrap();
        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.backend_name(), "filesystem");
    }

    #[tokio::test]
    async fn from_config_s3_ok() {
        let config = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: Some("minio:9000".to_string()),
            region: Some("us-east-1".to_string()),
            prefix: Some("curator".to_string()),
            access_key_id: None,
            secret_access_key: None,
            force_path_style: true,
        };

        let store = from_config(&config, Arc::new(SystemClock)).await.unwrap();
        assert_eq!(store.backend_name(), "s3");
    }

    #[tokio::test]
    async fn from_config_memory_ok() {
        let store = from_config(&StorageConfig::Memory, Arc::new(SystemClock))
            .await
            .unwrap();
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn from_config_rejects_partial_credentials() {
        let config = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };

        match from_config(&config, Arc::new(SystemClock)).await {
            Ok(_) => panic!("expected error"),
            Err(StorageError::Config(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}
