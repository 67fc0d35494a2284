//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    BlobMeta, BlobStore, ListEntry, ListingCapabilities, ListingOptions, ListingPage,
    ListingResume, PageStream,
};
use async_trait::async_trait;
use bytes::Bytes;
use curator_core::{AssetKey, Namespace};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Local filesystem blob store. Each namespace is a directory under the root.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the full path for a key, with path traversal protection.
    ///
    /// Runs `key_path_sync` on the blocking pool; it calls `canonicalize` and
    /// `symlink_metadata`.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Resolve `key` below `root`, rejecting anything that would escape it,
    /// including through symlinks.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }

        for component in Path::new(key).components() {
            if !matches!(component, std::path::Component::Normal(_)) {
                return Err(StorageError::InvalidKey(format!(
                    "contains unsafe path component: {key}"
                )));
            }
        }

        let path = root.join(key);
        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        // Existing paths (and broken symlinks) must resolve inside the root.
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                let canonical = path.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!(
                            "symlink target missing or invalid: {key}"
                        ))
                    } else {
                        StorageError::Io(std::io::Error::new(
                            e.kind(),
                            format!("failed to canonicalize path: {e}"),
                        ))
                    }
                })?;

                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }
                return Ok(path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(StorageError::Io(std::io::Error::new(
                    err.kind(),
                    format!("failed to stat path: {err}"),
                )));
            }
        }

        // New paths: the nearest existing ancestor must resolve inside the root,
        // otherwise create_dir_all could follow a symlinked namespace directory.
        let mut ancestor = path.as_path();
        while let Some(parent) = ancestor.parent() {
            match std::fs::symlink_metadata(parent) {
                Ok(meta) => {
                    let parent_canonical = parent.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "ancestor symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(std::io::Error::new(
                                e.kind(),
                                format!("failed to canonicalize ancestor: {e}"),
                            ))
                        }
                    })?;

                    if !parent_canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "ancestor path escapes storage root: {key}"
                        )));
                    }
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(StorageError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to stat ancestor: {err}"),
                    )));
                }
            }
            ancestor = parent;
        }

        Ok(path)
    }

    fn map_not_found(key: &AssetKey, e: std::io::Error) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self, data), fields(backend = "filesystem", key = %key, size = data.len()))]
    async fn put(
        &self,
        key: &AssetKey,
        data: Bytes,
        _content_type: Option<&str>,
    ) -> StorageResult<()> {
        let path = self.key_path(&key.to_key_string()).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a uniquely named sibling, fsync, then rename.
        let temp_path = path.with_file_name(format!("{}.tmp.{}", key.name(), Uuid::new_v4()));
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &path).await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem", key = %key))]
    async fn get(&self, key: &AssetKey) -> StorageResult<Bytes> {
        let path = self.key_path(&key.to_key_string()).await?;
        let data = fs::read(&path)
            .await
            .map_err(|e| Self::map_not_found(key, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem", key = %key))]
    async fn head(&self, key: &AssetKey) -> StorageResult<BlobMeta> {
        let path = self.key_path(&key.to_key_string()).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| Self::map_not_found(key, e))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(BlobMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(OffsetDateTime::from),
            content_type: None,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem", key = %key))]
    async fn delete(&self, key: &AssetKey) -> StorageResult<()> {
        let path = self.key_path(&key.to_key_string()).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| Self::map_not_found(key, e))
    }

    fn list_pages<'a>(
        &'a self,
        namespace: &Namespace,
        options: ListingOptions,
        resume: Option<ListingResume>,
    ) -> PageStream<'a> {
        if resume.is_some() {
            return Box::pin(futures::stream::once(async {
                Err(StorageError::ListingNotResumable)
            }));
        }

        let root = self.root.clone();
        let namespace = namespace.as_str().to_string();
        let page_size = options.normalized_page_size();

        let stream = async_stream::try_stream! {
            let base_path = self.key_path(&namespace).await?;

            let base_path_exists = match fs::try_exists(&base_path).await {
                Ok(exists) => exists,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => Err(StorageError::Io(e))?,
            };
            if !base_path_exists {
                yield ListingPage { entries: Vec::new(), next_token: None };
                return;
            }

            let mut stack = vec![base_path];
            let mut current_page = Vec::with_capacity(page_size);

            while let Some(dir) = stack.pop() {
                let mut entries = fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    // file_type() does not follow symlinks; symlinks are skipped.
                    let file_type = entry.file_type().await?;
                    if file_type.is_dir() {
                        stack.push(path);
                    } else if file_type.is_file()
                        && let Ok(rel) = path.strip_prefix(&root)
                    {
                        let metadata = entry.metadata().await?;
                        current_page.push(ListEntry {
                            key: rel.to_string_lossy().replace('\\', "/"),
                            size: Some(metadata.len()),
                            last_modified: metadata.modified().ok().map(OffsetDateTime::from),
                        });

                        if current_page.len() >= page_size {
                            yield ListingPage {
                                entries: std::mem::replace(
                                    &mut current_page,
                                    Vec::with_capacity(page_size),
                                ),
                                next_token: None,
                            };
                        }
                    }
                }
            }

            yield ListingPage {
                entries: current_page,
                next_token: None,
            };
        };

        Box::pin(stream)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    fn listing_capabilities(&self) -> ListingCapabilities {
        ListingCapabilities { resumable: false }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}
