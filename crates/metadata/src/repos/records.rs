//! Content record repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use curator_core::{AssetKey, ContentRecord, EntityType};

/// Repository for content records, one table per [`EntityType`].
#[async_trait]
pub trait RecordRepo: Send + Sync {
    /// Get a record by ID.
    async fn get_record(
        &self,
        entity: EntityType,
        id: &str,
    ) -> MetadataResult<Option<ContentRecord>>;

    /// Write a record, conditional on its `version`.
    ///
    /// Version `0` inserts and fails with [`MetadataError::Conflict`] if the
    /// id is taken. Any other version replaces the fields only if the stored
    /// row still carries that version, bumping it by one; otherwise the
    /// write is rejected with `Conflict`. On update the stored `created_at`
    /// is kept and `updated_at` is taken from `record`. Returns the record
    /// as stored.
    ///
    /// [`MetadataError::Conflict`]: crate::MetadataError::Conflict
    async fn upsert_record(
        &self,
        entity: EntityType,
        record: &ContentRecord,
    ) -> MetadataResult<ContentRecord>;

    /// Delete a record. Returns whether a row was removed.
    async fn delete_record(&self, entity: EntityType, id: &str) -> MetadataResult<bool>;

    /// List records ordered by creation time.
    async fn list_records(
        &self,
        entity: EntityType,
        limit: u32,
        offset: u32,
    ) -> MetadataResult<Vec<ContentRecord>>;

    /// Every asset key referenced by records of `entity` (or of every type).
    ///
    /// Only catalogued asset fields are read. Values are normalized to bare
    /// keys; external URLs and unparseable values are dropped. The result is
    /// sorted and deduplicated. A record whose body cannot be decoded fails
    /// the whole scan rather than silently dropping its references.
    async fn scan_asset_refs(&self, entity: Option<EntityType>) -> MetadataResult<Vec<AssetKey>>;
}
