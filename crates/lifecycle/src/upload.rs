//! Storing a new blob and linking it into a record.

use crate::delete::{DeleteCoordinator, MAX_WRITE_ATTEMPTS, ReleaseStatus};
use crate::error::{LifecycleError, LifecycleResult};
use crate::metrics;
use curator_core::{
    AssetField, AssetKey, AssetSlot, Clock, ContentRecord, EntityType, FieldShape, PendingUpload,
    RetryPolicy, validate_record_id,
};
use curator_metadata::{MetadataError, MetadataStore, RecordRepo};
use curator_storage::AssetStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// The record slot an upload is linked into.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTarget {
    pub entity: EntityType,
    pub id: String,
    /// Catalogued field path, e.g. `logo_url` or `home_about.image_1`.
    pub field: String,
    pub slot: AssetSlot,
}

impl LinkTarget {
    pub fn single(entity: EntityType, id: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            entity,
            id: id.into(),
            field: field.into(),
            slot: AssetSlot::Single,
        }
    }

    pub fn item(
        entity: EntityType,
        id: impl Into<String>,
        field: impl Into<String>,
        index: usize,
    ) -> Self {
        Self {
            slot: AssetSlot::Item(index),
            ..Self::single(entity, id, field)
        }
    }
}

/// Result of a successful upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub url: String,
    pub key: AssetKey,
    /// Key previously held by the slot, if it was replaced.
    pub replaced: Option<AssetKey>,
    /// Whether the replaced blob is gone.
    pub released: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_status: Option<ReleaseStatus>,
}

/// Uploads blobs and links their public URLs into records.
#[derive(Clone)]
pub struct UploadCoordinator {
    assets: AssetStore,
    metadata: Arc<dyn MetadataStore>,
    deleter: DeleteCoordinator,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl UploadCoordinator {
    pub fn new(
        assets: AssetStore,
        metadata: Arc<dyn MetadataStore>,
        deleter: DeleteCoordinator,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            assets,
            metadata,
            deleter,
            clock,
            policy,
        }
    }

    /// Store `pending` under a fresh key and write its URL into `target`.
    ///
    /// The blob is stored before the record is touched. If the record write
    /// fails the blob stays behind as an orphan and
    /// [`LifecycleError::LinkFailed`] names it. A replaced key is released
    /// only after the new link is stored; a failed release is reported in
    /// the outcome and does not fail the upload.
    #[instrument(
        skip_all,
        fields(entity = %target.entity, id = %target.id, field = %target.field, size = pending.len())
    )]
    pub async fn upload_and_link(
        &self,
        pending: PendingUpload,
        target: LinkTarget,
    ) -> LifecycleResult<UploadOutcome> {
        validate_record_id(&target.id)?;
        let field = target.entity.asset_field(&target.field)?;
        check_slot_shape(field, target.slot)?;
        let namespace = field.namespace.resolve(pending.namespace.as_ref())?;

        let key = AssetKey::generate(&namespace, &pending.original_name, self.clock.now());
        let url = self
            .assets
            .put(&key, pending.bytes, pending.content_type.as_deref())
            .await
            .map_err(|e| {
                metrics::UPLOAD_FAILURES.inc();
                tracing::warn!(key = %key, error = %e, "blob store rejected upload");
                LifecycleError::UploadFailed(e)
            })?;

        let previous = match self.link(&target, field, &url).await {
            Ok(previous) => previous,
            Err(LinkError::Metadata(source)) => {
                metrics::LINK_FAILURES.inc();
                tracing::warn!(
                    key = %key,
                    error = %source,
                    "record write failed after upload, blob left for the next sweep"
                );
                return Err(LifecycleError::LinkFailed { key, source });
            }
            Err(LinkError::Target(e)) => {
                // Never linked, so nothing can reference it yet.
                if let Err(cleanup) = self.assets.delete(&key).await {
                    tracing::warn!(key = %key, error = %cleanup, "failed to remove unlinked upload");
                }
                return Err(e.into());
            }
        };

        metrics::UPLOADS_LINKED
            .with_label_values(&[namespace.as_str()])
            .inc();
        tracing::info!(key = %key, "upload linked");

        let replaced = previous
            .as_deref()
            .and_then(|raw| self.assets.resolver().key_from_ref(raw))
            .filter(|old| *old != key);
        let release_status = match &replaced {
            Some(old) => Some(self.deleter.release(old).await),
            None => None,
        };

        Ok(UploadOutcome {
            url,
            key,
            released: release_status.as_ref().is_some_and(ReleaseStatus::is_gone),
            replaced,
            release_status,
        })
    }

    /// Write `url` into the target slot, returning the previous reference.
    ///
    /// The write is conditional on the version that was read; when another
    /// writer gets in first the record is read again and the slot reapplied,
    /// up to [`MAX_WRITE_ATTEMPTS`] times.
    async fn link(
        &self,
        target: &LinkTarget,
        field: &AssetField,
        url: &str,
    ) -> Result<Option<String>, LinkError> {
        let mut attempt = 1;
        loop {
            let now = self.clock.now();
            let existing = self
                .policy
                .run("metadata.get_record", MetadataError::is_transient, || {
                    self.metadata.get_record(target.entity, &target.id)
                })
                .await
                .map_err(LinkError::Metadata)?;

            let mut record = match existing {
                Some(record) => record,
                None => ContentRecord::new(target.id.as_str(), now).map_err(LinkError::Target)?,
            };
            let previous = record
                .set_slot(field, target.slot, Some(url.to_string()))
                .map_err(LinkError::Target)?;
            record.updated_at = now;

            match self
                .policy
                .run("metadata.upsert_record", MetadataError::is_transient, || {
                    self.metadata.upsert_record(target.entity, &record)
                })
                .await
            {
                Ok(_) => return Ok(previous),
                Err(MetadataError::Conflict(reason)) if attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::debug!(attempt, reason, "record changed underneath, reapplying link");
                    attempt += 1;
                }
                Err(e) => return Err(LinkError::Metadata(e)),
            }
        }
    }
}

enum LinkError {
    Metadata(MetadataError),
    Target(curator_core::Error),
}

fn check_slot_shape(field: &AssetField, slot: AssetSlot) -> LifecycleResult<()> {
    match (field.shape, slot) {
        (FieldShape::Single, AssetSlot::Single) | (FieldShape::List { .. }, AssetSlot::Item(_)) => {
            Ok(())
        }
        (FieldShape::Single, AssetSlot::Item(_)) => Err(LifecycleError::InvalidTarget(format!(
            "{} holds a single reference",
            field.path
        ))),
        (FieldShape::List { .. }, AssetSlot::Single) => Err(LifecycleError::InvalidTarget(
            format!("{} is a list and needs an item index", field.path),
        )),
    }
}
