//! Unlinking references and deleting the blobs they pointed at.
//!
//! Every path here updates the record first and deletes the blob second. A
//! crash in between leaves an unreferenced blob for the next sweep, never a
//! record pointing at a missing object.

use crate::error::{ItemError, LifecycleError, LifecycleResult};
use crate::metrics;
use crate::reference_index::ReferenceIndex;
use curator_core::{AssetKey, AssetSlot, Clock, ContentRecord, EntityType, RetryPolicy};
use curator_metadata::{MetadataError, MetadataStore, RecordRepo};
use curator_storage::{AssetStore, DeleteStatus};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::instrument;

/// Read-modify-write attempts before a slot edit gives up on a record that
/// keeps changing underneath it.
pub(crate) const MAX_WRITE_ATTEMPTS: u32 = 5;

/// What happened to one released blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ReleaseStatus {
    Deleted,
    /// The blob was already gone.
    AlreadyGone,
    /// Another record still references the key; the blob was kept.
    RetainedShared,
    Failed(String),
}

impl ReleaseStatus {
    fn label(&self) -> &'static str {
        match self {
            Self::Deleted => "deleted",
            Self::AlreadyGone => "already_gone",
            Self::RetainedShared => "retained_shared",
            Self::Failed(_) => "failed",
        }
    }

    /// Whether the blob is gone after the release.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Deleted | Self::AlreadyGone)
    }
}

/// Outcome of releasing several keys at once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseReport {
    /// Keys whose blobs are gone (deleted now or already missing).
    pub released: Vec<AssetKey>,
    pub retained_shared: Vec<AssetKey>,
    pub failed: Vec<ItemError>,
}

impl ReleaseReport {
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.retained_shared.is_empty() && self.failed.is_empty()
    }
}

/// Result of [`DeleteCoordinator::unlink_and_delete`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnlinkOutcome {
    pub key: AssetKey,
    /// Whether the slot was cleared by this call.
    pub record_updated: bool,
    pub blob: ReleaseStatus,
}

/// Result of [`DeleteCoordinator::delete_record`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordDeleteOutcome {
    pub entity: EntityType,
    pub id: String,
    pub existed: bool,
    pub assets: ReleaseReport,
}

/// Result of [`DeleteCoordinator::upsert_and_release`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpsertOutcome {
    pub record: ContentRecord,
    pub assets: ReleaseReport,
}

/// Removes asset references from records and deletes the blobs behind them.
#[derive(Clone)]
pub struct DeleteCoordinator {
    assets: AssetStore,
    metadata: Arc<dyn MetadataStore>,
    index: ReferenceIndex,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    guard_shared: bool,
}

impl DeleteCoordinator {
    pub fn new(
        assets: AssetStore,
        metadata: Arc<dyn MetadataStore>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            index: ReferenceIndex::new(metadata.clone(), policy),
            assets,
            metadata,
            clock,
            policy,
            guard_shared: true,
        }
    }

    /// Toggle the re-check that keeps blobs still referenced elsewhere.
    pub fn with_shared_guard(mut self, enabled: bool) -> Self {
        self.guard_shared = enabled;
        self
    }

    /// Clear `key` from a record slot, then delete its blob.
    ///
    /// A missing record or an already-cleared slot still deletes the blob.
    /// A slot holding anything else fails with
    /// [`LifecycleError::ReferenceMismatch`] before anything is touched.
    #[instrument(skip_all, fields(entity = %entity, id = %id, field = %field, key = %key))]
    pub async fn unlink_and_delete(
        &self,
        entity: EntityType,
        id: &str,
        field: &str,
        slot: AssetSlot,
        key: &AssetKey,
    ) -> LifecycleResult<UnlinkOutcome> {
        let asset_field = entity.asset_field(field)?;
        let mut record_updated = false;
        let mut attempt = 1;

        while let Some(mut record) = self.get_record(entity, id).await? {
            let current = record.slot_value(asset_field, slot)?.map(str::to_string);
            let Some(raw) = current else {
                tracing::debug!("slot already cleared, deleting blob only");
                break;
            };
            if self.assets.resolver().key_from_ref(&raw).as_ref() != Some(key) {
                return Err(LifecycleError::ReferenceMismatch {
                    expected: key.clone(),
                    found: raw,
                });
            }
            record.set_slot(asset_field, slot, None)?;
            record.updated_at = self.clock.now();
            match self.upsert(entity, &record).await {
                Ok(_) => {
                    record_updated = true;
                    break;
                }
                Err(MetadataError::Conflict(reason)) if attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::debug!(attempt, reason, "record changed underneath, re-reading");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        let blob = self.release(key).await;
        Ok(UnlinkOutcome {
            key: key.clone(),
            record_updated,
            blob,
        })
    }

    /// Delete a record, then every blob it referenced.
    #[instrument(skip_all, fields(entity = %entity, id = %id))]
    pub async fn delete_record(
        &self,
        entity: EntityType,
        id: &str,
    ) -> LifecycleResult<RecordDeleteOutcome> {
        let Some(record) = self.get_record(entity, id).await? else {
            return Ok(RecordDeleteOutcome {
                entity,
                id: id.to_string(),
                existed: false,
                assets: ReleaseReport::default(),
            });
        };

        let keys = record.referenced_keys(entity, self.assets.resolver());
        let existed = self
            .policy
            .run("metadata.delete_record", MetadataError::is_transient, || {
                self.metadata.delete_record(entity, id)
            })
            .await?;

        let assets = self.release_all(&keys).await;
        tracing::info!(
            released = assets.released.len(),
            retained = assets.retained_shared.len(),
            failed = assets.failed.len(),
            "record deleted"
        );
        Ok(RecordDeleteOutcome {
            entity,
            id: id.to_string(),
            existed,
            assets,
        })
    }

    /// Store `record`, then release every key the previous version
    /// referenced that the new one does not.
    ///
    /// `record.version` is the version the caller last read (`0` to
    /// create). If the stored record has moved on, nothing is written and
    /// the call fails with [`MetadataError::Conflict`], so a stale body can
    /// never bring back a reference whose blob was already released.
    #[instrument(skip_all, fields(entity = %entity, id = %record.id, version = record.version))]
    pub async fn upsert_and_release(
        &self,
        entity: EntityType,
        mut record: ContentRecord,
    ) -> LifecycleResult<UpsertOutcome> {
        let resolver = self.assets.resolver();
        let previous = self.get_record(entity, &record.id).await?;
        let current_version = previous.as_ref().map_or(0, |p| p.version);
        if current_version != record.version {
            return Err(MetadataError::Conflict(format!(
                "{entity} record {} is at version {current_version}, write was based on version {}",
                record.id, record.version
            ))
            .into());
        }

        record.updated_at = self.clock.now();
        let stored = self.upsert(entity, &record).await?;

        let dropped: Vec<AssetKey> = match previous {
            Some(previous) => {
                let kept: BTreeSet<AssetKey> =
                    stored.referenced_keys(entity, resolver).into_iter().collect();
                previous
                    .referenced_keys(entity, resolver)
                    .into_iter()
                    .filter(|key| !kept.contains(key))
                    .collect()
            }
            None => Vec::new(),
        };

        let assets = self.release_all(&dropped).await;
        Ok(UpsertOutcome {
            record: stored,
            assets,
        })
    }

    /// Delete a blob the caller no longer references.
    ///
    /// Never fails: problems are reported in the returned status and leave
    /// the blob for the next sweep.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn release(&self, key: &AssetKey) -> ReleaseStatus {
        let status = match self.shared_keys(std::slice::from_ref(key)).await {
            Err(e) => ReleaseStatus::Failed(format!("reference check failed: {e}")),
            Ok(shared) if shared.contains(key) => ReleaseStatus::RetainedShared,
            Ok(_) => match self.assets.delete(key).await {
                Ok(DeleteStatus::Deleted) => ReleaseStatus::Deleted,
                Ok(DeleteStatus::NotFound) => ReleaseStatus::AlreadyGone,
                Ok(DeleteStatus::Failed(reason)) => ReleaseStatus::Failed(reason),
                Err(e) => ReleaseStatus::Failed(e.to_string()),
            },
        };

        metrics::BLOBS_RELEASED
            .with_label_values(&[status.label()])
            .inc();
        match &status {
            ReleaseStatus::Failed(reason) => {
                tracing::warn!(reason, "blob release failed, leaving it for the next sweep");
            }
            ReleaseStatus::RetainedShared => {
                tracing::info!("blob still referenced elsewhere, keeping it");
            }
            _ => tracing::debug!(status = status.label(), "blob released"),
        }
        status
    }

    /// Release several keys with one batched delete.
    pub async fn release_all(&self, keys: &[AssetKey]) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        if keys.is_empty() {
            return report;
        }

        let shared = match self.shared_keys(keys).await {
            Ok(shared) => shared,
            Err(e) => {
                tracing::warn!(error = %e, count = keys.len(), "reference check failed, keeping blobs");
                report.failed = keys
                    .iter()
                    .map(|key| ItemError::for_key(key.clone(), format!("reference check failed: {e}")))
                    .collect();
                metrics::BLOBS_RELEASED
                    .with_label_values(&["failed"])
                    .inc_by(keys.len() as u64);
                return report;
            }
        };

        let (retained, to_delete): (Vec<AssetKey>, Vec<AssetKey>) =
            keys.iter().cloned().partition(|key| shared.contains(key));
        report.retained_shared = retained;

        match self.assets.delete_keys(&to_delete).await {
            Ok(outcomes) => {
                for outcome in outcomes {
                    match outcome.status {
                        DeleteStatus::Deleted | DeleteStatus::NotFound => {
                            report.released.push(outcome.key)
                        }
                        DeleteStatus::Failed(reason) => {
                            report.failed.push(ItemError::for_key(outcome.key, reason))
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, count = to_delete.len(), "batched release failed");
                report.failed.extend(
                    to_delete
                        .into_iter()
                        .map(|key| ItemError::for_key(key, e.to_string())),
                );
            }
        }

        metrics::BLOBS_RELEASED
            .with_label_values(&["deleted"])
            .inc_by(report.released.len() as u64);
        metrics::BLOBS_RELEASED
            .with_label_values(&["retained_shared"])
            .inc_by(report.retained_shared.len() as u64);
        metrics::BLOBS_RELEASED
            .with_label_values(&["failed"])
            .inc_by(report.failed.len() as u64);
        report
    }

    async fn shared_keys(&self, keys: &[AssetKey]) -> LifecycleResult<BTreeSet<AssetKey>> {
        if !self.guard_shared {
            return Ok(BTreeSet::new());
        }
        self.index.referenced_subset(keys).await
    }

    async fn get_record(
        &self,
        entity: EntityType,
        id: &str,
    ) -> LifecycleResult<Option<ContentRecord>> {
        Ok(self
            .policy
            .run("metadata.get_record", MetadataError::is_transient, || {
                self.metadata.get_record(entity, id)
            })
            .await?)
    }

    async fn upsert(
        &self,
        entity: EntityType,
        record: &ContentRecord,
    ) -> Result<ContentRecord, MetadataError> {
        self.policy
            .run("metadata.upsert_record", MetadataError::is_transient, || {
                self.metadata.upsert_record(entity, record)
            })
            .await
    }
}
