//! Live asset keys derived from the content records.

use crate::error::LifecycleResult;
use curator_core::{AssetKey, EntityType, Namespace, RetryPolicy};
use curator_metadata::{MetadataError, MetadataStore, RecordRepo};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Keys referenced by records at one point in time.
///
/// Never persisted. Assets linked after the scan are protected by the sweep
/// grace window, not by the snapshot.
#[derive(Clone, Debug, Default)]
pub struct ReferenceSnapshot {
    keys: BTreeSet<AssetKey>,
    entities: Vec<EntityType>,
}

impl ReferenceSnapshot {
    pub fn contains(&self, key: &AssetKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Entity types that were scanned.
    pub fn entities(&self) -> &[EntityType] {
        &self.entities
    }

    pub fn keys(&self) -> impl Iterator<Item = &AssetKey> {
        self.keys.iter()
    }
}

/// Scans records through the metadata repository.
#[derive(Clone)]
pub struct ReferenceIndex {
    metadata: Arc<dyn MetadataStore>,
    policy: RetryPolicy,
}

impl ReferenceIndex {
    pub fn new(metadata: Arc<dyn MetadataStore>, policy: RetryPolicy) -> Self {
        Self { metadata, policy }
    }

    /// Entity types scanned for a sweep of `namespace`.
    ///
    /// A filter is widened to every type whose fields may store into the
    /// namespace, so a narrow filter cannot expose another type's live asset.
    pub fn scan_scope(namespace: &Namespace, filter: Option<EntityType>) -> Vec<EntityType> {
        match filter {
            None => EntityType::ALL.to_vec(),
            Some(entity) => {
                let mut scope = EntityType::referencing(namespace);
                if !scope.contains(&entity) {
                    scope.push(entity);
                }
                scope.sort();
                scope
            }
        }
    }

    /// Keys in `namespace` referenced by any record in the widened scope.
    #[tracing::instrument(skip(self), fields(namespace = %namespace))]
    pub async fn snapshot(
        &self,
        namespace: &Namespace,
        filter: Option<EntityType>,
    ) -> LifecycleResult<ReferenceSnapshot> {
        let entities = Self::scan_scope(namespace, filter);
        let mut keys = BTreeSet::new();

        if filter.is_none() {
            keys.extend(self.scan(None).await?);
        } else {
            for entity in &entities {
                keys.extend(self.scan(Some(*entity)).await?);
            }
        }
        keys.retain(|key| key.namespace() == namespace);

        tracing::debug!(
            referenced = keys.len(),
            entities = entities.len(),
            "reference snapshot taken"
        );
        Ok(ReferenceSnapshot { keys, entities })
    }

    /// Whether any record that may hold keys of this namespace references `key`.
    pub async fn is_referenced(&self, key: &AssetKey) -> LifecycleResult<bool> {
        Ok(self
            .referenced_subset(std::slice::from_ref(key))
            .await?
            .contains(key))
    }

    /// The subset of `keys` still referenced by some record.
    ///
    /// Only entity types that may store into the keys' namespaces are scanned.
    pub async fn referenced_subset(
        &self,
        keys: &[AssetKey],
    ) -> LifecycleResult<BTreeSet<AssetKey>> {
        let wanted: BTreeSet<&AssetKey> = keys.iter().collect();
        let entities: BTreeSet<EntityType> = keys
            .iter()
            .flat_map(|key| EntityType::referencing(key.namespace()))
            .collect();

        let mut found = BTreeSet::new();
        for entity in entities {
            found.extend(
                self.scan(Some(entity))
                    .await?
                    .into_iter()
                    .filter(|key| wanted.contains(key)),
            );
            if found.len() == wanted.len() {
                break;
            }
        }
        Ok(found)
    }

    async fn scan(&self, entity: Option<EntityType>) -> LifecycleResult<Vec<AssetKey>> {
        let keys = self
            .policy
            .run("metadata.scan_asset_refs", MetadataError::is_transient, || {
                self.metadata.scan_asset_refs(entity)
            })
            .await?;
        Ok(keys)
    }
}
