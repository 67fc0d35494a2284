//! Asset lifecycle coordination for curator.
//!
//! - [`UploadCoordinator`]: store a blob, then link its URL into a record
//! - [`DeleteCoordinator`]: clear a reference, then delete the blob
//! - [`ReconciliationEngine`]: sweep a namespace for orphaned blobs
//!
//! All three share one ordering rule: the record is written before the
//! blob is deleted, so failures leave orphans for the next sweep instead of
//! records that point at missing objects.

pub mod delete;
pub mod error;
pub mod metrics;
pub mod reconcile;
pub mod reference_index;
pub mod upload;

pub use delete::{
    DeleteCoordinator, RecordDeleteOutcome, ReleaseReport, ReleaseStatus, UnlinkOutcome,
    UpsertOutcome,
};
pub use error::{ItemError, LifecycleError, LifecycleResult};
pub use reconcile::{ReconciliationEngine, SweepMode, SweepReport, SweepRequest, SweepStatus};
pub use reference_index::{ReferenceIndex, ReferenceSnapshot};
pub use upload::{LinkTarget, UploadCoordinator, UploadOutcome};

use curator_core::config::{LifecycleConfig, ReconcileConfig};
use curator_core::{Clock, RetryPolicy};
use curator_metadata::MetadataStore;
use curator_storage::AssetStore;
use std::sync::Arc;

/// The coordinators and the engine wired over the same stores.
#[derive(Clone)]
pub struct Lifecycle {
    pub uploads: UploadCoordinator,
    pub deletes: DeleteCoordinator,
    pub reconciler: ReconciliationEngine,
}

impl Lifecycle {
    pub fn new(
        assets: AssetStore,
        metadata: Arc<dyn MetadataStore>,
        clock: Arc<dyn Clock>,
        reconcile: ReconcileConfig,
        lifecycle: &LifecycleConfig,
        policy: RetryPolicy,
    ) -> Self {
        let deletes = DeleteCoordinator::new(assets.clone(), metadata.clone(), clock.clone(), policy)
            .with_shared_guard(lifecycle.guard_shared_references);
        let uploads = UploadCoordinator::new(
            assets.clone(),
            metadata.clone(),
            deletes.clone(),
            clock.clone(),
            policy,
        );
        let reconciler = ReconciliationEngine::new(assets, metadata, clock, reconcile, policy);
        Self {
            uploads,
            deletes,
            reconciler,
        }
    }
}
