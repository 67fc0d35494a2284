//! Error types for the lifecycle coordinators and the reconciliation engine.

use crate::reconcile::SweepReport;
use curator_core::{AssetKey, Namespace};
use curator_metadata::MetadataError;
use curator_storage::StorageError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Lifecycle operation errors.
///
/// A missing blob on delete is not an error: it is reported as
/// [`curator_storage::DeleteStatus::NotFound`] and treated as success.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Unknown field, bad record id or an unusable slot. Nothing was touched.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// The blob store rejected the write. No record was modified.
    #[error("upload failed: {0}")]
    UploadFailed(#[source] StorageError),

    /// The blob was stored but the record write failed. The blob is left
    /// for the next sweep.
    #[error("link failed for {key}: {source}")]
    LinkFailed {
        key: AssetKey,
        #[source]
        source: MetadataError,
    },

    /// The slot references something other than the key being unlinked.
    #[error("slot references {found:?}, not {expected}")]
    ReferenceMismatch { expected: AssetKey, found: String },

    #[error("a sweep of namespace {namespace} is already in progress")]
    SweepInProgress { namespace: Namespace },

    /// Some deletes failed. The report lists what was actually removed.
    #[error("sweep of {} finished with {} failed deletes", .report.namespace, .report.errors.len())]
    PartialSweepFailure { report: Box<SweepReport> },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

impl From<curator_core::Error> for LifecycleError {
    fn from(err: curator_core::Error) -> Self {
        Self::InvalidTarget(err.to_string())
    }
}

/// Result type alias for lifecycle operations.
pub type LifecycleResult<T> = std::result::Result<T, LifecycleError>;

/// A failure tied to one key (or to no key in particular).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<AssetKey>,
    pub message: String,
}

impl ItemError {
    pub fn for_key(key: AssetKey, message: impl Into<String>) -> Self {
        Self {
            key: Some(key),
            message: message.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self {
            key: None,
            message: message.into(),
        }
    }
}
