//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("invalid asset key: {0}")]
    InvalidAssetKey(String),

    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("entity type {entity} has no asset field {field}")]
    UnknownAssetField { entity: String, field: String },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid asset slot: {0}")]
    InvalidSlot(String),

    #[error("namespace {requested} does not match field namespace {expected}")]
    NamespaceMismatch { requested: String, expected: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
