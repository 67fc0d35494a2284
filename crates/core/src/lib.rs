//! Core domain types and shared logic for curator.
//!
//! This crate defines the data model used across all other crates:
//! - Namespaces, asset keys and public URL resolution
//! - Entity types and the static catalog of asset-bearing fields
//! - Content records and their asset slots
//! - Clock and retry primitives
//! - Configuration

pub mod asset;
pub mod clock;
pub mod config;
pub mod entity;
pub mod error;
pub mod record;
pub mod retry;

pub use asset::{AssetKey, Namespace, PendingUpload, PublicUrlResolver};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::{AssetField, EntityType, FieldShape, NamespaceRule};
pub use error::{Error, Result};
pub use record::{AssetSlot, ContentRecord, field_refs, referenced_keys_in, validate_record_id};
pub use retry::RetryPolicy;
