//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use curator_core::{ContentRecord, EntityType};
use serde_json::{Map, Value};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Content records
// =============================================================================

/// One row of an entity table. The record body is stored as JSON text.
#[derive(Debug, Clone, FromRow)]
pub struct RecordRow {
    pub id: String,
    pub fields_json: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub version: i64,
}

impl RecordRow {
    pub fn from_record(record: &ContentRecord) -> MetadataResult<Self> {
        Ok(Self {
            id: record.id.clone(),
            fields_json: serde_json::to_string(&record.fields)?,
            created_at: record.created_at,
            updated_at: record.updated_at,
            version: record.version,
        })
    }

    pub fn into_record(self) -> MetadataResult<ContentRecord> {
        let fields = parse_fields(&self.id, &self.fields_json)?;
        Ok(ContentRecord {
            id: self.id,
            fields,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}

/// `id` and body only; what a reference scan needs.
#[derive(Debug, Clone, FromRow)]
pub struct RecordBodyRow {
    pub id: String,
    pub fields_json: String,
}

/// Error for a conditional record write that matched no row.
pub(crate) fn write_conflict(entity: EntityType, row: &RecordRow) -> MetadataError {
    if row.version == 0 {
        MetadataError::Conflict(format!("{} record {} already exists", entity.as_str(), row.id))
    } else {
        MetadataError::Conflict(format!(
            "{} record {} changed since version {} or no longer exists",
            entity.as_str(),
            row.id,
            row.version
        ))
    }
}

pub(crate) fn parse_fields(id: &str, json: &str) -> MetadataResult<Map<String, Value>> {
    match serde_json::from_str::<Value>(json)? {
        Value::Object(map) => Ok(map),
        other => Err(MetadataError::Serialization(format!(
            "record {id} body is not a JSON object (found {})",
            match other {
                Value::Null => "null",
                Value::Bool(_) => "bool",
                Value::Number(_) => "number",
                Value::String(_) => "string",
                Value::Array(_) => "array",
                Value::Object(_) => "object",
            }
        ))),
    }
}

// =============================================================================
// Sweep runs
// =============================================================================

/// Persisted reconciliation run.
///
/// At most one row per namespace may be `running`; the schema enforces it.
#[derive(Debug, Clone, FromRow)]
pub struct SweepRunRow {
    pub run_id: Uuid,
    pub namespace: String,
    pub mode: String,
    pub state: String,
    pub started_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
    pub report_json: Option<String>,
    pub error: Option<String>,
}

/// Sweep run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepRunState {
    Running,
    Completed,
    /// Completed, but some deletes failed.
    PartialFailure,
    Cancelled,
    Failed,
}

impl SweepRunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartialFailure => "partial_failure",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "partial_failure" => Some(Self::PartialFailure),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
