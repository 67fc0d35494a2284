//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use axum::extract::Request;
use curator_core::EntityType;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Largest JSON body accepted by record and admin endpoints.
pub const MAX_JSON_BODY_SIZE: usize = 1024 * 1024;

/// Parse an `{entity_type}` path segment.
pub fn parse_entity(raw: &str) -> ApiResult<EntityType> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("unknown entity type: {raw}")))
}

/// Read and parse a JSON request body.
pub async fn read_json<T: DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_JSON_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Refuse destructive requests that did not pass `confirm=true`.
pub fn require_confirm(confirm: Option<bool>, action: &str) -> ApiResult<()> {
    if confirm == Some(true) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!(
            "{action} is destructive; repeat with confirm=true"
        )))
    }
}

pub fn format_timestamp(ts: OffsetDateTime) -> ApiResult<String> {
    ts.format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format timestamp: {e}")))
}
