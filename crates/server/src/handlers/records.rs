//! Content record endpoints.

use crate::auth::require_admin;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{parse_entity, read_json, require_confirm};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::HeaderValue;
use axum::http::header::IF_MATCH;
use curator_core::{Clock, ContentRecord, EntityType};
use curator_lifecycle::{RecordDeleteOutcome, UpsertOutcome};
use curator_metadata::RecordRepo;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const DEFAULT_PAGE_LIMIT: u32 = 50;
const MAX_PAGE_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct ListRecordsParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListRecordsResponse {
    pub entity_type: EntityType,
    pub records: Vec<ContentRecord>,
}

/// GET /v1/records/{entity_type}
pub async fn list_records(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(params): Query<ListRecordsParams>,
    req: Request,
) -> ApiResult<Json<ListRecordsResponse>> {
    require_admin(&req)?;
    let entity = parse_entity(&entity)?;
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT);

    let records = state
        .metadata
        .list_records(entity, limit, params.offset.unwrap_or(0))
        .await?;
    Ok(Json(ListRecordsResponse {
        entity_type: entity,
        records,
    }))
}

/// GET /v1/records/{entity_type}/{id}
pub async fn get_record(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    req: Request,
) -> ApiResult<Json<ContentRecord>> {
    require_admin(&req)?;
    let entity = parse_entity(&entity)?;

    let record = state
        .metadata
        .get_record(entity, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("{entity} record {id} not found")))?;
    Ok(Json(record))
}

/// PUT /v1/records/{entity_type}/{id} - Replace a record's fields.
///
/// Updating an existing record requires `If-Match` with the version last
/// read; without it the request only creates. A stale version is rejected
/// with 409. Assets referenced by the previous version and not by the new
/// one are released after the write.
pub async fn put_record(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    req: Request,
) -> ApiResult<Json<UpsertOutcome>> {
    require_admin(&req)?;
    let entity = parse_entity(&entity)?;
    let version = match req.headers().get(IF_MATCH) {
        Some(value) => parse_if_match(value)?,
        None => 0,
    };
    let fields: Map<String, Value> = match read_json::<Value>(req).await? {
        Value::Object(fields) => fields,
        _ => {
            return Err(ApiError::BadRequest(
                "record body must be a JSON object".to_string(),
            ));
        }
    };

    let mut record = ContentRecord::from_fields(id, fields, state.clock.now())?;
    record.version = version;
    let outcome = state
        .lifecycle
        .deletes
        .upsert_and_release(entity, record)
        .await?;
    Ok(Json(outcome))
}

/// Parse an `If-Match` value such as `"3"` or `W/"3"` into a record version.
fn parse_if_match(value: &HeaderValue) -> ApiResult<i64> {
    let raw = value
        .to_str()
        .map_err(|_| ApiError::BadRequest("If-Match is not valid text".to_string()))?
        .trim();
    let tag = raw.strip_prefix("W/").unwrap_or(raw).trim_matches('"');
    match tag.parse::<i64>() {
        Ok(version) if version > 0 => Ok(version),
        _ => Err(ApiError::BadRequest(format!(
            "If-Match must carry a record version, got {raw}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmParams {
    pub confirm: Option<bool>,
}

/// DELETE /v1/records/{entity_type}/{id}?confirm=true
pub async fn delete_record(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    Query(params): Query<ConfirmParams>,
    req: Request,
) -> ApiResult<Json<RecordDeleteOutcome>> {
    require_admin(&req)?;
    let entity = parse_entity(&entity)?;
    require_confirm(params.confirm, "record deletion")?;

    let outcome = state.lifecycle.deletes.delete_record(entity, &id).await?;
    if !outcome.existed {
        return Err(ApiError::NotFound(format!("{entity} record {id} not found")));
    }
    Ok(Json(outcome))
}
