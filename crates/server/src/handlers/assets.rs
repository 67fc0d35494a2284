//! Asset upload, unlink and public serving.

use crate::auth::require_admin;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{parse_entity, require_confirm};
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use curator_core::{AssetKey, AssetSlot, Namespace, PendingUpload};
use curator_lifecycle::{LinkTarget, UnlinkOutcome, UploadOutcome};
use curator_storage::StorageError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    /// Original file name; only its extension survives into the key.
    pub filename: String,
    /// Target namespace for fields without a fixed one.
    pub namespace: Option<String>,
    /// Item index for list fields.
    pub index: Option<usize>,
}

fn slot_for(index: Option<usize>) -> AssetSlot {
    index.map_or(AssetSlot::Single, AssetSlot::Item)
}

/// PUT /v1/records/{entity_type}/{id}/assets/{field} - Upload and link.
///
/// The raw request body is the blob.
pub async fn upload_asset(
    State(state): State<AppState>,
    Path((entity, id, field)): Path<(String, String, String)>,
    Query(params): Query<UploadParams>,
    req: Request,
) -> ApiResult<(StatusCode, Json<UploadOutcome>)> {
    require_admin(&req)?;
    let entity = parse_entity(&entity)?;
    let namespace = params.namespace.map(Namespace::new).transpose()?;
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let limit = state.config.server.max_upload_bytes;
    let bytes = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|_| ApiError::PayloadTooLarge(format!("upload exceeds {limit} bytes")))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("upload body is empty".to_string()));
    }

    let mut pending = PendingUpload::new(params.filename, bytes);
    if let Some(namespace) = namespace {
        pending = pending.with_namespace(namespace);
    }
    if let Some(content_type) = content_type {
        pending = pending.with_content_type(content_type);
    }

    let target = LinkTarget {
        entity,
        id,
        field,
        slot: slot_for(params.index),
    };
    let outcome = state.lifecycle.uploads.upload_and_link(pending, target).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct UnlinkParams {
    /// Key or public URL currently held by the slot.
    pub key: String,
    pub index: Option<usize>,
    pub confirm: Option<bool>,
}

/// DELETE /v1/records/{entity_type}/{id}/assets/{field}?key=..&confirm=true
pub async fn unlink_asset(
    State(state): State<AppState>,
    Path((entity, id, field)): Path<(String, String, String)>,
    Query(params): Query<UnlinkParams>,
    req: Request,
) -> ApiResult<Json<UnlinkOutcome>> {
    require_admin(&req)?;
    let entity = parse_entity(&entity)?;
    require_confirm(params.confirm, "asset deletion")?;

    let key = state
        .assets
        .resolver()
        .key_from_ref(&params.key)
        .ok_or_else(|| {
            ApiError::BadRequest(format!("{:?} is not a key in this store", params.key))
        })?;

    let outcome = state
        .lifecycle
        .deletes
        .unlink_and_delete(entity, &id, &field, slot_for(params.index), &key)
        .await?;
    Ok(Json(outcome))
}

/// GET /assets/{*key} - Serve a stored blob.
pub async fn serve_asset(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> ApiResult<Response> {
    let key = AssetKey::parse(&raw).map_err(|_| ApiError::NotFound(raw.clone()))?;

    let meta = state.assets.head(&key).await?;
    let data = match state.assets.get(&key).await {
        Ok(data) => data,
        Err(StorageError::NotFound(_)) => return Err(ApiError::NotFound(raw)),
        Err(e) => return Err(e.into()),
    };
    metrics::ASSETS_SERVED.inc();

    let content_type = meta
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let len = data.len();
    let mut response = Body::from(data).into_response();
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
        .headers_mut()
        .insert(CONTENT_LENGTH, HeaderValue::from(len));
    Ok(response)
}
