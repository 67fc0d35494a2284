//! Reconciliation endpoints.

use crate::auth::require_admin;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{format_timestamp, read_json};
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use curator_core::{EntityType, Namespace};
use curator_lifecycle::{LifecycleError, SweepMode, SweepReport, SweepRequest};
use curator_metadata::{SweepRunRepo, SweepRunRow};
use serde::{Deserialize, Serialize};

/// Reconcile request body.
#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    pub namespace: String,
    /// Narrow the reference scan to one entity type. Entity types sharing
    /// the namespace are still scanned.
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    /// `false` previews, `true` deletes.
    #[serde(default)]
    pub confirm: bool,
}

/// POST /v1/admin/reconcile - Sweep one namespace for orphans.
///
/// Responds 200 with the report, 207 with the partial report when some
/// deletes failed, and 409 when the namespace is already being swept.
pub async fn reconcile(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<SweepReport>)> {
    require_admin(&req)?;
    let body: ReconcileRequest = read_json(req).await?;

    let namespace = Namespace::new(body.namespace)?;
    let mode = if body.confirm {
        SweepMode::Commit
    } else {
        SweepMode::Preview
    };
    metrics::RECONCILE_REQUESTS
        .with_label_values(&[mode.as_str()])
        .inc();

    let request = SweepRequest {
        namespace,
        entity_filter: body.entity_type,
        mode,
    };
    let engine = state.lifecycle.reconciler.clone();
    let cancel = state.shutdown.child_token();

    // Detached so a dropped connection cannot abandon a half-finished run.
    let result = tokio::spawn(async move { engine.sweep(request, cancel).await })
        .await
        .map_err(|e| ApiError::Internal(format!("sweep task failed: {e}")))?;

    match result {
        Ok(report) => Ok((StatusCode::OK, Json(report))),
        Err(LifecycleError::PartialSweepFailure { report }) => {
            Ok((StatusCode::MULTI_STATUS, Json(*report)))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListRunsParams {
    pub namespace: Option<String>,
    /// Maximum number of runs to return (default: 20, max: 100).
    pub limit: Option<u32>,
}

/// One entry of the sweep history.
#[derive(Debug, Serialize)]
pub struct SweepRunResponse {
    pub run_id: String,
    pub namespace: String,
    pub mode: String,
    pub state: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SweepReport>,
}

impl SweepRunResponse {
    fn from_row(row: SweepRunRow) -> ApiResult<Self> {
        let report = row.report_json.as_deref().and_then(|json| {
            serde_json::from_str(json)
                .map_err(|e| {
                    tracing::warn!(run_id = %row.run_id, error = %e, "unreadable sweep report");
                })
                .ok()
        });
        Ok(Self {
            run_id: row.run_id.to_string(),
            started_at: format_timestamp(row.started_at)?,
            finished_at: row.finished_at.map(format_timestamp).transpose()?,
            namespace: row.namespace,
            mode: row.mode,
            state: row.state,
            error: row.error,
            report,
        })
    }
}

/// GET /v1/admin/reconcile/runs - Recent sweeps, newest first.
pub async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<ListRunsParams>,
    req: Request,
) -> ApiResult<Json<Vec<SweepRunResponse>>> {
    require_admin(&req)?;
    let namespace = params.namespace.map(Namespace::new).transpose()?;
    let limit = params.limit.unwrap_or(20).min(100);

    let rows = state
        .metadata
        .recent_sweep_runs(namespace.as_ref().map(Namespace::as_str), limit)
        .await?;
    let runs = rows
        .into_iter()
        .map(SweepRunResponse::from_row)
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(runs))
}
