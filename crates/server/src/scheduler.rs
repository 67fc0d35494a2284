//! Periodic reconciliation sweeps.

use crate::metrics::SCHEDULED_SWEEPS;
use crate::state::AppState;
use curator_core::Namespace;
use curator_lifecycle::{LifecycleError, SweepRequest};
use tokio::task::JoinHandle;

/// How a scheduled sweep ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduledResult {
    Completed,
    PartialFailure,
    /// Another sweep of the namespace was running.
    Skipped,
    Failed,
}

impl ScheduledResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::PartialFailure => "partial_failure",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// Commit-mode sweep of every scheduled namespace, one after another.
pub async fn run_scheduled_round(
    state: &AppState,
    namespaces: &[Namespace],
) -> Vec<(Namespace, ScheduledResult)> {
    let mut results = Vec::with_capacity(namespaces.len());
    for namespace in namespaces {
        if state.shutdown.is_cancelled() {
            break;
        }
        let result = run_scheduled_sweep(state, namespace).await;
        SCHEDULED_SWEEPS
            .with_label_values(&[result.as_str()])
            .inc();
        results.push((namespace.clone(), result));
    }
    results
}

async fn run_scheduled_sweep(state: &AppState, namespace: &Namespace) -> ScheduledResult {
    let request = SweepRequest::commit(namespace.clone());
    match state
        .lifecycle
        .reconciler
        .sweep(request, state.shutdown.child_token())
        .await
    {
        Ok(report) => {
            tracing::info!(
                namespace = %namespace,
                deleted = report.deleted.len(),
                skipped_grace = report.skipped_grace.len(),
                "scheduled sweep finished"
            );
            ScheduledResult::Completed
        }
        Err(LifecycleError::PartialSweepFailure { report }) => {
            tracing::warn!(
                namespace = %namespace,
                deleted = report.deleted.len(),
                errors = report.errors.len(),
                "scheduled sweep left orphans behind"
            );
            ScheduledResult::PartialFailure
        }
        Err(LifecycleError::SweepInProgress { .. }) => {
            tracing::debug!(namespace = %namespace, "sweep already running, skipping");
            ScheduledResult::Skipped
        }
        Err(e) => {
            tracing::error!(namespace = %namespace, error = %e, "scheduled sweep failed");
            ScheduledResult::Failed
        }
    }
}

/// Spawn the scheduler if it is enabled.
///
/// The loop exits when [`AppState::shutdown`] is cancelled.
pub fn spawn_scheduler(state: AppState) -> anyhow::Result<Option<JoinHandle<()>>> {
    let config = &state.config.reconcile;
    if !config.auto_schedule_enabled {
        tracing::info!("Automatic reconciliation disabled");
        return Ok(None);
    }
    let namespaces = config
        .scheduled_namespaces()
        .map_err(anyhow::Error::msg)?;
    let interval = config.auto_schedule_interval();

    tracing::info!(
        interval_secs = interval.as_secs(),
        namespaces = ?namespaces.iter().map(Namespace::as_str).collect::<Vec<_>>(),
        "Automatic reconciliation enabled"
    );

    Ok(Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            run_scheduled_round(&state, &namespaces).await;
        }
        tracing::info!("Reconciliation scheduler stopped");
    })))
}
