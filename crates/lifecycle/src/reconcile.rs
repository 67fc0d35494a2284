//! Reconciliation sweeps: delete blobs no record references.
//!
//! A sweep compares one namespace's listing against a fresh reference
//! snapshot. Unreferenced blobs older than the namespace's grace window are
//! orphans; anything younger may belong to an upload whose record write has
//! not landed yet and is left alone. At most one sweep per namespace runs at
//! a time, enforced in-process by [`ReconciliationEngine`] and across
//! processes by the unique `running` row in the sweep history.

use crate::error::{ItemError, LifecycleError, LifecycleResult};
use crate::metrics;
use crate::reference_index::ReferenceIndex;
use curator_core::config::ReconcileConfig;
use curator_core::{AssetKey, Clock, EntityType, Namespace, RetryPolicy};
use curator_metadata::{MetadataError, MetadataStore, SweepRunRepo, SweepRunRow, SweepRunState};
use curator_storage::{AssetStore, DeleteStatus, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Slack added to the sweep timeout before a `running` row counts as stale.
pub const STALE_RUN_MARGIN: std::time::Duration = std::time::Duration::from_secs(60);

/// Whether a sweep deletes or only reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    #[default]
    Preview,
    Commit,
}

impl SweepMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Commit => "commit",
        }
    }
}

/// Parameters of one sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepRequest {
    pub namespace: Namespace,
    /// Narrows the scan; widened to every type that may store into the
    /// namespace.
    pub entity_filter: Option<EntityType>,
    pub mode: SweepMode,
}

impl SweepRequest {
    pub fn preview(namespace: Namespace) -> Self {
        Self {
            namespace,
            entity_filter: None,
            mode: SweepMode::Preview,
        }
    }

    pub fn commit(namespace: Namespace) -> Self {
        Self {
            mode: SweepMode::Commit,
            ..Self::preview(namespace)
        }
    }

    pub fn with_entity_filter(mut self, entity: Option<EntityType>) -> Self {
        self.entity_filter = entity;
        self
    }
}

/// How a sweep ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    Completed,
    PartialFailure,
    /// Stopped between batches by the cancellation token.
    Cancelled,
    /// Stopped between batches by the sweep timeout.
    TimedOut,
}

impl SweepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::PartialFailure => "partial_failure",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

/// What a sweep found and did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub run_id: Uuid,
    pub namespace: Namespace,
    pub mode: SweepMode,
    pub status: SweepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_filter: Option<EntityType>,
    pub grace_window_secs: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    /// Assets listed in the namespace, placeholders excluded.
    pub found: usize,
    /// Keys of this namespace referenced by records.
    pub referenced: usize,
    /// Listed assets no record references.
    pub candidates: usize,
    pub deleted: Vec<AssetKey>,
    pub would_delete: Vec<AssetKey>,
    pub skipped_grace: Vec<AssetKey>,
    pub skipped_unknown: Vec<AssetKey>,
    pub errors: Vec<ItemError>,
}

impl SweepReport {
    fn new(run_id: Uuid, request: &SweepRequest, grace: time::Duration, started_at: OffsetDateTime) -> Self {
        Self {
            run_id,
            namespace: request.namespace.clone(),
            mode: request.mode,
            status: SweepStatus::Completed,
            entity_filter: request.entity_filter,
            grace_window_secs: grace.whole_seconds(),
            started_at,
            finished_at: started_at,
            found: 0,
            referenced: 0,
            candidates: 0,
            deleted: Vec::new(),
            would_delete: Vec::new(),
            skipped_grace: Vec::new(),
            skipped_unknown: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Runs reconciliation sweeps.
#[derive(Clone)]
pub struct ReconciliationEngine {
    assets: AssetStore,
    metadata: Arc<dyn MetadataStore>,
    index: ReferenceIndex,
    clock: Arc<dyn Clock>,
    config: ReconcileConfig,
    policy: RetryPolicy,
    in_flight: Arc<Mutex<HashSet<Namespace>>>,
}

impl ReconciliationEngine {
    pub fn new(
        assets: AssetStore,
        metadata: Arc<dyn MetadataStore>,
        clock: Arc<dyn Clock>,
        config: ReconcileConfig,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            assets: assets.with_page_size(config.list_page_size),
            index: ReferenceIndex::new(metadata.clone(), policy),
            metadata,
            clock,
            config,
            policy,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Whether this process is currently sweeping `namespace`.
    pub fn is_sweeping(&self, namespace: &Namespace) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(namespace)
    }

    /// Mark runs left `running` by a dead process as failed.
    ///
    /// Only rows older than the sweep timeout plus [`STALE_RUN_MARGIN`] are
    /// touched; a younger row may belong to a live sweep in another process
    /// sharing the database.
    pub async fn recover_interrupted_runs(&self) -> LifecycleResult<u64> {
        let recovered = self.fail_stale_runs(None).await?;
        if recovered > 0 {
            tracing::warn!(recovered, "marked interrupted sweep runs as failed");
        }
        Ok(recovered)
    }

    async fn fail_stale_runs(&self, namespace: Option<&Namespace>) -> LifecycleResult<u64> {
        let now = self.clock.now();
        let cutoff = self
            .config
            .sweep_timeout()
            .checked_add(STALE_RUN_MARGIN)
            .and_then(|age| time::Duration::try_from(age).ok())
            .and_then(|age| now.checked_sub(age))
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let namespace = namespace.map(Namespace::as_str);
        Ok(self
            .policy
            .run(
                "metadata.fail_orphaned_sweep_runs",
                MetadataError::is_transient,
                || {
                    self.metadata.fail_orphaned_sweep_runs(
                        namespace,
                        cutoff,
                        now,
                        "process exited before the sweep finished",
                    )
                },
            )
            .await?)
    }

    /// Sweep one namespace.
    ///
    /// Returns [`LifecycleError::PartialSweepFailure`] when any delete
    /// failed; the report inside lists the keys that were removed. A sweep
    /// stopped between batches by `cancel` or the timeout returns its partial
    /// report with the matching [`SweepStatus`].
    #[tracing::instrument(
        skip_all,
        fields(namespace = %request.namespace, mode = request.mode.as_str(), run_id)
    )]
    pub async fn sweep(
        &self,
        request: SweepRequest,
        cancel: CancellationToken,
    ) -> LifecycleResult<SweepReport> {
        let Some(_guard) = SweepGuard::acquire(&self.in_flight, &request.namespace) else {
            return Err(LifecycleError::SweepInProgress {
                namespace: request.namespace,
            });
        };

        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));
        let started_at = self.clock.now();
        let timer = std::time::Instant::now();

        let row = SweepRunRow {
            run_id,
            namespace: request.namespace.to_string(),
            mode: request.mode.as_str().to_string(),
            state: SweepRunState::Running.as_str().to_string(),
            started_at,
            finished_at: None,
            report_json: None,
            error: None,
        };
        match self.create_run(&row).await {
            Ok(()) => {}
            Err(MetadataError::Constraint(_)) => {
                // The row in the way may have been left by a dead process.
                if self.fail_stale_runs(Some(&request.namespace)).await? == 0 {
                    return Err(LifecycleError::SweepInProgress {
                        namespace: request.namespace,
                    });
                }
                tracing::warn!("replaced a stale running sweep row");
                match self.create_run(&row).await {
                    Ok(()) => {}
                    Err(MetadataError::Constraint(_)) => {
                        return Err(LifecycleError::SweepInProgress {
                            namespace: request.namespace,
                        });
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        }

        let deadline = Instant::now() + self.config.sweep_timeout();
        let result = self
            .run(&request, run_id, started_at, &cancel, deadline)
            .await
            .map(|mut report| {
                report.finished_at = self.clock.now();
                report
            });

        let outcome = match &result {
            Ok(report) => report.status.as_str(),
            Err(LifecycleError::Cancelled) => "cancelled",
            Err(LifecycleError::Timeout(_)) => "timed_out",
            Err(_) => "failed",
        };
        metrics::SWEEPS
            .with_label_values(&[request.mode.as_str(), outcome])
            .inc();
        metrics::SWEEP_DURATION
            .with_label_values(&[request.mode.as_str()])
            .observe(timer.elapsed().as_secs_f64());

        self.record_finish(run_id, &result).await;

        match result {
            Ok(report) => {
                tracing::info!(
                    status = report.status.as_str(),
                    found = report.found,
                    candidates = report.candidates,
                    deleted = report.deleted.len(),
                    would_delete = report.would_delete.len(),
                    skipped_grace = report.skipped_grace.len(),
                    skipped_unknown = report.skipped_unknown.len(),
                    errors = report.errors.len(),
                    "sweep finished"
                );
                if report.errors.is_empty() {
                    Ok(report)
                } else {
                    Err(LifecycleError::PartialSweepFailure {
                        report: Box::new(report),
                    })
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "sweep aborted");
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request: &SweepRequest,
        run_id: Uuid,
        started_at: OffsetDateTime,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> LifecycleResult<SweepReport> {
        let namespace = &request.namespace;
        let grace = self.config.grace_window_for(namespace);
        let mut report = SweepReport::new(run_id, request, grace, started_at);

        let snapshot = self
            .interruptible(
                self.index.snapshot(namespace, request.entity_filter),
                cancel,
                deadline,
            )
            .await?;
        report.referenced = snapshot.len();

        let present = self
            .interruptible(
                async { Ok(self.assets.list_namespace(namespace).await?) },
                cancel,
                deadline,
            )
            .await?;
        report.found = present.len();

        // Anything created after the cutoff may still be mid-flight.
        let cutoff = started_at.checked_sub(grace);
        let mut eligible = Vec::new();
        for asset in present {
            if snapshot.contains(&asset.key) {
                continue;
            }
            report.candidates += 1;

            if let Some(status) = stop_reason(cancel, deadline) {
                report.status = status;
                return Ok(report);
            }

            let created_at = match asset.last_modified {
                Some(created_at) => Some(created_at),
                None => match self.assets.head(&asset.key).await {
                    Ok(meta) => meta.last_modified,
                    Err(StorageError::NotFound(_)) => {
                        tracing::debug!(key = %asset.key, "candidate vanished before classification");
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(key = %asset.key, error = %e, "cannot read candidate timestamp");
                        None
                    }
                },
            };

            match (created_at, cutoff) {
                (Some(created_at), Some(cutoff)) if created_at <= cutoff => {
                    eligible.push(asset.key)
                }
                (Some(_), _) => report.skipped_grace.push(asset.key),
                (None, _) => report.skipped_unknown.push(asset.key),
            }
        }

        metrics::GRACE_SKIPS
            .with_label_values(&[namespace.as_str()])
            .inc_by(report.skipped_grace.len() as u64);

        match request.mode {
            SweepMode::Preview => {
                for key in &eligible {
                    tracing::info!(key = %key, "orphan (preview)");
                }
                report.would_delete = eligible;
            }
            SweepMode::Commit => {
                self.delete_orphans(&mut report, eligible, cancel, deadline)
                    .await;
            }
        }

        if !report.errors.is_empty() && report.status == SweepStatus::Completed {
            report.status = SweepStatus::PartialFailure;
        }
        Ok(report)
    }

    async fn delete_orphans(
        &self,
        report: &mut SweepReport,
        orphans: Vec<AssetKey>,
        cancel: &CancellationToken,
        deadline: Instant,
    ) {
        let batch_size = self.config.delete_batch_size.max(1);
        for batch in orphans.chunks(batch_size) {
            if let Some(status) = stop_reason(cancel, deadline) {
                tracing::warn!(
                    status = status.as_str(),
                    remaining = orphans.len().saturating_sub(report.deleted.len() + report.errors.len()),
                    "sweep stopped between batches"
                );
                report.status = status;
                return;
            }

            match self.assets.delete_keys(batch).await {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        match outcome.status {
                            DeleteStatus::Deleted => {
                                tracing::info!(key = %outcome.key, "orphan deleted");
                                report.deleted.push(outcome.key);
                            }
                            DeleteStatus::NotFound => {
                                tracing::debug!(key = %outcome.key, "orphan already gone");
                            }
                            DeleteStatus::Failed(reason) => {
                                tracing::warn!(key = %outcome.key, reason, "orphan delete failed");
                                report.errors.push(ItemError::for_key(outcome.key, reason));
                            }
                        }
                    }
                }
                Err(e) => {
                    // Some keys in the batch may have been deleted before the
                    // call failed; the next sweep sorts them out.
                    tracing::warn!(error = %e, batch = batch.len(), "orphan batch delete failed");
                    let message = format!("batch delete failed, outcome unknown: {e}");
                    report.errors.extend(
                        batch
                            .iter()
                            .map(|key| ItemError::for_key(key.clone(), message.clone())),
                    );
                }
            }
        }

        metrics::ORPHANS_DELETED
            .with_label_values(&[report.namespace.as_str()])
            .inc_by(report.deleted.len() as u64);
    }

    async fn create_run(&self, row: &SweepRunRow) -> Result<(), MetadataError> {
        self.policy
            .run("metadata.create_sweep_run", MetadataError::is_transient, || {
                self.metadata.create_sweep_run(row)
            })
            .await
    }

    async fn interruptible<T, F>(
        &self,
        fut: F,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> LifecycleResult<T>
    where
        F: Future<Output = LifecycleResult<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LifecycleError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                Err(LifecycleError::Timeout(self.config.sweep_timeout()))
            }
            result = fut => result,
        }
    }

    async fn record_finish(&self, run_id: Uuid, result: &LifecycleResult<SweepReport>) {
        let (state, report, error) = match result {
            Ok(report) => {
                let (state, error) = run_state(report, self.config.sweep_timeout());
                (state, Some(report), error)
            }
            Err(LifecycleError::Cancelled) => {
                (SweepRunState::Cancelled, None, Some("cancelled".to_string()))
            }
            Err(e) => (SweepRunState::Failed, None, Some(e.to_string())),
        };

        let report_json = match report.map(serde_json::to_string).transpose() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize sweep report");
                None
            }
        };
        let finished_at = self.clock.now();

        if let Err(e) = self
            .policy
            .run("metadata.finish_sweep_run", MetadataError::is_transient, || {
                self.metadata.finish_sweep_run(
                    run_id,
                    state,
                    finished_at,
                    report_json.as_deref(),
                    error.as_deref(),
                )
            })
            .await
        {
            tracing::error!(error = %e, "failed to record sweep result");
        }
    }
}

fn stop_reason(cancel: &CancellationToken, deadline: Instant) -> Option<SweepStatus> {
    if cancel.is_cancelled() {
        Some(SweepStatus::Cancelled)
    } else if Instant::now() >= deadline {
        Some(SweepStatus::TimedOut)
    } else {
        None
    }
}

/// In-process single-flight marker for one namespace. Released on drop.
struct SweepGuard {
    in_flight: Arc<Mutex<HashSet<Namespace>>>,
    namespace: Namespace,
}

impl SweepGuard {
    fn acquire(in_flight: &Arc<Mutex<HashSet<Namespace>>>, namespace: &Namespace) -> Option<Self> {
        let inserted = in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(namespace.clone());
        inserted.then(|| Self {
            in_flight: in_flight.clone(),
            namespace: namespace.clone(),
        })
    }
}

impl Drop for SweepGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.namespace);
    }
}

/// Persisted state for a sweep that returned a report.
fn run_state(
    report: &SweepReport,
    timeout: std::time::Duration,
) -> (SweepRunState, Option<String>) {
    match report.status {
        SweepStatus::Completed => (SweepRunState::Completed, None),
        SweepStatus::PartialFailure => (
            SweepRunState::PartialFailure,
            Some(format!("{} deletes failed", report.errors.len())),
        ),
        SweepStatus::Cancelled => (SweepRunState::Cancelled, Some("cancelled".to_string())),
        SweepStatus::TimedOut => (
            SweepRunState::Failed,
            Some(format!("timed out after {timeout:?}")),
        ),
    }
}
