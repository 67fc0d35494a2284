//! Reconciliation run history.

use crate::error::MetadataResult;
use crate::models::{SweepRunRow, SweepRunState};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for persisted sweep runs.
#[async_trait]
pub trait SweepRunRepo: Send + Sync {
    /// Insert a run row.
    ///
    /// Fails with `MetadataError::Constraint` if another run for the same
    /// namespace is still `running`.
    async fn create_sweep_run(&self, run: &SweepRunRow) -> MetadataResult<()>;

    async fn get_sweep_run(&self, run_id: Uuid) -> MetadataResult<Option<SweepRunRow>>;

    /// Move a run to a terminal state and attach its report.
    async fn finish_sweep_run(
        &self,
        run_id: Uuid,
        state: SweepRunState,
        finished_at: OffsetDateTime,
        report_json: Option<&str>,
        error: Option<&str>,
    ) -> MetadataResult<()>;

    /// Most recent runs first, optionally for one namespace.
    async fn recent_sweep_runs(
        &self,
        namespace: Option<&str>,
        limit: u32,
    ) -> MetadataResult<Vec<SweepRunRow>>;

    /// Mark `running` rows started before `started_before` as `failed`.
    ///
    /// Sweeps are time-bounded, so a row still `running` well past the sweep
    /// timeout belongs to a process that died mid-sweep. Younger rows may
    /// belong to a live sweep in another process and are left alone.
    /// `namespace` narrows the update to one namespace. Returns the number
    /// of rows updated.
    async fn fail_orphaned_sweep_runs(
        &self,
        namespace: Option<&str>,
        started_before: OffsetDateTime,
        finished_at: OffsetDateTime,
        reason: &str,
    ) -> MetadataResult<u64>;
}
