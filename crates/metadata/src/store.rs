//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{RecordRepo, SweepRunRepo};
use async_trait::async_trait;
use curator_core::{EntityType, PublicUrlResolver};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: RecordRepo + SweepRunRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    resolver: PublicUrlResolver,
    query_timeout: Duration,
}

impl SqliteStore {
    /// Create a new SQLite store.
    ///
    /// `resolver` turns stored public URLs back into asset keys during
    /// reference scans; it must match the URLs the server hands out.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
        resolver: PublicUrlResolver,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout = Duration::from_secs(query_timeout_secs.unwrap_or(60));

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                MetadataError::Config(format!(
                    "cannot create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection avoids "database is locked" failures under
            // concurrent axum handlers.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            resolver,
            query_timeout,
        };
        store.migrate().await?;

        tracing::debug!(
            query_timeout_secs = query_timeout.as_secs(),
            "SQLite query timeout is advisory only: slow scans are logged, not cancelled"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;

        for entity in EntityType::ALL {
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    fields_json TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    version INTEGER NOT NULL DEFAULT 1
                )",
                table = entity.table_name()
            );
            sqlx::query(&ddl).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::scan::{SCAN_PAGE_SIZE, collect_keys, scan_targets};
    use curator_core::{AssetKey, ContentRecord};
    use std::collections::BTreeSet;
    use std::time::Instant;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl RecordRepo for SqliteStore {
        async fn get_record(
            &self,
            entity: EntityType,
            id: &str,
        ) -> MetadataResult<Option<ContentRecord>> {
            let sql = format!(
                "SELECT id, fields_json, created_at, updated_at, version FROM {} WHERE id = ?",
                entity.table_name()
            );
            let row = sqlx::query_as::<_, RecordRow>(&sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            row.map(RecordRow::into_record).transpose()
        }

        async fn upsert_record(
            &self,
            entity: EntityType,
            record: &ContentRecord,
        ) -> MetadataResult<ContentRecord> {
            let row = RecordRow::from_record(record)?;
            let table = entity.table_name();
            let stored = if row.version == 0 {
                let sql = format!(
                    r#"
                    INSERT INTO {table} (id, fields_json, created_at, updated_at, version)
                    VALUES (?, ?, ?, ?, 1)
                    ON CONFLICT(id) DO NOTHING
                    RETURNING id, fields_json, created_at, updated_at, version
                    "#
                );
                sqlx::query_as::<_, RecordRow>(&sql)
                    .bind(&row.id)
                    .bind(&row.fields_json)
                    .bind(row.created_at)
                    .bind(row.updated_at)
                    .fetch_optional(&self.pool)
                    .await?
            } else {
                let sql = format!(
                    r#"
                    UPDATE {table}
                    SET fields_json = ?, updated_at = ?, version = version + 1
                    WHERE id = ? AND version = ?
                    RETURNING id, fields_json, created_at, updated_at, version
                    "#
                );
                sqlx::query_as::<_, RecordRow>(&sql)
                    .bind(&row.fields_json)
                    .bind(row.updated_at)
                    .bind(&row.id)
                    .bind(row.version)
                    .fetch_optional(&self.pool)
                    .await?
            };
            match stored {
                Some(stored) => stored.into_record(),
                None => Err(write_conflict(entity, &row)),
            }
        }

        async fn delete_record(&self, entity: EntityType, id: &str) -> MetadataResult<bool> {
            let sql = format!("DELETE FROM {} WHERE id = ?", entity.table_name());
            let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
            Ok(result.rows_affected() > 0)
        }

        async fn list_records(
            &self,
            entity: EntityType,
            limit: u32,
            offset: u32,
        ) -> MetadataResult<Vec<ContentRecord>> {
            let sql = format!(
                "SELECT id, fields_json, created_at, updated_at, version FROM {} ORDER BY created_at, id LIMIT ? OFFSET ?",
                entity.table_name()
            );
            let rows = sqlx::query_as::<_, RecordRow>(&sql)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
            rows.into_iter().map(RecordRow::into_record).collect()
        }

        async fn scan_asset_refs(
            &self,
            entity: Option<EntityType>,
        ) -> MetadataResult<Vec<AssetKey>> {
            let started = Instant::now();
            let mut keys = BTreeSet::new();
            let mut rows_scanned = 0usize;

            for entity in scan_targets(entity) {
                let sql = format!(
                    "SELECT id, fields_json FROM {} WHERE id > ? ORDER BY id LIMIT ?",
                    entity.table_name()
                );
                let mut cursor = String::new();
                loop {
                    let rows = sqlx::query_as::<_, RecordBodyRow>(&sql)
                        .bind(&cursor)
                        .bind(SCAN_PAGE_SIZE)
                        .fetch_all(&self.pool)
                        .await?;
                    rows_scanned += rows.len();
                    let page_len = rows.len();
                    match collect_keys(entity, &rows, &self.resolver, &mut keys)? {
                        Some(last) if page_len as i64 == SCAN_PAGE_SIZE => cursor = last,
                        _ => break,
                    }
                }
            }

            let elapsed = started.elapsed();
            if elapsed > self.query_timeout {
                tracing::warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    timeout_secs = self.query_timeout.as_secs(),
                    rows_scanned,
                    "reference scan exceeded the advisory query timeout"
                );
            }

            Ok(keys.into_iter().collect())
        }
    }

    #[async_trait]
    impl SweepRunRepo for SqliteStore {
        async fn create_sweep_run(&self, run: &SweepRunRow) -> MetadataResult<()> {
            match sqlx::query(
                r#"
                INSERT INTO sweep_runs (run_id, namespace, mode, state, started_at, finished_at, report_json, error)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(run.run_id)
            .bind(&run.namespace)
            .bind(&run.mode)
            .bind(&run.state)
            .bind(run.started_at)
            .bind(run.finished_at)
            .bind(&run.report_json)
            .bind(&run.error)
            .execute(&self.pool)
            .await
            {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db_err)) => {
                    // SQLite names either the columns or the partial index:
                    // "UNIQUE constraint failed: sweep_runs.namespace" or
                    // "UNIQUE constraint failed: index 'idx_sweep_runs_one_running'".
                    let msg = db_err.message();
                    if msg.contains("UNIQUE constraint") && msg.contains("sweep_runs") {
                        Err(MetadataError::Constraint(format!(
                            "a sweep is already running for namespace {}",
                            run.namespace
                        )))
                    } else {
                        Err(sqlx::Error::Database(db_err).into())
                    }
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn get_sweep_run(&self, run_id: Uuid) -> MetadataResult<Option<SweepRunRow>> {
            let row =
                sqlx::query_as::<_, SweepRunRow>("SELECT * FROM sweep_runs WHERE run_id = ?")
                    .bind(run_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn finish_sweep_run(
            &self,
            run_id: Uuid,
            state: SweepRunState,
            finished_at: OffsetDateTime,
            report_json: Option<&str>,
            error: Option<&str>,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE sweep_runs SET state = ?, finished_at = ?, report_json = ?, error = ? WHERE run_id = ?",
            )
            .bind(state.as_str())
            .bind(finished_at)
            .bind(report_json)
            .bind(error)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("sweep run {run_id}")));
            }
            Ok(())
        }

        async fn recent_sweep_runs(
            &self,
            namespace: Option<&str>,
            limit: u32,
        ) -> MetadataResult<Vec<SweepRunRow>> {
            let rows = match namespace {
                Some(namespace) => {
                    sqlx::query_as::<_, SweepRunRow>(
                        "SELECT * FROM sweep_runs WHERE namespace = ? ORDER BY started_at DESC LIMIT ?",
                    )
                    .bind(namespace)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_as::<_, SweepRunRow>(
                        "SELECT * FROM sweep_runs ORDER BY started_at DESC LIMIT ?",
                    )
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
                }
            };
            Ok(rows)
        }

        async fn fail_orphaned_sweep_runs(
            &self,
            namespace: Option<&str>,
            started_before: OffsetDateTime,
            finished_at: OffsetDateTime,
            reason: &str,
        ) -> MetadataResult<u64> {
            let result = match namespace {
                Some(namespace) => {
                    sqlx::query(
                        "UPDATE sweep_runs SET state = 'failed', finished_at = ?, error = ? \
                         WHERE state = 'running' AND started_at < ? AND namespace = ?",
                    )
                    .bind(finished_at)
                    .bind(reason)
                    .bind(started_before)
                    .bind(namespace)
                    .execute(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query(
                        "UPDATE sweep_runs SET state = 'failed', finished_at = ?, error = ? \
                         WHERE state = 'running' AND started_at < ?",
                    )
                    .bind(finished_at)
                    .bind(reason)
                    .bind(started_before)
                    .execute(&self.pool)
                    .await?
                }
            };
            Ok(result.rows_affected())
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Reconciliation run history
CREATE TABLE IF NOT EXISTS sweep_runs (
    run_id BLOB PRIMARY KEY,
    namespace TEXT NOT NULL,
    mode TEXT NOT NULL,
    state TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    report_json TEXT,
    error TEXT
);

-- At most one running sweep per namespace, across processes
CREATE UNIQUE INDEX IF NOT EXISTS idx_sweep_runs_one_running
    ON sweep_runs(namespace) WHERE state = 'running';

CREATE INDEX IF NOT EXISTS idx_sweep_runs_namespace_started
    ON sweep_runs(namespace, started_at);
"#;
