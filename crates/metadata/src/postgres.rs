//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{RecordRepo, SweepRunRepo};
use crate::scan::{SCAN_PAGE_SIZE, collect_keys, scan_targets};
use crate::store::MetadataStore;
use async_trait::async_trait;
use curator_core::config::PgSslMode;
use curator_core::{AssetKey, ContentRecord, EntityType, PublicUrlResolver};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::collections::BTreeSet;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema for tables that do not depend on the entity catalog.
const POSTGRES_SCHEMA: &str = r#"
-- Reconciliation run history
CREATE TABLE IF NOT EXISTS sweep_runs (
    run_id UUID PRIMARY KEY,
    namespace TEXT NOT NULL,
    mode TEXT NOT NULL,
    state TEXT NOT NULL,
    started_at TIMESTAMPTZ NOT NULL,
    finished_at TIMESTAMPTZ,
    report_json TEXT,
    error TEXT
);

-- At most one running sweep per namespace, across processes
CREATE UNIQUE INDEX IF NOT EXISTS idx_sweep_runs_one_running
    ON sweep_runs(namespace) WHERE state = 'running';

CREATE INDEX IF NOT EXISTS idx_sweep_runs_namespace_started
    ON sweep_runs(namespace, started_at);
"#;

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
    resolver: PublicUrlResolver,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
        resolver: PublicUrlResolver,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms, resolver).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// Lets the password come from its own environment variable instead of
    /// a URL.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
        resolver: PublicUrlResolver,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms, resolver).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
        resolver: PublicUrlResolver,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{timeout_ms}ms"))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool, resolver };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Prepared statements cannot hold several statements.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        for entity in EntityType::ALL {
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    fields_json TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL,
                    version BIGINT NOT NULL DEFAULT 1
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

#[async_trait]
impl RecordRepo for PostgresStore {
    async fn get_record(
        &self,
        entity: EntityType,
        id: &str,
    ) -> MetadataResult<Option<ContentRecord>> {
        let sql = format!(
            "SELECT id, fields_json, created_at, updated_at, version FROM {} WHERE id = $1",
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
                VALUES ($1, $2, $3, $4, 1)
                ON CONFLICT (id) DO NOTHING
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
                SET fields_json = $1, updated_at = $2, version = version + 1
                WHERE id = $3 AND version = $4
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
        let sql = format!("DELETE FROM {} WHERE id = $1", entity.table_name());
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
            "SELECT id, fields_json, created_at, updated_at, version FROM {} ORDER BY created_at, id LIMIT $1 OFFSET $2",
            entity.table_name()
        );
        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(RecordRow::into_record).collect()
    }

    async fn scan_asset_refs(&self, entity: Option<EntityType>) -> MetadataResult<Vec<AssetKey>> {
        let mut keys = BTreeSet::new();

        for entity in scan_targets(entity) {
            // COLLATE "C" keeps the keyset cursor independent of the database locale.
            let sql = format!(
                r#"SELECT id, fields_json FROM {} WHERE id COLLATE "C" > $1 ORDER BY id COLLATE "C" LIMIT $2"#,
                entity.table_name()
            );
            let mut cursor = String::new();
            loop {
                let rows = sqlx::query_as::<_, RecordBodyRow>(&sql)
                    .bind(&cursor)
                    .bind(SCAN_PAGE_SIZE)
                    .fetch_all(&self.pool)
                    .await?;
                let page_len = rows.len();
                match collect_keys(entity, &rows, &self.resolver, &mut keys)? {
                    Some(last) if page_len as i64 == SCAN_PAGE_SIZE => cursor = last,
                    _ => break,
                }
            }
        }

        Ok(keys.into_iter().collect())
    }
}

#[async_trait]
impl SweepRunRepo for PostgresStore {
    async fn create_sweep_run(&self, run: &SweepRunRow) -> MetadataResult<()> {
        match sqlx::query(
            r#"
            INSERT INTO sweep_runs (run_id, namespace, mode, state, started_at, finished_at, report_json, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
                let is_unique = db_err.code().as_deref() == Some("23505");
                let is_running_index = db_err.constraint() == Some("idx_sweep_runs_one_running");
                if is_unique && is_running_index {
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
        let row = sqlx::query_as::<_, SweepRunRow>("SELECT * FROM sweep_runs WHERE run_id = $1")
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
            "UPDATE sweep_runs SET state = $1, finished_at = $2, report_json = $3, error = $4 WHERE run_id = $5",
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
                    "SELECT * FROM sweep_runs WHERE namespace = $1 ORDER BY started_at DESC LIMIT $2",
                )
                .bind(namespace)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, SweepRunRow>(
                    "SELECT * FROM sweep_runs ORDER BY started_at DESC LIMIT $1",
                )
                .bind(i64::from(limit))
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
        let result = sqlx::query(
            "UPDATE sweep_runs SET state = 'failed', finished_at = $1, error = $2 \
             WHERE state = 'running' AND started_at < $3 AND ($4::TEXT IS NULL OR namespace = $4)",
        )
        .bind(finished_at)
        .bind(reason)
        .bind(started_before)
        .bind(namespace)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
