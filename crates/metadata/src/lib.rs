//! Metadata store abstraction and implementations for curator.
//!
//! This crate provides:
//! - Content records, one table per entity type, with schema-aware
//!   reference scanning
//! - Reconciliation run history with a one-running-sweep-per-namespace
//!   constraint
//! - SQLite and PostgreSQL stores

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
mod scan;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{RecordRow, SweepRunRow, SweepRunState};
pub use postgres::PostgresStore;
pub use repos::{RecordRepo, SweepRunRepo};
pub use store::{MetadataStore, SqliteStore};

use curator_core::PublicUrlResolver;
use curator_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
///
/// `resolver` must describe the public URLs stored in records, or reference
/// scans will not recognize them.
pub async fn from_config(
    config: &MetadataConfig,
    resolver: PublicUrlResolver,
) -> MetadataResult<Arc<dyn MetadataStore>> {
    config.validate().map_err(MetadataError::Config)?;

    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs, resolver).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                tracing::info!("Connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms, resolver)
                    .await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                    resolver,
                )
                .await?
            } else {
                return Err(MetadataError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
