//! Application state shared across handlers.

use curator_core::Clock;
use curator_core::config::AppConfig;
use curator_lifecycle::Lifecycle;
use curator_metadata::MetadataStore;
use curator_storage::{AssetStore, BlobStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Blob store adapter, with retries and public URL resolution.
    pub assets: AssetStore,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Upload and delete coordinators and the reconciliation engine.
    pub lifecycle: Lifecycle,
    pub clock: Arc<dyn Clock>,
    /// Cancelled on shutdown; running sweeps stop between batches.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the coordinators over `blobs` and `metadata`.
    ///
    /// The configuration is expected to have passed [`AppConfig::validate`].
    pub fn new(
        config: AppConfig,
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy = config.retry.policy();
        let assets = AssetStore::new(blobs, config.public_url.resolver(), policy);
        let lifecycle = Lifecycle::new(
            assets.clone(),
            metadata.clone(),
            clock.clone(),
            config.reconcile.clone(),
            &config.lifecycle,
            policy,
        );

        Self {
            config: Arc::new(config),
            assets,
            metadata,
            lifecycle,
            clock,
            shutdown: CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curator_core::SystemClock;
    use curator_metadata::SqliteStore;
    use curator_storage::MemoryBackend;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_state_uses_configured_reconcile_settings() {
        let temp = tempdir().unwrap();
        let mut config = AppConfig::for_testing();
        config.reconcile.delete_batch_size = 7;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let metadata = SqliteStore::new(
            temp.path().join("metadata.db"),
            None,
            config.public_url.resolver(),
        )
        .await
        .unwrap();

        let state = AppState::new(
            config,
            Arc::new(MemoryBackend::with_clock(clock.clone())),
            Arc::new(metadata),
            clock,
        );

        assert_eq!(state.lifecycle.reconciler.config().delete_batch_size, 7);
        assert_eq!(state.assets.backend_name(), "memory");
        assert!(!state.shutdown.is_cancelled());
    }
}
