//! Server test utilities.

use curator_core::config::{AppConfig, MetadataConfig, ReconcileConfig};
use bytes::Bytes;
use curator_core::{AssetKey, Clock, ContentRecord, EntityType, ManualClock};
use curator_metadata::{MetadataStore, RecordRepo, SqliteStore};
use serde_json::Value;
use curator_server::{AppState, create_router};
use curator_storage::{BlobStore, MemoryBackend};
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use time::macros::datetime;

/// Raw admin token; `AdminConfig::for_testing` holds its hash.
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Wall time the server clock starts at.
pub const T0: OffsetDateTime = datetime!(2024-06-01 12:00 UTC);

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub clock: ManualClock,
    pub memory: Arc<MemoryBackend>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Memory blobs, SQLite metadata, five-minute grace.
    pub async fn new() -> Self {
        Self::build(|_| {}, |memory| memory).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, |memory| memory).await
    }

    /// Create a test server whose blob store wraps the memory backend.
    pub async fn build<F, W>(modifier: F, wrap: W) -> Self
    where
        F: FnOnce(&mut AppConfig),
        W: FnOnce(Arc<dyn BlobStore>) -> Arc<dyn BlobStore>,
    {
        curator_server::metrics::register_metrics();
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let clock = ManualClock::new(T0);
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

        let db_path = temp_dir.path().join("metadata.db");
        let mut config = AppConfig::for_testing();
        config.metadata = MetadataConfig::Sqlite {
            path: db_path.clone(),
            query_timeout_secs: None,
        };
        config.reconcile = ReconcileConfig {
            grace_window_secs: 300,
            delete_batch_size: 2,
            ..ReconcileConfig::default()
        };
        modifier(&mut config);

        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None, config.public_url.resolver())
                .await
                .expect("Failed to create metadata store"),
        );
        let memory = Arc::new(MemoryBackend::with_clock(shared_clock.clone()));
        let blobs = wrap(memory.clone());

        let state = AppState::new(config, blobs, metadata, shared_clock);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            clock,
            memory,
            _temp_dir: temp_dir,
        }
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Public URL base configured for this server.
    pub fn base_url(&self) -> String {
        self.state.config.public_url.base_url.clone()
    }

    /// Store a blob as if it had been uploaded at `created_at`.
    pub async fn seed_blob(&self, raw_key: &str, created_at: OffsetDateTime) -> AssetKey {
        let key = AssetKey::parse(raw_key).unwrap();
        let now = self.clock.now();
        self.clock.set(created_at);
        self.memory
            .put(&key, Bytes::from(format!("blob {raw_key}")), None)
            .await
            .unwrap();
        self.clock.set(now);
        key
    }

    pub async fn blob_exists(&self, key: &AssetKey) -> bool {
        self.memory.exists(key).await.unwrap()
    }

    /// Write a record directly, bypassing the lifecycle layer.
    pub async fn seed_record(&self, entity: EntityType, id: &str, fields: Value) {
        let Value::Object(map) = fields else {
            panic!("record body must be a JSON object");
        };
        let mut record = ContentRecord::from_fields(id, map, self.clock.now()).unwrap();
        if let Some(existing) = self.metadata().get_record(entity, id).await.unwrap() {
            record.version = existing.version;
        }
        self.metadata().upsert_record(entity, &record).await.unwrap();
    }

    /// Public URL of a key.
    pub fn url(&self, key: &AssetKey) -> String {
        self.state.assets.resolver().url_for(key)
    }
}
