//! Shared harness for lifecycle integration tests.
//!
//! Blobs live in a [`MemoryBackend`] stamped by a [`ManualClock`], so object
//! ages are exact. Both stores are wrapped in fault injectors.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use curator_core::config::{LifecycleConfig, ReconcileConfig};
use curator_core::{
    AssetKey, Clock, ContentRecord, EntityType, ManualClock, Namespace, PublicUrlResolver,
    RetryPolicy,
};
use curator_lifecycle::{Lifecycle, LifecycleResult, SweepMode, SweepReport, SweepRequest};
use curator_metadata::{
    MetadataError, MetadataResult, MetadataStore, RecordRepo, SqliteStore, SweepRunRepo,
    SweepRunRow, SweepRunState,
};
use curator_storage::{
    AssetStore, BlobMeta, BlobStore, DeleteOutcome, DeleteStatus, ListingCapabilities,
    ListingOptions, ListingResume, MemoryBackend, PageStream, StorageError, StorageResult,
};
use futures::{StreamExt, TryStreamExt};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use time::OffsetDateTime;
use time::macros::datetime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const BASE_URL: &str = "https://cdn.example.com/storage/v1/object/public/documents";

/// Wall time the harness clock starts at.
pub const T0: OffsetDateTime = datetime!(2024-06-01 12:00 UTC);

pub fn resolver() -> PublicUrlResolver {
    PublicUrlResolver::new(BASE_URL, vec![])
}

pub fn key(raw: &str) -> AssetKey {
    AssetKey::parse(raw).unwrap()
}

pub fn ns(name: &str) -> Namespace {
    Namespace::new(name).unwrap()
}

/// Five-minute grace, small batches.
pub fn reconcile_config() -> ReconcileConfig {
    ReconcileConfig {
        grace_window_secs: 300,
        delete_batch_size: 2,
        list_page_size: 100,
        ..ReconcileConfig::default()
    }
}

pub fn fast_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

/// Blob store wrapper with switchable failures.
pub struct FaultyStore {
    inner: Arc<dyn BlobStore>,
    pub reject_puts: AtomicBool,
    /// Single deletes fail with a transport error.
    pub fail_single_deletes: AtomicBool,
    /// Keys reported as `Failed` by batched deletes.
    pub fail_keys: Mutex<HashSet<String>>,
    /// Batched deletes fail as a whole with a rejection.
    pub reject_batches: AtomicBool,
    /// Number of upcoming batched deletes that time out.
    pub transient_batch_failures: AtomicU32,
    pub delete_many_calls: AtomicUsize,
    /// Cancelled after the first batched delete completes.
    pub cancel_after_batch: Mutex<Option<CancellationToken>>,
    pub list_delay: Mutex<Option<Duration>>,
    pub listing_timestamps: AtomicBool,
    pub head_timestamps: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            reject_puts: AtomicBool::new(false),
            fail_single_deletes: AtomicBool::new(false),
            fail_keys: Mutex::new(HashSet::new()),
            reject_batches: AtomicBool::new(false),
            transient_batch_failures: AtomicU32::new(0),
            delete_many_calls: AtomicUsize::new(0),
            cancel_after_batch: Mutex::new(None),
            list_delay: Mutex::new(None),
            listing_timestamps: AtomicBool::new(true),
            head_timestamps: AtomicBool::new(true),
        }
    }

    pub fn fail_key(&self, key: &AssetKey) {
        self.fail_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_keys.lock().unwrap().clear();
        self.reject_batches.store(false, Ordering::SeqCst);
        self.fail_single_deletes.store(false, Ordering::SeqCst);
        self.reject_puts.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for FaultyStore {
    async fn put(
        &self,
        key: &AssetKey,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        if self.reject_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected("quota exceeded".to_string()));
        }
        self.inner.put(key, data, content_type).await
    }

    async fn get(&self, key: &AssetKey) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn head(&self, key: &AssetKey) -> StorageResult<BlobMeta> {
        let mut meta = self.inner.head(key).await?;
        if !self.head_timestamps.load(Ordering::SeqCst) {
            meta.last_modified = None;
        }
        Ok(meta)
    }

    async fn delete(&self, key: &AssetKey) -> StorageResult<()> {
        if self.fail_single_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            )));
        }
        self.inner.delete(key).await
    }

    async fn delete_many(&self, keys: &[AssetKey]) -> StorageResult<Vec<DeleteOutcome>> {
        self.delete_many_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_batches.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected("access denied".to_string()));
        }
        if self
            .transient_batch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StorageError::Timeout("delete_objects".to_string()));
        }

        let failing: HashSet<String> = self.fail_keys.lock().unwrap().clone();
        let (doomed, allowed): (Vec<AssetKey>, Vec<AssetKey>) = keys
            .iter()
            .cloned()
            .partition(|k| failing.contains(&k.to_string()));
        let mut outcomes = self.inner.delete_many(&allowed).await?;
        outcomes.extend(doomed.into_iter().map(|key| DeleteOutcome {
            key,
            status: DeleteStatus::Failed("injected failure".to_string()),
        }));

        if let Some(token) = self.cancel_after_batch.lock().unwrap().take() {
            token.cancel();
        }
        Ok(outcomes)
    }

    fn list_pages<'a>(
        &'a self,
        namespace: &Namespace,
        options: ListingOptions,
        resume: Option<ListingResume>,
    ) -> PageStream<'a> {
        let keep_timestamps = self.listing_timestamps.load(Ordering::SeqCst);
        let pages = self
            .inner
            .list_pages(namespace, options, resume)
            .map_ok(move |mut page| {
                if !keep_timestamps {
                    for entry in &mut page.entries {
                        entry.last_modified = None;
                    }
                }
                page
            });

        match *self.list_delay.lock().unwrap() {
            None => Box::pin(pages),
            Some(delay) => Box::pin(
                futures::stream::once(async move {
                    tokio::time::sleep(delay).await;
                    None
                })
                .filter_map(futures::future::ready)
                .chain(pages),
            ),
        }
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }

    fn listing_capabilities(&self) -> ListingCapabilities {
        self.inner.listing_capabilities()
    }
}

/// Metadata wrapper with switchable failures.
pub struct FaultyMetadata {
    inner: Arc<dyn MetadataStore>,
    pub fail_upserts: AtomicBool,
    pub fail_scans: AtomicBool,
    pub scan_calls: AtomicUsize,
    /// The next `n` upserts wait on this barrier before writing, so callers
    /// that read a record together also write it together.
    pub upsert_rendezvous: Mutex<Option<(Arc<tokio::sync::Barrier>, usize)>>,
}

impl FaultyMetadata {
    pub fn new(inner: Arc<dyn MetadataStore>) -> Self {
        Self {
            inner,
            fail_upserts: AtomicBool::new(false),
            fail_scans: AtomicBool::new(false),
            scan_calls: AtomicUsize::new(0),
            upsert_rendezvous: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RecordRepo for FaultyMetadata {
    async fn get_record(
        &self,
        entity: EntityType,
        id: &str,
    ) -> MetadataResult<Option<ContentRecord>> {
        self.inner.get_record(entity, id).await
    }

    async fn upsert_record(
        &self,
        entity: EntityType,
        record: &ContentRecord,
    ) -> MetadataResult<ContentRecord> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(MetadataError::Internal("injected upsert failure".to_string()));
        }
        let barrier = match self.upsert_rendezvous.lock().unwrap().as_mut() {
            Some((barrier, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Some(barrier.clone())
            }
            _ => None,
        };
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        self.inner.upsert_record(entity, record).await
    }

    async fn delete_record(&self, entity: EntityType, id: &str) -> MetadataResult<bool> {
        self.inner.delete_record(entity, id).await
    }

    async fn list_records(
        &self,
        entity: EntityType,
        limit: u32,
        offset: u32,
    ) -> MetadataResult<Vec<ContentRecord>> {
        self.inner.list_records(entity, limit, offset).await
    }

    async fn scan_asset_refs(&self, entity: Option<EntityType>) -> MetadataResult<Vec<AssetKey>> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_scans.load(Ordering::SeqCst) {
            return Err(MetadataError::Internal("injected scan failure".to_string()));
        }
        self.inner.scan_asset_refs(entity).await
    }
}

#[async_trait]
impl SweepRunRepo for FaultyMetadata {
    async fn create_sweep_run(&self, run: &SweepRunRow) -> MetadataResult<()> {
        self.inner.create_sweep_run(run).await
    }

    async fn get_sweep_run(&self, run_id: Uuid) -> MetadataResult<Option<SweepRunRow>> {
        self.inner.get_sweep_run(run_id).await
    }

    async fn finish_sweep_run(
        &self,
        run_id: Uuid,
        state: SweepRunState,
        finished_at: OffsetDateTime,
        report_json: Option<&str>,
        error: Option<&str>,
    ) -> MetadataResult<()> {
        self.inner
            .finish_sweep_run(run_id, state, finished_at, report_json, error)
            .await
    }

    async fn recent_sweep_runs(
        &self,
        namespace: Option<&str>,
        limit: u32,
    ) -> MetadataResult<Vec<SweepRunRow>> {
        self.inner.recent_sweep_runs(namespace, limit).await
    }

    async fn fail_orphaned_sweep_runs(
        &self,
        namespace: Option<&str>,
        started_before: OffsetDateTime,
        finished_at: OffsetDateTime,
        reason: &str,
    ) -> MetadataResult<u64> {
        self.inner
            .fail_orphaned_sweep_runs(namespace, started_before, finished_at, reason)
            .await
    }
}

#[async_trait]
impl MetadataStore for FaultyMetadata {
    async fn migrate(&self) -> MetadataResult<()> {
        self.inner.migrate().await
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.inner.health_check().await
    }
}

/// Stores, clock and coordinators wired together.
pub struct Harness {
    pub clock: ManualClock,
    pub memory: Arc<MemoryBackend>,
    pub blobs: Arc<FaultyStore>,
    pub metadata: Arc<FaultyMetadata>,
    pub assets: AssetStore,
    pub lifecycle: Lifecycle,
    _temp_dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(reconcile_config(), RetryPolicy::none(), true).await
    }

    pub async fn with_config(config: ReconcileConfig) -> Self {
        Self::build(config, RetryPolicy::none(), true).await
    }

    pub async fn build(config: ReconcileConfig, policy: RetryPolicy, guard_shared: bool) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let clock = ManualClock::new(T0);
        let memory = Arc::new(MemoryBackend::with_clock(Arc::new(clock.clone())));
        let blobs = Arc::new(FaultyStore::new(memory.clone()));
        let sqlite = SqliteStore::new(temp_dir.path().join("metadata.db"), None, resolver())
            .await
            .expect("Failed to open SQLite store");
        let metadata = Arc::new(FaultyMetadata::new(Arc::new(sqlite)));
        let assets = AssetStore::new(blobs.clone(), resolver(), policy);
        let lifecycle = Lifecycle::new(
            assets.clone(),
            metadata.clone(),
            Arc::new(clock.clone()),
            config,
            &LifecycleConfig {
                guard_shared_references: guard_shared,
            },
            policy,
        );
        Self {
            clock,
            memory,
            blobs,
            metadata,
            assets,
            lifecycle,
            _temp_dir: temp_dir,
        }
    }

    /// Store a blob as if it had been uploaded at `created_at`.
    pub async fn seed_blob(&self, raw_key: &str, created_at: OffsetDateTime) -> AssetKey {
        let key = key(raw_key);
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

    /// Write a record whose body is `fields`.
    pub async fn put_record(&self, entity: EntityType, id: &str, fields: Value) -> ContentRecord {
        let Value::Object(map) = fields else {
            panic!("record body must be a JSON object");
        };
        let mut record = ContentRecord::from_fields(id, map, self.clock.now()).unwrap();
        if let Some(existing) = self.metadata.get_record(entity, id).await.unwrap() {
            record.created_at = existing.created_at;
            record.version = existing.version;
        }
        self.metadata.upsert_record(entity, &record).await.unwrap()
    }

    /// Link `key` into a single-valued field, as a public URL.
    pub async fn link(&self, entity: EntityType, id: &str, field: &str, key: &AssetKey) {
        let mut fields = self
            .metadata
            .get_record(entity, id)
            .await
            .unwrap()
            .map(|r| r.fields)
            .unwrap_or_else(Map::new);
        fields.insert(field.to_string(), Value::String(resolver().url_for(key)));
        self.put_record(entity, id, Value::Object(fields)).await;
    }

    pub async fn record(&self, entity: EntityType, id: &str) -> Option<ContentRecord> {
        self.metadata.get_record(entity, id).await.unwrap()
    }

    pub async fn sweep(&self, namespace: &str, mode: SweepMode) -> LifecycleResult<SweepReport> {
        let request = SweepRequest {
            namespace: ns(namespace),
            entity_filter: None,
            mode,
        };
        self.lifecycle
            .reconciler
            .sweep(request, CancellationToken::new())
            .await
    }

    pub async fn run_row(&self, run_id: Uuid) -> SweepRunRow {
        self.metadata.get_sweep_run(run_id).await.unwrap().unwrap()
    }
}

pub fn keys(report_keys: &[AssetKey]) -> Vec<String> {
    report_keys.iter().map(ToString::to_string).collect()
}
