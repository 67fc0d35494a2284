//! Configuration types shared across crates.

use crate::asset::{Namespace, PublicUrlResolver};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use time::Duration;

/// Largest batch a single delete call may carry (S3 `DeleteObjects` limit).
pub const MAX_DELETE_BATCH_SIZE: usize = 1000;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// Restrict network access to this endpoint at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Largest accepted upload body in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Admin token configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Pre-computed hash of the admin token (SHA256 hex, 64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
}

impl AdminConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The hash is deterministic but not a real token.
    pub fn for_testing() -> Self {
        Self {
            // SHA256 of "test-admin-token"
            token_hash: "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
                .to_string(),
        }
    }

    /// Validate the configured hash format.
    pub fn validate(&self) -> Result<(), String> {
        let hash = self.token_hash.trim();
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(
                "admin.token_hash must be a 64-character SHA256 hex digest".to_string(),
            );
        }
        Ok(())
    }
}

/// Where stored objects are publicly reachable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublicUrlConfig {
    /// Base URL; an object's public URL is `<base_url>/<key>`.
    #[serde(default = "default_public_base_url")]
    pub base_url: String,
    /// Older base URLs that may still appear in stored records.
    #[serde(default)]
    pub alternate_bases: Vec<String>,
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080/assets".to_string()
}

impl Default for PublicUrlConfig {
    fn default() -> Self {
        Self {
            base_url: default_public_base_url(),
            alternate_bases: Vec::new(),
        }
    }
}

impl PublicUrlConfig {
    pub fn resolver(&self) -> PublicUrlResolver {
        PublicUrlResolver::new(self.base_url.clone(), self.alternate_bases.clone())
    }

    pub fn validate(&self) -> Result<(), String> {
        for base in std::iter::once(&self.base_url).chain(self.alternate_bases.iter()) {
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                return Err(format!(
                    "public_url base {base:?} must start with http:// or https://"
                ));
            }
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
    /// In-process storage; contents are lost on restart.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.trim().is_empty() {
                    return Err("s3 config requires a bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            _ => Ok(()),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (small deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds. Advisory only: slow queries are logged,
        /// not cancelled.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over the individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// Prefer CURATOR_METADATA__PASSWORD over storing this in a file.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds, enforced by the server.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(60_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(60)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => Err(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ),
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Reconciliation sweep configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Minimum age in seconds before an unreferenced object may be deleted.
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: u64,
    /// Per-namespace grace window overrides, in seconds.
    #[serde(default)]
    pub namespace_grace_secs: BTreeMap<String, u64>,
    /// Keys per delete call.
    #[serde(default = "default_delete_batch_size")]
    pub delete_batch_size: usize,
    /// Keys per listing page.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
    /// Upper bound on one sweep's wall time.
    #[serde(default = "default_sweep_timeout_secs")]
    pub sweep_timeout_secs: u64,
    /// Run sweeps on a timer (disabled by default).
    #[serde(default)]
    pub auto_schedule_enabled: bool,
    #[serde(default = "default_auto_schedule_interval_secs")]
    pub auto_schedule_interval_secs: u64,
    /// Namespaces swept by the scheduler.
    #[serde(default)]
    pub auto_schedule_namespaces: Vec<String>,
}

fn default_grace_window_secs() -> u64 {
    600 // 10 minutes
}

fn default_delete_batch_size() -> usize {
    100
}

fn default_list_page_size() -> usize {
    1000
}

fn default_sweep_timeout_secs() -> u64 {
    300
}

fn default_auto_schedule_interval_secs() -> u64 {
    86400 // daily
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            grace_window_secs: default_grace_window_secs(),
            namespace_grace_secs: BTreeMap::new(),
            delete_batch_size: default_delete_batch_size(),
            list_page_size: default_list_page_size(),
            sweep_timeout_secs: default_sweep_timeout_secs(),
            auto_schedule_enabled: false,
            auto_schedule_interval_secs: default_auto_schedule_interval_secs(),
            auto_schedule_namespaces: Vec::new(),
        }
    }
}

impl ReconcileConfig {
    /// Grace window for a namespace, honouring overrides.
    pub fn grace_window_for(&self, namespace: &Namespace) -> Duration {
        let secs = self
            .namespace_grace_secs
            .get(namespace.as_str())
            .copied()
            .unwrap_or(self.grace_window_secs);
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }

    pub fn sweep_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_timeout_secs)
    }

    pub fn auto_schedule_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.auto_schedule_interval_secs)
    }

    /// Namespaces the scheduler sweeps.
    pub fn scheduled_namespaces(&self) -> Result<Vec<Namespace>, String> {
        self.auto_schedule_namespaces
            .iter()
            .map(|ns| Namespace::new(ns.as_str()).map_err(|e| format!("reconcile: {e}")))
            .collect()
    }

    /// Validate reconcile configuration for dangerous settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.grace_window_secs > i64::MAX as u64 {
            return Err(format!(
                "reconcile.grace_window_secs {} exceeds maximum value {}",
                self.grace_window_secs,
                i64::MAX
            ));
        }
        for (ns, secs) in &self.namespace_grace_secs {
            Namespace::new(ns.as_str())
                .map_err(|e| format!("reconcile.namespace_grace_secs: {e}"))?;
            if *secs > i64::MAX as u64 {
                return Err(format!(
                    "reconcile.namespace_grace_secs.{ns} {secs} exceeds maximum value {}",
                    i64::MAX
                ));
            }
        }
        if self.delete_batch_size == 0 || self.delete_batch_size > MAX_DELETE_BATCH_SIZE {
            return Err(format!(
                "reconcile.delete_batch_size must be between 1 and {MAX_DELETE_BATCH_SIZE}"
            ));
        }
        if self.list_page_size == 0 {
            return Err("reconcile.list_page_size cannot be 0".to_string());
        }
        if self.sweep_timeout_secs == 0 {
            return Err("reconcile.sweep_timeout_secs cannot be 0".to_string());
        }
        if self.auto_schedule_enabled {
            // tokio::time::interval panics on a zero period
            if self.auto_schedule_interval_secs == 0 {
                return Err("reconcile.auto_schedule_interval_secs cannot be 0".to_string());
            }
            self.scheduled_namespaces()?;
        }
        Ok(())
    }
}

/// Retry settings for transient backend failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_retry_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_backoff_ms() -> u64 {
    200
}

fn default_retry_max_backoff_ms() -> u64 {
    4000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_backoff_ms: default_retry_initial_backoff_ms(),
            max_backoff_ms: default_retry_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: std::time::Duration::from_millis(self.initial_backoff_ms),
            max_backoff: std::time::Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err("retry.max_attempts must be between 1 and 10".to_string());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("retry.initial_backoff_ms cannot exceed retry.max_backoff_ms".to_string());
        }
        Ok(())
    }
}

/// Upload and delete coordinator settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Re-check references before deleting a released blob and keep it if
    /// another record still points at it.
    #[serde(default = "default_guard_shared_references")]
    pub guard_shared_references: bool,
}

fn default_guard_shared_references() -> bool {
    true
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            guard_shared_references: default_guard_shared_references(),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub public_url: PublicUrlConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Admin token configuration (required).
    pub admin: AdminConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses memory storage, SQLite metadata,
    /// and a dummy admin token.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            public_url: PublicUrlConfig::default(),
            storage: StorageConfig::Memory,
            metadata: MetadataConfig::default(),
            admin: AdminConfig::for_testing(),
            reconcile: ReconcileConfig::default(),
            retry: RetryConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.admin.validate()?;
        self.public_url.validate()?;
        self.storage.validate()?;
        self.metadata.validate()?;
        self.reconcile.validate()?;
        self.retry.validate()?;
        Ok(())
    }
}
