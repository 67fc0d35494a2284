//! S3-compatible storage backend using AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    BlobMeta, BlobStore, ContinuationToken, DeleteOutcome, DeleteStatus, ListEntry,
    ListingCapabilities, ListingOptions, ListingPage, ListingResume, PageStream,
};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::Bytes;
use curator_core::{AssetKey, Namespace};
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::OnceCell;
use tracing::instrument;

/// DeleteObjects accepts at most this many keys per request.
const MAX_DELETE_OBJECTS: usize = 1000;

/// Marker included in lazy-credentials errors so they surface as storage
/// config errors instead of generic transport failures.
const CREDENTIALS_INIT_ERROR_MARKER: &str = "curator-s3-lazy-credentials-init";
const CREDENTIALS_RESOLVE_ERROR_MARKER: &str = "curator-s3-lazy-credentials-resolve";

/// Lazily initializes the AWS default credentials chain on first signed request.
///
/// Construction stays free of TLS/native-root side effects, which matters for
/// environments without root certificates.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn build_chain(
        &self,
    ) -> Result<aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        let region = aws_config::Region::new(self.region.clone());

        tokio::task::spawn(async move {
            aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                .region(region)
                .build()
                .await
        })
        .await
        .map_err(|join_err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_INIT_ERROR_MARKER}: failed to initialize AWS default credential chain: {join_err}"
            ))
        })
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self
            .chain
            .get_or_try_init(|| async { self.build_chain().await })
            .await?;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_RESOLVE_ERROR_MARKER}: default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

fn map_s3_operation_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let err_text = err.to_string();
    if err_text.contains(CREDENTIALS_INIT_ERROR_MARKER)
        || err_text.contains(CREDENTIALS_RESOLVE_ERROR_MARKER)
    {
        return StorageError::Config(
            "S3 credential initialization failed. Configure AWS credentials explicitly or ensure ambient AWS credentials and trust roots are available."
                .to_string(),
        );
    }

    if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = err {
        let status = service_err.raw().status().as_u16();
        if matches!(status, 400 | 403 | 405 | 411 | 413) {
            return StorageError::Rejected(format!("S3 responded {status}: {err_text}"));
        }
    }

    StorageError::S3(Box::new(err))
}

fn s3_timestamp(key: &str, dt: &aws_sdk_s3::primitives::DateTime) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(dt.secs())
        .inspect_err(|e| {
            tracing::warn!(
                key = %key,
                timestamp = dt.secs(),
                error = %e,
                "failed to convert S3 timestamp, object age is unknown"
            );
        })
        .ok()
}

/// S3-compatible blob store using AWS SDK.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Normalized endpoint, or the canonical AWS endpoint for the region.
    endpoint: String,
    region: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// # Arguments
    /// * `force_path_style` - Use path-style URLs (`endpoint/bucket/key`) instead of
    ///   virtual-hosted style (`bucket.endpoint/key`). Required for MinIO and some
    ///   S3-compatible services.
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() ^ secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials =
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "curator-config");
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        } else {
            s3_config_builder = s3_config_builder
                .credentials_provider(LazyDefaultCredentialsProvider::new(resolved_region.clone()));
        }

        // Bare host:port endpoints (e.g. "minio:9000") get an http:// scheme.
        let normalized_endpoint = endpoint.as_ref().map(|endpoint_url| {
            let endpoint_lower = endpoint_url.to_lowercase();
            if endpoint_lower.starts_with("http://") || endpoint_lower.starts_with("https://") {
                endpoint_url.clone()
            } else {
                format!("http://{endpoint_url}")
            }
        });

        if let Some(endpoint_url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);

            // Plain HTTP endpoints get an HTTP-only client so startup does not
            // depend on native trust roots.
            if endpoint_url.to_ascii_lowercase().starts_with("http://") {
                s3_config_builder =
                    s3_config_builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }

        if force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        let stored_endpoint = match &normalized_endpoint {
            Some(url) => url.clone(),
            None => format!("s3.{resolved_region}.amazonaws.com"),
        };

        // Strip trailing slashes to avoid "prefix//key".
        let normalized_prefix = prefix
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty());

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalized_prefix,
            endpoint: stored_endpoint,
            region: resolved_region,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Get the full object key for a key (applies prefix if configured).
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Strip the configured prefix from a full object key.
    fn strip_prefix(&self, full_key: &str) -> String {
        match &self.prefix {
            Some(prefix) => {
                let prefix_with_slash = format!("{prefix}/");
                full_key
                    .strip_prefix(&prefix_with_slash)
                    .unwrap_or(full_key)
                    .to_string()
            }
            None => full_key.to_string(),
        }
    }

    /// Convert an AWS SDK error to StorageError, mapping 404 to NotFound.
    fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>, key: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = err
            && service_err.raw().status().as_u16() == 404
        {
            return StorageError::NotFound(key.to_string());
        }
        map_s3_operation_error(err)
    }

    /// Issue one DeleteObjects request for at most [`MAX_DELETE_OBJECTS`] keys.
    async fn delete_chunk(&self, keys: &[AssetKey]) -> StorageResult<Vec<DeleteOutcome>> {
        let mut identifiers = Vec::with_capacity(keys.len());
        for key in keys {
            let identifier = ObjectIdentifier::builder()
                .key(self.full_key(&key.to_key_string()))
                .build()
                .map_err(|e| StorageError::S3(Box::new(e)))?;
            identifiers.push(identifier);
        }
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|e| StorageError::S3(Box::new(e)))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        // Quiet mode only reports failures; S3 treats absent keys as deleted.
        let failures: HashMap<String, String> = output
            .errors()
            .iter()
            .filter_map(|err| {
                let key = self.strip_prefix(err.key()?);
                let message = format!(
                    "{}: {}",
                    err.code().unwrap_or("Unknown"),
                    err.message().unwrap_or("delete failed")
                );
                Some((key, message))
            })
            .collect();

        Ok(keys
            .iter()
            .map(|key| {
                let status = match failures.get(&key.to_key_string()) {
                    Some(message) => DeleteStatus::Failed(message.clone()),
                    None => DeleteStatus::Deleted,
                };
                DeleteOutcome {
                    key: key.clone(),
                    status,
                }
            })
            .collect())
    }
}

#[async_trait]
impl BlobStore for S3Backend {
    #[instrument(skip(self, data), fields(backend = "s3", key = %key, size = data.len()))]
    async fn put(
        &self,
        key: &AssetKey,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        let full_key = self.full_key(&key.to_key_string());
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .set_content_type(content_type.map(str::to_string))
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3", key = %key))]
    async fn get(&self, key: &AssetKey) -> StorageResult<Bytes> {
        let raw = key.to_key_string();
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(&raw))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, &raw))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?
            .into_bytes();

        Ok(bytes)
    }

    #[instrument(skip(self), fields(backend = "s3", key = %key))]
    async fn head(&self, key: &AssetKey) -> StorageResult<BlobMeta> {
        let raw = key.to_key_string();
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(&raw))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, &raw))?;

        Ok(BlobMeta {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified: output.last_modified().and_then(|dt| s3_timestamp(&raw, dt)),
            content_type: output.content_type().map(str::to_string),
        })
    }

    #[instrument(skip(self), fields(backend = "s3", key = %key))]
    async fn delete(&self, key: &AssetKey) -> StorageResult<()> {
        // delete_object succeeds on missing keys, so check first to report NotFound.
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(&key.to_key_string()))
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        Ok(())
    }

    #[instrument(skip(self, keys), fields(backend = "s3", count = keys.len()))]
    async fn delete_many(&self, keys: &[AssetKey]) -> StorageResult<Vec<DeleteOutcome>> {
        let mut outcomes = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(MAX_DELETE_OBJECTS) {
            outcomes.extend(self.delete_chunk(chunk).await?);
        }
        Ok(outcomes)
    }

    fn list_pages<'a>(
        &'a self,
        namespace: &Namespace,
        options: ListingOptions,
        resume: Option<ListingResume>,
    ) -> PageStream<'a> {
        let full_prefix = self.full_key(&namespace.prefix());
        let page_size = options.normalized_page_size();

        Box::pin(async_stream::try_stream! {
            let mut continuation_token: Option<String> = match resume {
                Some(resume) => Some(
                    String::from_utf8(resume.start_token.as_bytes().to_vec()).map_err(|e| {
                        StorageError::InvalidContinuationToken(format!("not an S3 token: {e}"))
                    })?,
                ),
                None => None,
            };

            loop {
                let mut request = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&full_prefix)
                    .max_keys(page_size as i32);

                if let Some(token) = continuation_token.take() {
                    request = request.continuation_token(token);
                }

                let output = request
                    .send()
                    .await
                    .map_err(|e| {
                        // S3 answers 400 for stale or forged continuation tokens.
                        if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = e
                            && service_err.raw().status().as_u16() == 400
                        {
                            let body = format!("{:?}", service_err.err());
                            if body.contains("continuation") || body.contains("token") {
                                return StorageError::InvalidContinuationToken(
                                    "S3 rejected continuation token".to_string(),
                                );
                            }
                        }
                        map_s3_operation_error(e)
                    })?;

                let entries: Vec<ListEntry> = output
                    .contents()
                    .iter()
                    .filter_map(|obj| {
                        let key = self.strip_prefix(obj.key()?);
                        let last_modified = obj.last_modified().and_then(|dt| s3_timestamp(&key, dt));
                        Some(ListEntry {
                            size: obj.size().map(|s| s.max(0) as u64),
                            last_modified,
                            key,
                        })
                    })
                    .collect();

                let next_s3_token = if output.is_truncated() == Some(true) {
                    output.next_continuation_token().map(str::to_string)
                } else {
                    None
                };

                let next_token = match &next_s3_token {
                    Some(token) => Some(ContinuationToken::new(token.as_bytes().to_vec())?),
                    None => None,
                };

                yield ListingPage { entries, next_token };

                match next_s3_token {
                    Some(token) => continuation_token = Some(token),
                    None => break,
                }
            }
        })
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    fn listing_capabilities(&self) -> ListingCapabilities {
        ListingCapabilities { resumable: true }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

        let marker_key = self.full_key(".curator-health-check");

        let health_check_future = async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&marker_key)
                .body(Bytes::from_static(b"health-check").into())
                .send()
                .await
                .map_err(map_s3_operation_error)?;

            if let Err(e) = self
                .client
                .delete_object()
                .bucket(&self.bucket)
                .key(&marker_key)
                .send()
                .await
                && !matches!(
                    &e,
                    aws_sdk_s3::error::SdkError::ServiceError(se) if se.raw().status().as_u16() == 404
                )
            {
                return Err(map_s3_operation_error(e));
            }

            Ok(())
        };

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, health_check_future)
            .await
            .map_err(|_| {
                StorageError::Timeout("S3 health check timed out after 10 seconds".to_string())
            })?
    }
}
