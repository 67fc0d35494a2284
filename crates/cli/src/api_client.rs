use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    /// URL from raw path segments, each percent-encoded.
    fn segments_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.url("/")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("server URL cannot be a base"))?
            .clear()
            .extend(segments);
        Ok(url)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let response = req.bearer_auth(&self.token).send().await?;
        let status = response.status();
        tracing::debug!(url = %response.url(), %status, "API response");
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("{}", describe_failure(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url("/v1/health")?;
        self.send_json(self.http.get(url)).await
    }

    /// Run a sweep. A partial failure still returns the report; check
    /// [`SweepReport::status`].
    pub async fn reconcile(&self, req: &ReconcileRequest) -> Result<SweepReport> {
        let url = self.url("/v1/admin/reconcile")?;
        self.send_json(self.http.post(url).json(req)).await
    }

    pub async fn list_runs(
        &self,
        namespace: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<SweepRun>> {
        let mut url = self.url("/v1/admin/reconcile/runs")?;
        if let Some(namespace) = namespace {
            url.query_pairs_mut().append_pair("namespace", namespace);
        }
        if let Some(limit) = limit {
            url.query_pairs_mut()
                .append_pair("limit", &limit.to_string());
        }
        self.send_json(self.http.get(url)).await
    }

    pub async fn list_records(
        &self,
        entity_type: &str,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<ListRecordsResponse> {
        let mut url = self.segments_url(&["v1", "records", entity_type])?;
        if let Some(limit) = limit {
            url.query_pairs_mut()
                .append_pair("limit", &limit.to_string());
        }
        if let Some(offset) = offset {
            url.query_pairs_mut()
                .append_pair("offset", &offset.to_string());
        }
        self.send_json(self.http.get(url)).await
    }

    pub async fn get_record(&self, entity_type: &str, id: &str) -> Result<Record> {
        let url = self.segments_url(&["v1", "records", entity_type, id])?;
        self.send_json(self.http.get(url)).await
    }

    /// Delete a record and release its assets.
    pub async fn delete_record(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<RecordDeleteResponse> {
        let mut url = self.segments_url(&["v1", "records", entity_type, id])?;
        url.query_pairs_mut().append_pair("confirm", "true");
        self.send_json(self.http.delete(url)).await
    }

    pub async fn upload_asset(
        &self,
        target: &AssetTarget<'_>,
        upload: AssetUpload,
    ) -> Result<UploadResponse> {
        let mut url = self.segments_url(&[
            "v1",
            "records",
            target.entity_type,
            target.id,
            "assets",
            target.field,
        ])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("filename", &upload.filename);
            if let Some(namespace) = &upload.namespace {
                query.append_pair("namespace", namespace);
            }
            if let Some(index) = target.index {
                query.append_pair("index", &index.to_string());
            }
        }

        let mut req = self.http.put(url).body(upload.data);
        if let Some(content_type) = &upload.content_type {
            req = req.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        self.send_json(req).await
    }

    /// Clear a reference and delete the blob it named.
    pub async fn unlink_asset(
        &self,
        target: &AssetTarget<'_>,
        key: &str,
    ) -> Result<UnlinkResponse> {
        let mut url = self.segments_url(&[
            "v1",
            "records",
            target.entity_type,
            target.id,
            "assets",
            target.field,
        ])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("key", key);
            if let Some(index) = target.index {
                query.append_pair("index", &index.to_string());
            }
            query.append_pair("confirm", "true");
        }
        self.send_json(self.http.delete(url)).await
    }
}

/// Render a failed response, preferring the server's `{code, message}` body.
fn describe_failure(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => format!("API error ({status}): {} ({})", err.message, err.code),
        Err(_) => format!("API error ({status}): {body}"),
    }
}

// =============================================================================
// Request/response types (mirrored from server handlers)
// =============================================================================

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub storage_backend: String,
}

#[derive(Debug, Serialize)]
pub struct ReconcileRequest {
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    pub confirm: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemError {
    #[serde(default)]
    pub key: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub run_id: String,
    pub namespace: String,
    pub mode: String,
    pub status: String,
    #[serde(default)]
    pub entity_filter: Option<String>,
    pub grace_window_secs: i64,
    pub started_at: String,
    pub finished_at: String,
    pub found: usize,
    pub referenced: usize,
    pub candidates: usize,
    #[serde(default)]
    pub deleted: Vec<String>,
    #[serde(default)]
    pub would_delete: Vec<String>,
    #[serde(default)]
    pub skipped_grace: Vec<String>,
    #[serde(default)]
    pub skipped_unknown: Vec<String>,
    #[serde(default)]
    pub errors: Vec<ItemError>,
}

impl SweepReport {
    pub fn is_partial_failure(&self) -> bool {
        self.status == "partial_failure"
    }
}

#[derive(Debug, Deserialize)]
pub struct SweepRun {
    pub run_id: String,
    pub namespace: String,
    pub mode: String,
    pub state: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub report: Option<SweepReport>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub fields: serde_json::Map<String, Value>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListRecordsResponse {
    pub entity_type: String,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseReport {
    #[serde(default)]
    pub released: Vec<String>,
    #[serde(default)]
    pub retained_shared: Vec<String>,
    #[serde(default)]
    pub failed: Vec<ItemError>,
}

#[derive(Debug, Deserialize)]
pub struct RecordDeleteResponse {
    pub existed: bool,
    pub assets: ReleaseReport,
}

/// Slot an asset command addresses.
#[derive(Debug, Clone, Copy)]
pub struct AssetTarget<'a> {
    pub entity_type: &'a str,
    pub id: &'a str,
    pub field: &'a str,
    pub index: Option<usize>,
}

#[derive(Debug)]
pub struct AssetUpload {
    pub filename: String,
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub url: String,
    pub key: String,
    #[serde(default)]
    pub replaced: Option<String>,
    #[serde(default)]
    pub released: bool,
}

#[derive(Debug, Deserialize)]
pub struct BlobStatus {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnlinkResponse {
    pub key: String,
    pub record_updated: bool,
    pub blob: BlobStatus,
}
