//! Asset keys, namespaces and public URL resolution.

use bytes::Bytes;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Maximum namespace length in characters.
pub const MAX_NAMESPACE_LEN: usize = 64;

/// Maximum length of the object name portion of a key.
pub const MAX_NAME_LEN: usize = 200;

/// Maximum length of a sanitized file extension.
pub const MAX_EXTENSION_LEN: usize = 10;

const RANDOM_SUFFIX_LEN: usize = 12;

/// A logical folder of the blob store (`gallery`, `team-photos`, ...).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// Create from a string, validating format.
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_NAMESPACE_LEN {
            return Err(crate::Error::InvalidNamespace(format!(
                "namespace must be 1-{MAX_NAMESPACE_LEN} chars, got {}",
                name.len()
            )));
        }
        for c in name.chars() {
            if !matches!(c, 'a'..='z' | '0'..='9' | '-' | '_') {
                return Err(crate::Error::InvalidNamespace(format!(
                    "invalid character in namespace: {c:?}"
                )));
            }
        }
        Ok(Self(name))
    }

    /// Get the namespace string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Listing prefix for this namespace (`<namespace>/`).
    pub fn prefix(&self) -> String {
        format!("{}/", self.0)
    }
}

impl TryFrom<String> for Namespace {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<Namespace> for String {
    fn from(value: Namespace) -> Self {
        value.0
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({self})")
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one stored object: `<namespace>/<name>`.
///
/// Keys are generated by [`AssetKey::generate`]; [`AssetKey::parse`] only
/// accepts keys whose name is a single segment of `[A-Za-z0-9._-]`, so a
/// parsed key can never address anything outside its namespace.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetKey {
    namespace: Namespace,
    name: String,
}

impl AssetKey {
    /// Generate a fresh key for an upload.
    ///
    /// The name is `<unix millis>-<random suffix>.<ext>`, where the extension
    /// is taken from `original_name` and sanitized.
    pub fn generate(namespace: &Namespace, original_name: &str, now: OffsetDateTime) -> Self {
        let millis = now.unix_timestamp_nanos() / 1_000_000;
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(RANDOM_SUFFIX_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        let ext = sanitize_extension(original_name);
        Self {
            namespace: namespace.clone(),
            name: format!("{millis}-{suffix}.{ext}"),
        }
    }

    /// Parse a bare key (`gallery/1700000000000-abc.jpg`).
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let (ns, name) = raw.split_once('/').ok_or_else(|| {
            crate::Error::InvalidAssetKey(format!("missing namespace separator: {raw:?}"))
        })?;
        let namespace = Namespace::new(ns)
            .map_err(|e| crate::Error::InvalidAssetKey(format!("{raw:?}: {e}")))?;
        Self::new(namespace, name)
    }

    /// Create from components.
    pub fn new(namespace: Namespace, name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(crate::Error::InvalidAssetKey(format!(
                "name must be 1-{MAX_NAME_LEN} chars, got {}",
                name.len()
            )));
        }
        if name.starts_with('.') {
            return Err(crate::Error::InvalidAssetKey(format!(
                "name cannot start with '.': {name:?}"
            )));
        }
        for c in name.chars() {
            if !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.') {
                return Err(crate::Error::InvalidAssetKey(format!(
                    "invalid character in name: {c:?}"
                )));
            }
        }
        Ok(Self { namespace, name })
    }

    /// Namespace the key lives in.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Object name within the namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full key string as stored in the backend.
    pub fn to_key_string(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl TryFrom<String> for AssetKey {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<AssetKey> for String {
    fn from(value: AssetKey) -> Self {
        value.to_key_string()
    }
}

impl fmt::Debug for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetKey({self})")
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn sanitize_extension(original_name: &str) -> String {
    let basename = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let ext: String = basename
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_EXTENSION_LEN)
        .collect();
    if ext.is_empty() { "bin".to_string() } else { ext }
}

/// A file waiting to be stored and linked.
#[derive(Clone)]
pub struct PendingUpload {
    /// Namespace requested by the caller (only honoured for dynamic fields).
    pub namespace: Option<Namespace>,
    /// File name as supplied by the client; only its extension is kept.
    pub original_name: String,
    /// MIME type, if known.
    pub content_type: Option<String>,
    /// File contents.
    pub bytes: Bytes,
}

impl PendingUpload {
    pub fn new(original_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            namespace: None,
            original_name: original_name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Upload size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for PendingUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingUpload")
            .field("namespace", &self.namespace)
            .field("original_name", &self.original_name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Maps keys to public URLs and normalizes stored references back to keys.
#[derive(Clone, Debug)]
pub struct PublicUrlResolver {
    base_url: String,
    alternate_bases: Vec<String>,
}

impl PublicUrlResolver {
    /// Create a resolver. Trailing slashes are trimmed from every base.
    pub fn new(base_url: impl Into<String>, alternate_bases: Vec<String>) -> Self {
        let trim = |s: String| s.trim_end_matches('/').to_string();
        Self {
            base_url: trim(base_url.into()),
            alternate_bases: alternate_bases
                .into_iter()
                .map(trim)
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Public URL for a key.
    pub fn url_for(&self, key: &AssetKey) -> String {
        format!("{}/{}", self.base_url, key)
    }

    /// Normalize a stored reference (public URL or bare key) to its key.
    ///
    /// Returns `None` for empty values, external URLs and anything that does
    /// not parse as a key.
    pub fn key_from_ref(&self, raw: &str) -> Option<AssetKey> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let bases = std::iter::once(&self.base_url).chain(self.alternate_bases.iter());
        for base in bases.filter(|b| !b.is_empty()) {
            if let Some(rest) = raw.strip_prefix(base.as_str())
                && let Some(path) = rest.strip_prefix('/')
            {
                let path = path.split(['?', '#']).next().unwrap_or_default();
                return AssetKey::parse(path).ok();
            }
        }

        if raw.contains("://") || raw.starts_with("//") {
            return None;
        }
        AssetKey::parse(raw).ok()
    }
}
