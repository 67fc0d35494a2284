//! Admin authentication and request tracing middleware.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    ///
    /// The value is truncated to [`MAX_TRACE_ID_LEN`] characters and
    /// restricted to printable ASCII.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Marker extension set when the request carried the admin token.
#[derive(Clone, Copy, Debug)]
pub struct AdminCaller;

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(&v[7..])
            } else {
                None
            }
        })
}

fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// SHA-256 hex digest of a bearer token.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Compare digests without short-circuiting on the first differing byte.
fn digests_match(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

/// Tag admin requests and run the rest of the stack inside a `request`
/// span carrying the trace ID.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let span = tracing::info_span!("request", trace_id = %trace_id);
    req.extensions_mut().insert(trace_id);

    if let Some(token) = extract_bearer_token(&req) {
        let expected = state.config.admin.token_hash.trim().to_ascii_lowercase();
        if digests_match(&hash_token(token), &expected) {
            req.extensions_mut().insert(AdminCaller);
        } else {
            tracing::debug!(parent: &span, "bearer token does not match the admin token");
        }
    }

    Ok(next.run(req).instrument(span).await)
}

/// Require the admin token.
pub fn require_admin(req: &Request) -> ApiResult<AdminCaller> {
    req.extensions()
        .get::<AdminCaller>()
        .copied()
        .ok_or_else(|| ApiError::Unauthorized("admin token required".to_string()))
}

/// Get the trace ID from request extensions.
pub fn get_trace_id(req: &Request) -> Option<&TraceId> {
    req.extensions().get::<TraceId>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_matches_sha256sum() {
        // echo -n "test-admin-token" | sha256sum
        assert_eq!(
            hash_token("test-admin-token"),
            "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
        );
    }

    #[test]
    fn test_digest_comparison() {
        let a = hash_token("one");
        assert!(digests_match(&a, &a.clone()));
        assert!(!digests_match(&a, &hash_token("two")));
        assert!(!digests_match(&a, &a[..10]));
    }

    #[test]
    fn test_trace_id_sanitized() {
        let id = TraceId::from_client("abc\n\u{7}def");
        assert_eq!(id.as_str(), "abcdef");
        let long = "x".repeat(500);
        assert_eq!(TraceId::from_client(&long).as_str().len(), MAX_TRACE_ID_LEN);
        assert!(!TraceId::from_client("\n").as_str().is_empty());
    }

    #[test]
    fn test_bearer_scheme_is_case_insensitive() {
        let req = Request::builder()
            .header(AUTHORIZATION, "bEaReR secret")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(extract_bearer_token(&req), Some("secret"));

        let req = Request::builder()
            .header(AUTHORIZATION, "Basic secret")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(extract_bearer_token(&req), None);
    }
}
