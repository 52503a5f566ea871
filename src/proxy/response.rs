// Response normalization: one envelope shape for every outcome.
//
// Local failures (validation, rate limit, open circuit) and upstream failures
// produce structurally identical envelopes, so callers never learn where in
// the pipeline a request died. Secrets and pre-digest material never appear
// here.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::proxy::error::ProxyError;

/// Client-visible failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    RateLimited,
    UpstreamRateLimited,
    CircuitOpen,
    UpstreamTimeout,
    UpstreamRejected,
    UpstreamError,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Per-request envelope metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseMeta {
    pub request_id: String,
    /// Seconds since epoch at completion.
    pub timestamp: i64,
    pub duration_ms: u64,
    /// Upstream attempts made; zero for local failures and cache hits.
    pub attempts: u32,
    pub cache_hit: bool,
}

impl ResponseMeta {
    pub fn new(request_id: String, duration_ms: u64, attempts: u32, cache_hit: bool) -> Self {
        Self {
            request_id,
            timestamp: chrono::Utc::now().timestamp(),
            duration_ms,
            attempts,
            cache_hit,
        }
    }
}

/// The one response shape for every outcome. Exactly one of `data` / `error`
/// is populated.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub metadata: ResponseMeta,
}

impl ProxyResponse {
    pub fn ok(data: Value, metadata: ResponseMeta) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata,
        }
    }

    pub fn err(kind: ErrorKind, message: String, details: Option<Value>, metadata: ResponseMeta) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                kind,
                message,
                details,
            }),
            metadata,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Classify an upstream-reported error from whatever code/message fields it
/// exposes. The upstream message is passed through verbatim; only the kind is
/// ours.
pub fn classify_upstream_error(code: Option<i64>, message: &str) -> ErrorKind {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("sign")
        || lowered.contains("app_key")
        || lowered.contains("appkey")
        || lowered.contains("permission")
        || matches!(code, Some(25) | Some(26) | Some(11))
    {
        ErrorKind::UpstreamRejected
    } else if lowered.contains("param") || lowered.contains("invalid") || matches!(code, Some(40)) {
        ErrorKind::InvalidRequest
    } else if lowered.contains("limit") || lowered.contains("too many") || matches!(code, Some(7)) {
        ErrorKind::UpstreamRateLimited
    } else if lowered.contains("server") || lowered.contains("service") || lowered.contains("unavailable")
    {
        ErrorKind::UpstreamError
    } else {
        ErrorKind::Unknown
    }
}

/// Map a raw upstream payload into the envelope. A payload carrying an
/// `error_response` object is an upstream-reported failure even when the HTTP
/// status was 200.
pub fn normalize_upstream(payload: Value, metadata: ResponseMeta) -> ProxyResponse {
    if let Some(err_obj) = payload.get("error_response") {
        let code = err_obj.get("code").and_then(Value::as_i64);
        let message = err_obj
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("upstream reported an error")
            .to_string();
        let kind = classify_upstream_error(code, &message);
        if kind == ErrorKind::UpstreamRejected {
            alert_rejection(&metadata.request_id, &message);
        }
        let details = err_obj.get("sub_msg").cloned().map(|sub| json!({ "sub_msg": sub }));
        return ProxyResponse::err(kind, message, details, metadata);
    }
    ProxyResponse::ok(payload, metadata)
}

/// Map a pipeline failure into the envelope. Same shape as upstream failures.
pub fn normalize_error(err: &ProxyError, metadata: ResponseMeta) -> ProxyResponse {
    match err {
        ProxyError::InvalidRequest { message, fields } => ProxyResponse::err(
            ErrorKind::InvalidRequest,
            message.clone(),
            Some(json!({ "fields": fields })),
            metadata,
        ),
        ProxyError::RateLimited { retry_after } => ProxyResponse::err(
            ErrorKind::RateLimited,
            "rate limit exceeded".to_string(),
            Some(json!({ "retry_after_secs": retry_after.as_secs() })),
            metadata,
        ),
        ProxyError::CircuitOpen { target } => ProxyResponse::err(
            ErrorKind::CircuitOpen,
            format!("upstream {target} temporarily unavailable"),
            None,
            metadata,
        ),
        ProxyError::UpstreamTimeout { attempts } => ProxyResponse::err(
            ErrorKind::UpstreamTimeout,
            format!("upstream timed out after {attempts} attempt(s)"),
            None,
            metadata,
        ),
        ProxyError::UpstreamRejected { status, message } => {
            alert_rejection(&metadata.request_id, message);
            ProxyResponse::err(
                ErrorKind::UpstreamRejected,
                message.clone(),
                Some(json!({ "status": status })),
                metadata,
            )
        }
        ProxyError::UpstreamRateLimited { message } => ProxyResponse::err(
            ErrorKind::UpstreamRateLimited,
            message.clone(),
            None,
            metadata,
        ),
        ProxyError::UpstreamError {
            status,
            message,
            attempts,
        } => ProxyResponse::err(
            ErrorKind::UpstreamError,
            message.clone(),
            Some(json!({ "status": status, "attempts": attempts })),
            metadata,
        ),
    }
}

// A rejected signature in production means a signing or credential defect on
// our side, not a caller mistake. Logged on a dedicated target so operators
// can route it to paging.
fn alert_rejection(request_id: &str, message: &str) {
    error!(
        target: "alert",
        request_id = request_id,
        message = message,
        "upstream rejected a signed request; check credentials and signing"
    );
}
