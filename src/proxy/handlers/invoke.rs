// The single logical invoke operation over HTTP.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};

use crate::proxy::response::{ErrorKind, ProxyResponse};
use crate::proxy::server::AppState;
use crate::proxy::validate::ProxyRequest;

/// `POST /api/invoke` takes `{method, parameters}` and returns the envelope.
/// The HTTP status is derived from the error kind; the envelope itself is
/// the contract and is identical at every status.
pub async fn handle_invoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ProxyRequest>,
) -> Response {
    let identity = client_identity(&headers);
    let response = state.pipeline.invoke(&identity, request).await;
    envelope_response(response)
}

/// Rate limiting is keyed on the caller's API key when one is presented.
fn client_identity(headers: &HeaderMap) -> String {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

fn envelope_response(response: ProxyResponse) -> Response {
    let status = match response.kind() {
        None => StatusCode::OK,
        Some(ErrorKind::InvalidRequest) => StatusCode::BAD_REQUEST,
        Some(ErrorKind::RateLimited) | Some(ErrorKind::UpstreamRateLimited) => {
            StatusCode::TOO_MANY_REQUESTS
        }
        Some(ErrorKind::CircuitOpen) => StatusCode::SERVICE_UNAVAILABLE,
        Some(ErrorKind::UpstreamTimeout) => StatusCode::GATEWAY_TIMEOUT,
        Some(ErrorKind::UpstreamRejected)
        | Some(ErrorKind::UpstreamError)
        | Some(ErrorKind::Unknown) => StatusCode::BAD_GATEWAY,
    };

    let retry_after = response
        .error
        .as_ref()
        .filter(|e| e.kind == ErrorKind::RateLimited)
        .and_then(|e| e.details.as_ref())
        .and_then(|d| d.get("retry_after_secs"))
        .and_then(|v| v.as_u64());

    let mut reply = (status, Json(response)).into_response();
    if let Some(secs) = retry_after {
        if let Ok(value) = header::HeaderValue::from_str(&secs.to_string()) {
            reply.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::response::ResponseMeta;
    use serde_json::json;

    fn meta() -> ResponseMeta {
        ResponseMeta::new("req-1".to_string(), 1, 0, false)
    }

    #[test]
    fn identity_falls_back_to_anonymous() {
        let headers = HeaderMap::new();
        assert_eq!(client_identity(&headers), "anonymous");
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "sk-123".parse().unwrap());
        assert_eq!(client_identity(&headers), "sk-123");
    }

    #[test]
    fn rate_limit_reply_carries_retry_after_header() {
        let response = ProxyResponse::err(
            ErrorKind::RateLimited,
            "rate limit exceeded".to_string(),
            Some(json!({"retry_after_secs": 12})),
            meta(),
        );
        let reply = envelope_response(response);
        assert_eq!(reply.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            reply.headers().get(header::RETRY_AFTER).unwrap(),
            "12"
        );
    }

    #[test]
    fn status_mapping() {
        let kinds = [
            (ErrorKind::InvalidRequest, StatusCode::BAD_REQUEST),
            (ErrorKind::CircuitOpen, StatusCode::SERVICE_UNAVAILABLE),
            (ErrorKind::UpstreamTimeout, StatusCode::GATEWAY_TIMEOUT),
            (ErrorKind::UpstreamRejected, StatusCode::BAD_GATEWAY),
            (ErrorKind::UpstreamError, StatusCode::BAD_GATEWAY),
        ];
        for (kind, expected) in kinds {
            let reply =
                envelope_response(ProxyResponse::err(kind, "x".to_string(), None, meta()));
            assert_eq!(reply.status(), expected);
        }
        let ok = envelope_response(ProxyResponse::ok(json!(1), meta()));
        assert_eq!(ok.status(), StatusCode::OK);
    }
}
