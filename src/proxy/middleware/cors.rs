use tower_http::cors::{Any, CorsLayer};

/// Permissive CORS: the proxy is the security boundary for the credential,
/// not the browser origin.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
