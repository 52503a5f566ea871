use axum::{
    extract::DefaultBodyLimit,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::proxy::handlers;
use crate::proxy::pipeline::ProxyPipeline;
use crate::proxy::upstream::HttpTransport;

/// Axum application state. The pipeline owns every piece of shared mutable
/// state (breaker, rate windows, cache); the server only holds the handle.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ProxyPipeline<HttpTransport>>,
}

/// Axum server instance.
pub struct AxumServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl AxumServer {
    /// Bind, start serving, and spawn the cache/rate-window housekeeping
    /// task. Returns the server handle plus the accept-loop join handle.
    pub async fn start(
        host: String,
        port: u16,
        pipeline: Arc<ProxyPipeline<HttpTransport>>,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), String> {
        let state = AppState {
            pipeline: pipeline.clone(),
        };

        let app = Router::new()
            .route("/api/invoke", post(handlers::invoke::handle_invoke))
            .route("/api/methods", get(handlers::manage::list_methods))
            .route("/api/circuits", get(handlers::manage::circuit_stats))
            .route("/healthz", get(health_check_handler))
            .layer(DefaultBodyLimit::max(1024 * 1024))
            .layer(crate::proxy::middleware::cors_layer())
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("failed to bind {}: {}", addr, e))?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let server_instance = Self {
            shutdown_tx: Some(shutdown_tx),
        };

        // Periodic sweep of expired cache entries and idle rate windows.
        let sweeper = pipeline.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let (cache_removed, windows_removed) = sweeper.sweep();
                if cache_removed + windows_removed > 0 {
                    debug!(
                        cache_removed = cache_removed,
                        windows_removed = windows_removed,
                        "housekeeping sweep"
                    );
                }
            }
        });

        let handle = tokio::spawn(async move {
            use hyper::server::conn::http1;
            use hyper_util::rt::TokioIo;
            use hyper_util::service::TowerToHyperService;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let service = TowerToHyperService::new(app.clone());

                                tokio::task::spawn(async move {
                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("connection ended: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("failed to accept connection: {:?}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("signing proxy stopped listening");
                        break;
                    }
                }
            }
        });

        Ok((server_instance, handle))
    }

    /// Stop the server.
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn health_check_handler() -> Response {
    Json(serde_json::json!({
        "status": "ok"
    }))
    .into_response()
}
