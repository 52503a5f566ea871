// Production transport: reqwest client tuned for connection reuse.

use reqwest::Client;
use serde_json::Value;
use tokio::time::Duration;
use tracing::debug;

use super::{RawUpstreamResponse, TransportError, UpstreamTransport};

/// Egress settings for the outbound HTTP client.
#[derive(Debug, Clone, Default)]
pub struct EgressConfig {
    /// Optional forward proxy for outbound calls (http://, https://, socks5://).
    pub proxy_url: Option<String>,
    pub user_agent: Option<String>,
}

pub struct HttpTransport {
    http_client: Client,
}

impl HttpTransport {
    pub fn new(egress: &EgressConfig) -> Result<Self, String> {
        let user_agent = egress
            .user_agent
            .clone()
            .filter(|ua| !ua.is_empty())
            .unwrap_or_else(|| concat!("affiliate-proxy/", env!("CARGO_PKG_VERSION")).to_string());

        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(&user_agent);

        match &egress.proxy_url {
            Some(url) if !url.is_empty() => {
                let proxy = reqwest::Proxy::all(url)
                    .map_err(|e| format!("invalid egress proxy {url}: {e}"))?;
                builder = builder.proxy(proxy);
                tracing::info!("outbound calls routed through proxy {url}");
            }
            _ => {
                builder = builder.no_proxy();
            }
        }

        let http_client = builder
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;

        Ok(Self { http_client })
    }
}

impl UpstreamTransport for HttpTransport {
    async fn send(
        &self,
        target: String,
        pairs: Vec<(String, String)>,
    ) -> Result<RawUpstreamResponse, TransportError> {
        let response = self
            .http_client
            .post(&target)
            .form(&pairs)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Connect(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        debug!(upstream = target.as_str(), status = status, "upstream attempt completed");

        let body: Value = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        Ok(RawUpstreamResponse { status, body })
    }
}
