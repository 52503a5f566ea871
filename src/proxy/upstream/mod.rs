// Upstream transport seam and the resilient forwarder built on top of it.

pub mod client;
pub mod forwarder;

pub use client::HttpTransport;
pub use forwarder::{Forwarder, ForwarderConfig, ForwardOutcome};

use std::future::Future;

use serde_json::Value;

/// Raw reply from one network attempt, before any normalization.
#[derive(Debug, Clone)]
pub struct RawUpstreamResponse {
    pub status: u16,
    pub body: Value,
}

/// Transport-level failure for a single attempt.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The attempt ran out the per-call clock.
    Timeout,
    /// Connection-level failure (refused, reset, DNS).
    Connect(String),
    /// The upstream replied with a body we could not decode.
    Decode(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "attempt timed out"),
            Self::Connect(msg) => write!(f, "connection failed: {msg}"),
            Self::Decode(msg) => write!(f, "undecodable upstream body: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// One operation: POST the signed parameter set to the upstream target.
/// Implement this to replace the network in tests.
pub trait UpstreamTransport: Send + Sync + 'static {
    fn send(
        &self,
        target: String,
        pairs: Vec<(String, String)>,
    ) -> impl Future<Output = Result<RawUpstreamResponse, TransportError>> + Send;
}
