use std::time::Duration;

/// Failure classification for the signing/forwarding pipeline.
///
/// Every variant maps onto exactly one client-visible error kind; the
/// normalizer owns that mapping so transports never build envelopes by hand.
#[derive(Debug, Clone)]
pub enum ProxyError {
    /// Request rejected before signing: unknown method or failed field checks.
    InvalidRequest {
        message: String,
        /// Names of the missing or invalid fields.
        fields: Vec<String>,
    },
    /// Local admission denial.
    RateLimited { retry_after: Duration },
    /// Breaker is open for the upstream target, no network attempt was made.
    CircuitOpen { target: String },
    /// Every attempt ran out the per-call clock.
    UpstreamTimeout { attempts: u32 },
    /// Upstream refused the request outright (4xx, bad signature). Not retried.
    UpstreamRejected { status: u16, message: String },
    /// Upstream throttled us (429). Not retried locally.
    UpstreamRateLimited { message: String },
    /// Upstream kept failing with 5xx or connection errors until the retry
    /// ceiling was reached.
    UpstreamError {
        status: Option<u16>,
        message: String,
        attempts: u32,
    },
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRequest { message, fields } => {
                if fields.is_empty() {
                    write!(f, "invalid request: {message}")
                } else {
                    write!(f, "invalid request: {message} ({})", fields.join(", "))
                }
            }
            Self::RateLimited { retry_after } => {
                write!(f, "rate limited, retry after {}s", retry_after.as_secs())
            }
            Self::CircuitOpen { target } => {
                write!(f, "upstream {target} unavailable (circuit open)")
            }
            Self::UpstreamTimeout { attempts } => {
                write!(f, "upstream timed out after {attempts} attempt(s)")
            }
            Self::UpstreamRejected { status, message } => {
                write!(f, "upstream rejected request ({status}): {message}")
            }
            Self::UpstreamRateLimited { message } => {
                write!(f, "upstream rate limited: {message}")
            }
            Self::UpstreamError {
                status,
                message,
                attempts,
            } => match status {
                Some(code) => {
                    write!(f, "upstream error {code} after {attempts} attempt(s): {message}")
                }
                None => write!(f, "upstream error after {attempts} attempt(s): {message}"),
            },
        }
    }
}

impl std::error::Error for ProxyError {}
