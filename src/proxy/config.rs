use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::proxy::validate::MethodSpec;

/// Signing proxy configuration. Persisted as JSON; the app secret is
/// deliberately absent and only ever read from the environment at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Whether to bind beyond loopback.
    /// - false: 127.0.0.1 only (default)
    /// - true: 0.0.0.0
    #[serde(default)]
    pub allow_lan_access: bool,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Credential identifier sent as the `app_key` system parameter.
    #[serde(default)]
    pub app_key: String,

    /// The single upstream endpoint signed calls are forwarded to.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,

    /// Per-attempt timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Retries after the first attempt, transient failures only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base delay (milliseconds).
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Consecutive failed calls before the breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub circuit_failure_threshold: u32,

    /// Cooldown before an open breaker allows a probe (seconds).
    #[serde(default = "default_circuit_cooldown")]
    pub circuit_cooldown_secs: u64,

    /// Admissions per client identity per window.
    #[serde(default = "default_rate_capacity")]
    pub rate_limit_capacity: u32,

    /// Rate window length (seconds).
    #[serde(default = "default_rate_window")]
    pub rate_limit_window_secs: u64,

    /// Burst allowance above steady-state capacity.
    #[serde(default = "default_rate_burst")]
    pub rate_limit_burst: u32,

    /// Result cache TTL (seconds).
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Whether empty-after-stringification values take part in the signature
    /// base. Upstream behavior is ambiguous here, so it stays configurable.
    #[serde(default)]
    pub sign_empty_values: bool,

    /// Maximum accepted length of a stringified parameter value.
    #[serde(default = "default_max_param_len")]
    pub max_param_len: usize,

    /// Optional egress proxy for outbound calls.
    #[serde(default)]
    pub egress_proxy: Option<String>,

    /// Outbound user agent override.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Method allow-list with per-method required fields.
    #[serde(default = "default_methods")]
    pub methods: Vec<MethodSpec>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allow_lan_access: false,
            port: default_port(),
            app_key: String::new(),
            upstream_url: default_upstream_url(),
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            circuit_failure_threshold: default_failure_threshold(),
            circuit_cooldown_secs: default_circuit_cooldown(),
            rate_limit_capacity: default_rate_capacity(),
            rate_limit_window_secs: default_rate_window(),
            rate_limit_burst: default_rate_burst(),
            cache_ttl_secs: default_cache_ttl(),
            sign_empty_values: false,
            max_param_len: default_max_param_len(),
            egress_proxy: None,
            user_agent: None,
            methods: default_methods(),
        }
    }
}

impl ProxyConfig {
    pub fn get_bind_address(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_cooldown_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn default_port() -> u16 {
    8046
}

fn default_upstream_url() -> String {
    "https://api-sg.aliexpress.com/sync".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    200
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_circuit_cooldown() -> u64 {
    30
}

fn default_rate_capacity() -> u32 {
    60
}

fn default_rate_window() -> u64 {
    60
}

fn default_rate_burst() -> u32 {
    10
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_max_param_len() -> usize {
    2000
}

fn default_methods() -> Vec<MethodSpec> {
    let spec = |name: &str, required: &[&str]| MethodSpec {
        name: name.to_string(),
        required: required.iter().map(|s| s.to_string()).collect(),
    };
    vec![
        spec("affiliate.product.query", &["keywords"]),
        spec("affiliate.product.detail", &["product_ids"]),
        spec("affiliate.hotproduct.query", &[]),
        spec("affiliate.link.generate", &["source_values", "promotion_link_type"]),
        spec("affiliate.order.list", &["start_time", "end_time"]),
        spec("affiliate.category.get", &[]),
    ]
}
