// The signed-request pipeline: admission -> validation -> cache ->
// canonicalize/sign -> forward -> normalize.
//
// All shared state (rate windows, breaker, cache) is owned here and injected
// by the caller that builds the pipeline; nothing is process-global. If the
// caller's connection drops mid-flight the whole future is dropped, which
// abandons the upstream attempt and skips the cache write.

use std::time::Instant;

use tracing::debug;

use crate::proxy::cache::{cache_key, ResultCache};
use crate::proxy::circuit::{CircuitBreakerConfig, CircuitStats};
use crate::proxy::config::ProxyConfig;
use crate::proxy::rate_limit::{Admit, RateLimitConfig, RateLimiter};
use crate::proxy::response::{normalize_error, normalize_upstream, ProxyResponse, ResponseMeta};
use crate::proxy::signing::{SignatureEngine, SystemParams};
use crate::proxy::upstream::{Forwarder, ForwarderConfig, UpstreamTransport};
use crate::proxy::validate::{MethodRegistry, ProxyRequest};
use crate::proxy::error::ProxyError;

pub struct ProxyPipeline<T> {
    registry: MethodRegistry,
    engine: SignatureEngine,
    limiter: RateLimiter,
    cache: ResultCache,
    forwarder: Forwarder<T>,
    target: String,
}

impl<T: UpstreamTransport> ProxyPipeline<T> {
    /// Wire the pipeline from configuration. The secret arrives separately
    /// from the config because it never touches the config file.
    pub fn new(config: &ProxyConfig, secret: String, transport: T) -> Self {
        Self {
            registry: MethodRegistry::new(&config.methods, config.max_param_len),
            engine: SignatureEngine::new(
                config.app_key.clone(),
                secret,
                config.sign_empty_values,
            ),
            limiter: RateLimiter::new(RateLimitConfig {
                capacity: config.rate_limit_capacity,
                window: config.rate_limit_window(),
                burst: config.rate_limit_burst,
            }),
            cache: ResultCache::new(config.cache_ttl()),
            forwarder: Forwarder::new(
                transport,
                CircuitBreakerConfig {
                    failure_threshold: config.circuit_failure_threshold,
                    cooldown: config.circuit_cooldown(),
                },
                ForwarderConfig {
                    timeout: config.request_timeout(),
                    max_retries: config.max_retries,
                    backoff_base: config.backoff_base(),
                },
            ),
            target: config.upstream_url.clone(),
        }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn circuit_stats(&self) -> Vec<CircuitStats> {
        self.forwarder.circuit_stats()
    }

    /// Housekeeping pass; returns (cache entries, rate windows) removed.
    pub fn sweep(&self) -> (usize, usize) {
        (self.cache.sweep_expired(), self.limiter.sweep_idle())
    }

    /// The single logical invoke operation. Always returns the envelope;
    /// every failure path converges on the same shape.
    pub async fn invoke(&self, identity: &str, request: ProxyRequest) -> ProxyResponse {
        let started = Instant::now();
        let request_id = uuid::Uuid::new_v4().to_string();
        debug!(
            request_id = request_id.as_str(),
            method = request.method.as_str(),
            identity = identity,
            "invoke"
        );

        let meta = |attempts: u32, cache_hit: bool| {
            ResponseMeta::new(
                request_id.clone(),
                started.elapsed().as_millis() as u64,
                attempts,
                cache_hit,
            )
        };

        if let Admit::Denied { retry_after } = self.limiter.admit(identity) {
            return normalize_error(&ProxyError::RateLimited { retry_after }, meta(0, false));
        }

        if let Err(err) = self.registry.validate(&request) {
            return normalize_error(&err, meta(0, false));
        }

        let key = cache_key(&request.method, &request.parameters);
        if let Some(payload) = self.cache.get(&key) {
            debug!(request_id = request_id.as_str(), "cache hit");
            return ProxyResponse::ok(payload, meta(0, true));
        }

        let system = SystemParams::now(self.engine.app_key());
        let forwarded = self
            .engine
            .build_signed(&request.method, &request.parameters, &system);

        let outcome = self.forwarder.forward(&self.target, &forwarded).await;
        match outcome.result {
            Ok(payload) => {
                let response = normalize_upstream(payload, meta(outcome.attempts, false));
                // Only successful envelopes are memoized; upstream-reported
                // errors and everything below never enter the cache.
                if response.success {
                    if let Some(data) = &response.data {
                        self.cache.put(key, data.clone());
                    }
                }
                response
            }
            Err(err) => normalize_error(&err, meta(outcome.attempts, false)),
        }
    }
}
