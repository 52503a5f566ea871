// Resilient forwarding: per-call timeout, bounded retries with jittered
// exponential backoff, and the per-target circuit breaker in front.

use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::proxy::circuit::{Admission, CircuitBreakerConfig, CircuitBreakerManager, CircuitStats};
use crate::proxy::error::ProxyError;
use crate::proxy::signing::ForwardedRequest;

use super::{RawUpstreamResponse, TransportError, UpstreamTransport};

#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Wall-clock budget for a single attempt.
    pub timeout: Duration,
    /// Retries after the first attempt; transient failures only.
    pub max_retries: u32,
    /// Base delay for the exponential backoff between attempts.
    pub backoff_base: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 2,
            backoff_base: Duration::from_millis(200),
        }
    }
}

/// What one forwarded call produced, plus the timing metadata the envelope
/// carries.
#[derive(Debug)]
pub struct ForwardOutcome {
    pub result: Result<Value, ProxyError>,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Per-attempt verdict, before the retry policy is applied.
enum AttemptVerdict {
    Success(Value),
    /// Retryable: timeout, connection failure, 5xx, undecodable body.
    Transient(ProxyError),
    /// Never retried: 4xx, upstream throttling.
    Fatal(ProxyError),
}

pub struct Forwarder<T> {
    transport: T,
    breaker: CircuitBreakerManager,
    config: ForwarderConfig,
}

impl<T: UpstreamTransport> Forwarder<T> {
    pub fn new(transport: T, breaker_config: CircuitBreakerConfig, config: ForwarderConfig) -> Self {
        Self {
            transport,
            breaker: CircuitBreakerManager::new(breaker_config),
            config,
        }
    }

    pub fn circuit_stats(&self) -> Vec<CircuitStats> {
        self.breaker.stats()
    }

    /// Issue the signed call. The breaker is consulted once per call and its
    /// counters move once per call: success, or failure after the retry
    /// ceiling. Non-transient upstream replies count as breaker successes
    /// since the upstream was reachable and responsive.
    pub async fn forward(&self, target: &str, request: &ForwardedRequest) -> ForwardOutcome {
        let started = Instant::now();

        let probe = match self.breaker.admit(target) {
            Admission::Rejected => {
                return ForwardOutcome {
                    result: Err(ProxyError::CircuitOpen {
                        target: target.to_string(),
                    }),
                    attempts: 0,
                    elapsed: started.elapsed(),
                };
            }
            Admission::Probe => true,
            Admission::Allowed => false,
        };

        let max_attempts = 1 + self.config.max_retries;
        let mut attempts = 0;

        let result = loop {
            attempts += 1;

            let attempt = tokio::time::timeout(
                self.config.timeout,
                self.transport
                    .send(target.to_string(), request.pairs.clone()),
            )
            .await
            .unwrap_or(Err(TransportError::Timeout));

            match self.judge(attempt, attempts) {
                AttemptVerdict::Success(body) => {
                    self.breaker.record_success(target, probe);
                    break Ok(body);
                }
                AttemptVerdict::Fatal(err) => {
                    self.breaker.record_success(target, probe);
                    break Err(err);
                }
                AttemptVerdict::Transient(err) => {
                    if attempts >= max_attempts {
                        warn!(
                            upstream = target,
                            attempts = attempts,
                            error = %err,
                            "retries exhausted"
                        );
                        self.breaker.record_failure(target, probe);
                        break Err(err);
                    }
                    let delay = backoff_delay(self.config.backoff_base, attempts);
                    debug!(
                        upstream = target,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient upstream failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        ForwardOutcome {
            result,
            attempts,
            elapsed: started.elapsed(),
        }
    }

    fn judge(
        &self,
        attempt: Result<RawUpstreamResponse, TransportError>,
        attempts: u32,
    ) -> AttemptVerdict {
        match attempt {
            Ok(resp) if (200..300).contains(&resp.status) => AttemptVerdict::Success(resp.body),
            Ok(resp) if resp.status == 429 => {
                AttemptVerdict::Fatal(ProxyError::UpstreamRateLimited {
                    message: upstream_message(&resp.body, resp.status),
                })
            }
            Ok(resp) if (400..500).contains(&resp.status) => {
                AttemptVerdict::Fatal(ProxyError::UpstreamRejected {
                    status: resp.status,
                    message: upstream_message(&resp.body, resp.status),
                })
            }
            Ok(resp) => AttemptVerdict::Transient(ProxyError::UpstreamError {
                status: Some(resp.status),
                message: upstream_message(&resp.body, resp.status),
                attempts,
            }),
            Err(TransportError::Timeout) => {
                AttemptVerdict::Transient(ProxyError::UpstreamTimeout { attempts })
            }
            Err(err @ (TransportError::Connect(_) | TransportError::Decode(_))) => {
                AttemptVerdict::Transient(ProxyError::UpstreamError {
                    status: None,
                    message: err.to_string(),
                    attempts,
                })
            }
        }
    }
}

/// Exponential backoff with jitter: base * 2^(attempt-1) plus up to half the
/// base on top, so synchronized retries fan out.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let half_base_ms = (base.as_millis() as u64) / 2;
    let jitter = rand::thread_rng().gen_range(0..=half_base_ms);
    exp + Duration::from_millis(jitter)
}

/// Best-effort human message from an upstream reply body.
fn upstream_message(body: &Value, status: u16) -> String {
    body.get("error_response")
        .and_then(|e| e.get("msg"))
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("upstream returned status {status}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::circuit::CircuitState;
    use crate::proxy::upstream::mock::MockTransport;
    use serde_json::json;

    const TARGET: &str = "https://api.example.com/sync";

    fn request() -> ForwardedRequest {
        ForwardedRequest {
            method: "affiliate.product.query".to_string(),
            pairs: vec![
                ("keywords".to_string(), "headphones".to_string()),
                ("sign".to_string(), "ABCD".to_string()),
            ],
        }
    }

    fn forwarder(transport: MockTransport, threshold: u32) -> Forwarder<MockTransport> {
        Forwarder::new(
            transport,
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_secs(60),
            },
            ForwarderConfig {
                timeout: Duration::from_secs(5),
                max_retries: 2,
                backoff_base: Duration::from_millis(100),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt() {
        let transport = MockTransport::new();
        transport.push_ok(200, json!({"resp_result": {"total": 1}}));
        let fwd = forwarder(transport.clone(), 5);

        let outcome = fwd.forward(TARGET, &request()).await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(transport.calls(), 1);
        assert_eq!(outcome.result.unwrap(), json!({"resp_result": {"total": 1}}));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_then_succeeds() {
        let transport = MockTransport::new();
        transport.push_ok(503, json!({}));
        transport.push_ok(200, json!({"ok": true}));
        let fwd = forwarder(transport.clone(), 5);

        let outcome = fwd.forward(TARGET, &request()).await;
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_ceiling() {
        let transport = MockTransport::new();
        for _ in 0..3 {
            transport.push_ok(500, json!({}));
        }
        let fwd = forwarder(transport.clone(), 5);

        let outcome = fwd.forward(TARGET, &request()).await;
        assert_eq!(outcome.attempts, 3);
        assert_eq!(transport.calls(), 3);
        match outcome.result {
            Err(ProxyError::UpstreamError { status, .. }) => assert_eq!(status, Some(500)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_transient() {
        let transport = MockTransport::new();
        for _ in 0..3 {
            transport.push_err(TransportError::Timeout);
        }
        let fwd = forwarder(transport.clone(), 5);

        let outcome = fwd.forward(TARGET, &request()).await;
        assert_eq!(outcome.attempts, 3);
        assert!(matches!(
            outcome.result,
            Err(ProxyError::UpstreamTimeout { attempts: 3 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_not_retried() {
        let transport = MockTransport::new();
        transport.push_ok(
            400,
            json!({"error_response": {"code": 25, "msg": "Invalid signature"}}),
        );
        let fwd = forwarder(transport.clone(), 5);

        let outcome = fwd.forward(TARGET, &request()).await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(transport.calls(), 1);
        match outcome.result {
            Err(ProxyError::UpstreamRejected { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid signature");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_429_maps_to_rate_limited() {
        let transport = MockTransport::new();
        transport.push_ok(429, json!({"message": "try later"}));
        let fwd = forwarder(transport.clone(), 5);

        let outcome = fwd.forward(TARGET, &request()).await;
        assert_eq!(transport.calls(), 1);
        assert!(matches!(
            outcome.result,
            Err(ProxyError::UpstreamRateLimited { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_and_fails_fast_with_zero_network() {
        let transport = MockTransport::new();
        for _ in 0..6 {
            transport.push_err(TransportError::Connect("refused".to_string()));
        }
        // Two exhausted calls trip a threshold of 2.
        let fwd = forwarder(transport.clone(), 2);

        for _ in 0..2 {
            let outcome = fwd.forward(TARGET, &request()).await;
            assert!(outcome.result.is_err());
        }
        assert_eq!(transport.calls(), 6);
        assert_eq!(fwd.circuit_stats()[0].state, CircuitState::Open);

        let outcome = fwd.forward(TARGET, &request()).await;
        assert_eq!(outcome.attempts, 0);
        assert_eq!(transport.calls(), 6, "no network attempt while open");
        assert!(matches!(outcome.result, Err(ProxyError::CircuitOpen { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_does_not_trip_breaker() {
        let transport = MockTransport::new();
        for _ in 0..4 {
            transport.push_ok(400, json!({}));
        }
        let fwd = forwarder(transport.clone(), 2);

        for _ in 0..4 {
            let outcome = fwd.forward(TARGET, &request()).await;
            assert!(matches!(
                outcome.result,
                Err(ProxyError::UpstreamRejected { .. })
            ));
        }
        assert_eq!(fwd.circuit_stats()[0].state, CircuitState::Closed);
    }

    #[test]
    fn backoff_grows_and_stays_bounded() {
        let base = Duration::from_millis(100);
        for attempt in 1..=3 {
            let expected = base * 2u32.pow(attempt - 1);
            for _ in 0..16 {
                let delay = backoff_delay(base, attempt);
                assert!(delay >= expected);
                assert!(delay <= expected + Duration::from_millis(50));
            }
        }
    }

    #[test]
    fn upstream_message_falls_back_to_status() {
        assert_eq!(upstream_message(&json!({}), 502), "upstream returned status 502");
        assert_eq!(
            upstream_message(&json!({"error_response": {"msg": "boom"}}), 500),
            "boom"
        );
    }
}
