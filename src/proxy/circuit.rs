// Per-upstream-target circuit breaker.
//
// CLOSED passes everything through, OPEN fails fast with no network attempt,
// HALF_OPEN admits exactly one probe at a time. All transitions happen under
// the per-target lock so concurrent calls cannot double-probe or lose a
// failure count.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long an open circuit waits before allowing a probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    probe_started: Option<Instant>,
    total_rejections: u64,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
            probe_started: None,
            total_rejections: 0,
        }
    }
}

/// Outcome of asking the breaker for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed normally.
    Allowed,
    /// Proceed, but this call is the single HALF_OPEN probe; its outcome
    /// decides the next transition.
    Probe,
    /// Fail fast, make no network attempt.
    Rejected,
}

pub struct CircuitBreakerManager {
    circuits: DashMap<String, Mutex<Circuit>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: DashMap::new(),
            config,
        }
    }

    fn with_circuit<R>(&self, target: &str, f: impl FnOnce(&mut Circuit) -> R) -> R {
        let entry = self
            .circuits
            .entry(target.to_string())
            .or_insert_with(|| Mutex::new(Circuit::new()));
        let mut circuit = entry.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut circuit)
    }

    /// Decide whether a call to `target` may proceed.
    pub fn admit(&self, target: &str) -> Admission {
        let cooldown = self.config.cooldown;
        self.with_circuit(target, |circuit| match circuit.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let elapsed = circuit.opened_at.map(|t| t.elapsed()).unwrap_or(cooldown);
                if elapsed >= cooldown {
                    info!(upstream = target, "circuit cooldown elapsed, probing upstream");
                    circuit.state = CircuitState::HalfOpen;
                    circuit.probe_in_flight = true;
                    circuit.probe_started = Some(Instant::now());
                    Admission::Probe
                } else {
                    circuit.total_rejections += 1;
                    debug!(
                        upstream = target,
                        remaining_ms = (cooldown - elapsed).as_millis() as u64,
                        "circuit open, rejecting call"
                    );
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                // A probe that was abandoned (caller hung up) would otherwise
                // wedge the circuit; allow a fresh probe after a full cooldown.
                let stale = circuit
                    .probe_started
                    .map(|t| t.elapsed() >= cooldown)
                    .unwrap_or(true);
                if circuit.probe_in_flight && !stale {
                    circuit.total_rejections += 1;
                    Admission::Rejected
                } else {
                    circuit.probe_in_flight = true;
                    circuit.probe_started = Some(Instant::now());
                    Admission::Probe
                }
            }
        })
    }

    /// Record a successful call. `probe` is true when `admit` returned
    /// `Admission::Probe` for this call; only the probe's success closes a
    /// HALF_OPEN circuit. Calls admitted before the circuit opened can still
    /// report back later, and their outcome must not drive the transition.
    pub fn record_success(&self, target: &str, probe: bool) {
        self.with_circuit(target, |circuit| match circuit.state {
            CircuitState::HalfOpen if probe => {
                info!(upstream = target, "probe succeeded, closing circuit");
                circuit.state = CircuitState::Closed;
                circuit.opened_at = None;
                circuit.consecutive_failures = 0;
                circuit.probe_in_flight = false;
                circuit.probe_started = None;
            }
            CircuitState::Closed => {
                circuit.consecutive_failures = 0;
            }
            // Stale call from before the circuit opened; the probe decides.
            CircuitState::HalfOpen | CircuitState::Open => {}
        });
    }

    /// Record a failed call. Opens the circuit at the threshold, or reopens
    /// it immediately on a failed probe. Stale non-probe failures reported
    /// while HALF_OPEN or OPEN are ignored for the same reason successes are.
    pub fn record_failure(&self, target: &str, probe: bool) {
        let threshold = self.config.failure_threshold;
        self.with_circuit(target, |circuit| match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures += 1;
                if circuit.consecutive_failures >= threshold {
                    warn!(
                        upstream = target,
                        failures = circuit.consecutive_failures,
                        "failure threshold reached, opening circuit"
                    );
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen if probe => {
                warn!(upstream = target, "probe failed, reopening circuit");
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some(Instant::now());
                circuit.probe_in_flight = false;
                circuit.probe_started = None;
            }
            CircuitState::Open if probe => {
                // A superseded probe reporting after the circuit reopened
                // just refreshes the cooldown clock.
                circuit.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        });
    }

    pub fn state(&self, target: &str) -> CircuitState {
        self.circuits
            .get(target)
            .map(|entry| entry.lock().unwrap_or_else(|e| e.into_inner()).state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Snapshot of every known circuit, for the introspection endpoint.
    pub fn stats(&self) -> Vec<CircuitStats> {
        let mut stats: Vec<CircuitStats> = self
            .circuits
            .iter()
            .map(|entry| {
                let circuit = entry.value().lock().unwrap_or_else(|e| e.into_inner());
                CircuitStats {
                    target: entry.key().clone(),
                    state: circuit.state,
                    consecutive_failures: circuit.consecutive_failures,
                    total_rejections: circuit.total_rejections,
                }
            })
            .collect();
        stats.sort_by(|a, b| a.target.cmp(&b.target));
        stats
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub target: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_rejections: u64,
}
