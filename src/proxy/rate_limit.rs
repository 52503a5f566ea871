// Local admission control, keyed by client identity.
//
// Fixed window counter with a small burst allowance. The count-and-compare
// happens while holding the per-key map entry, so concurrent calls for the
// same identity cannot over-admit.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Steady-state admissions per window.
    pub capacity: u32,
    pub window: Duration,
    /// Extra admissions allowed above capacity within a single window.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 60,
            window: Duration::from_secs(60),
            burst: 10,
        }
    }
}

#[derive(Debug)]
struct RateWindow {
    started: Instant,
    count: u32,
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admit {
    Allowed,
    /// Denied; `retry_after` is the time left until the window resets and is
    /// never longer than the window itself.
    Denied { retry_after: Duration },
}

pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    pub fn admit(&self, identity: &str) -> Admit {
        let now = Instant::now();
        let limit = self.config.capacity + self.config.burst;

        let mut window = self
            .windows
            .entry(identity.to_string())
            .or_insert_with(|| RateWindow {
                started: now,
                count: 0,
            });

        let elapsed = now.duration_since(window.started);
        if elapsed >= self.config.window {
            window.started = now;
            window.count = 0;
        }

        if window.count < limit {
            window.count += 1;
            Admit::Allowed
        } else {
            let retry_after = self
                .config
                .window
                .saturating_sub(now.duration_since(window.started));
            debug!(
                identity = identity,
                retry_after_ms = retry_after.as_millis() as u64,
                "admission denied"
            );
            Admit::Denied { retry_after }
        }
    }

    /// Drop windows that have been idle past their reset boundary. Called by
    /// the background housekeeping task.
    pub fn sweep_idle(&self) -> usize {
        let window_len = self.config.window;
        let before = self.windows.len();
        self.windows
            .retain(|_, w| w.started.elapsed() < window_len * 2);
        let removed = before - self.windows.len();
        if removed > 0 {
            debug!(removed = removed, "swept idle rate windows");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: u32, burst: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            capacity,
            window,
            burst,
        })
    }

    #[test]
    fn denies_exactly_beyond_capacity_plus_burst() {
        let limiter = limiter(3, 1, Duration::from_secs(60));
        for _ in 0..4 {
            assert_eq!(limiter.admit("client-a"), Admit::Allowed);
        }
        assert!(matches!(limiter.admit("client-a"), Admit::Denied { .. }));
    }

    #[test]
    fn identities_are_independent() {
        let limiter = limiter(1, 0, Duration::from_secs(60));
        assert_eq!(limiter.admit("client-a"), Admit::Allowed);
        assert!(matches!(limiter.admit("client-a"), Admit::Denied { .. }));
        assert_eq!(limiter.admit("client-b"), Admit::Allowed);
    }

    #[test]
    fn retry_after_is_bounded_by_window() {
        let window = Duration::from_secs(30);
        let limiter = limiter(1, 0, window);
        limiter.admit("client-a");
        match limiter.admit("client-a") {
            Admit::Denied { retry_after } => assert!(retry_after <= window),
            Admit::Allowed => panic!("expected denial"),
        }
    }

    #[test]
    fn window_resets_after_boundary() {
        let limiter = limiter(1, 0, Duration::from_millis(20));
        assert_eq!(limiter.admit("client-a"), Admit::Allowed);
        assert!(matches!(limiter.admit("client-a"), Admit::Denied { .. }));
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(limiter.admit("client-a"), Admit::Allowed);
    }

    #[test]
    fn concurrent_admissions_do_not_over_admit() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let limiter = Arc::new(limiter(50, 0, Duration::from_secs(60)));
        let admitted = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let admitted = admitted.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        if limiter.admit("shared") == Admit::Allowed {
                            admitted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // 200 attempts against a budget of 50.
        assert_eq!(admitted.load(Ordering::Relaxed), 50);
    }

    #[test]
    fn sweep_drops_idle_windows() {
        let limiter = limiter(1, 0, Duration::from_millis(10));
        limiter.admit("client-a");
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(limiter.sweep_idle(), 1);
    }
}
