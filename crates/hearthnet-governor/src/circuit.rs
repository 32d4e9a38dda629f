use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::clock::Clock;

/// The three states a [`CircuitBreaker`] can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CircuitState {
    /// Requests are admitted normally.
    Closed,
    /// Requests are refused until the open window elapses.
    Open,
    /// A single probe is being evaluated; success closes the breaker,
    /// failure reopens it.
    HalfOpen,
}

/// Point-in-time snapshot of a breaker's counters, safe to hand to callers
/// without holding the breaker's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_state_change: Instant,
    last_failure: Option<Instant>,
}

/// Per-device circuit breaker: Closed -> Open -> HalfOpen -> Closed.
///
/// All mutation happens under a single lock; `allow()` is not a pure
/// reader because the Open -> HalfOpen promotion happens inside it.
#[derive(Debug)]
pub struct CircuitBreaker {
    fail_threshold: u32,
    success_threshold: u32,
    open_duration: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(
        fail_threshold: u32,
        success_threshold: u32,
        open_duration: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            fail_threshold,
            success_threshold,
            open_duration,
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_state_change: now,
                last_failure: None,
            }),
        }
    }

    /// Decide whether a request should be admitted right now. In `Open`,
    /// promotes to `HalfOpen` and admits a probe once `open_duration` has
    /// elapsed since the last state change.
    pub async fn allow(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let now = self.clock.now();
                if now.duration_since(inner.last_state_change) >= self.open_duration {
                    tracing::debug!("circuit breaker promoting Open -> HalfOpen");
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.last_state_change = now;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.success_threshold {
                    tracing::info!("circuit breaker closing after successful probes");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.last_state_change = now;
                }
            }
            CircuitState::Open => {
                // A success observed while Open is a race between an
                // in-flight probe and a concurrent failure report. Treat
                // it as the probe itself and promote defensively.
                tracing::warn!("success recorded while circuit Open; promoting to HalfOpen");
                inner.state = CircuitState::HalfOpen;
                inner.consecutive_failures = 0;
                inner.consecutive_successes = 0;
                inner.last_state_change = now;
            }
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        inner.last_failure = Some(now);
        inner.consecutive_successes = 0;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.fail_threshold {
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opening"
                    );
                    inner.state = CircuitState::Open;
                    inner.last_state_change = now;
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!("probe failed; circuit breaker reopening");
                inner.state = CircuitState::Open;
                inner.last_state_change = now;
            }
            CircuitState::Open => {
                // Extends the backoff window; a failure racing the
                // HalfOpen promotion should restart the clock.
                inner.last_state_change = now;
            }
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock().await;
        CircuitBreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
        }
    }

    /// How much longer the breaker stays Open from its current state, or
    /// `Duration::ZERO` if it is not Open.
    pub async fn retry_after(&self) -> Duration {
        let inner = self.inner.lock().await;
        if inner.state != CircuitState::Open {
            return Duration::ZERO;
        }
        let elapsed = self.clock.now().duration_since(inner.last_state_change);
        self.open_duration.saturating_sub(elapsed)
    }

    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.last_state_change = self.clock.now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    fn breaker(clock: Arc<FakeClock>) -> CircuitBreaker {
        CircuitBreaker::new(2, 2, Duration::from_millis(50), clock)
    }

    #[tokio::test]
    async fn starts_closed_and_admits() {
        let clock = Arc::new(FakeClock::new());
        let cb = breaker(clock);
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.allow().await);
    }

    #[tokio::test]
    async fn opens_after_exactly_fail_threshold_failures() {
        let clock = Arc::new(FakeClock::new());
        let cb = breaker(clock);
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn open_rejects_until_window_elapses_then_admits_probe() {
        let clock = Arc::new(FakeClock::new());
        let cb = breaker(clock.clone());
        cb.record_failure().await;
        cb.record_failure().await;
        assert!(!cb.allow().await);
        clock.advance(Duration::from_millis(60));
        assert!(cb.allow().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let clock = Arc::new(FakeClock::new());
        let cb = breaker(clock.clone());
        cb.record_failure().await;
        cb.record_failure().await;
        clock.advance(Duration::from_millis(60));
        assert!(cb.allow().await);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_regardless_of_counter() {
        let clock = Arc::new(FakeClock::new());
        let cb = breaker(clock.clone());
        cb.record_failure().await;
        cb.record_failure().await;
        clock.advance(Duration::from_millis(60));
        assert!(cb.allow().await);
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn success_while_open_defensively_promotes() {
        let clock = Arc::new(FakeClock::new());
        let cb = breaker(clock.clone());
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn reset_forces_closed() {
        let clock = Arc::new(FakeClock::new());
        let cb = breaker(clock);
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        cb.reset().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        let stats = cb.stats().await;
        assert_eq!(stats.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn success_in_closed_clears_failure_counter() {
        let clock = Arc::new(FakeClock::new());
        let cb = breaker(clock);
        cb.record_failure().await;
        cb.record_success().await;
        let stats = cb.stats().await;
        assert_eq!(stats.consecutive_failures, 0);
        assert_eq!(stats.state, CircuitState::Closed);
    }
}
