//! Per-dependency circuit breaker.
//!
//! Closed → Open after N consecutive failures; while open, calls
//! short-circuit with the caller-supplied error until the cooldown elapses.
//! The first call after cooldown runs as a half-open trial: success closes
//! the breaker, failure re-opens it for another cooldown window.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ResilienceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open { until: Instant },
    /// A single trial call is in flight; everyone else fails fast.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: State,
    consecutive_failures: u32,
}

/// Circuit breaker guarding one external dependency.
pub struct CircuitBreaker {
    /// Dependency name for logs ("classifier", "mailbox", "group-chat").
    name: &'static str,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name,
            failure_threshold,
            cooldown,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
            }),
        }
    }

    pub fn from_config(name: &'static str, config: &ResilienceConfig) -> Self {
        Self::new(
            name,
            config.breaker_failure_threshold,
            config.breaker_cooldown,
        )
    }

    /// Run `op` through the breaker. If the breaker is open, `on_open` maps
    /// the remaining cooldown into the caller's error type without invoking
    /// the dependency at all.
    pub async fn call<T, E, F, Fut, O>(&self, on_open: O, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        O: FnOnce(Duration) -> E,
    {
        // Admission check; the lock is not held across the call itself.
        {
            let mut inner = self.inner.lock().await;
            match inner.state {
                State::Closed => {}
                State::Open { until } => {
                    let now = Instant::now();
                    if now < until {
                        return Err(on_open(until - now));
                    }
                    // Cooldown elapsed — this caller becomes the trial.
                    inner.state = State::HalfOpen;
                    info!(dependency = self.name, "Circuit half-open, trial call");
                }
                State::HalfOpen => return Err(on_open(self.cooldown)),
            }
        }

        let result = op().await;

        let mut inner = self.inner.lock().await;
        match &result {
            Ok(_) => {
                if inner.state != State::Closed {
                    info!(dependency = self.name, "Circuit closed");
                }
                inner.state = State::Closed;
                inner.consecutive_failures = 0;
            }
            Err(_) => {
                inner.consecutive_failures += 1;
                let trial_failed = inner.state == State::HalfOpen;
                if trial_failed || inner.consecutive_failures >= self.failure_threshold {
                    inner.state = State::Open {
                        until: Instant::now() + self.cooldown,
                    };
                    warn!(
                        dependency = self.name,
                        consecutive_failures = inner.consecutive_failures,
                        cooldown_ms = self.cooldown.as_millis() as u64,
                        "Circuit opened"
                    );
                }
            }
        }
        result
    }

    /// Whether calls would currently be short-circuited.
    pub async fn is_open(&self) -> bool {
        let inner = self.inner.lock().await;
        match inner.state {
            State::Open { until } => Instant::now() < until,
            State::HalfOpen => true,
            State::Closed => false,
        }
    }
}
