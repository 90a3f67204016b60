//! Circuit breaker: closed / open / half-open, guarded by a mutex so state
//! transitions are safe under concurrent callers.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::AccountingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    success_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            cooldown: Duration::from_secs(cooldown_secs),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Runs `operation` unless the breaker is open (and its cooldown has
    /// not yet elapsed), in which case it fails fast with `circuit_open`.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, AccountingError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, AccountingError>>,
    {
        if !self.admit() {
            return Err(AccountingError::CircuitOpen);
        }

        match operation().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    /// Decides whether a call may proceed, transitioning open -> half-open
    /// when the cooldown has elapsed.
    fn admit(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_successes = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_successes = 0;
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }
}
