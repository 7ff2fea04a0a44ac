//! Circuit breaker guarding calls to the remote service.
//!
//! After `failure_threshold` consecutive failures the circuit opens and
//! rejects calls for `reset_timeout`. It then half-opens and admits exactly
//! one trial call: success closes the circuit, failure reopens it with a
//! fresh timeout.

use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Blocking all requests
    HalfOpen, // One trial request in flight
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a trial call
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// The circuit refused a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker open (retry in {retry_after:?})")]
pub struct CircuitOpen {
    pub retry_after: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error(transparent)]
    Open(CircuitOpen),
    #[error("{0}")]
    Inner(E),
}

/// Consecutive-failure circuit breaker.
///
/// Plain value owned by whoever runs the calls; there is no shared or
/// global state, so independent engines never interfere.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    pub fn with_threshold(failure_threshold: u32) -> Self {
        Self::new(CircuitBreakerConfig {
            failure_threshold,
            ..CircuitBreakerConfig::default()
        })
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Ask permission for one call.
    ///
    /// While open, calls are rejected until the reset timeout elapses; the
    /// first call after that becomes the half-open trial and any other
    /// caller is rejected until the trial reports back.
    pub fn try_acquire(&mut self) -> Result<(), CircuitOpen> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or(self.config.reset_timeout);
                if elapsed >= self.config.reset_timeout {
                    tracing::debug!("Circuit half-open, admitting one trial call");
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                    Ok(())
                } else {
                    Err(CircuitOpen {
                        retry_after: self.config.reset_timeout - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    Err(CircuitOpen {
                        retry_after: Duration::ZERO,
                    })
                } else {
                    self.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            tracing::info!("Circuit closed after successful call");
        }
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_in_flight = false;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            CircuitState::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold {
                    tracing::warn!(
                        "Circuit opened after {} consecutive failures",
                        self.consecutive_failures
                    );
                    self.open();
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!("Trial call failed, circuit reopened");
                self.open();
            }
            CircuitState::Open => {}
        }
    }

    /// Run `f` through the breaker, recording its outcome
    pub fn execute<T, E, F>(&mut self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.try_acquire().map_err(CircuitBreakerError::Open)?;
        match f() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.trial_in_flight = false;
    }
}
