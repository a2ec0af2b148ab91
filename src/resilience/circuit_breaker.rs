// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Circuit breaker state machine
//!
//! ```text
//!            failures >= threshold
//!   Closed ------------------------> Open
//!     ^                               |  ^
//!     | successes >= half_open_max    |  | any failure
//!     |                               v  |
//!     +--------------------------- HalfOpen
//!                     recovery_timeout elapsed
//! ```
//!
//! Transitions happen under one lock. The wrapped operation runs without it,
//! so a bus call that hangs for seconds does not block status queries or
//! other callers being rejected. In the half-open phase a single trial call
//! is in flight at a time; concurrent callers are rejected as if open.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Time spent open before a trial call is allowed.
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes that close the breaker.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

/// Outcome of a call rejected by the breaker or failed by the operation.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The operation was not invoked.
    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, BreakerError::CircuitOpen)
    }
}

/// Snapshot returned by [`CircuitBreaker::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_successes: u32,
    pub seconds_since_last_failure: Option<f64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_successes: u32,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

/// Admission granted by [`CircuitBreaker::admit`].
///
/// A half-open trial that is dropped before recording its outcome (e.g. the
/// caller's future was cancelled) frees the trial slot again.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    recorded: bool,
}

impl Admission<'_> {
    fn record(mut self, success: bool) {
        self.recorded = true;
        if success {
            self.breaker.on_success(self.trial);
        } else {
            self.breaker.on_failure(self.trial);
        }
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.trial && !self.recorded {
            self.breaker.state.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_successes: 0,
                trial_in_flight: false,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` under breaker protection.
    ///
    /// ### Returns
    ///
    /// * `Ok(value)` - the operation succeeded
    /// * `Err(BreakerError::CircuitOpen)` - rejected, `operation` was not called
    /// * `Err(BreakerError::Operation(e))` - the operation's own error
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit().ok_or(BreakerError::CircuitOpen)?;
        let result = operation().await;
        admission.record(result.is_ok());
        result.map_err(BreakerError::Operation)
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    pub fn status(&self) -> BreakerStatus {
        let state = self.state.lock();
        BreakerStatus {
            state: state.state,
            failure_count: state.failure_count,
            half_open_successes: state.half_open_successes,
            seconds_since_last_failure: state.last_failure.map(|t| t.elapsed().as_secs_f64()),
        }
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.half_open_successes = 0;
        state.trial_in_flight = false;
        info!("Circuit breaker '{}' reset", self.name);
    }

    fn admit(&self) -> Option<Admission<'_>> {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => {
                return Some(Admission {
                    breaker: self,
                    trial: false,
                    recorded: false,
                })
            }
            CircuitState::Open => {
                let cooled_down = state
                    .last_failure
                    .map_or(true, |t| t.elapsed() > self.config.recovery_timeout);
                if !cooled_down {
                    debug!("Circuit breaker '{}' is open, rejecting call", self.name);
                    return None;
                }
                state.state = CircuitState::HalfOpen;
                state.half_open_successes = 0;
                state.trial_in_flight = false;
                info!("Circuit breaker '{}' half-open, admitting trial calls", self.name);
            }
            CircuitState::HalfOpen => {}
        }

        if state.trial_in_flight {
            debug!("Circuit breaker '{}' trial already in flight", self.name);
            return None;
        }
        state.trial_in_flight = true;
        Some(Admission {
            breaker: self,
            trial: true,
            recorded: false,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::HalfOpen if trial => {
                state.trial_in_flight = false;
                state.half_open_successes += 1;
                if state.half_open_successes >= self.config.half_open_max_calls {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.half_open_successes = 0;
                    info!("Circuit breaker '{}' closed after successful recovery", self.name);
                }
            }
            CircuitState::Closed => state.failure_count = 0,
            // Stale outcome of a call admitted before the last transition
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::HalfOpen if trial => {
                state.state = CircuitState::Open;
                state.trial_in_flight = false;
                state.half_open_successes = 0;
                state.last_failure = Some(Instant::now());
                warn!(
                    "Circuit breaker '{}' reopened after a failure in half-open state",
                    self.name
                );
            }
            CircuitState::Closed => {
                state.failure_count += 1;
                state.last_failure = Some(Instant::now());
                if state.failure_count >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    warn!(
                        "Circuit breaker '{}' opened after {} failures",
                        self.name, state.failure_count
                    );
                }
            }
            _ => {}
        }
    }
}
