// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Fault isolation for bus operations
//!
//! Provides a [`CircuitBreaker`] that stops calling a failing bus for a cooldown
//! period and then re-admits trial calls one at a time.

mod circuit_breaker;

pub use circuit_breaker::{
    BreakerError, BreakerStatus, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
