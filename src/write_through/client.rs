// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Mirror of accepted writes on the physical secondary device
//!
//! The controller periodically resynchronises its zones from the secondary
//! device, so a setpoint written only into the gateway would be overwritten.
//! [`WriteThroughClient`] repeats such writes on the device itself.
//!
//! ## Disable policy
//!
//! With `disable_on_error` set, the client stops attempting writes once
//! `max_consecutive_errors` writes in a row have exhausted their retries. It
//! re-enables itself after `error_reset_interval` has passed since the last
//! error, or immediately after any successful write.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::modbus::client::{Endpoint, ModbusConnection, RequestError};
use crate::registers::SLAVE_ID_PRIMARY;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WriteThroughError {
    /// Statically disabled, or disabled by the error policy.
    #[error("write-through is disabled")]
    Disabled,

    #[error("write-through failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: RequestError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteThroughOptions {
    pub enabled: bool,
    pub device: SocketAddr,
    pub slave_id: u8,
    pub timeout: Duration,
    pub retry_attempts: u32,
    /// Fixed pause between two attempts of the same write.
    pub retry_delay: Duration,
    pub disable_on_error: bool,
    pub max_consecutive_errors: u32,
    pub error_reset_interval: Duration,
}

impl Default for WriteThroughOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            device: SocketAddr::from(([192, 168, 1, 200], 502)),
            slave_id: SLAVE_ID_PRIMARY,
            timeout: Duration::from_secs(3),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            disable_on_error: false,
            max_consecutive_errors: 3,
            error_reset_interval: Duration::from_secs(300),
        }
    }
}

/// Snapshot returned by [`WriteThroughClient::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteThroughStatus {
    pub configured: bool,
    pub enabled: bool,
    pub device: String,
    pub consecutive_errors: u32,
    pub seconds_since_last_error: Option<f64>,
}

#[derive(Debug, Default)]
struct WriteThroughState {
    consecutive_errors: u32,
    last_error: Option<Instant>,
}

pub struct WriteThroughClient {
    options: WriteThroughOptions,
    connection: ModbusConnection,
    state: Mutex<WriteThroughState>,
}

impl WriteThroughClient {
    pub fn new(options: WriteThroughOptions) -> Self {
        let connection =
            ModbusConnection::new(Endpoint::Tcp(options.device), options.slave_id, options.timeout);
        Self {
            options,
            connection,
            state: Mutex::new(WriteThroughState::default()),
        }
    }

    pub fn options(&self) -> &WriteThroughOptions {
        &self.options
    }

    /// Whether a write would be attempted right now.
    pub fn is_enabled(&self) -> bool {
        if !self.options.enabled {
            return false;
        }
        if !self.options.disable_on_error {
            return true;
        }

        let mut state = self.state.lock();
        if state.consecutive_errors < self.options.max_consecutive_errors {
            return true;
        }
        match state.last_error {
            Some(at) if at.elapsed() >= self.options.error_reset_interval => {
                info!(
                    "Re-enabling write-through {:?} after the last error",
                    self.options.error_reset_interval
                );
                state.consecutive_errors = 0;
                true
            }
            _ => false,
        }
    }

    /// Write with the configured number of attempts.
    pub async fn write_register(&self, addr: u16, value: u16) -> Result<(), WriteThroughError> {
        self.write(addr, value, self.options.retry_attempts).await
    }

    /// Write `value` at `addr` on the device.
    ///
    /// ### Parameters
    ///
    /// * `addr` - Register address, usually a zone state or setpoint
    /// * `value` - Raw register word
    /// * `max_retries` - Total attempts, at least one is made
    ///
    /// ### Returns
    ///
    /// `Ok(())` on the first successful attempt. [`WriteThroughError::Disabled`]
    /// without touching the network when disabled, otherwise the last error
    /// once every attempt failed.
    pub async fn write(
        &self,
        addr: u16,
        value: u16,
        max_retries: u32,
    ) -> Result<(), WriteThroughError> {
        if !self.is_enabled() {
            debug!("Write-through disabled, skipping register {}", addr);
            return Err(WriteThroughError::Disabled);
        }

        let attempts = max_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(
                "Write-through {} = {} to {} (attempt {}/{})",
                addr,
                value,
                self.connection.endpoint(),
                attempt,
                attempts
            );
            match self.connection.write_single_register(addr, value).await {
                Ok(()) => {
                    self.record_success();
                    info!("Write-through of register {} = {} succeeded", addr, value);
                    return Ok(());
                }
                Err(err) if attempt < attempts => {
                    warn!(
                        "Write-through of register {} failed (attempt {}/{}): {}",
                        addr, attempt, attempts, err
                    );
                    tokio::time::sleep(self.options.retry_delay).await;
                }
                Err(err) => {
                    self.record_failure();
                    return Err(WriteThroughError::Exhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
            }
        }
    }

    pub fn status(&self) -> WriteThroughStatus {
        let enabled = self.is_enabled();
        let state = self.state.lock();
        WriteThroughStatus {
            configured: self.options.enabled,
            enabled,
            device: self.connection.endpoint().to_string(),
            consecutive_errors: state.consecutive_errors,
            seconds_since_last_error: state.last_error.map(|t| t.elapsed().as_secs_f64()),
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.state.lock().consecutive_errors
    }

    /// Clear the error count, re-enabling a client disabled by the policy.
    pub fn reset_errors(&self) {
        let mut state = self.state.lock();
        state.consecutive_errors = 0;
        state.last_error = None;
    }

    pub async fn close(&self) {
        self.connection.disconnect().await;
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        if state.consecutive_errors > 0 {
            debug!(
                "Write-through recovered after {} failed write(s)",
                state.consecutive_errors
            );
        }
        state.consecutive_errors = 0;
    }

    fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_errors += 1;
        state.last_error = Some(Instant::now());
        if self.options.disable_on_error
            && state.consecutive_errors >= self.options.max_consecutive_errors
        {
            warn!(
                "Write-through disabled after {} consecutive errors",
                state.consecutive_errors
            );
        } else {
            warn!(
                "Write-through error count is now {}",
                state.consecutive_errors
            );
        }
    }
}
