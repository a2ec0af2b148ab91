// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Write-through configuration
//!
//! Zone setpoint and state writes can be repeated on the physical secondary
//! device so the controller does not overwrite them on its next resync.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::registers::SLAVE_ID_PRIMARY;
use crate::write_through::WriteThroughOptions;

/// Error policy of the write-through client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteThroughFallbackConfig {
    /// Stop mirroring after `max_consecutive_errors` failed writes.
    pub disable_on_error: bool,
    pub max_consecutive_errors: u32,
    /// Seconds after the last error before mirroring resumes.
    pub error_reset_interval_secs: u64,
}

impl Default for WriteThroughFallbackConfig {
    fn default() -> Self {
        Self {
            disable_on_error: false,
            max_consecutive_errors: 3,
            error_reset_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteThroughConfig {
    pub enabled: bool,
    /// IP address of the secondary device.
    pub host: String,
    pub port: u16,
    pub slave_id: u8,
    pub timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Pending mirrors kept before new ones are dropped.
    pub queue_capacity: usize,
    pub fallback: WriteThroughFallbackConfig,
}

impl Default for WriteThroughConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "192.168.1.200".to_string(),
            port: 502,
            slave_id: SLAVE_ID_PRIMARY,
            timeout_ms: 3000,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            queue_capacity: 64,
            fallback: WriteThroughFallbackConfig::default(),
        }
    }
}

impl WriteThroughConfig {
    pub fn device_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid write-through device {}:{}", self.host, self.port))
    }

    pub fn options(&self) -> Result<WriteThroughOptions> {
        Ok(WriteThroughOptions {
            enabled: self.enabled,
            device: self.device_addr()?,
            slave_id: self.slave_id,
            timeout: Duration::from_millis(self.timeout_ms),
            retry_attempts: self.retry_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            disable_on_error: self.fallback.disable_on_error,
            max_consecutive_errors: self.fallback.max_consecutive_errors,
            error_reset_interval: Duration::from_secs(self.fallback.error_reset_interval_secs),
        })
    }
}
