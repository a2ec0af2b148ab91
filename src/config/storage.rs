// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register storage configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::{RetryPolicy, StoreOptions};

/// Durable register store settings.
///
/// # Example
///
/// ```
/// use neasmart_gateway::config::StorageConfig;
///
/// let storage = StorageConfig::default();
/// let options = storage.store_options();
/// assert!(options.enable_fallback);
/// assert_eq!(options.retry.max_attempts, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file, created with all registers at zero on first start.
    pub path: PathBuf,

    /// Keep serving from memory when the database fails.
    pub enable_fallback: bool,

    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,

    /// Seconds between two database health checks.
    pub health_check_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/registers.redb"),
            enable_fallback: true,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            health_check_interval_secs: 30,
        }
    }
}

impl StorageConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            enable_fallback: self.enable_fallback,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
            },
            health_check_interval: self.health_check_interval(),
        }
    }
}
