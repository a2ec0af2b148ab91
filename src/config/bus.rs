// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Heating bus configuration

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::gateway::{MemoryBus, ModbusBus, RegisterBus};
use crate::modbus::Endpoint;
use crate::registers::{REGISTER_COUNT, SLAVE_ID_PRIMARY, SYSBUS_BAUD_RATE};
use crate::store::RegisterStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// Passive in-process register image.
    Memory,
    /// Poll the controller over Modbus TCP.
    Tcp,
    /// Poll the controller over Modbus RTU.
    Serial,
}

/// How the gateway reaches the heating controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub kind: BusKind,
    pub host: String,
    pub port: u16,
    pub serial_device: String,
    pub baud_rate: u32,
    pub slave_id: u8,
    /// Bound on connection setup and each request, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            kind: BusKind::Memory,
            host: "127.0.0.1".to_string(),
            port: 502,
            serial_device: "/dev/ttyUSB1".to_string(),
            baud_rate: SYSBUS_BAUD_RATE,
            slave_id: SLAVE_ID_PRIMARY,
            timeout_ms: 2000,
        }
    }
}

impl BusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Build the configured bus.
    ///
    /// The passive memory image is seeded from `store` so that persisted
    /// registers are served after a restart.
    pub fn build(&self, store: &RegisterStore) -> Result<Arc<dyn RegisterBus>> {
        let bus: Arc<dyn RegisterBus> = match self.kind {
            BusKind::Memory => {
                let registers = store
                    .get_range(0, REGISTER_COUNT)
                    .context("Failed to load persisted registers into the bus image")?;
                Arc::new(MemoryBus::with_registers(registers))
            }
            BusKind::Tcp => {
                let addr: SocketAddr = format!("{}:{}", self.host, self.port)
                    .parse()
                    .with_context(|| format!("Invalid bus address {}:{}", self.host, self.port))?;
                Arc::new(ModbusBus::new(
                    Endpoint::Tcp(addr),
                    self.slave_id,
                    self.timeout(),
                ))
            }
            BusKind::Serial => Arc::new(ModbusBus::new(
                Endpoint::Serial {
                    device: self.serial_device.clone(),
                    baud_rate: self.baud_rate,
                },
                self.slave_id,
                self.timeout(),
            )),
        };
        Ok(bus)
    }
}
