// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Access to the heating system bus
//!
//! [`RegisterBus`] is the seam between the gateway and whatever talks to the
//! controller. Two implementations exist:
//!
//! - [`MemoryBus`]: an in-process register image. This is what the gateway
//!   uses when it sits passively on the system bus and the controller writes
//!   into it, and what tests use to simulate an unreachable bus.
//! - [`ModbusBus`]: an active tokio-modbus client polling the controller over
//!   TCP or RTU serial.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;
use thiserror::Error;

use crate::modbus::client::{Endpoint, ModbusConnection, RequestError};
use crate::registers::{check_range, AddressError, REGISTER_COUNT};

/// Communication failure on the bus.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BusError {
    #[error("bus is offline")]
    Offline,

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Address(#[from] AddressError),
}

/// Holding-register access on the heating bus.
#[async_trait]
pub trait RegisterBus: Send + Sync {
    async fn read_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, BusError>;

    async fn write_registers(&self, start: u16, values: &[u16]) -> Result<(), BusError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// In-process register image.
pub struct MemoryBus {
    registers: RwLock<Vec<u16>>,
    online: AtomicBool,
    requests: AtomicUsize,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_registers(vec![0; REGISTER_COUNT])
    }

    /// Image starting from `registers`, typically the persisted store content.
    ///
    /// Missing trailing registers read as 0, extra values are ignored.
    pub fn with_registers(mut registers: Vec<u16>) -> Self {
        registers.resize(REGISTER_COUNT, 0);
        Self {
            registers: RwLock::new(registers),
            online: AtomicBool::new(true),
            requests: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent request fail with [`BusError::Offline`].
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Write values as the controller would, bypassing the online flag.
    pub fn load(&self, start: u16, values: &[u16]) {
        let mut registers = self.registers.write();
        for (addr, value) in (usize::from(start)..REGISTER_COUNT).zip(values) {
            registers[addr] = *value;
        }
    }

    /// Read values as the controller sees them, bypassing the online flag.
    pub fn peek(&self, addr: u16) -> u16 {
        self.registers.read()[usize::from(addr)]
    }

    /// Number of requests that reached the bus, whether they failed or not.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn admit(&self) -> Result<(), BusError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.is_online() {
            Ok(())
        } else {
            Err(BusError::Offline)
        }
    }
}

#[async_trait]
impl RegisterBus for MemoryBus {
    async fn read_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, BusError> {
        self.admit()?;
        check_range(start, usize::from(count))?;
        let start = usize::from(start);
        Ok(self.registers.read()[start..start + usize::from(count)].to_vec())
    }

    async fn write_registers(&self, start: u16, values: &[u16]) -> Result<(), BusError> {
        self.admit()?;
        check_range(start, values.len())?;
        self.load(start, values);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Active Modbus client on the controller.
pub struct ModbusBus {
    connection: ModbusConnection,
}

impl ModbusBus {
    pub fn new(endpoint: Endpoint, slave_id: u8, timeout: Duration) -> Self {
        Self {
            connection: ModbusConnection::new(endpoint, slave_id, timeout),
        }
    }
}

#[async_trait]
impl RegisterBus for ModbusBus {
    async fn read_registers(&self, start: u16, count: u16) -> Result<Vec<u16>, BusError> {
        check_range(start, usize::from(count))?;
        debug!("Bus read {} register(s) at {}", count, start);
        Ok(self.connection.read_holding_registers(start, count).await?)
    }

    async fn write_registers(&self, start: u16, values: &[u16]) -> Result<(), BusError> {
        check_range(start, values.len())?;
        debug!("Bus write {} register(s) at {}", values.len(), start);
        match values {
            [value] => self.connection.write_single_register(start, *value).await?,
            _ => self.connection.write_multiple_registers(start, values).await?,
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("modbus {}", self.connection.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_bus_round_trip() {
        let bus = MemoryBus::new();
        bus.write_registers(1300, &[1, 0x0C33]).await.unwrap();
        assert_eq!(bus.read_registers(1300, 2).await.unwrap(), vec![1, 0x0C33]);
        assert_eq!(bus.peek(1301), 0x0C33);
        assert_eq!(bus.request_count(), 2);
    }

    #[tokio::test]
    async fn test_memory_bus_offline() {
        let bus = MemoryBus::new();
        bus.set_online(false);
        assert_eq!(bus.read_registers(0, 1).await, Err(BusError::Offline));
        assert_eq!(bus.write_registers(0, &[1]).await, Err(BusError::Offline));

        // The controller side still works
        bus.load(5, &[9]);
        bus.set_online(true);
        assert_eq!(bus.read_registers(5, 1).await.unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn test_memory_bus_rejects_out_of_range() {
        let bus = MemoryBus::new();
        assert!(matches!(
            bus.read_registers(65_535, 2).await,
            Err(BusError::Address(_))
        ));
    }
}
