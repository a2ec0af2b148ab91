// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Breaker-protected, persisted register access
//!
//! [`GatewayCore`] is the single path to register state, used by the Modbus
//! server and by any higher-level facade alike.
//!
//! ## Reads
//!
//! The bus is read through the circuit breaker. Fresh values that fail the
//! plausibility checks of [`super::validation`] are replaced by the persisted
//! value, then the result is persisted. When the breaker is open or the bus
//! fails, the persisted values are served instead.
//!
//! ## Writes
//!
//! The bus is written through the circuit breaker and the value is persisted
//! whatever the bus outcome. A bus failure is reported after persistence as
//! [`GatewayError::CircuitOpen`] or [`GatewayError::Bus`].
//!
//! ## Storage
//!
//! Store calls commit to disk and sleep between retries, so they run on the
//! blocking thread pool through `spawn_blocking`.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::task;

use super::bus::{BusError, RegisterBus};
use super::validation::validate;
use crate::codec::{encode, CodecError};
use crate::registers::{check_range, AddressError, ZoneRegisters, ZoneState};
use crate::resilience::{BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::store::{RegisterStore, StoreError, StoreStatus};
use crate::write_through::{WriteThroughQueue, WriteThroughStatus};

/// Registers per bus request during [`GatewayCore::sync_from_bus`].
pub const SYNC_BATCH_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The bus was not written; the value is persisted locally.
    #[error("circuit breaker is open, value persisted locally")]
    CircuitOpen,

    /// The bus write failed; the value is persisted locally.
    #[error("bus write failed, value persisted locally: {0}")]
    Bus(#[from] BusError),
}

impl GatewayError {
    /// True when the local store holds the written value despite the error.
    pub fn is_persisted_locally(&self) -> bool {
        matches!(self, GatewayError::CircuitOpen | GatewayError::Bus(_))
    }
}

impl From<BreakerError<BusError>> for GatewayError {
    fn from(err: BreakerError<BusError>) -> Self {
        match err {
            BreakerError::CircuitOpen => GatewayError::CircuitOpen,
            BreakerError::Operation(err) => GatewayError::Bus(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayStatus {
    pub circuit_state: CircuitState,
    pub failure_count: u32,
    pub store_healthy: bool,
    pub using_fallback: bool,
    pub bus: String,
    pub store: StoreStatus,
    pub write_through: Option<WriteThroughStatus>,
}

/// Outcome of [`GatewayCore::sync_from_bus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced: usize,
    pub failed_batches: usize,
}

pub struct GatewayCore {
    bus: Arc<dyn RegisterBus>,
    breaker: CircuitBreaker,
    store: Arc<RegisterStore>,
    write_through: Option<WriteThroughQueue>,
}

impl GatewayCore {
    pub fn new(
        bus: Arc<dyn RegisterBus>,
        store: Arc<RegisterStore>,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            bus,
            breaker: CircuitBreaker::new("bus", breaker_config),
            store,
            write_through: None,
        }
    }

    /// Mirror zone writes through `queue`.
    pub fn with_write_through(mut self, queue: WriteThroughQueue) -> Self {
        self.write_through = Some(queue);
        self
    }

    pub fn store(&self) -> &Arc<RegisterStore> {
        &self.store
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Read `count` registers starting at `addr`.
    ///
    /// ### Parameters
    ///
    /// * `addr` - First register
    /// * `count` - Number of registers, at least one
    /// * `persist` - Store the values read from the bus
    ///
    /// ### Returns
    ///
    /// Validated bus values, or the persisted values when the bus cannot be
    /// used. Only address and storage errors are returned.
    pub async fn read(&self, addr: u16, count: u16, persist: bool) -> Result<Vec<u16>, GatewayError> {
        check_range(addr, usize::from(count))?;

        match self.read_from_bus(addr, count).await {
            Ok(values) => {
                if persist {
                    self.persist(addr, values.clone()).await?;
                }
                Ok(values)
            }
            Err(BreakerError::CircuitOpen) => {
                debug!("Circuit open, serving {} register(s) at {} from store", count, addr);
                self.stored(addr, usize::from(count)).await
            }
            Err(BreakerError::Operation(err)) => {
                warn!(
                    "Bus read of {} register(s) at {} failed ({}), serving stored values",
                    count, addr, err
                );
                self.stored(addr, usize::from(count)).await
            }
        }
    }

    /// Write `values` starting at `addr`, persisting them whatever happens on the bus.
    pub async fn write(&self, addr: u16, values: &[u16]) -> Result<(), GatewayError> {
        check_range(addr, values.len())?;

        let bus_result = self
            .breaker
            .call(|| self.bus.write_registers(addr, values))
            .await;
        self.persist(addr, values.to_vec()).await?;

        match bus_result {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = GatewayError::from(err);
                warn!("Register write at {}: {}", addr, err);
                Err(err)
            }
        }
    }

    pub async fn read_register(&self, addr: u16) -> Result<u16, GatewayError> {
        let values = self.read(addr, 1, true).await?;
        Ok(values.first().copied().unwrap_or_default())
    }

    pub async fn read_registers(&self, addr: u16, count: u16) -> Result<Vec<u16>, GatewayError> {
        self.read(addr, count, true).await
    }

    pub async fn write_register(&self, addr: u16, value: u16) -> Result<(), GatewayError> {
        self.write(addr, &[value]).await
    }

    pub async fn write_registers(&self, addr: u16, values: &[u16]) -> Result<(), GatewayError> {
        self.write(addr, values).await
    }

    /// Encode and write a zone setpoint, then mirror it on the secondary device.
    ///
    /// Returns the raw word written. The mirror is queued, never awaited.
    pub async fn write_zone_setpoint(
        &self,
        base_id: u8,
        zone_id: u8,
        celsius: f64,
    ) -> Result<u16, GatewayError> {
        let zone = ZoneRegisters::new(base_id, zone_id)?;
        let raw = encode(celsius)?;
        let result = self.write_register(zone.setpoint(), raw).await;
        self.mirror(zone.setpoint(), raw, &result);
        result.map(|_| raw)
    }

    /// Write a zone state, then mirror it on the secondary device.
    pub async fn write_zone_state(
        &self,
        base_id: u8,
        zone_id: u8,
        state: ZoneState,
    ) -> Result<(), GatewayError> {
        let zone = ZoneRegisters::new(base_id, zone_id)?;
        let result = self.write_register(zone.state(), state.value()).await;
        self.mirror(zone.state(), state.value(), &result);
        result
    }

    /// Copy `count` bus registers from `start` into the store.
    ///
    /// Reads go in batches of [`SYNC_BATCH_SIZE`]. A failed batch is logged
    /// and skipped, the others are still persisted.
    pub async fn sync_from_bus(&self, start: u16, count: usize) -> Result<SyncReport, GatewayError> {
        check_range(start, count)?;
        info!("Starting bus sync of {} register(s) from {}", count, start);

        let mut report = SyncReport::default();
        let end = usize::from(start) + count;
        for batch_start in (usize::from(start)..end).step_by(SYNC_BATCH_SIZE) {
            let batch_count = SYNC_BATCH_SIZE.min(end - batch_start);
            let addr = batch_start as u16;
            match self.read_from_bus(addr, batch_count as u16).await {
                Ok(values) => {
                    self.persist(addr, values).await?;
                    report.synced += batch_count;
                    if report.synced % 1000 == 0 {
                        info!("Synced {}/{} registers", report.synced, count);
                    }
                }
                Err(err) => {
                    warn!("Failed to sync batch at {}: {}", addr, err);
                    report.failed_batches += 1;
                }
            }
        }

        info!(
            "Bus sync completed: {} register(s) synced, {} batch(es) failed",
            report.synced, report.failed_batches
        );
        Ok(report)
    }

    pub fn status(&self) -> GatewayStatus {
        let breaker = self.breaker.status();
        let store = self.store.status();
        GatewayStatus {
            circuit_state: breaker.state,
            failure_count: breaker.failure_count,
            store_healthy: store.healthy,
            using_fallback: store.using_fallback,
            bus: self.bus.describe(),
            store,
            write_through: self
                .write_through
                .as_ref()
                .map(|queue| queue.client().status()),
        }
    }

    async fn read_from_bus(&self, addr: u16, count: u16) -> Result<Vec<u16>, BreakerError<BusError>> {
        let mut values = self
            .breaker
            .call(|| self.bus.read_registers(addr, count))
            .await?;
        self.substitute_invalid(addr, &mut values).await;
        Ok(values)
    }

    async fn stored(&self, addr: u16, count: usize) -> Result<Vec<u16>, GatewayError> {
        let store = Arc::clone(&self.store);
        let values = task::spawn_blocking(move || store.get_range(addr, count))
            .await
            .map_err(|e| StoreError::Backend(format!("Store task failed: {}", e)))??;
        Ok(values)
    }

    async fn persist(&self, addr: u16, values: Vec<u16>) -> Result<(), GatewayError> {
        let store = Arc::clone(&self.store);
        task::spawn_blocking(move || store.set_range(addr, &values))
            .await
            .map_err(|e| StoreError::Backend(format!("Store task failed: {}", e)))??;
        Ok(())
    }

    /// Replace implausible fresh values by their persisted counterpart.
    async fn substitute_invalid(&self, addr: u16, values: &mut [u16]) {
        let len = values.len();
        let mut persisted: Option<Vec<u16>> = None;
        for (offset, value) in values.iter_mut().enumerate() {
            let register = addr + offset as u16;
            let Err(reason) = validate(register, *value) else {
                continue;
            };

            if persisted.is_none() {
                match self.stored(addr, len).await {
                    Ok(stored) => persisted = Some(stored),
                    Err(err) => {
                        warn!(
                            "Register {} read {} ({}), no stored value to substitute: {}",
                            register, value, reason, err
                        );
                        continue;
                    }
                }
            }
            if let Some(stored) = persisted.as_ref().and_then(|p| p.get(offset)) {
                warn!(
                    "Register {} read {} ({}), substituting stored value {}",
                    register, value, reason, stored
                );
                *value = *stored;
            }
        }
    }

    fn mirror(&self, addr: u16, value: u16, result: &Result<(), GatewayError>) {
        let Some(queue) = &self.write_through else {
            return;
        };
        match result {
            Ok(()) => {
                queue.enqueue(addr, value);
            }
            Err(err) if err.is_persisted_locally() => {
                queue.enqueue(addr, value);
            }
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use crate::gateway::MemoryBus;
    use crate::store::StoreOptions;
    use std::time::Duration;
    use tempfile::TempDir;

    fn gateway(threshold: u32) -> (GatewayCore, Arc<MemoryBus>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            RegisterStore::open_path(dir.path().join("registers.redb"), StoreOptions::default())
                .unwrap(),
        );
        let bus = Arc::new(MemoryBus::new());
        let core = GatewayCore::new(
            bus.clone(),
            store,
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
        );
        (core, bus, dir)
    }

    #[tokio::test]
    async fn test_invalid_reading_replaced_by_stored_value() {
        let (core, bus, _dir) = gateway(5);
        let setpoint = encode(21.5).unwrap();
        core.write_register(1301, setpoint).await.unwrap();

        // Controller reports an uninitialised setpoint
        bus.load(1301, &[0]);
        assert_eq!(core.read_register(1301).await.unwrap(), setpoint);
        assert_eq!(core.store().get(1301).unwrap(), setpoint);

        // A plausible value is accepted and persisted
        let fresh = encode(23.0).unwrap();
        bus.load(1301, &[fresh]);
        assert_eq!(core.read_register(1301).await.unwrap(), fresh);
        assert_eq!(decode(core.store().get(1301).unwrap()), 23.0);
    }

    #[tokio::test]
    async fn test_read_without_persist() {
        let (core, bus, _dir) = gateway(5);
        bus.load(50, &[7]);
        assert_eq!(core.read(50, 1, false).await.unwrap(), vec![7]);
        assert_eq!(core.store().get(50).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_write_persists_when_bus_fails() {
        let (core, bus, _dir) = gateway(2);
        bus.set_online(false);

        let err = core.write_register(1300, 1).await.unwrap_err();
        assert!(matches!(err, GatewayError::Bus(BusError::Offline)));
        assert!(err.is_persisted_locally());
        core.write_register(1300, 2).await.unwrap_err();

        let requests = bus.request_count();
        let err = core.write_register(1300, 3).await.unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen));
        assert_eq!(bus.request_count(), requests);
        assert_eq!(core.store().get(1300).unwrap(), 3);
        assert_eq!(core.read_register(1300).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_validation_errors_touch_nothing() {
        let (core, bus, _dir) = gateway(5);
        assert!(matches!(
            core.read(65_535, 2, true).await,
            Err(GatewayError::Address(_))
        ));
        assert!(matches!(
            core.write_zone_setpoint(5, 1, 21.0).await,
            Err(GatewayError::Address(AddressError::InvalidBaseId(5)))
        ));
        assert!(matches!(
            core.write_zone_setpoint(1, 1, f64::NAN).await,
            Err(GatewayError::Codec(_))
        ));
        assert_eq!(bus.request_count(), 0);
    }

    #[tokio::test]
    async fn test_zone_helpers() {
        let (core, bus, _dir) = gateway(5);
        let raw = core.write_zone_setpoint(2, 1, 22.5).await.unwrap();
        assert_eq!(bus.peek(1301), raw);
        assert_eq!(decode(raw), 22.5);

        core.write_zone_state(2, 1, ZoneState::Away).await.unwrap();
        assert_eq!(core.store().get(1300).unwrap(), ZoneState::Away.value());
    }

    #[tokio::test]
    async fn test_sync_from_bus_in_batches() {
        let (core, bus, _dir) = gateway(50);
        bus.load(1000, &(1..=250).collect::<Vec<u16>>());

        let report = core.sync_from_bus(1000, 250).await.unwrap();
        assert_eq!(
            report,
            SyncReport {
                synced: 250,
                failed_batches: 0
            }
        );
        assert_eq!(core.store().get(1249).unwrap(), 250);

        bus.set_online(false);
        let report = core.sync_from_bus(0, 250).await.unwrap();
        assert_eq!(report.synced, 0);
        assert_eq!(report.failed_batches, 3);
    }

    #[tokio::test]
    async fn test_status() {
        let (core, _bus, _dir) = gateway(5);
        let status = core.status();
        assert_eq!(status.circuit_state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
        assert!(status.store_healthy);
        assert!(!status.using_fallback);
        assert_eq!(status.bus, "memory");
        assert!(status.write_through.is_none());
    }
}
