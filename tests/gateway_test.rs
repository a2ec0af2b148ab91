// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! End-to-end tests of the gateway: bus, circuit breaker, register store and
//! write-through mirroring on a Modbus test device.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use approx::assert_abs_diff_eq;
use futures::future;
use neasmart_gateway::codec::{decode, encode};
use neasmart_gateway::gateway::{GatewayCore, GatewayError, MemoryBus};
use neasmart_gateway::registers::{ZoneRegisters, ZoneState};
use neasmart_gateway::resilience::{CircuitBreakerConfig, CircuitState};
use neasmart_gateway::store::{
    RedbBackend, RegisterBackend, RegisterStore, RetryPolicy, StoreError, StoreOptions,
};
use neasmart_gateway::write_through::{WriteThroughClient, WriteThroughOptions, WriteThroughQueue};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

/// Secondary device double recording the registers written to it.
#[derive(Clone, Default)]
struct TestDevice {
    registers: Arc<Mutex<HashMap<u16, u16>>>,
}

impl TestDevice {
    fn get(&self, addr: u16) -> Option<u16> {
        self.registers.lock().get(&addr).copied()
    }
}

impl tokio_modbus::server::Service for TestDevice {
    type Request = SlaveRequest<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let result = match req.request {
            Request::WriteSingleRegister(addr, value) => {
                self.registers.lock().insert(addr, value);
                Ok(Response::WriteSingleRegister(addr, value))
            }
            _ => Err(ExceptionCode::IllegalFunction),
        };
        future::ready(result)
    }
}

async fn start_test_device() -> (SocketAddr, TestDevice, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let device = TestDevice::default();

    let service = device.clone();
    let handle = tokio::spawn(async move {
        let server = Server::new(listener);
        let on_connected = move |stream, socket_addr| {
            let service = service.clone();
            async move { accept_tcp_connection(stream, socket_addr, move |_| Ok(Some(service.clone()))) }
        };
        let on_process_error = |err| eprintln!("Test device error: {}", err);
        let _ = server.serve(&on_connected, on_process_error).await;
    });

    (addr, device, handle)
}

/// redb backend whose writes can be made to fail.
struct FlakyBackend {
    inner: RedbBackend,
    failing: Arc<AtomicBool>,
}

impl RegisterBackend for FlakyBackend {
    fn read_range(&self, start: u16, count: usize) -> Result<Vec<u16>, StoreError> {
        self.inner.read_range(start, count)
    }

    fn write_range(&self, start: u16, values: &[u16]) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk unavailable".to_string()));
        }
        self.inner.write_range(start, values)
    }

    fn write_entries(&self, entries: &[(u16, u16)]) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk unavailable".to_string()));
        }
        self.inner.write_entries(entries)
    }

    fn probe(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn entry_count(&self) -> Result<u64, StoreError> {
        self.inner.entry_count()
    }
}

fn open_store(dir: &TempDir) -> Arc<RegisterStore> {
    Arc::new(
        RegisterStore::open_path(dir.path().join("registers.redb"), StoreOptions::default())
            .unwrap(),
    )
}

fn breaker_config(failure_threshold: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold,
        recovery_timeout: Duration::from_secs(60),
        half_open_max_calls: 1,
    }
}

async fn wait_for(device: &TestDevice, addr: u16) -> Option<u16> {
    for _ in 0..100 {
        if let Some(value) = device.get(addr) {
            return Some(value);
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    None
}

#[tokio::test]
async fn test_setpoint_write_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(MemoryBus::new());
    let gateway = GatewayCore::new(bus.clone(), open_store(&dir), breaker_config(5));

    gateway.write_register(1301, encode(22.5).unwrap()).await.unwrap();
    let raw = gateway.read_register(1301).await.unwrap();

    assert_abs_diff_eq!(decode(raw), 22.5, epsilon = 0.1);
    assert_eq!(bus.peek(1301), raw);
}

#[tokio::test]
async fn test_open_circuit_serves_persisted_values() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(MemoryBus::new());
    let store = open_store(&dir);
    let gateway = GatewayCore::new(bus.clone(), store.clone(), breaker_config(2));

    let zone = ZoneRegisters::new(1, 3).unwrap();
    let raw = gateway.write_zone_setpoint(1, 3, 21.0).await.unwrap();
    assert_eq!(store.get(zone.setpoint()).unwrap(), raw);

    bus.set_online(false);
    for _ in 0..2 {
        let err = gateway.write_register(900, 1).await.unwrap_err();
        assert!(matches!(err, GatewayError::Bus(_)));
    }
    assert_eq!(gateway.breaker().state(), CircuitState::Open);

    let requests = bus.request_count();
    let value = gateway.read_register(zone.setpoint()).await.unwrap();
    assert_eq!(value, raw);
    assert_abs_diff_eq!(decode(value), 21.0, epsilon = 0.1);
    // The open circuit keeps the bus out of the read path
    assert_eq!(bus.request_count(), requests);

    // Writes are still persisted while the circuit is open
    let err = gateway.write_register(901, 7).await.unwrap_err();
    assert!(matches!(err, GatewayError::CircuitOpen));
    assert!(err.is_persisted_locally());
    assert_eq!(store.get(901).unwrap(), 7);

    let status = gateway.status();
    assert_eq!(status.circuit_state, CircuitState::Open);
    assert!(status.store_healthy);
}

#[tokio::test]
async fn test_implausible_bus_value_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(MemoryBus::new());
    let store = open_store(&dir);
    let gateway = GatewayCore::new(bus.clone(), store.clone(), breaker_config(5));

    let temperature = ZoneRegisters::new(1, 2).unwrap().temperature();
    bus.load(temperature, &[encode(20.5).unwrap()]);
    let first = gateway.read_register(temperature).await.unwrap();
    assert_abs_diff_eq!(decode(first), 20.5, epsilon = 0.1);

    // The controller reports "no data"
    bus.load(temperature, &[0x7FFF]);
    let second = gateway.read_register(temperature).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(store.get(temperature).unwrap(), first);
}

#[tokio::test]
async fn test_zone_writes_are_mirrored_on_secondary_device() {
    let (device_addr, device, device_handle) = start_test_device().await;
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(MemoryBus::new());

    let client = Arc::new(WriteThroughClient::new(WriteThroughOptions {
        enabled: true,
        device: device_addr,
        timeout: Duration::from_secs(1),
        retry_delay: Duration::from_millis(10),
        ..WriteThroughOptions::default()
    }));
    let (queue, worker) = WriteThroughQueue::new(client.clone(), 16);
    let worker_handle = tokio::spawn(worker.run());
    let gateway =
        GatewayCore::new(bus.clone(), open_store(&dir), breaker_config(5)).with_write_through(queue);

    let zone = ZoneRegisters::new(1, 3).unwrap();
    let raw = gateway.write_zone_setpoint(1, 3, 22.5).await.unwrap();
    gateway
        .write_zone_state(1, 3, ZoneState::Away)
        .await
        .unwrap();

    assert_eq!(wait_for(&device, zone.setpoint()).await, Some(raw));
    assert_eq!(
        wait_for(&device, zone.state()).await,
        Some(ZoneState::Away.value())
    );
    assert_eq!(client.consecutive_errors(), 0);

    // Plain register writes are not mirrored
    gateway.write_register(1402, 5).await.unwrap();
    time::sleep(Duration::from_millis(100)).await;
    assert_eq!(device.get(1402), None);

    let status = gateway.status();
    let write_through = status.write_through.unwrap();
    assert!(write_through.enabled);
    assert_eq!(write_through.consecutive_errors, 0);

    drop(gateway);
    time::timeout(Duration::from_secs(2), worker_handle)
        .await
        .unwrap()
        .unwrap();
    device_handle.abort();
}

#[tokio::test]
async fn test_unreachable_secondary_device_disables_mirroring() {
    // Grab a free port, then release it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let device_addr = listener.local_addr().unwrap();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(MemoryBus::new());
    let store = open_store(&dir);
    let client = Arc::new(WriteThroughClient::new(WriteThroughOptions {
        enabled: true,
        device: device_addr,
        timeout: Duration::from_millis(200),
        retry_attempts: 2,
        retry_delay: Duration::from_millis(10),
        disable_on_error: true,
        max_consecutive_errors: 1,
        ..WriteThroughOptions::default()
    }));
    let (queue, worker) = WriteThroughQueue::new(client.clone(), 16);
    let worker_handle = tokio::spawn(worker.run());
    let gateway =
        GatewayCore::new(bus.clone(), store.clone(), breaker_config(5)).with_write_through(queue);

    let zone = ZoneRegisters::new(1, 1).unwrap();
    let raw = gateway.write_zone_setpoint(1, 1, 19.5).await.unwrap();
    assert_eq!(store.get(zone.setpoint()).unwrap(), raw);

    for _ in 0..100 {
        if client.consecutive_errors() > 0 {
            break;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(client.consecutive_errors(), 1);
    assert!(!client.is_enabled());

    drop(gateway);
    time::timeout(Duration::from_secs(2), worker_handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_sync_from_bus_persists_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registers.redb");
    let bus = Arc::new(MemoryBus::new());
    let values: Vec<u16> = (0..150).map(|i| 1000 + i).collect();
    bus.load(4000, &values);

    {
        let store = Arc::new(RegisterStore::open_path(&path, StoreOptions::default()).unwrap());
        let gateway = GatewayCore::new(bus.clone(), store, breaker_config(5));
        let report = gateway.sync_from_bus(4000, 150).await.unwrap();
        assert_eq!(report.synced, 150);
        assert_eq!(report.failed_batches, 0);
    }

    // Synced values are durable
    let reopened = RegisterStore::open_path(&path, StoreOptions::default()).unwrap();
    assert_eq!(reopened.get_range(4000, 150).unwrap(), values);
}

#[tokio::test(flavor = "current_thread")]
async fn test_degraded_store_write_does_not_stall_other_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let failing = Arc::new(AtomicBool::new(false));
    let backend = FlakyBackend {
        inner: RedbBackend::open(dir.path().join("registers.redb")).unwrap(),
        failing: failing.clone(),
    };
    let store = Arc::new(
        RegisterStore::open(
            Box::new(backend),
            StoreOptions {
                enable_fallback: true,
                retry: RetryPolicy {
                    max_attempts: 3,
                    base_delay: Duration::from_millis(100),
                    max_delay: Duration::from_millis(200),
                },
                health_check_interval: Duration::from_secs(60),
            },
        )
        .unwrap(),
    );
    let bus = Arc::new(MemoryBus::new());
    let gateway = GatewayCore::new(bus.clone(), store.clone(), breaker_config(5));

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            loop {
                ticks.fetch_add(1, Ordering::SeqCst);
                time::sleep(Duration::from_millis(10)).await;
            }
        })
    };

    // Backing off between the three attempts takes at least 300 ms
    failing.store(true, Ordering::SeqCst);
    gateway.write_register(42, 7).await.unwrap();

    assert!(ticks.load(Ordering::SeqCst) >= 5);
    assert!(store.is_using_fallback());
    assert_eq!(store.get(42).unwrap(), 7);
    assert_eq!(bus.peek(42), 7);
    ticker.abort();
}
