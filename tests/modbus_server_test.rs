// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tests for the GatewayModbusServer implementation
//!
//! These tests start a server instance backed by an in-memory bus and talk to
//! it through a tokio-modbus client: reads, single and multiple writes, the
//! secondary slave id and the error conditions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use approx::assert_abs_diff_eq;
use neasmart_gateway::codec::{decode, encode};
use neasmart_gateway::gateway::{GatewayCore, MemoryBus};
use neasmart_gateway::modbus::{serve_tcp, GatewayModbusServer};
use neasmart_gateway::registers::{SLAVE_ID_PRIMARY, SLAVE_ID_SECONDARY};
use neasmart_gateway::resilience::CircuitBreakerConfig;
use neasmart_gateway::store::{RegisterStore, StoreOptions};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time;
use tokio_modbus::prelude::*;

struct TestServer {
    addr: SocketAddr,
    bus: Arc<MemoryBus>,
    store: Arc<RegisterStore>,
    handle: tokio::task::JoinHandle<()>,
    _dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Start a gateway Modbus server on an ephemeral port
async fn start_test_server() -> Result<TestServer, Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(RegisterStore::open_path(
        dir.path().join("registers.redb"),
        StoreOptions::default(),
    )?);
    let bus = Arc::new(MemoryBus::new());
    let gateway = Arc::new(GatewayCore::new(
        bus.clone(),
        store.clone(),
        CircuitBreakerConfig::default(),
    ));

    // Use port 0 to let the OS assign an available port
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let service = GatewayModbusServer::new(gateway, SLAVE_ID_PRIMARY);
    let handle = tokio::spawn(async move {
        if let Err(e) = serve_tcp(listener, service).await {
            eprintln!("Server error: {}", e);
        }
    });

    // Give the server a moment to start
    time::sleep(Duration::from_millis(50)).await;

    Ok(TestServer {
        addr,
        bus,
        store,
        handle,
        _dir: dir,
    })
}

#[tokio::test]
async fn test_read_holding_registers() -> Result<(), Box<dyn std::error::Error>> {
    let server = start_test_server().await?;
    server.bus.load(1, &[1, 4]);
    server.bus.load(1302, &[encode(21.0)?]);

    let mut ctx = tcp::connect_slave(server.addr, Slave(SLAVE_ID_PRIMARY)).await?;

    let data = ctx.read_holding_registers(1, 2).await??;
    assert_eq!(data, vec![1, 4]);

    let data = ctx.read_holding_registers(1302, 1).await??;
    assert_abs_diff_eq!(decode(data[0]), 21.0, epsilon = 0.01);

    // Served values are persisted
    assert_eq!(server.store.get_range(1, 2)?, vec![1, 4]);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_write_single_register() -> Result<(), Box<dyn std::error::Error>> {
    let server = start_test_server().await?;
    let mut ctx = tcp::connect_slave(server.addr, Slave(SLAVE_ID_PRIMARY)).await?;

    let raw = encode(22.5)?;
    ctx.write_single_register(1301, raw).await??;

    assert_eq!(server.bus.peek(1301), raw);
    assert_eq!(server.store.get(1301)?, raw);

    let data = ctx.read_holding_registers(1301, 1).await??;
    assert_abs_diff_eq!(decode(data[0]), 22.5, epsilon = 0.1);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_write_multiple_registers() -> Result<(), Box<dyn std::error::Error>> {
    let server = start_test_server().await?;
    let mut ctx = tcp::connect_slave(server.addr, Slave(SLAVE_ID_PRIMARY)).await?;

    ctx.write_multiple_registers(500, &[101, 202, 303]).await??;

    let data = ctx.read_holding_registers(500, 3).await??;
    assert_eq!(data, vec![101, 202, 303]);
    assert_eq!(server.store.get_range(500, 3)?, vec![101, 202, 303]);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_secondary_slave_id_is_served() -> Result<(), Box<dyn std::error::Error>> {
    let server = start_test_server().await?;
    server.bus.load(600, &[42]);

    let mut ctx = tcp::connect_slave(server.addr, Slave(SLAVE_ID_SECONDARY)).await?;
    let data = ctx.read_holding_registers(600, 1).await??;
    assert_eq!(data, vec![42]);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_unknown_slave_id_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let server = start_test_server().await?;

    let mut ctx = tcp::connect_slave(server.addr, Slave(17)).await?;
    let result = ctx.read_holding_registers(1, 1).await?;
    assert_eq!(result, Err(ExceptionCode::GatewayTargetDevice));
    assert_eq!(server.bus.request_count(), 0);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_invalid_register_address() -> Result<(), Box<dyn std::error::Error>> {
    let server = start_test_server().await?;
    let mut ctx = tcp::connect_slave(server.addr, Slave(SLAVE_ID_PRIMARY)).await?;

    // The range runs past the last register
    let result = ctx.read_holding_registers(65_500, 100).await?;
    assert_eq!(result, Err(ExceptionCode::IllegalDataAddress));

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_invalid_register_count() -> Result<(), Box<dyn std::error::Error>> {
    let server = start_test_server().await?;
    let mut ctx = tcp::connect_slave(server.addr, Slave(SLAVE_ID_PRIMARY)).await?;

    let result = ctx.read_holding_registers(1, 126).await?;
    assert_eq!(result, Err(ExceptionCode::IllegalDataValue));

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_unsupported_function() -> Result<(), Box<dyn std::error::Error>> {
    let server = start_test_server().await?;
    let mut ctx = tcp::connect_slave(server.addr, Slave(SLAVE_ID_PRIMARY)).await?;

    let result = ctx.read_coils(0, 1).await?;
    assert_eq!(result, Err(ExceptionCode::IllegalFunction));

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_write_is_acknowledged_when_bus_is_offline() -> Result<(), Box<dyn std::error::Error>>
{
    let server = start_test_server().await?;
    server.bus.set_online(false);
    let mut ctx = tcp::connect_slave(server.addr, Slave(SLAVE_ID_PRIMARY)).await?;

    ctx.write_single_register(700, 1234).await??;
    assert_eq!(server.store.get(700)?, 1234);
    assert_eq!(server.bus.peek(700), 0);

    // Reads fall back on the persisted value
    let data = ctx.read_holding_registers(700, 1).await??;
    assert_eq!(data, vec![1234]);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_multiple_clients() -> Result<(), Box<dyn std::error::Error>> {
    let server = start_test_server().await?;

    let mut client1 = tcp::connect_slave(server.addr, Slave(SLAVE_ID_PRIMARY)).await?;
    let mut client2 = tcp::connect_slave(server.addr, Slave(SLAVE_ID_SECONDARY)).await?;

    client1.write_single_register(5, 888).await??;
    let data = client2.read_holding_registers(5, 1).await??;
    assert_eq!(data, vec![888]);

    client1.disconnect().await?;
    client2.disconnect().await?;
    Ok(())
}
