// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module provides the Modbus slave side of the gateway (TCP or RTU
//! serial) and the lazily connected client used to reach other devices.
//!
//! ## Key Components
//!
//! - `GatewayModbusServer`: tokio-modbus service answering function codes 3, 6
//!   and 16 for the configured slave id and the secondary id 241.
//! - `ModbusConnection`: reconnecting client shared by the bus poller and the
//!   write-through mirror.
//!
//! ## Usage
//!
//! ```no_run
//! # async fn run(gateway: std::sync::Arc<neasmart_gateway::gateway::GatewayCore>) -> std::io::Result<()> {
//! use neasmart_gateway::modbus::{serve_tcp, GatewayModbusServer};
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:502").await?;
//! serve_tcp(listener, GatewayModbusServer::new(gateway, 240)).await
//! # }
//! ```

pub mod client;
pub mod modbus_server;

pub use client::{Endpoint, ModbusConnection, RequestError};
pub use modbus_server::{serve_rtu, serve_tcp, GatewayModbusServer};
