// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus server configuration

use serde::{Deserialize, Serialize};

use crate::registers::{SLAVE_ID_PRIMARY, SYSBUS_BAUD_RATE};

/// Transport the Modbus server listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModbusTransport {
    Tcp,
    Serial,
}

/// Configuration for the Modbus server exposing the register gateway.
///
/// The server answers for `slave_id` and for the fixed secondary id 241.
///
/// # Example
///
/// ```
/// use neasmart_gateway::config::{ModbusConfig, ModbusTransport};
///
/// let modbus_config = ModbusConfig {
///     enabled: true,
///     transport: ModbusTransport::Tcp,
///     port: 5020,
///     address: "127.0.0.1".to_string(),
///     ..ModbusConfig::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    /// Enable or disable the Modbus server. Default is `true`.
    pub enabled: bool,

    /// `tcp` or `serial`. Default is `tcp`.
    pub transport: ModbusTransport,

    /// The network address the TCP server binds to. Default is "0.0.0.0".
    pub address: String,

    /// The TCP port. Default is 502.
    pub port: u16,

    /// Serial device for the RTU transport.
    pub serial_device: String,

    /// Serial line speed, 8N1. Default is 38400.
    pub baud_rate: u32,

    /// Primary slave id. Default is 240.
    pub slave_id: u8,
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            transport: ModbusTransport::Tcp,
            address: "0.0.0.0".to_string(),
            port: 502,
            serial_device: "/dev/ttyUSB0".to_string(),
            baud_rate: SYSBUS_BAUD_RATE,
            slave_id: SLAVE_ID_PRIMARY,
        }
    }
}
