// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::{debug, warn};

use super::{BusKind, Config, ModbusTransport};
use crate::registers::SLAVE_ID_SECONDARY;

const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Build the validator for the embedded JSON schema.
pub(crate) fn schema_validator() -> Result<jsonschema::Validator> {
    let schema: serde_json::Value = serde_json::from_str(CONFIG_SCHEMA).with_context(|| {
        debug!("JSON schema string: {}", CONFIG_SCHEMA);
        "Failed to parse JSON schema"
    })?;

    let validator = jsonschema::draft202012::options()
        .should_validate_formats(true)
        .build(&schema)?;
    Ok(validator)
}

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./neasmart_gateway --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
///
/// # Arguments
///
/// * `addr` - The address string to validate
///
/// # Returns
///
/// `true` if the address is valid, `false` otherwise
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    // Special cases
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **Modbus server**: a bindable address for TCP, a serial device for RTU,
///   and a primary slave id in 1-247
/// - **Bus**: a parseable controller address for TCP, a serial device for RTU
/// - **Storage**: at least one attempt, `base_delay_ms <= max_delay_ms`
/// - **Circuit breaker**: non-zero thresholds
/// - **Write-through**: when enabled, a device IP address and at least one attempt
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    let modbus = &config.modbus;
    match modbus.transport {
        ModbusTransport::Tcp => {
            if modbus.port == 0 {
                anyhow::bail!("Invalid Modbus port number: {}", modbus.port);
            }
            if !is_valid_ip_address(&modbus.address) {
                anyhow::bail!("Invalid Modbus bind address: {}", modbus.address);
            }
        }
        ModbusTransport::Serial => {
            if modbus.serial_device.trim().is_empty() {
                anyhow::bail!("Modbus serial transport requires a serial_device");
            }
        }
    }
    if !(1..=247).contains(&modbus.slave_id) {
        anyhow::bail!("Invalid Modbus slave id: {}", modbus.slave_id);
    }
    if modbus.slave_id == SLAVE_ID_SECONDARY {
        // Still valid, the server simply answers on a single id
        warn!(
            "Modbus slave id {} is also the fixed secondary id",
            modbus.slave_id
        );
    }

    let bus = &config.bus;
    match bus.kind {
        BusKind::Memory => {}
        BusKind::Tcp => {
            if bus.host.parse::<std::net::IpAddr>().is_err() || bus.port == 0 {
                anyhow::bail!("Invalid bus address: {}:{}", bus.host, bus.port);
            }
        }
        BusKind::Serial => {
            if bus.serial_device.trim().is_empty() {
                anyhow::bail!("Serial bus requires a serial_device");
            }
        }
    }
    if bus.kind != BusKind::Memory && bus.timeout_ms == 0 {
        anyhow::bail!("Bus timeout must be greater than zero");
    }

    let storage = &config.storage;
    if storage.max_attempts == 0 {
        anyhow::bail!("Storage max_attempts must be at least 1");
    }
    if storage.base_delay_ms > storage.max_delay_ms {
        anyhow::bail!(
            "Storage base_delay_ms ({}) is greater than max_delay_ms ({})",
            storage.base_delay_ms,
            storage.max_delay_ms
        );
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 || breaker.half_open_max_calls == 0 {
        anyhow::bail!("Circuit breaker thresholds must be greater than zero");
    }

    let write_through = &config.write_through;
    if write_through.enabled {
        if write_through.host.parse::<std::net::IpAddr>().is_err() {
            anyhow::bail!(
                "Write-through host must be an IP address: {}",
                write_through.host
            );
        }
        if write_through.retry_attempts == 0 {
            anyhow::bail!("Write-through retry_attempts must be at least 1");
        }
        if write_through.queue_capacity == 0 {
            anyhow::bail!("Write-through queue_capacity must be at least 1");
        }
    }

    Ok(())
}
