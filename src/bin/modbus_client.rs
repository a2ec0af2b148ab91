// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Diagnostic client reading holding registers from a running gateway.

use anyhow::{Context, Result};
use clap::Parser;
use log::debug;
use std::net::SocketAddr;
use neasmart_gateway::codec::{decode, is_invalid_marker};
use neasmart_gateway::registers::{
    classify, OperationMode, OperationState, RegisterKind, ZoneState, SLAVE_ID_PRIMARY,
};
use tokio::time::Duration;
use tokio_modbus::prelude::*;

/// Modbus client for reading holding registers from the NEA SMART gateway
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Modbus server address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Modbus server port
    #[clap(long, default_value = "502")]
    port: u16,

    /// Slave id (240 or 241 on the gateway)
    #[clap(long, default_value_t = SLAVE_ID_PRIMARY)]
    slave: u8,

    /// Starting holding register address
    #[clap(long, default_value = "1")]
    register: u16,

    /// Number of registers to read
    #[clap(long, default_value = "8")]
    quantity: u16,

    /// Request timeout in milliseconds
    #[clap(long, default_value = "2000")]
    timeout_ms: u64,
}

fn describe(addr: u16, raw: u16) -> String {
    match classify(addr) {
        RegisterKind::OutsideTemperature
        | RegisterKind::ZoneSetpoint
        | RegisterKind::ZoneTemperature => {
            if is_invalid_marker(raw) {
                "no data".to_string()
            } else {
                format!("{:.2} °C", decode(raw))
            }
        }
        RegisterKind::GlobalMode => OperationMode::try_from(raw)
            .map(|mode| format!("mode {}", mode))
            .unwrap_or_else(|e| e.to_string()),
        RegisterKind::GlobalState => OperationState::try_from(raw)
            .map(|state| format!("state {}", state))
            .unwrap_or_else(|e| e.to_string()),
        RegisterKind::ZoneState => ZoneState::try_from(raw)
            .map(|state| format!("zone {}", state))
            .unwrap_or_else(|e| e.to_string()),
        RegisterKind::ZoneHumidity => format!("{} %", raw),
        kind => format!("{:?}", kind),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();

    let socket_addr: SocketAddr = format!("{}:{}", args.address, args.port)
        .parse()
        .with_context(|| format!("Invalid server address {}:{}", args.address, args.port))?;
    println!("Connecting to Modbus server at {} (slave {})", socket_addr, args.slave);

    let mut ctx = tcp::connect_slave(socket_addr, Slave(args.slave))
        .await
        .with_context(|| format!("Failed to connect to {}", socket_addr))?;

    println!(
        "Reading {} holding registers starting at address {}",
        args.quantity, args.register
    );
    let response = tokio::time::timeout(
        Duration::from_millis(args.timeout_ms),
        ctx.read_holding_registers(args.register, args.quantity),
    )
    .await
    .context("Request timed out")?
    .context("Transport error")?
    .map_err(|code| anyhow::anyhow!("Modbus exception: {:?}", code))?;
    debug!("Raw register values: {:?}", response);

    for (i, value) in response.iter().enumerate() {
        let register = args.register.wrapping_add(i as u16);
        println!(
            "Register {:5}: 0x{:04X} ({:5})  {}",
            register,
            value,
            value,
            describe(register, *value)
        );
    }

    ctx.disconnect().await.ok();
    Ok(())
}
