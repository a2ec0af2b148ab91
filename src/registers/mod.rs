// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! NEA SMART 2.0 register map
//!
//! This module describes where every piece of heating-system data lives in the
//! 16-bit holding register space of the controller, and how raw mode/state
//! words map to named values.
//!
//! ## Register Map
//!
//! ### Global Registers
//!
//! | Register Address | Description | Encoding |
//! |-----------------|-------------|----------|
//! | 1 | Operating mode | 1=auto … 5=manual cooling |
//! | 2 | Operating state | 1=presence … 6=holiday |
//! | 3 | Errors present | bit 0 |
//! | 5 | Warnings present | bit 0 |
//! | 6 | Hints present | bit 0 |
//! | 7 | Outside temperature | DPT 9001 |
//! | 8 | Filtered outside temperature | DPT 9001 |
//!
//! ### Zone Registers
//!
//! A zone base is `(base_id - 1) × 1200 + zone_id × 100` for base 1-4 and
//! zone 1-12. State, setpoint, temperature and humidity sit at offsets
//! 0, 1, 2 and 10 from the base.
//!
//! ### Mixed Groups, Dehumidifiers and Pumps
//!
//! Mixed groups 1-3 start at 10, 14 and 18 (valve, pump, flow temperature,
//! return temperature). Dehumidifier `n` lives at `21 + n`, extra pump `n`
//! at `30 + n`.

pub mod address;
pub mod state;

pub use address::{
    check_range, classify, dehumidifier_address, mixed_group_address, pump_address, zone_address,
    AddressError, MixedGroupRegisters, RegisterKind, ZoneRegisters,
};
pub use state::{OperationMode, OperationState, StateError, ZoneState};

/// Number of addressable holding registers.
pub const REGISTER_COUNT: usize = 65_536;

/// Operating mode register.
pub const GLOBAL_OP_MODE_ADDR: u16 = 1;
/// Operating state register.
pub const GLOBAL_OP_STATE_ADDR: u16 = 2;
/// Errors-present flag register.
pub const ERRORS_PRESENT_ADDR: u16 = 3;
/// Warnings-present flag register.
pub const WARNINGS_PRESENT_ADDR: u16 = 5;
/// Hints-present flag register.
pub const HINTS_PRESENT_ADDR: u16 = 6;
/// Outside temperature register (DPT 9001).
pub const OUTSIDE_TEMPERATURE_ADDR: u16 = 7;
/// Filtered outside temperature register (DPT 9001).
pub const FILTERED_OUTSIDE_TEMPERATURE_ADDR: u16 = 8;

/// Primary slave id of the controller on SYSBUS.
pub const SLAVE_ID_PRIMARY: u8 = 240;
/// Secondary slave id, always served for compatibility.
pub const SLAVE_ID_SECONDARY: u8 = 241;

/// SYSBUS serial line: 38400 baud, 8 data bits, no parity, 1 stop bit.
pub const SYSBUS_BAUD_RATE: u32 = 38_400;

/// Modbus function code for Read Holding Registers.
pub const READ_HOLDING_REGISTERS: u8 = 3;
/// Modbus function code for Write Single Register.
pub const WRITE_SINGLE_REGISTER: u8 = 6;
