// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! NEA SMART register gateway library
//!
//! This library bridges the NEA SMART 2.0 heating bus holding registers to
//! external Modbus masters, keeping a durable copy of every register so the
//! last known values survive bus and storage outages.

pub mod codec;
pub mod config;
pub mod daemon;
pub mod gateway;
pub mod modbus;
pub mod registers;
pub mod resilience;
pub mod store;
pub mod write_through;
