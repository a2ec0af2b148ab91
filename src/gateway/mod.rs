// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register gateway
//!
//! Ties the heating bus, the circuit breaker, the register store and the
//! write-through mirror together behind [`GatewayCore`].

pub mod bus;
mod service;
pub mod validation;

pub use service::{GatewayCore, GatewayError, GatewayStatus, SyncReport, SYNC_BATCH_SIZE};
pub use bus::{BusError, MemoryBus, ModbusBus, RegisterBus};
pub use validation::{validate, InvalidReading};
