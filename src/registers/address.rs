// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Address computation for zones, mixed groups and devices
//!
//! All functions here are pure. Identifier validation happens before any
//! address is computed, so an `Err` never touches the bus or the store.

use thiserror::Error;

use super::{
    FILTERED_OUTSIDE_TEMPERATURE_ADDR, GLOBAL_OP_MODE_ADDR, GLOBAL_OP_STATE_ADDR,
    OUTSIDE_TEMPERATURE_ADDR, REGISTER_COUNT,
};

/// Multiplier applied to `base_id - 1`.
pub const ZONE_BASE_ID_MULTIPLIER: u16 = 1200;
/// Multiplier applied to `zone_id`.
pub const ZONE_ID_MULTIPLIER: u16 = 100;
/// Zone state offset (YY00).
pub const ZONE_STATE_OFFSET: u16 = 0;
/// Zone setpoint offset (YY01).
pub const ZONE_SETPOINT_OFFSET: u16 = 1;
/// Zone temperature offset (YY02).
pub const ZONE_TEMPERATURE_OFFSET: u16 = 2;
/// Zone relative humidity offset (YY10).
pub const ZONE_HUMIDITY_OFFSET: u16 = 10;

/// Base registers of mixed groups 1, 2 and 3.
pub const MIXED_GROUP_BASE: [u16; 3] = [10, 14, 18];
/// Mixing valve opening offset.
pub const MIXED_GROUP_VALVE_OFFSET: u16 = 0;
/// Pump state offset.
pub const MIXED_GROUP_PUMP_OFFSET: u16 = 1;
/// Flow temperature offset.
pub const MIXED_GROUP_FLOW_TEMP_OFFSET: u16 = 2;
/// Return temperature offset.
pub const MIXED_GROUP_RETURN_TEMP_OFFSET: u16 = 3;

/// Dehumidifier `n` is stored at `n + DEHUMIDIFIER_ADDR_OFFSET`.
pub const DEHUMIDIFIER_ADDR_OFFSET: u16 = 21;
/// Extra pump `n` is stored at `n + PUMP_ADDR_OFFSET`.
pub const PUMP_ADDR_OFFSET: u16 = 30;

const MAX_BASE_ID: u8 = 4;
const MAX_ZONE_ID: u8 = 12;
const MAX_DEHUMIDIFIER_ID: u8 = 9;
const MAX_PUMP_ID: u8 = 5;

/// Rejected identifiers or register ranges.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base id {0} (expected 1-4)")]
    InvalidBaseId(u8),

    #[error("invalid zone id {0} (expected 1-12)")]
    InvalidZoneId(u8),

    #[error("invalid mixed group id {0} (expected 1-3)")]
    InvalidMixedGroupId(u8),

    #[error("invalid dehumidifier id {0} (expected 1-9)")]
    InvalidDehumidifierId(u8),

    #[error("invalid pump id {0} (expected 1-5)")]
    InvalidPumpId(u8),

    #[error("register range starting at {start} with {count} registers is outside 0-65535")]
    RangeOutOfBounds { start: u16, count: usize },
}

/// Base register of a zone.
///
/// ### Parameters
///
/// * `base_id` - Base station, 1 to 4
/// * `zone_id` - Zone on that base, 1 to 12
///
/// ### Returns
///
/// `(base_id - 1) * 1200 + zone_id * 100`, which is also the zone state register.
pub fn zone_address(base_id: u8, zone_id: u8) -> Result<u16, AddressError> {
    if !(1..=MAX_BASE_ID).contains(&base_id) {
        return Err(AddressError::InvalidBaseId(base_id));
    }
    if !(1..=MAX_ZONE_ID).contains(&zone_id) {
        return Err(AddressError::InvalidZoneId(zone_id));
    }
    Ok(u16::from(base_id - 1) * ZONE_BASE_ID_MULTIPLIER + u16::from(zone_id) * ZONE_ID_MULTIPLIER)
}

/// Base register of a mixed group (1, 2 or 3).
pub fn mixed_group_address(group_id: u8) -> Result<u16, AddressError> {
    match group_id {
        1..=3 => Ok(MIXED_GROUP_BASE[usize::from(group_id - 1)]),
        _ => Err(AddressError::InvalidMixedGroupId(group_id)),
    }
}

/// Register of dehumidifier 1-9.
pub fn dehumidifier_address(dehumidifier_id: u8) -> Result<u16, AddressError> {
    if !(1..=MAX_DEHUMIDIFIER_ID).contains(&dehumidifier_id) {
        return Err(AddressError::InvalidDehumidifierId(dehumidifier_id));
    }
    Ok(u16::from(dehumidifier_id) + DEHUMIDIFIER_ADDR_OFFSET)
}

/// Register of extra pump 1-5.
pub fn pump_address(pump_id: u8) -> Result<u16, AddressError> {
    if !(1..=MAX_PUMP_ID).contains(&pump_id) {
        return Err(AddressError::InvalidPumpId(pump_id));
    }
    Ok(u16::from(pump_id) + PUMP_ADDR_OFFSET)
}

/// Make sure `count` registers starting at `start` stay inside the 16-bit space.
///
/// An empty range is rejected as well.
pub fn check_range(start: u16, count: usize) -> Result<(), AddressError> {
    if count == 0 || usize::from(start) + count > REGISTER_COUNT {
        return Err(AddressError::RangeOutOfBounds { start, count });
    }
    Ok(())
}

/// The registers belonging to one zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneRegisters {
    base: u16,
}

impl ZoneRegisters {
    pub fn new(base_id: u8, zone_id: u8) -> Result<Self, AddressError> {
        Ok(Self {
            base: zone_address(base_id, zone_id)?,
        })
    }

    pub fn state(&self) -> u16 {
        self.base + ZONE_STATE_OFFSET
    }

    pub fn setpoint(&self) -> u16 {
        self.base + ZONE_SETPOINT_OFFSET
    }

    pub fn temperature(&self) -> u16 {
        self.base + ZONE_TEMPERATURE_OFFSET
    }

    pub fn humidity(&self) -> u16 {
        self.base + ZONE_HUMIDITY_OFFSET
    }
}

/// The registers belonging to one mixed group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixedGroupRegisters {
    base: u16,
}

impl MixedGroupRegisters {
    pub fn new(group_id: u8) -> Result<Self, AddressError> {
        Ok(Self {
            base: mixed_group_address(group_id)?,
        })
    }

    pub fn valve(&self) -> u16 {
        self.base + MIXED_GROUP_VALVE_OFFSET
    }

    pub fn pump(&self) -> u16 {
        self.base + MIXED_GROUP_PUMP_OFFSET
    }

    pub fn flow_temperature(&self) -> u16 {
        self.base + MIXED_GROUP_FLOW_TEMP_OFFSET
    }

    pub fn return_temperature(&self) -> u16 {
        self.base + MIXED_GROUP_RETURN_TEMP_OFFSET
    }
}

/// What a register address holds, as far as the gateway cares for validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    GlobalMode,
    GlobalState,
    OutsideTemperature,
    ZoneState,
    ZoneSetpoint,
    ZoneTemperature,
    ZoneHumidity,
    MixedGroup,
    Dehumidifier,
    Pump,
    Other,
}

/// Classify a register address.
pub fn classify(addr: u16) -> RegisterKind {
    match addr {
        GLOBAL_OP_MODE_ADDR => RegisterKind::GlobalMode,
        GLOBAL_OP_STATE_ADDR => RegisterKind::GlobalState,
        OUTSIDE_TEMPERATURE_ADDR | FILTERED_OUTSIDE_TEMPERATURE_ADDR => {
            RegisterKind::OutsideTemperature
        }
        10..=21 => RegisterKind::MixedGroup,
        22..=30 => RegisterKind::Dehumidifier,
        31..=35 => RegisterKind::Pump,
        _ => classify_zone(addr).unwrap_or(RegisterKind::Other),
    }
}

fn classify_zone(addr: u16) -> Option<RegisterKind> {
    (0..u16::from(MAX_BASE_ID)).find_map(|base_index| {
        let relative = addr.checked_sub(base_index * ZONE_BASE_ID_MULTIPLIER)?;
        let zone = relative / ZONE_ID_MULTIPLIER;
        if zone == 0 || zone > u16::from(MAX_ZONE_ID) {
            return None;
        }
        match relative % ZONE_ID_MULTIPLIER {
            ZONE_STATE_OFFSET => Some(RegisterKind::ZoneState),
            ZONE_SETPOINT_OFFSET => Some(RegisterKind::ZoneSetpoint),
            ZONE_TEMPERATURE_OFFSET => Some(RegisterKind::ZoneTemperature),
            ZONE_HUMIDITY_OFFSET => Some(RegisterKind::ZoneHumidity),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_address_bounds() {
        assert_eq!(zone_address(1, 1), Ok(100));
        assert_eq!(zone_address(2, 1), Ok(1300));
        assert_eq!(zone_address(4, 12), Ok(4800));
        assert_eq!(zone_address(0, 1), Err(AddressError::InvalidBaseId(0)));
        assert_eq!(zone_address(5, 1), Err(AddressError::InvalidBaseId(5)));
        assert_eq!(zone_address(1, 0), Err(AddressError::InvalidZoneId(0)));
        assert_eq!(zone_address(1, 13), Err(AddressError::InvalidZoneId(13)));
    }

    #[test]
    fn test_zone_registers() {
        let zone = ZoneRegisters::new(2, 1).unwrap();
        assert_eq!(zone.state(), 1300);
        assert_eq!(zone.setpoint(), 1301);
        assert_eq!(zone.temperature(), 1302);
        assert_eq!(zone.humidity(), 1310);
    }

    #[test]
    fn test_mixed_groups() {
        assert_eq!(mixed_group_address(1), Ok(10));
        assert_eq!(mixed_group_address(2), Ok(14));
        assert_eq!(mixed_group_address(3), Ok(18));
        assert_eq!(
            mixed_group_address(0),
            Err(AddressError::InvalidMixedGroupId(0))
        );
        assert_eq!(
            mixed_group_address(4),
            Err(AddressError::InvalidMixedGroupId(4))
        );

        let group = MixedGroupRegisters::new(3).unwrap();
        assert_eq!(group.valve(), 18);
        assert_eq!(group.pump(), 19);
        assert_eq!(group.flow_temperature(), 20);
        assert_eq!(group.return_temperature(), 21);
    }

    #[test]
    fn test_devices() {
        assert_eq!(dehumidifier_address(1), Ok(22));
        assert_eq!(dehumidifier_address(9), Ok(30));
        assert!(dehumidifier_address(10).is_err());
        assert_eq!(pump_address(1), Ok(31));
        assert_eq!(pump_address(5), Ok(35));
        assert_eq!(pump_address(0), Err(AddressError::InvalidPumpId(0)));
    }

    #[test]
    fn test_check_range() {
        assert!(check_range(0, 1).is_ok());
        assert!(check_range(65_535, 1).is_ok());
        assert!(check_range(0, 65_536).is_ok());
        assert!(check_range(65_535, 2).is_err());
        assert!(check_range(10, 0).is_err());
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(1), RegisterKind::GlobalMode);
        assert_eq!(classify(2), RegisterKind::GlobalState);
        assert_eq!(classify(7), RegisterKind::OutsideTemperature);
        assert_eq!(classify(19), RegisterKind::MixedGroup);
        assert_eq!(classify(25), RegisterKind::Dehumidifier);
        assert_eq!(classify(33), RegisterKind::Pump);
        assert_eq!(classify(100), RegisterKind::ZoneState);
        assert_eq!(classify(1301), RegisterKind::ZoneSetpoint);
        assert_eq!(classify(4802), RegisterKind::ZoneTemperature);
        assert_eq!(classify(1210), RegisterKind::ZoneHumidity);
        assert_eq!(classify(105), RegisterKind::Other);
        assert_eq!(classify(1250), RegisterKind::Other);
        assert_eq!(classify(60_000), RegisterKind::Other);
    }
}
