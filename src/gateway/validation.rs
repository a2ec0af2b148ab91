// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Plausibility checks on freshly read bus values
//!
//! The controller reports uninitialised registers as 0 (or `0x7FFF` for
//! DPT 9.001 sensors). Such readings must not overwrite a good persisted value.
//!
//! | Register class | Accepted raw values |
//! |----------------|---------------------|
//! | global mode, global state | non-zero |
//! | zone state | non-zero |
//! | zone setpoint | decodes to 5-40 °C |
//! | zone / outside temperature | not 0, not `0x7FFF`, decodes to -50-60 °C |
//! | zone humidity | non-zero |
//! | anything else | any |

use std::fmt;

use crate::codec::{decode, is_invalid_marker};
use crate::registers::{classify, RegisterKind};

pub const SETPOINT_MIN_CELSIUS: f64 = 5.0;
pub const SETPOINT_MAX_CELSIUS: f64 = 40.0;
pub const TEMPERATURE_MIN_CELSIUS: f64 = -50.0;
pub const TEMPERATURE_MAX_CELSIUS: f64 = 60.0;

/// Why a reading was rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InvalidReading {
    Zero,
    NoDataMarker,
    OutOfRange { value: f64, min: f64, max: f64 },
}

impl fmt::Display for InvalidReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReading::Zero => f.write_str("zero (uninitialised)"),
            InvalidReading::NoDataMarker => f.write_str("0x7FFF no-data marker"),
            InvalidReading::OutOfRange { value, min, max } => {
                write!(f, "{} outside [{}, {}]", value, min, max)
            }
        }
    }
}

/// Check a raw value read from `addr`.
pub fn validate(addr: u16, raw: u16) -> Result<(), InvalidReading> {
    match classify(addr) {
        RegisterKind::GlobalMode
        | RegisterKind::GlobalState
        | RegisterKind::ZoneState
        | RegisterKind::ZoneHumidity => non_zero(raw),
        RegisterKind::ZoneSetpoint => {
            in_range(decode(raw), SETPOINT_MIN_CELSIUS, SETPOINT_MAX_CELSIUS)
        }
        RegisterKind::ZoneTemperature | RegisterKind::OutsideTemperature => {
            non_zero(raw)?;
            if is_invalid_marker(raw) {
                return Err(InvalidReading::NoDataMarker);
            }
            in_range(decode(raw), TEMPERATURE_MIN_CELSIUS, TEMPERATURE_MAX_CELSIUS)
        }
        RegisterKind::MixedGroup
        | RegisterKind::Dehumidifier
        | RegisterKind::Pump
        | RegisterKind::Other => Ok(()),
    }
}

fn non_zero(raw: u16) -> Result<(), InvalidReading> {
    if raw == 0 {
        Err(InvalidReading::Zero)
    } else {
        Ok(())
    }
}

fn in_range(value: f64, min: f64, max: f64) -> Result<(), InvalidReading> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(InvalidReading::OutOfRange { value, min, max })
    }
}
