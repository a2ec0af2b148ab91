// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Named operating modes and states
//!
//! Raw register words for the global mode, the global state and zone states
//! are small integers. The facade shows them by name, so both directions are
//! provided here. Name parsing ignores case and treats `-` and `_` as spaces,
//! so `"Manual-Heating"` and `"manual heating"` are the same mode.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A raw value or name with no matching variant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("unknown {kind} value {value}")]
    UnknownValue { kind: &'static str, value: u16 },

    #[error("unknown {kind} name '{name}'")]
    UnknownName { kind: &'static str, name: String },
}

fn normalize(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

macro_rules! register_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($variant:ident = $value:literal => $label:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Raw register word for this variant.
            pub fn value(self) -> u16 {
                match self {
                    $(Self::$variant => $value),+
                }
            }

            /// Human-readable name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }
        }

        impl TryFrom<u16> for $name {
            type Error = StateError;

            fn try_from(value: u16) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    _ => Err(StateError::UnknownValue { kind: $kind, value }),
                }
            }
        }

        impl FromStr for $name {
            type Err = StateError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match normalize(s).as_str() {
                    $($label => Ok(Self::$variant),)+
                    _ => Err(StateError::UnknownName {
                        kind: $kind,
                        name: s.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

register_enum! {
    /// Global operating mode (register 1).
    OperationMode, "operation mode" {
        Off = 0 => "off",
        Auto = 1 => "auto",
        Heating = 2 => "heating",
        Cooling = 3 => "cooling",
        ManualHeating = 4 => "manual heating",
        ManualCooling = 5 => "manual cooling",
    }
}

register_enum! {
    /// Global operating state (register 2).
    OperationState, "operation state" {
        Off = 0 => "off",
        Presence = 1 => "presence",
        Away = 2 => "away",
        Standby = 3 => "standby",
        Scheduled = 4 => "scheduled",
        Party = 5 => "party",
        Holiday = 6 => "holiday",
    }
}

register_enum! {
    /// Per-zone state (zone base register).
    ZoneState, "zone state" {
        Off = 0 => "off",
        Presence = 1 => "presence",
        Away = 2 => "away",
        Standby = 3 => "standby",
        Scheduled = 4 => "scheduled",
    }
}
