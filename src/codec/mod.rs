// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register value codecs
//!
//! The NEA SMART bus stores temperatures and setpoints as KNX DPT 9.001
//! two-byte floats inside 16-bit holding registers. This module converts
//! between those raw register words and `f64` values.
//!
//! ```
//! use neasmart_gateway::codec::{decode, encode};
//!
//! let raw = encode(21.5).unwrap();
//! assert!((decode(raw) - 21.5).abs() < 0.1);
//! ```

pub mod dpt9001;

pub use dpt9001::{
    decode, decode_checked, encode, is_invalid_marker, CodecError, DPT9001_INVALID_RAW,
    DPT9001_MAX_VALUE, DPT9001_MIN_VALUE,
};
