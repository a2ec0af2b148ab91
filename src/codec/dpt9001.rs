// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! DPT 9.001 two-byte float codec
//!
//! ## Binary Layout
//!
//! | Bit(s) | Meaning |
//! |--------|---------|
//! | 15 | Sign of the mantissa |
//! | 14-11 | Exponent (0-15) |
//! | 10-0 | Mantissa magnitude (11 bits) |
//!
//! The decoded value is `mantissa × 0.01 × 2^exponent`. Negative mantissas are
//! stored offset by 2048 with the sign bit set, so the representable domain is
//! `[-671088.64, 670760.96]`.
//!
//! Resolution is 0.01 at exponent 0 and doubles with every exponent step, which
//! means large values lose precision during encoding. Room temperatures
//! (roughly -50 to 100 °C) always encode with an exponent of 0 to 3.

use log::trace;
use thiserror::Error;

/// Smallest value that can be encoded.
pub const DPT9001_MIN_VALUE: f64 = -671_088.64;

/// Largest value that can be encoded.
pub const DPT9001_MAX_VALUE: f64 = 670_760.96;

/// Raw word the controller reports for uninitialised or missing sensor data.
///
/// It decodes to [`DPT9001_MAX_VALUE`].
pub const DPT9001_INVALID_RAW: u16 = 0x7FFF;

const MANTISSA_MAX: i64 = 2047;
const MANTISSA_MIN: i64 = -2048;
const EXPONENT_MAX: u8 = 15;

/// Errors raised by the DPT 9.001 codec. They are always surfaced to the caller
/// and never clamped.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// NaN or an infinity was passed to [`encode`].
    #[error("cannot encode non-finite value {0}")]
    NonFinite(f64),

    /// The value lies outside `[DPT9001_MIN_VALUE, DPT9001_MAX_VALUE]`.
    #[error("value {0} is out of range for DPT 9001 encoding")]
    OutOfRange(f64),

    /// Normalising the mantissa required an exponent above 15.
    #[error("value {0} overflows the 4-bit DPT 9001 exponent")]
    ExponentOverflow(f64),

    /// A raw word wider than 16 bits was passed to [`decode_checked`].
    #[error("raw value {0} does not fit in a 16-bit register")]
    RawOutOfRange(u32),
}

/// Encode a floating point value into a DPT 9.001 register word.
///
/// ### Parameters
///
/// * `value` - The value to encode, e.g. a temperature in °C
///
/// ### Returns
///
/// The 16-bit register word, or a [`CodecError`] if the value is NaN,
/// infinite or outside the representable domain.
pub fn encode(value: f64) -> Result<u16, CodecError> {
    if !value.is_finite() {
        return Err(CodecError::NonFinite(value));
    }
    if !(DPT9001_MIN_VALUE..=DPT9001_MAX_VALUE).contains(&value) {
        return Err(CodecError::OutOfRange(value));
    }

    let mut mantissa = (value * 100.0).round() as i64;
    let mut exponent: u8 = 0;

    while !(MANTISSA_MIN..=MANTISSA_MAX).contains(&mantissa) {
        // Floor division, so negative mantissas round towards -inf
        mantissa = mantissa.div_euclid(2);
        exponent += 1;
        if exponent > EXPONENT_MAX {
            return Err(CodecError::ExponentOverflow(value));
        }
    }

    let mut high: u8 = (exponent & 0x0F) << 3;
    if mantissa < 0 {
        mantissa += 2048;
        high |= 0x80;
    }
    high |= ((mantissa >> 8) & 0x07) as u8;
    let low = (mantissa & 0xFF) as u8;

    let raw = u16::from_be_bytes([high, low]);
    trace!("DPT 9001 encode {} -> 0x{:04X} (exponent {})", value, raw, exponent);
    Ok(raw)
}

/// Decode a DPT 9.001 register word into a floating point value.
///
/// The result is rounded to two decimal places. Every 16-bit word decodes to
/// a finite value, so this function cannot fail.
pub fn decode(raw: u16) -> f64 {
    let [high, low] = raw.to_be_bytes();

    let mut mantissa = (i32::from(high & 0x07) << 8) | i32::from(low);
    if high & 0x80 != 0 {
        mantissa -= 2048;
    }
    let exponent = (high >> 3) & 0x0F;

    let value = f64::from(mantissa) * 0.01 * f64::from(1u32 << exponent);
    (value * 100.0).round() / 100.0
}

/// Decode a raw value that arrives as a wider integer.
///
/// Values above `0xFFFF` are rejected with [`CodecError::RawOutOfRange`].
pub fn decode_checked(raw: u32) -> Result<f64, CodecError> {
    u16::try_from(raw)
        .map(decode)
        .map_err(|_| CodecError::RawOutOfRange(raw))
}

/// Check whether a raw word is the controller's "no data" marker.
pub fn is_invalid_marker(raw: u16) -> bool {
    raw == DPT9001_INVALID_RAW
}

/// Exponent chosen by [`encode`] for a raw word.
pub(crate) fn exponent_of(raw: u16) -> u8 {
    ((raw >> 11) & 0x0F) as u8
}
