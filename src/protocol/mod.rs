// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the coldwatch project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register decoding for the field protocol.
//!
//! Sensors expose pre-scaled engineering values as big-endian IEEE 754
//! floats spread over two consecutive 16-bit holding registers, high word
//! first. Decoding is a pure function; anything that does not reassemble
//! into a plausible value is a [`DecodeError`] and never reaches the
//! reading store.

pub mod grouper;

pub use grouper::{group_sensors, RegisterGroup};

use thiserror::Error;

/// Values beyond this magnitude cannot be genuine: readings are pre-scaled
/// engineering units (degrees Celsius / percent relative humidity).
pub const DECODE_SANITY_BOUND: f32 = 100.0;

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("not enough registers to decode (got {0}, need 2)")]
    NotEnoughRegisters(usize),

    #[error("register pattern decodes to a non-finite value")]
    NonFinite,

    #[error("implausible value after decoding: {0}")]
    OutOfBounds(f32),
}

/// Reassemble two 16-bit registers into an f32, high register first.
pub fn decode_registers(registers: &[u16]) -> Result<f32, DecodeError> {
    if registers.len() < 2 {
        return Err(DecodeError::NotEnoughRegisters(registers.len()));
    }

    let bits = ((registers[0] as u32) << 16) | registers[1] as u32;
    let value = f32::from_bits(bits);

    if !value.is_finite() {
        return Err(DecodeError::NonFinite);
    }
    if value.abs() > DECODE_SANITY_BOUND {
        return Err(DecodeError::OutOfBounds(value));
    }

    Ok(value)
}

/// Split an f32 into its two registers, high word first. Inverse of
/// [`decode_registers`]; used by the test fixtures and the mock device.
pub fn encode_registers(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, bits as u16]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_round_trip_within_bounds() {
        for value in [-49.5f32, -0.125, 0.0, 21.375, 99.875] {
            let registers = encode_registers(value);
            assert_eq!(decode_registers(&registers), Ok(value));
        }
    }

    #[test]
    fn rejects_short_input() {
        assert_eq!(
            decode_registers(&[0x41a8]),
            Err(DecodeError::NotEnoughRegisters(1))
        );
        assert_eq!(decode_registers(&[]), Err(DecodeError::NotEnoughRegisters(0)));
    }

    #[test]
    fn rejects_non_finite_patterns() {
        let nan = encode_registers(f32::NAN);
        assert_eq!(decode_registers(&nan), Err(DecodeError::NonFinite));

        let inf = encode_registers(f32::INFINITY);
        assert_eq!(decode_registers(&inf), Err(DecodeError::NonFinite));
    }

    #[test]
    fn rejects_values_beyond_sanity_bound() {
        let registers = encode_registers(1500.0);
        assert!(matches!(
            decode_registers(&registers),
            Err(DecodeError::OutOfBounds(_))
        ));
    }

    #[test]
    fn extra_registers_are_ignored() {
        let mut registers = encode_registers(-18.25).to_vec();
        registers.push(0xdead);
        assert_eq!(decode_registers(&registers), Ok(-18.25));
    }
}
