//! Shared fixed-point numeric semantics
//!
//! Every encoder family defers to this module for the exact arithmetic the
//! engine performs: saturating stores, the 16-bit low/high split
//! representation, the raw hardware shifter, narrow-float (bf16) conversion,
//! and multiply-shift requantization.
//!
//! Overflow is never an error anywhere in this module. Saturation and
//! wraparound are the defined outcomes.

use half::bf16;

/// Saturate a wide accumulator to signed 8-bit range
#[inline]
pub fn sat_i8(v: i64) -> i8 {
    v.clamp(i8::MIN as i64, i8::MAX as i64) as i8
}

/// Saturate a wide accumulator to unsigned 8-bit range
#[inline]
pub fn sat_u8(v: i64) -> u8 {
    v.clamp(0, u8::MAX as i64) as u8
}

/// Saturate a wide accumulator to signed 16-bit range
#[inline]
pub fn sat_i16(v: i64) -> i16 {
    v.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

/// Clamp negative values to zero (post-op ReLU)
#[inline]
pub fn relu(v: i64) -> i64 {
    v.max(0)
}

/// Split a signed 16-bit value into its low and high byte planes
///
/// The low plane holds the least-significant 8 bits as raw bits; the high
/// plane holds the sign-carrying most-significant 8 bits.
#[inline]
pub fn split16(v: i16) -> (u8, i8) {
    ((v & 0xFF) as u8, (v >> 8) as i8)
}

/// Reconstruct a signed 16-bit value from its low and high byte planes
///
/// Exact inverse of [`split16`]: `join16(split16(v)) == v` for all `v`.
#[inline]
pub fn join16(low: u8, high: i8) -> i16 {
    (((high as i16) << 8) as u16 | low as u16) as i16
}

/// Raw hardware shifter on a 16-bit value
///
/// Negative `bits` is an arithmetic (sign-extending) right shift, clamped at
/// the full 15-bit travel; positive `bits` is a left shift that wraps past
/// the format width, with the amount taken modulo 16. A left shift by the
/// full width is therefore the identity, not zero, matching the physical
/// shifter's amount register.
#[inline]
pub fn arith_shift16(v: i16, bits: i8) -> i16 {
    if bits < 0 {
        let amount = (-(bits as i32)).min(15) as u32;
        v >> amount
    } else {
        ((v as u16).wrapping_shl(bits as u32)) as i16
    }
}

/// Arithmetic right shift with round-half-away-from-zero
///
/// This is the rounding the engine applies for the `rshift_bits` knob of the
/// arithmetic encoders. A zero shift is the identity.
#[inline]
pub fn round_right_shift(v: i64, bits: u8) -> i64 {
    if bits == 0 {
        return v;
    }
    let bits = bits.min(62) as u32;
    let half = 1i64 << (bits - 1);
    if v >= 0 {
        (v + half) >> bits
    } else {
        -((-v + half) >> bits)
    }
}

/// Left shift with wraparound on a wide accumulator (the `lshift_bits` knob)
#[inline]
pub fn left_shift(v: i64, bits: u8) -> i64 {
    v.wrapping_shl(bits as u32)
}

/// Multiply-shift requantization of a wide accumulator
///
/// `result = round((acc * multiplier) >> shift)` with round-half-away-from-
/// zero; the caller saturates the result to the destination format.
#[inline]
pub fn requantize(acc: i64, multiplier: i32, rshift: u8) -> i64 {
    round_right_shift(acc.wrapping_mul(multiplier as i64), rshift)
}

/// Convert an `f32` to the narrow float format by mantissa truncation
///
/// The engine's narrow float is bf16: sign, 8 exponent bits, 7 mantissa
/// bits. Conversion drops the low 16 bits of the `f32` image without
/// rounding.
#[inline]
pub fn f32_to_bf16(v: f32) -> bf16 {
    bf16::from_bits((v.to_bits() >> 16) as u16)
}

/// Widen a narrow float to `f32` by zero-extending the mantissa
#[inline]
pub fn bf16_to_f32(v: bf16) -> f32 {
    f32::from_bits((v.to_bits() as u32) << 16)
}
