//! Conversions between raw on-chain integers and decimal amounts.
//!
//! Token balances arrive as `U256` scaled by the token's decimals. All
//! decision logic works on [`Decimal`]; these helpers are the only place
//! the two representations meet.

use alloy::primitives::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// WAD constant: 1e18 for 18-decimal fixed-point arithmetic
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Basis points denominator (10000 = 100%)
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Largest mantissa a `Decimal` can hold (2^96 - 1).
const MAX_MANTISSA: U256 = U256::from_limbs([u64::MAX, u32::MAX as u64, 0, 0]);

/// Largest scale a `Decimal` can hold.
const MAX_SCALE: u32 = 28;

/// 10^exp as U256.
#[inline]
pub fn pow10(exp: u32) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

/// Convert a raw token amount into a decimal amount.
///
/// Low-order digits beyond what a `Decimal` can represent are truncated.
/// Returns `None` only for integer parts above ~7.9e28.
pub fn to_decimal(raw: U256, decimals: u8) -> Option<Decimal> {
    let mut mantissa = raw;
    let mut scale = u32::from(decimals);

    while scale > MAX_SCALE || mantissa > MAX_MANTISSA {
        if scale == 0 {
            return None;
        }
        mantissa /= U256::from(10u64);
        scale -= 1;
    }

    let mantissa: u128 = mantissa.to();
    Decimal::try_from_i128_with_scale(mantissa as i128, scale)
        .ok()
        .map(|d| d.normalize())
}

/// Convert a decimal amount into raw token units, truncating toward zero.
///
/// Returns `None` for negative amounts.
pub fn to_raw(amount: Decimal, decimals: u8) -> Option<U256> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return None;
    }
    let decimals = u32::from(decimals);
    let truncated = amount.round_dp_with_strategy(decimals.min(MAX_SCALE), RoundingStrategy::ToZero);
    let mantissa = truncated.mantissa().to_u128()?;
    let scale = truncated.scale();
    Some(U256::from(mantissa) * pow10(decimals - scale))
}

/// 1e18-scaled fixed point to decimal.
pub fn wad_to_decimal(raw: U256) -> Option<Decimal> {
    to_decimal(raw, 18)
}

/// 10^exp as a decimal, for |exp| <= 28.
pub fn pow10_decimal(exp: i32) -> Option<Decimal> {
    let magnitude = exp.unsigned_abs();
    if magnitude > MAX_SCALE {
        return None;
    }
    if exp >= 0 {
        Some(Decimal::from_i128_with_scale(10i128.pow(magnitude), 0))
    } else {
        Some(Decimal::from_i128_with_scale(1, magnitude))
    }
}

/// Basis points to a fraction (8000 -> 0.8).
pub fn bps_to_fraction(bps: u64) -> Decimal {
    Decimal::from(bps) / Decimal::from(BPS_DENOMINATOR)
}
