//! Deterministic fixed-point helpers for monetary amounts.
//!
//! Every amount is an unsigned integer scaled by `SCALE = 1e18`, so that
//! `1.0 == 1_000_000_000_000_000_000`. Products are formed in a 256-bit-wide
//! intermediate before dividing, and every division truncates toward zero.
//! Truncation guarantees that parts computed from a whole never sum to more
//! than the whole; the leftover dust is routed by the caller.

use core::fmt;
use num_bigint::BigUint;
use num_traits::ToPrimitive;

// =============================================================================
// UNITS
// =============================================================================

/// Monetary quantity in scaled units.
pub type Amount = u128;

/// Basis points (1 bps = 0.01%).
pub type Bps = u32;

/// Seconds since the Unix epoch.
pub type Timestamp = u64;

/// Scale applied to all amounts and per-token rates (1e18 == 1.0).
pub const SCALE: u128 = 1_000_000_000_000_000_000;

/// Number of decimals represented by [`SCALE`].
pub const DECIMALS: u32 = 18;

/// Basis-point denominator (10_000 bps == 100%).
pub const BPS_DENOMINATOR: Bps = 10_000;

/// Scaled value of a single basis point.
const SCALE_PER_BPS: u128 = SCALE / BPS_DENOMINATOR as u128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MathError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("result does not fit in 128 bits")]
    Overflow,
    #[error("invalid decimal amount: {0}")]
    InvalidDecimal(String),
}

// =============================================================================
// CORE OPERATIONS
// =============================================================================

/// `floor(a * b / d)` with a 256-bit-wide intermediate.
///
/// Fails with [`MathError::DivisionByZero`] when `d == 0` and with
/// [`MathError::Overflow`] when the quotient itself exceeds `u128`.
#[inline]
pub fn mul_div(a: u128, b: u128, d: u128) -> Result<u128, MathError> {
    if d == 0 {
        return Err(MathError::DivisionByZero);
    }
    if let Some(product) = a.checked_mul(b) {
        return Ok(product / d);
    }

    let wide = BigUint::from(a) * BigUint::from(b) / BigUint::from(d);
    wide.to_u128().ok_or(MathError::Overflow)
}

/// `floor(a * b / SCALE)`: multiply two scaled values.
#[inline]
pub fn mul_scaled(a: u128, b: u128) -> Result<u128, MathError> {
    mul_div(a, b, SCALE)
}

/// `floor(a * SCALE / b)`: divide two scaled values.
#[inline]
pub fn div_scaled(a: u128, b: u128) -> Result<u128, MathError> {
    mul_div(a, SCALE, b)
}

/// Convert basis points into a scaled ratio (`10_000 bps == SCALE`).
#[inline]
pub const fn bps_to_scaled(bps: Bps) -> u128 {
    bps as u128 * SCALE_PER_BPS
}

/// Share of `amount` at `bps`, truncated toward zero.
#[inline]
pub fn apply_bps(amount: Amount, bps: Bps) -> Result<Amount, MathError> {
    mul_scaled(amount, bps_to_scaled(bps))
}

/// Checked addition reported as a [`MathError`].
#[inline]
pub fn checked_add(a: u128, b: u128) -> Result<u128, MathError> {
    a.checked_add(b).ok_or(MathError::Overflow)
}

/// Whole tokens to scaled units (saturating).
#[inline]
pub const fn tokens(whole: u128) -> Amount {
    whole.saturating_mul(SCALE)
}

// =============================================================================
// FORMATTING AND PARSING
// =============================================================================

/// Format a scaled amount with up to 18 decimal places without using floats.
pub fn format_scaled(value: Amount) -> ScaledDisplay {
    ScaledDisplay { value }
}

/// Display helper returned by [`format_scaled`].
pub struct ScaledDisplay {
    value: Amount,
}

impl fmt::Display for ScaledDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.value / SCALE;
        let fractional = self.value % SCALE;

        if fractional == 0 {
            write!(f, "{}", whole)
        } else {
            let mut frac_str = format!("{fractional:018}");
            while frac_str.ends_with('0') {
                frac_str.pop();
            }
            write!(f, "{}.{}", whole, frac_str)
        }
    }
}

/// Parse a decimal string such as `"95.5"` into scaled units.
///
/// More than 18 fractional digits is rejected rather than rounded.
pub fn parse_scaled(input: &str) -> Result<Amount, MathError> {
    let invalid = || MathError::InvalidDecimal(input.to_string());
    let trimmed = input.trim();
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if fraction.len() > DECIMALS as usize {
        return Err(invalid());
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(fraction) {
        return Err(invalid());
    }

    let whole_units: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let mut frac_units: u128 = 0;
    if !fraction.is_empty() {
        let padded = format!("{fraction:0<18}");
        frac_units = padded.parse().map_err(|_| invalid())?;
    }

    whole_units
        .checked_mul(SCALE)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or(MathError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mul_div_basic() {
        assert_eq!(mul_div(100, 50, 100), Ok(50));
        assert_eq!(mul_div(1000, 1, 3), Ok(333));
        assert_eq!(mul_div(100, 50, 0), Err(MathError::DivisionByZero));
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // u128::MAX * 2 overflows 128 bits but the quotient fits.
        assert_eq!(mul_div(u128::MAX, 2, 4), Ok(u128::MAX / 2));
        assert_eq!(mul_div(u128::MAX, u128::MAX, u128::MAX), Ok(u128::MAX));
        assert_eq!(mul_div(u128::MAX, 3, 2), Err(MathError::Overflow));
    }

    #[test]
    fn test_mul_and_div_scaled() {
        assert_eq!(mul_scaled(tokens(10), SCALE / 2), Ok(tokens(5)));
        assert_eq!(div_scaled(tokens(1), tokens(4)), Ok(SCALE / 4));
        assert_eq!(div_scaled(1, 0), Err(MathError::DivisionByZero));
    }

    #[test]
    fn test_apply_bps() {
        assert_eq!(apply_bps(tokens(100), 450), Ok(4_500_000_000_000_000_000));
        assert_eq!(apply_bps(tokens(100), 0), Ok(0));
        assert_eq!(apply_bps(tokens(100), BPS_DENOMINATOR), Ok(tokens(100)));
        // 1 unit at 50% truncates to zero.
        assert_eq!(apply_bps(1, 5_000), Ok(0));
    }

    #[test]
    fn test_scaled_display() {
        assert_eq!(format!("{}", format_scaled(0)), "0");
        assert_eq!(format!("{}", format_scaled(tokens(95) + SCALE / 2)), "95.5");
        assert_eq!(format!("{}", format_scaled(1)), "0.000000000000000001");
    }

    #[test]
    fn test_parse_scaled() {
        assert_eq!(parse_scaled("95.5"), Ok(tokens(95) + SCALE / 2));
        assert_eq!(parse_scaled("8888"), Ok(tokens(8888)));
        assert_eq!(parse_scaled(".25"), Ok(SCALE / 4));
        assert!(parse_scaled("1.0000000000000000001").is_err());
        assert!(parse_scaled("abc").is_err());
        assert!(parse_scaled("").is_err());
        assert!(parse_scaled("-1").is_err());
    }

    proptest! {
        #[test]
        fn mul_div_matches_wide_reference(a in any::<u128>(), b in any::<u128>(), d in 1u128..=u128::MAX) {
            let reference = BigUint::from(a) * BigUint::from(b) / BigUint::from(d);
            match mul_div(a, b, d) {
                Ok(value) => prop_assert_eq!(BigUint::from(value), reference),
                Err(MathError::Overflow) => prop_assert!(reference.to_u128().is_none()),
                Err(other) => prop_assert!(false, "unexpected error {other:?}"),
            }
        }

        #[test]
        fn bps_parts_never_exceed_whole(amount in 0u128..=u128::MAX / 2, a in 0u32..=5_000, b in 0u32..=5_000) {
            let left = apply_bps(amount, a).expect("fits");
            let right = apply_bps(amount, b).expect("fits");
            prop_assert!(left + right <= amount);
        }

        #[test]
        fn display_parse_roundtrip(value in any::<u64>(), frac in 0u128..SCALE) {
            let scaled = value as u128 * SCALE + frac;
            let text = format!("{}", format_scaled(scaled));
            prop_assert_eq!(parse_scaled(&text), Ok(scaled));
        }
    }
}
