//! Constant-product pricing

use alloy::primitives::U256;

use super::arith::{add, div, mul, sub};
use super::FeeFraction;
use crate::error::QuoteError;

/// `floor(in * (n - s) * R_out / (R_in * n + in * (n - s)))`
pub fn get_amount_out(
    amount_in: U256,
    reserve_in: U256,
    reserve_out: U256,
    fee: FeeFraction,
) -> Result<U256, QuoteError> {
    if reserve_in.is_zero() || reserve_out.is_zero() {
        return Err(QuoteError::InsufficientLiquidity);
    }
    let amount_in_with_fee = mul(amount_in, U256::from(fee.keep()))?;
    let numerator = mul(amount_in_with_fee, reserve_out)?;
    let denominator = add(mul(reserve_in, U256::from(fee.n))?, amount_in_with_fee)?;
    div(numerator, denominator)
}

/// Smallest input that yields at least `amount_out`
pub fn get_amount_in(
    amount_out: U256,
    reserve_in: U256,
    reserve_out: U256,
    fee: FeeFraction,
) -> Result<U256, QuoteError> {
    if amount_out >= reserve_out {
        return Err(QuoteError::InsufficientLiquidity);
    }
    let numerator = mul(mul(reserve_in, amount_out)?, U256::from(fee.n))?;
    let denominator = mul(sub(reserve_out, amount_out)?, U256::from(fee.keep()))?;
    Ok(div(numerator, denominator)? + U256::from(1u64))
}

/// Reserves after a swap, as `(reserve_in, reserve_out, amount_out)`
pub fn apply_swap(
    amount_in: U256,
    reserve_in: U256,
    reserve_out: U256,
    fee: FeeFraction,
) -> Result<(U256, U256, U256), QuoteError> {
    let amount_out = get_amount_out(amount_in, reserve_in, reserve_out, fee)?;
    Ok((add(reserve_in, amount_in)?, sub(reserve_out, amount_out)?, amount_out))
}

/// Input that moves the spot price by `slippage_bps`, ignoring fees.
///
/// Spot price is `R_out / R_in`; after adding `dx` it falls to
/// `R_out * R_in / (R_in + dx)^2`, so `dx = R_in * (1 / sqrt(1 - slippage) - 1)`.
pub fn amount_in_for_slippage(reserve_in: U256, slippage_bps: u64) -> Result<U256, QuoteError> {
    if slippage_bps == 0 || slippage_bps >= 10_000 {
        return Err(QuoteError::OutOfBounds("slippage must be within (0, 10000) bps"));
    }
    let scale = U256::from(10u64).pow(U256::from(36u64));
    let remaining = U256::from(10_000 - slippage_bps);
    // sqrt(1e36 * 1e4 / remaining) / 1e18 == 1 / sqrt(1 - slippage)
    let inv_sqrt = super::arith::isqrt(div(mul(scale, U256::from(10_000u64))?, remaining)?);
    let one = U256::from(10u64).pow(U256::from(18u64));
    div(mul(reserve_in, sub(inv_sqrt, one)?)?, one)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn test_reference_vector() {
        let out = get_amount_out(u(1_000), u(1_000_000), u(2_000_000), FeeFraction::default()).unwrap();
        let expected = (1_000u128 * 997 * 2_000_000) / (1_000_000u128 * 1000 + 1_000 * 997);
        assert_eq!(out, U256::from(expected));
    }

    #[test]
    fn test_output_strictly_increasing_and_below_fee_free() {
        let reserve_in = u(50_000_000);
        let reserve_out = u(80_000_000);
        let mut previous = U256::ZERO;
        for step in 1..200u64 {
            let amount_in = u(step * 10_000);
            let out = get_amount_out(amount_in, reserve_in, reserve_out, FeeFraction::default()).unwrap();
            assert!(out > previous);
            let fee_free = amount_in * reserve_out / (reserve_in + amount_in);
            assert!(out < fee_free);
            previous = out;
        }
    }

    #[test]
    fn test_pancake_fee_fraction() {
        let fee = FeeFraction::new(10000, 25);
        let out = get_amount_out(u(1_000_000), u(1_000_000_000), u(1_000_000_000), fee).unwrap();
        // 1e6 * 9975 * 1e9 / (1e9 * 1e4 + 1e6 * 9975)
        assert_eq!(out, u(996_505));
    }

    #[test]
    fn test_amount_in_inverts_amount_out() {
        let fee = FeeFraction::default();
        let amount_in = get_amount_in(u(5_000), u(1_000_000), u(2_000_000), fee).unwrap();
        let out = get_amount_out(amount_in, u(1_000_000), u(2_000_000), fee).unwrap();
        assert!(out >= u(5_000));
        let short = get_amount_out(amount_in - u(1), u(1_000_000), u(2_000_000), fee).unwrap();
        assert!(short < u(5_000));
    }

    #[test]
    fn test_apply_swap_preserves_k_growth() {
        let (r_in, r_out, out) = apply_swap(u(10_000), u(1_000_000), u(1_000_000), FeeFraction::default()).unwrap();
        assert_eq!(r_in, u(1_010_000));
        assert_eq!(r_out, u(1_000_000) - out);
        assert!(r_in * r_out >= u(1_000_000) * u(1_000_000));
    }

    #[test]
    fn test_empty_reserves() {
        let err = get_amount_out(u(1), U256::ZERO, u(1), FeeFraction::default()).unwrap_err();
        assert_eq!(err, QuoteError::InsufficientLiquidity);
    }

    #[test]
    fn test_amount_in_for_slippage() {
        // 1% price impact needs roughly 0.5% of the input reserve
        let dx = amount_in_for_slippage(u(1_000_000_000), 100).unwrap();
        assert!(dx > u(5_000_000) && dx < u(5_100_000));
    }
}
