//! Exact-input swap step within a single initialized tick range

use alloy::primitives::U256;

use crate::dex::arith::{add, div, div_rounding_up, full_mul_div, full_mul_div_rounding_up, sub};
use crate::error::QuoteError;

const RESOLUTION: usize = 96;
const FEE_DENOMINATOR: u64 = 1_000_000;

fn q96() -> U256 {
    U256::from(1u64) << RESOLUTION
}

/// Result of one step of the swap loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapStep {
    pub sqrt_price_next_x96: U256,
    pub amount_in: U256,
    pub amount_out: U256,
    pub fee_amount: U256,
}

pub fn get_amount0_delta(
    sqrt_a: U256,
    sqrt_b: U256,
    liquidity: u128,
    round_up: bool,
) -> Result<U256, QuoteError> {
    let (lower, upper) = if sqrt_a > sqrt_b { (sqrt_b, sqrt_a) } else { (sqrt_a, sqrt_b) };
    if lower.is_zero() {
        return Err(QuoteError::DivisionByZero);
    }
    let numerator1 = U256::from(liquidity) << RESOLUTION;
    let numerator2 = upper - lower;
    if round_up {
        div_rounding_up(full_mul_div_rounding_up(numerator1, numerator2, upper)?, lower)
    } else {
        div(full_mul_div(numerator1, numerator2, upper)?, lower)
    }
}

pub fn get_amount1_delta(
    sqrt_a: U256,
    sqrt_b: U256,
    liquidity: u128,
    round_up: bool,
) -> Result<U256, QuoteError> {
    let (lower, upper) = if sqrt_a > sqrt_b { (sqrt_b, sqrt_a) } else { (sqrt_a, sqrt_b) };
    let liquidity = U256::from(liquidity);
    if round_up {
        full_mul_div_rounding_up(liquidity, upper - lower, q96())
    } else {
        full_mul_div(liquidity, upper - lower, q96())
    }
}

fn next_sqrt_price_from_amount0_rounding_up(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount: U256,
) -> Result<U256, QuoteError> {
    if amount.is_zero() {
        return Ok(sqrt_price_x96);
    }
    let numerator1 = U256::from(liquidity) << RESOLUTION;
    if let Some(product) = amount.checked_mul(sqrt_price_x96) {
        if let Some(denominator) = numerator1.checked_add(product) {
            return full_mul_div_rounding_up(numerator1, sqrt_price_x96, denominator);
        }
    }
    div_rounding_up(numerator1, add(div(numerator1, sqrt_price_x96)?, amount)?)
}

fn next_sqrt_price_from_amount1_rounding_down(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount: U256,
) -> Result<U256, QuoteError> {
    let liquidity = U256::from(liquidity);
    let quotient = if amount.bit_len() <= 160 {
        div(amount << RESOLUTION, liquidity)?
    } else {
        full_mul_div(amount, q96(), liquidity)?
    };
    add(sqrt_price_x96, quotient)
}

/// Price after adding `amount_in` of the input token
pub fn get_next_sqrt_price_from_input(
    sqrt_price_x96: U256,
    liquidity: u128,
    amount_in: U256,
    zero_for_one: bool,
) -> Result<U256, QuoteError> {
    if sqrt_price_x96.is_zero() || liquidity == 0 {
        return Err(QuoteError::InsufficientLiquidity);
    }
    if zero_for_one {
        next_sqrt_price_from_amount0_rounding_up(sqrt_price_x96, liquidity, amount_in)
    } else {
        next_sqrt_price_from_amount1_rounding_down(sqrt_price_x96, liquidity, amount_in)
    }
}

/// Swap as much of `amount_remaining` as fits before `sqrt_target_x96`.
pub fn compute_swap_step(
    sqrt_current_x96: U256,
    sqrt_target_x96: U256,
    liquidity: u128,
    amount_remaining: U256,
    fee_pips: u32,
) -> Result<SwapStep, QuoteError> {
    let zero_for_one = sqrt_current_x96 >= sqrt_target_x96;
    let fee = U256::from(fee_pips);
    let fee_complement = sub(U256::from(FEE_DENOMINATOR), fee)?;

    let remaining_less_fee = full_mul_div(amount_remaining, fee_complement, U256::from(FEE_DENOMINATOR))?;
    let amount_to_target = if zero_for_one {
        get_amount0_delta(sqrt_target_x96, sqrt_current_x96, liquidity, true)?
    } else {
        get_amount1_delta(sqrt_current_x96, sqrt_target_x96, liquidity, true)?
    };

    let sqrt_next = if remaining_less_fee >= amount_to_target {
        sqrt_target_x96
    } else {
        get_next_sqrt_price_from_input(sqrt_current_x96, liquidity, remaining_less_fee, zero_for_one)?
    };
    let reached_target = sqrt_next == sqrt_target_x96;

    let amount_in = if reached_target {
        amount_to_target
    } else if zero_for_one {
        get_amount0_delta(sqrt_next, sqrt_current_x96, liquidity, true)?
    } else {
        get_amount1_delta(sqrt_current_x96, sqrt_next, liquidity, true)?
    };
    let amount_out = if zero_for_one {
        get_amount1_delta(sqrt_next, sqrt_current_x96, liquidity, false)?
    } else {
        get_amount0_delta(sqrt_current_x96, sqrt_next, liquidity, false)?
    };

    let fee_amount = if reached_target {
        full_mul_div_rounding_up(amount_in, fee, fee_complement)?
    } else {
        sub(amount_remaining, amount_in)?
    };

    Ok(SwapStep {
        sqrt_price_next_x96: sqrt_next,
        amount_in,
        amount_out,
        fee_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::uniswap_v3::tick_math::get_sqrt_ratio_at_tick;

    fn e18() -> U256 {
        U256::from(10u64).pow(U256::from(18u64))
    }

    #[test]
    fn test_amount_deltas_at_unit_price() {
        let p1 = q96();
        let p2 = get_sqrt_ratio_at_tick(100).unwrap();
        let liquidity = 10u128.pow(18);
        let up = get_amount1_delta(p1, p2, liquidity, true).unwrap();
        let down = get_amount1_delta(p1, p2, liquidity, false).unwrap();
        assert!(up == down || up == down + U256::from(1u64));
        // ~0.5% of liquidity for 100 ticks
        assert!(down > e18() / U256::from(250u64) && down < e18() / U256::from(150u64));
    }

    #[test]
    fn test_step_partial_fill_consumes_all_input() {
        let current = q96();
        let target = get_sqrt_ratio_at_tick(-1000).unwrap();
        let amount = e18() / U256::from(1000u64);
        let step = compute_swap_step(current, target, 10u128.pow(21), amount, 3000).unwrap();
        assert!(step.sqrt_price_next_x96 < current && step.sqrt_price_next_x96 > target);
        assert_eq!(step.amount_in + step.fee_amount, amount);
        // a tiny trade at price 1 returns a little under 0.997 of the input
        assert!(step.amount_out < amount * U256::from(997u64) / U256::from(1000u64));
        assert!(step.amount_out > amount * U256::from(996u64) / U256::from(1000u64));
    }

    #[test]
    fn test_step_reaches_target() {
        let current = q96();
        let target = get_sqrt_ratio_at_tick(10).unwrap();
        let step = compute_swap_step(current, target, 10u128.pow(18), e18(), 500).unwrap();
        assert_eq!(step.sqrt_price_next_x96, target);
        assert!(step.amount_in + step.fee_amount < e18());
    }

    #[test]
    fn test_zero_liquidity_jumps_to_target() {
        let current = q96();
        let target = get_sqrt_ratio_at_tick(60).unwrap();
        let step = compute_swap_step(current, target, 0, e18(), 3000).unwrap();
        assert_eq!(step.sqrt_price_next_x96, target);
        assert_eq!(step.amount_in, U256::ZERO);
        assert_eq!(step.amount_out, U256::ZERO);
    }
}
