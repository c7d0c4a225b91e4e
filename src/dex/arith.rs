//! Checked 256-bit arithmetic mapped onto `QuoteError`.
//!
//! Contract math reverts on overflow and division by zero; these helpers turn
//! that into a skipped hop.

use alloy::primitives::{U256, U512};

use crate::error::QuoteError;

pub const E10: U256 = U256::from_limbs([10_000_000_000, 0, 0, 0]);
pub const E18: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

pub fn u(v: u64) -> U256 {
    U256::from(v)
}

pub fn pow10(exp: usize) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

pub fn add(a: U256, b: U256) -> Result<U256, QuoteError> {
    a.checked_add(b).ok_or(QuoteError::Overflow)
}

pub fn sub(a: U256, b: U256) -> Result<U256, QuoteError> {
    a.checked_sub(b).ok_or(QuoteError::OutOfBounds("subtraction underflow"))
}

pub fn mul(a: U256, b: U256) -> Result<U256, QuoteError> {
    a.checked_mul(b).ok_or(QuoteError::Overflow)
}

pub fn div(a: U256, b: U256) -> Result<U256, QuoteError> {
    if b.is_zero() {
        return Err(QuoteError::DivisionByZero);
    }
    Ok(a / b)
}

/// `a * b / c` in one step
pub fn mul_div(a: U256, b: U256, c: U256) -> Result<U256, QuoteError> {
    div(mul(a, b)?, c)
}

/// `a * b / denominator` with a 512-bit intermediate, floor rounding
pub fn full_mul_div(a: U256, b: U256, denominator: U256) -> Result<U256, QuoteError> {
    if denominator.is_zero() {
        return Err(QuoteError::DivisionByZero);
    }
    let product = U512::from(a) * U512::from(b);
    narrow(product / U512::from(denominator))
}

/// `a * b / denominator` with a 512-bit intermediate, rounding up
pub fn full_mul_div_rounding_up(a: U256, b: U256, denominator: U256) -> Result<U256, QuoteError> {
    if denominator.is_zero() {
        return Err(QuoteError::DivisionByZero);
    }
    let product = U512::from(a) * U512::from(b);
    let d = U512::from(denominator);
    let mut result = product / d;
    if !(product % d).is_zero() {
        result += U512::from(1u64);
    }
    narrow(result)
}

pub fn div_rounding_up(a: U256, b: U256) -> Result<U256, QuoteError> {
    if b.is_zero() {
        return Err(QuoteError::DivisionByZero);
    }
    let q = a / b;
    Ok(if (a % b).is_zero() { q } else { q + U256::from(1u64) })
}

pub fn abs_diff(a: U256, b: U256) -> U256 {
    if a > b {
        a - b
    } else {
        b - a
    }
}

/// Truncate a 512-bit value back to 256 bits, failing if it does not fit
pub fn narrow(value: U512) -> Result<U256, QuoteError> {
    let limbs = value.as_limbs();
    if limbs[4..].iter().any(|l| *l != 0) {
        return Err(QuoteError::Overflow);
    }
    Ok(U256::from_limbs([limbs[0], limbs[1], limbs[2], limbs[3]]))
}

/// Floor square root by Newton iteration
pub fn isqrt(value: U256) -> U256 {
    if value < U256::from(2u64) {
        return value;
    }
    let mut x = U256::from(1u64) << value.bit_len().div_ceil(2);
    loop {
        let y = (x + value / x) >> 1;
        if y >= x {
            return x;
        }
        x = y;
    }
}
