//! StableSwap invariant solvers shared by the legacy and NG pools.

use alloy::primitives::U256;

use crate::dex::arith::{abs_diff, add, div, mul, sub, u, E10};
use crate::error::QuoteError;

pub const MAX_ITERATIONS: usize = 255;

/// Optional `A_PRECISION` scaling of the amplification coefficient
pub type APrecision = Option<U256>;

/// Invariant `D` of the legacy stableswap.
///
/// `plus_one` adds one to each `x * n` denominator, as some older pools do.
pub fn get_d(xp: &[U256], amp: U256, a_precision: APrecision, plus_one: bool) -> Result<U256, QuoteError> {
    let n = u(xp.len() as u64);
    let s = xp.iter().try_fold(U256::ZERO, |acc, x| add(acc, *x))?;
    if s.is_zero() {
        return Ok(U256::ZERO);
    }
    let ann = mul(amp, n)?;
    let extra = if plus_one { u(1) } else { U256::ZERO };

    let mut d = s;
    for _ in 0..MAX_ITERATIONS {
        let mut d_p = d;
        for x in xp {
            d_p = div(mul(d_p, d)?, add(mul(*x, n)?, extra)?)?;
        }
        let d_prev = d;
        d = next_d(d, d_p, s, ann, n, a_precision)?;
        if abs_diff(d, d_prev) <= u(1) {
            return Ok(d);
        }
    }
    Err(QuoteError::NoConvergence)
}

/// Invariant `D` of stableswap-NG, where `D_P` is divided by `n^n` once.
pub fn get_d_ng(xp: &[U256], amp: U256, a_precision: U256) -> Result<U256, QuoteError> {
    let n = u(xp.len() as u64);
    let s = xp.iter().try_fold(U256::ZERO, |acc, x| add(acc, *x))?;
    if s.is_zero() {
        return Ok(U256::ZERO);
    }
    let ann = mul(amp, n)?;
    let n_pow_n = n.pow(n);

    let mut d = s;
    for _ in 0..MAX_ITERATIONS {
        let mut d_p = d;
        for x in xp {
            d_p = div(mul(d_p, d)?, *x)?;
        }
        d_p = div(d_p, n_pow_n)?;
        let d_prev = d;
        d = next_d(d, d_p, s, ann, n, Some(a_precision))?;
        if abs_diff(d, d_prev) <= u(1) {
            return Ok(d);
        }
    }
    Err(QuoteError::NoConvergence)
}

fn next_d(d: U256, d_p: U256, s: U256, ann: U256, n: U256, a_precision: APrecision) -> Result<U256, QuoteError> {
    let n_plus_one = add(n, u(1))?;
    match a_precision {
        Some(a_prec) => {
            let numerator = mul(add(div(mul(ann, s)?, a_prec)?, mul(d_p, n)?)?, d)?;
            let denominator = add(
                div(mul(sub(ann, a_prec)?, d)?, a_prec)?,
                mul(n_plus_one, d_p)?,
            )?;
            div(numerator, denominator)
        }
        None => {
            let numerator = mul(add(mul(ann, s)?, mul(d_p, n)?)?, d)?;
            let denominator = add(mul(sub(ann, u(1))?, d)?, mul(n_plus_one, d_p)?)?;
            div(numerator, denominator)
        }
    }
}

/// Balance of coin `j` that keeps `D` fixed after coin `i` moves to `x`.
pub fn get_y(
    amp: U256,
    i: usize,
    j: usize,
    x: U256,
    xp: &[U256],
    a_precision: APrecision,
    plus_one: bool,
) -> Result<U256, QuoteError> {
    let d = get_d(xp, amp, a_precision, plus_one)?;
    get_y_with_d(amp, i, j, x, xp, d, a_precision)
}

/// `get_y` against a precomputed invariant
pub fn get_y_with_d(
    amp: U256,
    i: usize,
    j: usize,
    x: U256,
    xp: &[U256],
    d: U256,
    a_precision: APrecision,
) -> Result<U256, QuoteError> {
    let n_coins = xp.len();
    if i == j || i >= n_coins || j >= n_coins {
        return Err(QuoteError::OutOfBounds("coin index"));
    }
    let n = u(n_coins as u64);
    let ann = mul(amp, n)?;

    let mut c = d;
    let mut s = U256::ZERO;
    for (k, balance) in xp.iter().enumerate() {
        let x_k = if k == i {
            x
        } else if k != j {
            *balance
        } else {
            continue;
        };
        s = add(s, x_k)?;
        c = div(mul(c, d)?, mul(x_k, n)?)?;
    }

    let (c, b) = match a_precision {
        Some(a_prec) => (
            div(mul(mul(c, d)?, a_prec)?, mul(ann, n)?)?,
            add(s, div(mul(d, a_prec)?, ann)?)?,
        ),
        None => (div(mul(c, d)?, mul(ann, n)?)?, add(s, div(d, ann)?)?),
    };
    newton_y(b, c, d, d)
}

/// Balance of coin `i` at invariant `d` with the other balances fixed
pub fn get_y_d(amp: U256, i: usize, xp: &[U256], d: U256) -> Result<U256, QuoteError> {
    let n_coins = xp.len();
    if i >= n_coins {
        return Err(QuoteError::OutOfBounds("coin index"));
    }
    let n = u(n_coins as u64);
    let ann = mul(amp, n)?;

    let mut c = d;
    let mut s = U256::ZERO;
    for (k, x_k) in xp.iter().enumerate() {
        if k == i {
            continue;
        }
        s = add(s, *x_k)?;
        c = div(mul(c, d)?, mul(*x_k, n)?)?;
    }
    let c = div(mul(c, d)?, mul(ann, n)?)?;
    let b = add(s, div(d, ann)?)?;
    newton_y(b, c, d, d)
}

/// Iterate `y = (y^2 + c) / (2y + b - D)` to a fixed point
pub fn newton_y(b: U256, c: U256, d: U256, y0: U256) -> Result<U256, QuoteError> {
    let mut y = y0;
    for _ in 0..MAX_ITERATIONS {
        let y_prev = y;
        y = div(add(mul(y, y)?, c)?, sub(add(mul(y, u(2))?, b)?, d)?)?;
        if abs_diff(y, y_prev) <= u(1) {
            return Ok(y);
        }
    }
    Err(QuoteError::NoConvergence)
}

/// Fee raised by `fee_multiplier` as the pair moves off peg
pub fn dynamic_fee(xpi: U256, xpj: U256, fee: U256, fee_multiplier: U256) -> Result<U256, QuoteError> {
    if fee_multiplier <= E10 {
        return Ok(fee);
    }
    let sum = add(xpi, xpj)?;
    let xps2 = mul(sum, sum)?;
    let imbalance = div(mul(mul(mul(sub(fee_multiplier, E10)?, u(4))?, xpi)?, xpj)?, xps2)?;
    div(mul(fee_multiplier, fee)?, add(imbalance, E10)?)
}
