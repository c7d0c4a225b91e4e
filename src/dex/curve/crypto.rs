//! Two-coin cryptoswap pools and the Newton solvers shared with tricrypto.

use alloy::primitives::U256;

use super::pool_info::CurvePoolInfo;
use crate::dex::arith::{abs_diff, add, div, mul, pow10, sub, u, E10, E18};
use crate::error::QuoteError;

pub const A_MULTIPLIER: u64 = 10_000;
pub const MAX_ITERATIONS: usize = 255;

/// Parameter bounds enforced before solving
#[derive(Debug, Clone, Copy)]
pub(super) struct Limits {
    pub min_a: U256,
    pub max_a: U256,
    pub max_gamma: U256,
}

impl Limits {
    /// Bounds of the first cryptoswap generation for `n` coins
    pub fn v1(n: u64) -> Self {
        let n_pow_n = u(n.pow(n as u32));
        Self {
            min_a: n_pow_n * u(A_MULTIPLIER) / u(10),
            max_a: n_pow_n * u(A_MULTIPLIER) * u(100_000),
            max_gamma: u(2) * pow10(16),
        }
    }

    pub fn check(&self, ann: U256, gamma: U256) -> Result<(), QuoteError> {
        if ann < self.min_a || ann > self.max_a {
            return Err(QuoteError::OutOfBounds("unsafe values A"));
        }
        if gamma < E10 || gamma > self.max_gamma {
            return Err(QuoteError::OutOfBounds("unsafe values gamma"));
        }
        Ok(())
    }

    pub fn check_with_d(&self, ann: U256, gamma: U256, d: U256) -> Result<(), QuoteError> {
        self.check(ann, gamma)?;
        if d < pow10(17) || d > pow10(33) {
            return Err(QuoteError::OutOfBounds("unsafe values D"));
        }
        Ok(())
    }
}

/// `x * 1e18 / d` must stay within `[min_frac, 1e20]`
pub(super) fn check_frac(x: U256, d: U256, min_frac: U256) -> Result<(), QuoteError> {
    let frac = div(mul(x, E18)?, d)?;
    if frac < min_frac || frac > pow10(20) {
        return Err(QuoteError::OutOfBounds("unsafe values x[i]"));
    }
    Ok(())
}

/// `|gamma + 1e18 - K0| + 1`
fn g1k0(gamma: U256, k0: U256) -> Result<U256, QuoteError> {
    let g = add(gamma, E18)?;
    add(abs_diff(g, k0), u(1))
}

/// `1e18 * D / gamma * g1k0 / gamma * g1k0 * A_MULTIPLIER / ANN`
fn mul1(ann: U256, gamma: U256, d: U256, g1k0: U256) -> Result<U256, QuoteError> {
    let v = div(mul(E18, d)?, gamma)?;
    let v = div(mul(v, g1k0)?, gamma)?;
    div(mul(mul(v, g1k0)?, u(A_MULTIPLIER))?, ann)
}

/// Newton iteration for the balance `y` of the output coin.
///
/// `s_i` is the sum and `k0_i` the scaled product of the other balances.
#[allow(clippy::too_many_arguments)]
pub(super) fn newton_y_loop(
    ann: U256,
    gamma: U256,
    d: U256,
    n: u64,
    s_i: U256,
    k0_i: U256,
    y0: U256,
    convergence_limit: U256,
) -> Result<U256, QuoteError> {
    let n = u(n);
    let mut y = y0;
    for _ in 0..MAX_ITERATIONS {
        let y_prev = y;
        let k0 = div(mul(mul(k0_i, y)?, n)?, d)?;
        let s = add(s_i, y)?;

        let g1k0 = g1k0(gamma, k0)?;
        let mul1 = mul1(ann, gamma, d, g1k0)?;
        let mul2 = add(E18, div(mul(u(2) * E18, k0)?, g1k0)?)?;

        let yfprime = add(add(mul(E18, y)?, mul(s, mul2)?)?, mul1)?;
        let dyfprime = mul(d, mul2)?;
        if yfprime < dyfprime {
            y = y_prev / u(2);
            continue;
        }
        let yfprime = yfprime - dyfprime;
        let fprime = div(yfprime, y)?;

        let mut y_minus = div(mul1, fprime)?;
        let y_plus = add(
            div(add(yfprime, mul(E18, d)?)?, fprime)?,
            div(mul(y_minus, E18)?, k0)?,
        )?;
        y_minus = add(y_minus, div(mul(E18, s)?, fprime)?)?;

        y = if y_plus < y_minus { y_prev / u(2) } else { y_plus - y_minus };

        let limit = convergence_limit.max(y / pow10(14));
        if abs_diff(y, y_prev) < limit {
            check_frac(y, d, pow10(16))?;
            return Ok(y);
        }
    }
    Err(QuoteError::NoConvergence)
}

/// Newton iteration for the invariant `D`, starting from `d0`.
///
/// `x` is sorted high to low. Two-coin pools compute `K0` in one product.
pub(super) fn newton_d_loop(
    ann: U256,
    gamma: U256,
    x: &[U256],
    d0: U256,
    min_frac: U256,
) -> Result<U256, QuoteError> {
    let n = u(x.len() as u64);
    let s = x.iter().try_fold(U256::ZERO, |acc, v| add(acc, *v))?;
    let mut d = d0;

    for _ in 0..MAX_ITERATIONS {
        let d_prev = d;

        let k0 = if x.len() == 2 {
            div(mul(div(mul(mul(E18, mul(n, n)?)?, x[0])?, d)?, x[1])?, d)?
        } else {
            x.iter().try_fold(E18, |k, xi| div(mul(mul(k, *xi)?, n)?, d))?
        };

        let g1k0 = g1k0(gamma, k0)?;
        let mul1 = mul1(ann, gamma, d, g1k0)?;
        let mul2 = div(mul(mul(u(2) * E18, n)?, k0)?, g1k0)?;

        let neg_fprime = sub(
            add(
                add(s, div(mul(s, mul2)?, E18)?)?,
                div(mul(mul1, n)?, k0)?,
            )?,
            div(mul(mul2, d)?, E18)?,
        )?;

        let d_plus = div(mul(d, add(neg_fprime, s)?)?, neg_fprime)?;
        let mut d_minus = div(mul(d, d)?, neg_fprime)?;
        let correction = div(mul(d, div(mul1, neg_fprime)?)?, E18)?;
        if E18 > k0 {
            d_minus = add(d_minus, div(mul(correction, E18 - k0)?, k0)?)?;
        } else {
            d_minus = sub(d_minus, div(mul(correction, k0 - E18)?, k0)?)?;
        }

        d = if d_plus > d_minus { d_plus - d_minus } else { (d_minus - d_plus) / u(2) };

        if mul(abs_diff(d, d_prev), pow10(14))? < pow10(16).max(d) {
            for xi in x {
                check_frac(*xi, d, min_frac)?;
            }
            return Ok(d);
        }
    }
    Err(QuoteError::NoConvergence)
}

/// Iterative geometric mean, the initial guess for `newton_d_loop`
pub(super) fn geometric_mean(x: &[U256]) -> Result<U256, QuoteError> {
    let n = u(x.len() as u64);
    let mut d = x.first().copied().ok_or(QuoteError::OutOfBounds("empty pool"))?;
    for _ in 0..MAX_ITERATIONS {
        let d_prev = d;
        d = if x.len() == 2 {
            div(add(d, div(mul(x[0], x[1])?, d)?)?, n)?
        } else {
            let tmp = x.iter().try_fold(E18, |t, xi| div(mul(t, *xi)?, d))?;
            div(mul(d, add(mul(sub(n, u(1))?, E18)?, tmp)?)?, mul(n, E18)?)?
        };
        let diff = abs_diff(d, d_prev);
        if diff <= u(1) || mul(diff, E18)? < d {
            return Ok(d);
        }
    }
    Err(QuoteError::NoConvergence)
}

/// Sorted copy, largest first
pub(super) fn sorted_desc(x: &[U256]) -> Vec<U256> {
    let mut sorted = x.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted
}

/// `D` of the first-generation solver, with its input checks
pub(super) fn newton_d(ann: U256, gamma: U256, x_unsorted: &[U256], limits: &Limits) -> Result<U256, QuoteError> {
    limits.check(ann, gamma)?;
    let x = sorted_desc(x_unsorted);
    let largest = *x.first().ok_or(QuoteError::OutOfBounds("empty pool"))?;
    if largest < pow10(9) || largest > pow10(33) {
        return Err(QuoteError::OutOfBounds("unsafe values x[0]"));
    }
    let min_ratio = if x.len() == 2 { pow10(14) } else { pow10(11) };
    for xi in &x[1..] {
        if div(mul(*xi, E18)?, largest)? < min_ratio {
            return Err(QuoteError::OutOfBounds("unsafe values x[i]"));
        }
    }
    let d0 = mul(u(x.len() as u64), geometric_mean(&x)?)?;
    newton_d_loop(ann, gamma, &x, d0, pow10(16))
}

/// `fee_gamma / (fee_gamma + 1 - K)` with `K = prod(x) / (sum(x) / n)^n`, scaled by 1e18
pub(super) fn reduction_coefficient(x: &[U256], fee_gamma: U256) -> Result<U256, QuoteError> {
    let n = u(x.len() as u64);
    let s = x.iter().try_fold(U256::ZERO, |acc, v| add(acc, *v))?;
    let k = x.iter().try_fold(E18, |k, xi| div(mul(mul(k, n)?, *xi)?, s))?;
    if fee_gamma.is_zero() {
        return Ok(k);
    }
    div(mul(fee_gamma, E18)?, sub(add(fee_gamma, E18)?, k)?)
}

/// Blend of `mid_fee` and `out_fee` weighted by the coefficient `f`
pub(super) fn blend_fee(f: U256, mid_fee: U256, out_fee: U256) -> Result<U256, QuoteError> {
    div(add(mul(mid_fee, f)?, mul(out_fee, sub(E18, f)?)?)?, E18)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoSwapState {
    pub info: &'static CurvePoolInfo,
    pub a: U256,
    pub gamma: U256,
    pub d: U256,
    pub price_scale: U256,
    pub fee_gamma: U256,
    pub mid_fee: U256,
    pub out_fee: U256,
    pub future_a_gamma_time: U256,
    pub balances: [U256; 2],
}

impl CryptoSwapState {
    fn precisions(&self) -> [U256; 2] {
        match self.info.precision_mul {
            [p0, p1] => [u(*p0), u(*p1)],
            _ => [u(1), u(1)],
        }
    }

    /// Invariant used for pricing, recomputed while A and gamma ramp
    fn invariant(&self) -> Result<U256, QuoteError> {
        if self.future_a_gamma_time.is_zero() {
            return Ok(self.d);
        }
        let [p0, p1] = self.precisions();
        let xp = [
            mul(self.balances[0], p0)?,
            div(mul(mul(self.balances[1], p1)?, self.price_scale)?, E18)?,
        ];
        newton_d(self.a, self.gamma, &xp, &Limits::v1(2))
    }

    fn fee(&self, xp: &[U256; 2]) -> Result<U256, QuoteError> {
        let s = add(xp[0], xp[1])?;
        let k = div(mul(div(mul(u(4) * E18, xp[0])?, s)?, xp[1])?, s)?;
        let f = div(mul(self.fee_gamma, E18)?, sub(add(self.fee_gamma, E18)?, k)?)?;
        blend_fee(f, self.mid_fee, self.out_fee)
    }

    pub fn get_dy(&self, i: usize, j: usize, dx: U256) -> Result<U256, QuoteError> {
        if i == j || i > 1 || j > 1 {
            return Err(QuoteError::OutOfBounds("coin index"));
        }
        let [p0, p1] = self.precisions();
        let price_scale = mul(self.price_scale, p1)?;
        let d = self.invariant()?;

        let mut balances = self.balances;
        balances[i] = add(balances[i], dx)?;
        let mut xp = [mul(balances[0], p0)?, div(mul(balances[1], price_scale)?, E18)?];

        let y = newton_y(self.a, self.gamma, &xp, d, j)?;
        let mut dy = sub(sub(xp[j], y)?, u(1))?;
        xp[j] = y;
        dy = if j > 0 { div(mul(dy, E18)?, price_scale)? } else { div(dy, p0)? };
        sub(dy, div(mul(self.fee(&xp)?, dy)?, E10)?)
    }
}

/// Two-coin `newton_y` solving for coin `i`
fn newton_y(ann: U256, gamma: U256, x: &[U256; 2], d: U256, i: usize) -> Result<U256, QuoteError> {
    Limits::v1(2).check_with_d(ann, gamma, d)?;
    let n = u(2);
    let x_j = x[1 - i];
    let y = div(mul(d, d)?, mul(x_j, u(4))?)?;
    let k0_i = div(mul(mul(E18, n)?, x_j)?, d)?;
    if k0_i < mul(pow10(16), n)? || k0_i > mul(pow10(20), n)? {
        return Err(QuoteError::OutOfBounds("unsafe values x[i]"));
    }
    let convergence_limit = (x_j / pow10(14)).max(d / pow10(14)).max(u(100));
    newton_y_loop(ann, gamma, d, 2, x_j, k0_i, y, convergence_limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::curve::pool_info::lookup;
    use alloy::primitives::address;

    fn e18(v: u64) -> U256 {
        u(v) * E18
    }

    /// WETH/CRV style pool, CRV priced at 1/2000 WETH
    fn weth_crv() -> CryptoSwapState {
        CryptoSwapState {
            info: lookup(address!("9409280dc1e6d33ab7a8c6ec03e5763fb61772b5")).unwrap(),
            a: u(400_000),
            gamma: u(145_000_000_000_000),
            d: U256::ZERO,
            price_scale: u(500_000_000_000_000),
            fee_gamma: u(230_000_000_000_000),
            mid_fee: u(26_000_000),
            out_fee: u(45_000_000),
            future_a_gamma_time: U256::ZERO,
            balances: [e18(5_000), e18(10_000_000)],
        }
    }

    fn with_d(mut state: CryptoSwapState) -> CryptoSwapState {
        let xp = [state.balances[0], state.balances[1] * state.price_scale / E18];
        state.d = newton_d(state.a, state.gamma, &xp, &Limits::v1(2)).unwrap();
        state
    }

    #[test]
    fn test_newton_d_balanced_is_sum() {
        let xp = [e18(10_000), e18(10_000)];
        let d = newton_d(u(400_000), u(145_000_000_000_000), &xp, &Limits::v1(2)).unwrap();
        assert_eq!(d, e18(20_000));
    }

    #[test]
    fn test_get_dy_both_directions() {
        let state = with_d(weth_crv());
        assert_eq!(state.d, e18(10_000));
        // one WETH buys a little under 2000 CRV after fees
        let crv = state.get_dy(0, 1, E18).unwrap();
        assert_eq!(crv, U256::from(1_994_780_331_983_575_019_069u128));
        let weth = state.get_dy(1, 0, e18(2_000)).unwrap();
        assert_eq!(weth, U256::from(997_390_165_991_787_510u128));
    }

    #[test]
    fn test_ramp_recomputes_invariant() {
        let settled = with_d(weth_crv());
        let mut ramping = weth_crv();
        ramping.future_a_gamma_time = u(1);
        assert_eq!(ramping.invariant().unwrap(), settled.d);
        assert_eq!(ramping.get_dy(0, 1, E18).unwrap(), settled.get_dy(0, 1, E18).unwrap());
    }

    #[test]
    fn test_parameter_bounds() {
        let mut state = with_d(weth_crv());
        state.gamma = u(1);
        assert_eq!(
            state.get_dy(0, 1, E18),
            Err(QuoteError::OutOfBounds("unsafe values gamma"))
        );
        let state = with_d(weth_crv());
        assert!(state.get_dy(0, 0, E18).is_err());
        // draining the pool pushes y outside the safe range
        assert!(state.get_dy(0, 1, e18(5_000_000)).is_err());
    }

    #[test]
    fn test_reduction_coefficient_balanced() {
        let x = [e18(1), e18(1), e18(1)];
        assert_eq!(reduction_coefficient(&x, U256::ZERO).unwrap(), E18);
        assert_eq!(reduction_coefficient(&x, u(230_000_000_000_000)).unwrap(), E18);
        assert_eq!(blend_fee(E18, u(26), u(45)).unwrap(), u(26));
    }

    #[test]
    fn test_geometric_mean() {
        let gm = geometric_mean(&[e18(400), e18(100)]).unwrap();
        assert_eq!(gm, e18(200));
        let gm3 = geometric_mean(&[e18(800), e18(100), e18(10)]).unwrap();
        assert_eq!(gm3, U256::from(92_831_776_672_255_577_841u128));
    }
}
