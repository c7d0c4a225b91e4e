//! Three-coin cryptoswap pools (tricrypto).

use alloy::primitives::U256;

use super::crypto::{blend_fee, check_frac, newton_d, newton_y_loop, reduction_coefficient, sorted_desc, Limits};
use super::pool_info::CurvePoolInfo;
use crate::dex::arith::{add, div, mul, pow10, sub, u, E10, E18};
use crate::error::QuoteError;

pub const N_COINS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriCryptoState {
    pub info: &'static CurvePoolInfo,
    pub a: U256,
    pub gamma: U256,
    pub d: U256,
    /// Prices of coins 1 and 2 in units of coin 0
    pub price_scale: [U256; 2],
    pub fee_gamma: U256,
    pub mid_fee: U256,
    pub out_fee: U256,
    pub future_a_gamma_time: U256,
    pub balances: [U256; 3],
}

impl TriCryptoState {
    fn precisions(&self) -> [U256; 3] {
        match self.info.precision_mul {
            [p0, p1, p2] => [u(*p0), u(*p1), u(*p2)],
            _ => [u(1); 3],
        }
    }

    fn invariant(&self) -> Result<U256, QuoteError> {
        if self.future_a_gamma_time.is_zero() {
            return Ok(self.d);
        }
        let xp = scale(&self.balances, &self.price_scale, &self.precisions())?;
        newton_d(self.a, self.gamma, &xp, &Limits::v1(3))
    }

    pub fn get_dy(&self, i: usize, j: usize, dx: U256) -> Result<U256, QuoteError> {
        if i == j || i >= N_COINS || j >= N_COINS {
            return Err(QuoteError::OutOfBounds("coin index"));
        }
        let precisions = self.precisions();
        let d = self.invariant()?;

        let mut balances = self.balances;
        balances[i] = add(balances[i], dx)?;
        let mut xp = scale(&balances, &self.price_scale, &precisions)?;

        let y = newton_y(self.a, self.gamma, &xp, d, j, &Limits::v1(3))?;
        let mut dy = sub(sub(xp[j], y)?, u(1))?;
        xp[j] = y;
        if j > 0 {
            dy = div(mul(dy, E18)?, self.price_scale[j - 1])?;
        }
        dy = div(dy, precisions[j])?;

        let fee = blend_fee(reduction_coefficient(&xp, self.fee_gamma)?, self.mid_fee, self.out_fee)?;
        sub(dy, div(mul(fee, dy)?, E10)?)
    }
}

/// Balances in coin-0 terms at 18 decimals
pub(super) fn scale(
    balances: &[U256; 3],
    price_scale: &[U256; 2],
    precisions: &[U256; 3],
) -> Result<[U256; 3], QuoteError> {
    let mut xp = [mul(balances[0], precisions[0])?, U256::ZERO, U256::ZERO];
    for k in 0..N_COINS - 1 {
        xp[k + 1] = div(mul(mul(balances[k + 1], price_scale[k])?, precisions[k + 1])?, E18)?;
    }
    Ok(xp)
}

/// Balance of coin `i` keeping `d` fixed, by Newton iteration
pub(super) fn newton_y(
    ann: U256,
    gamma: U256,
    x: &[U256; 3],
    d: U256,
    i: usize,
    limits: &Limits,
) -> Result<U256, QuoteError> {
    limits.check_with_d(ann, gamma, d)?;
    for (k, xk) in x.iter().enumerate() {
        if k != i {
            check_frac(*xk, d, pow10(16))?;
        }
    }

    let n = u(N_COINS as u64);
    let mut others = *x;
    others[i] = U256::ZERO;
    let sorted = sorted_desc(&others);
    let convergence_limit = (sorted[0] / pow10(14)).max(d / pow10(14)).max(u(100));

    let mut y = d / n;
    let mut s_i = U256::ZERO;
    for j in 2..=N_COINS {
        let x_j = sorted[N_COINS - j];
        y = div(mul(y, d)?, mul(x_j, n)?)?;
        s_i = add(s_i, x_j)?;
    }
    let mut k0_i = E18;
    for x_j in &sorted[..N_COINS - 1] {
        k0_i = div(mul(mul(k0_i, *x_j)?, n)?, d)?;
    }

    newton_y_loop(ann, gamma, d, N_COINS as u64, s_i, k0_i, y, convergence_limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::curve::pool_info::lookup;
    use alloy::primitives::address;

    /// USDT/WBTC/WETH at 30000 and 2000 USDT
    fn usdt_wbtc_weth() -> TriCryptoState {
        let mut state = TriCryptoState {
            info: lookup(address!("d51a44d3fae010294c616388b506acda1bfaae46")).unwrap(),
            a: u(1_707_629),
            gamma: u(11_809_167_828_997),
            d: U256::ZERO,
            price_scale: [u(30_000) * E18, u(2_000) * E18],
            fee_gamma: u(500_000_000_000_000),
            mid_fee: u(3_000_000),
            out_fee: u(30_000_000),
            future_a_gamma_time: U256::ZERO,
            balances: [u(30_000_000_000_000), u(100_000_000_000), u(15_000) * E18],
        };
        let xp = scale(&state.balances, &state.price_scale, &state.precisions()).unwrap();
        state.d = newton_d(state.a, state.gamma, &xp, &Limits::v1(3)).unwrap();
        state
    }

    #[test]
    fn test_balanced_invariant() {
        let state = usdt_wbtc_weth();
        assert_eq!(state.d, u(90_000_000) * E18);
    }

    #[test]
    fn test_get_dy() {
        let state = usdt_wbtc_weth();
        // 30000 USDT buys just under one WBTC
        assert_eq!(state.get_dy(0, 1, u(30_000_000_000)).unwrap(), u(99_967_443));
        assert_eq!(state.get_dy(2, 0, E18).unwrap(), u(1_999_397_649));
        assert_eq!(
            state.get_dy(1, 2, u(100_000_000)).unwrap(),
            U256::from(14_995_116_435_628_962_527u128)
        );
    }

    #[test]
    fn test_ramp_matches_stored_invariant() {
        let mut state = usdt_wbtc_weth();
        let quote = state.get_dy(0, 2, u(2_000_000_000)).unwrap();
        state.future_a_gamma_time = u(1_700_000_000);
        state.d = U256::ZERO;
        assert_eq!(state.get_dy(0, 2, u(2_000_000_000)).unwrap(), quote);
    }

    #[test]
    fn test_bad_index_and_bounds() {
        let state = usdt_wbtc_weth();
        assert!(state.get_dy(0, 3, u(1)).is_err());
        let mut low_a = usdt_wbtc_weth();
        low_a.a = u(1_000);
        assert_eq!(
            low_a.get_dy(0, 1, u(1_000_000)),
            Err(QuoteError::OutOfBounds("unsafe values A"))
        );
    }
}
