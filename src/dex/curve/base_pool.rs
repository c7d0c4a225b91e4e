//! Base pool of a metapool: LP minting, single-coin withdrawal and swaps.

use alloy::primitives::U256;

use super::math::{get_d, get_y, get_y_d};
use super::pool_info::CurvePoolInfo;
use crate::dex::arith::{add, div, mul, sub, u, E10, E18};
use crate::error::QuoteError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasePoolState {
    pub info: &'static CurvePoolInfo,
    pub a: U256,
    pub fee: U256,
    pub balances: Vec<U256>,
    pub lp_total_supply: U256,
}

impl BasePoolState {
    fn precision_mul(&self, i: usize) -> Result<U256, QuoteError> {
        self.info
            .precision_mul
            .get(i)
            .map(|p| u(*p))
            .ok_or(QuoteError::OutOfBounds("base pool precision"))
    }

    fn xp(&self, balances: &[U256]) -> Result<Vec<U256>, QuoteError> {
        balances
            .iter()
            .enumerate()
            .map(|(i, b)| mul(self.precision_mul(i)?, *b))
            .collect()
    }

    /// LP tokens minted (or burned) for a balanced change of `amounts`, without fees
    pub fn calc_token_amount(&self, amounts: &[U256], deposit: bool) -> Result<U256, QuoteError> {
        let d0 = get_d(&self.xp(&self.balances)?, self.a, None, false)?;
        let mut balances = self.balances.clone();
        for (balance, amount) in balances.iter_mut().zip(amounts) {
            *balance = if deposit { add(*balance, *amount)? } else { sub(*balance, *amount)? };
        }
        let d1 = get_d(&self.xp(&balances)?, self.a, None, false)?;
        let diff = if deposit { sub(d1, d0)? } else { sub(d0, d1)? };
        div(mul(diff, self.lp_total_supply)?, d0)
    }

    /// Coin `i` received for burning `token_amount` LP, and the fee charged
    pub fn calc_withdraw_one_coin(&self, token_amount: U256, i: usize) -> Result<(U256, U256), QuoteError> {
        let n_coins = self.balances.len();
        if i >= n_coins || n_coins < 2 {
            return Err(QuoteError::OutOfBounds("base pool coin index"));
        }
        let n = u(n_coins as u64);
        let fee = div(mul(self.fee, n)?, mul(u(4), sub(n, u(1))?)?)?;

        let xp = self.xp(&self.balances)?;
        let d0 = get_d(&xp, self.a, None, false)?;
        let d1 = sub(d0, div(mul(token_amount, d0)?, self.lp_total_supply)?)?;
        let new_y = get_y_d(self.a, i, &xp, d1)?;
        let precision_i = self.precision_mul(i)?;
        let dy_0 = div(sub(xp[i], new_y)?, precision_i)?;

        let mut xp_reduced = xp.clone();
        for (j, reduced) in xp_reduced.iter_mut().enumerate() {
            let dx_expected = if j == i {
                sub(div(mul(xp[j], d1)?, d0)?, new_y)?
            } else {
                sub(xp[j], div(mul(xp[j], d1)?, d0)?)?
            };
            *reduced = sub(*reduced, div(mul(fee, dx_expected)?, E10)?)?;
        }

        let dy = sub(xp_reduced[i], get_y_d(self.a, i, &xp_reduced, d1)?)?;
        let dy = div(sub(dy, u(1))?, precision_i)?;
        Ok((dy, sub(dy_0, dy)?))
    }

    /// Exchange between two base pool coins
    pub fn get_dy(&self, i: usize, j: usize, dx: U256) -> Result<U256, QuoteError> {
        let n = self.balances.len();
        if i == j || i >= n || j >= n {
            return Err(QuoteError::OutOfBounds("base coin index"));
        }
        let rates: Vec<U256> = (0..n)
            .map(|k| mul(self.precision_mul(k)?, E18))
            .collect::<Result<_, _>>()?;
        let xp: Vec<U256> = self
            .balances
            .iter()
            .zip(&rates)
            .map(|(b, r)| div(mul(*b, *r)?, E18))
            .collect::<Result<_, _>>()?;
        let x = add(xp[i], div(mul(dx, rates[i])?, E18)?)?;
        let y = get_y(self.a, i, j, x, &xp, None, false)?;
        let minus = if self.info.get_y_minus_one { u(1) } else { U256::ZERO };
        let dy = div(mul(sub(sub(xp[j], y)?, minus)?, E18)?, rates[j])?;
        sub(dy, div(mul(self.fee, dy)?, E10)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dex::curve::pool_info::lookup;
    use alloy::primitives::address;

    pub(crate) fn three_pool() -> BasePoolState {
        let info = lookup(address!("bebc44782c7db0a1a60cb6fe97d0b483032ff1c7")).unwrap();
        BasePoolState {
            info,
            a: u(2_000),
            fee: u(1_000_000),
            // DAI 18 decimals, USDC and USDT 6 decimals
            balances: vec![
                u(100_000_000) * E18,
                u(100_000_000_000_000),
                u(100_000_000_000_000),
            ],
            lp_total_supply: u(290_000_000) * E18,
        }
    }

    #[test]
    fn test_calc_token_amount_deposit_scales_with_supply() {
        let pool = three_pool();
        let minted = pool
            .calc_token_amount(&[u(1_000) * E18, U256::ZERO, U256::ZERO], true)
            .unwrap();
        // D is 3e26 for a supply of 2.9e26, so 1000 DAI mints about 966.67 LP
        let expected = u(1_000) * E18 * u(29) / u(30);
        assert!(minted < expected + E18 / u(100) && minted + E18 > expected);
    }

    #[test]
    fn test_withdraw_one_coin_charges_fee() {
        let pool = three_pool();
        let (dy, fee) = pool.calc_withdraw_one_coin(u(1_000) * E18, 1).unwrap();
        // 1000 LP is worth ~1034 USDC at a virtual price of 30/29
        assert!(dy > u(1_030_000_000) && dy < u(1_035_000_000));
        assert!(fee > U256::ZERO);
    }

    #[test]
    fn test_base_get_dy() {
        let pool = three_pool();
        let out = pool.get_dy(1, 2, u(1_000_000_000)).unwrap();
        // 1000 USDC to USDT on a balanced pool loses the 0.01% fee and a hair of slippage
        assert!(out < u(999_900_000) && out > u(999_800_000));
        assert_eq!(pool.get_dy(1, 3, u(1)), Err(QuoteError::OutOfBounds("base coin index")));
    }
}
