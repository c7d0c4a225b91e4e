//! Stableswap-NG plain and meta pools.

use alloy::primitives::{Address, U256};

use super::base_pool::BasePoolState;
use super::math::{dynamic_fee, get_d_ng, get_y_with_d};
use super::pool_info::CurvePoolInfo;
use crate::dex::arith::{add, div, mul, sub, u, E10, E18};
use crate::error::QuoteError;

pub const A_PRECISION: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StableNgState {
    pub info: &'static CurvePoolInfo,
    pub a: U256,
    pub fee: U256,
    pub offpeg_fee_multiplier: U256,
    pub balances: Vec<U256>,
    pub stored_rates: Vec<U256>,
    pub base: Option<BasePoolState>,
}

impl StableNgState {
    fn xp(&self) -> Result<Vec<U256>, QuoteError> {
        if self.stored_rates.len() != self.balances.len() {
            return Err(QuoteError::OutOfBounds("rates and balances differ in length"));
        }
        self.balances
            .iter()
            .zip(&self.stored_rates)
            .map(|(b, r)| div(mul(*r, *b)?, E18))
            .collect()
    }

    fn amp(&self) -> Result<U256, QuoteError> {
        mul(self.a, u(A_PRECISION))
    }

    fn rate(&self, k: usize) -> Result<U256, QuoteError> {
        self.stored_rates
            .get(k)
            .copied()
            .ok_or(QuoteError::OutOfBounds("stored rate index"))
    }

    pub fn get_dy(&self, tokens: &[Address], i: usize, j: usize, dx: U256) -> Result<U256, QuoteError> {
        let direct = self.info.coins.is_empty()
            || (tokens.get(i).is_some_and(|t| self.info.has_coin(*t))
                && tokens.get(j).is_some_and(|t| self.info.has_coin(*t)));
        if direct {
            self.plain_get_dy(i, j, dx)
        } else {
            self.underlying_get_dy(i, j, dx)
        }
    }

    fn plain_get_dy(&self, i: usize, j: usize, dx: U256) -> Result<U256, QuoteError> {
        let n = self.balances.len();
        if i == j || i >= n || j >= n {
            return Err(QuoteError::OutOfBounds("coin index"));
        }
        let (rate_i, rate_j) = (self.rate(i)?, self.rate(j)?);
        let xp = self.xp()?;
        let x = add(xp[i], div(mul(dx, rate_i)?, E18)?)?;
        let (y, dy) = self.swap(&xp, i, j, x)?;
        let fee = dynamic_fee(
            div(add(xp[i], x)?, u(2))?,
            div(add(xp[j], y)?, u(2))?,
            self.fee,
            self.offpeg_fee_multiplier,
        )?;
        let fee = div(mul(fee, dy)?, E10)?;
        div(mul(sub(dy, fee)?, E18)?, rate_j)
    }

    /// New balance of `j` and the raw output before fees
    fn swap(&self, xp: &[U256], i: usize, j: usize, x: U256) -> Result<(U256, U256), QuoteError> {
        let amp = self.amp()?;
        let d = get_d_ng(xp, amp, u(A_PRECISION))?;
        let y = get_y_with_d(amp, i, j, x, xp, d, Some(u(A_PRECISION)))?;
        let dy = sub(sub(xp[j], y)?, u(1))?;
        Ok((y, dy))
    }

    /// Two-coin metapool swap where index 0 is the metapool coin and indices
    /// from 1 are base pool coins.
    fn underlying_get_dy(&self, i: usize, j: usize, dx: U256) -> Result<U256, QuoteError> {
        let base = self
            .base
            .as_ref()
            .ok_or(QuoteError::OutOfBounds("metapool without base pool state"))?;
        let n = self.balances.len();
        if n != 2 {
            return Err(QuoteError::OutOfBounds("underlying swaps need a two-coin metapool"));
        }
        let max_coin = n - 1;
        let underlying = max_coin + base.balances.len();
        if i == j || i >= underlying || j >= underlying {
            return Err(QuoteError::OutOfBounds("underlying coin index"));
        }

        let (meta_rate, lp_rate) = (self.rate(0)?, self.rate(1)?);
        let xp = self.xp()?;
        let (meta_i, base_i) = if i == 0 { (0, 0) } else { (1, i - max_coin) };
        let (meta_j, base_j) = if j == 0 { (0, 0) } else { (1, j - max_coin) };

        let x = if i == 0 {
            add(xp[0], div(mul(dx, meta_rate)?, E18)?)?
        } else if j == 0 {
            let mut inputs = vec![U256::ZERO; base.balances.len()];
            inputs[base_i] = dx;
            let lp = div(mul(base.calc_token_amount(&inputs, true)?, lp_rate)?, E18)?;
            add(lp, xp[1])?
        } else {
            return base.get_dy(base_i, base_j, dx);
        };

        let (y, dy) = self.swap(&xp, meta_i, meta_j, x)?;
        let fee = dynamic_fee(
            div(add(xp[meta_i], x)?, u(2))?,
            div(add(xp[meta_j], y)?, u(2))?,
            self.fee,
            self.offpeg_fee_multiplier,
        )?;
        let dy = sub(dy, div(mul(fee, dy)?, E10)?)?;
        if j == 0 {
            div(mul(dy, E18)?, meta_rate)
        } else {
            Ok(base.calc_withdraw_one_coin(div(mul(dy, E18)?, lp_rate)?, base_j)?.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::curve::base_pool::tests::three_pool;
    use crate::dex::curve::pool_info::lookup;
    use alloy::primitives::address;

    fn e18(v: u64) -> U256 {
        u(v) * E18
    }

    fn plain() -> StableNgState {
        StableNgState {
            info: lookup(address!("a5588f7cdf560811710a2d82d3c9c99769db1dcb")).unwrap(),
            a: u(1_500),
            fee: u(1_000_000),
            offpeg_fee_multiplier: u(50_000_000_000),
            // 18 and 6 decimal coins
            balances: vec![e18(2_000_000), u(1_800_000_000_000)],
            stored_rates: vec![E18, E18 * u(1_000_000_000_000)],
            base: None,
        }
    }

    fn meta() -> StableNgState {
        StableNgState {
            info: lookup(address!("00e6fd108c4640d21b40d02f18dd6fe7c7f725ca")).unwrap(),
            a: u(200),
            fee: u(1_000_000),
            offpeg_fee_multiplier: u(50_000_000_000),
            balances: vec![e18(3_000_000), e18(2_900_000)],
            stored_rates: vec![E18, u(1_034_000_000_000_000_000)],
            base: Some(three_pool()),
        }
    }

    #[test]
    fn test_plain_swap() {
        let state = plain();
        let tokens = vec![Address::repeat_byte(1), Address::repeat_byte(2)];
        let out = state.get_dy(&tokens, 0, 1, e18(10_000)).unwrap();
        assert_eq!(out, u(9_998_256_779));
        let back = state.get_dy(&tokens, 1, 0, u(10_000_000_000)).unwrap();
        assert_eq!(back, U256::from(9_999_667_521_774_407_591_836u128));
    }

    #[test]
    fn test_meta_underlying() {
        let state = meta();
        let mut tokens = vec![state.info.coins[0]];
        tokens.extend_from_slice(lookup(address!("bebc44782c7db0a1a60cb6fe97d0b483032ff1c7")).unwrap().coins);

        let to_usdt = state.get_dy(&tokens, 0, 3, e18(1_000)).unwrap();
        assert_eq!(to_usdt, u(1_000_312_835));
        let from_dai = state.get_dy(&tokens, 1, 0, e18(1_000)).unwrap();
        assert_eq!(from_dai, U256::from(999_434_042_237_263_677_842u128));
        let base_only = state.get_dy(&tokens, 2, 3, u(1_000_000_000)).unwrap();
        assert_eq!(base_only, u(999_899_996));
    }

    #[test]
    fn test_meta_direct_to_lp() {
        let state = meta();
        let out = state.get_dy(state.info.coins, 0, 1, e18(1_000)).unwrap();
        assert_eq!(out, U256::from(967_017_426_865_993_545_804u128));
    }

    #[test]
    fn test_rates_length_mismatch() {
        let mut state = plain();
        state.stored_rates.pop();
        let tokens = state.info.coins.to_vec();
        for (i, j) in [(0, 1), (1, 0)] {
            assert_eq!(
                state.get_dy(&tokens, i, j, e18(1)),
                Err(QuoteError::OutOfBounds("stored rate index"))
            );
        }

        state.stored_rates = vec![E18, E18, E18];
        assert_eq!(
            state.get_dy(&tokens, 0, 1, e18(1)),
            Err(QuoteError::OutOfBounds("rates and balances differ in length"))
        );
    }
}
