//! Legacy stableswap pools (plain, lending and meta).

use alloy::primitives::{Address, U256};

use super::base_pool::BasePoolState;
use super::math::{dynamic_fee, get_y};
use super::pool_info::{CurveFamily, CurvePoolInfo, StableKind};
use crate::dex::arith::{add, div, mul, sub, u, E10, E18};
use crate::error::QuoteError;

/// Compound-style exchange rate of a wrapped coin
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LendingRate {
    pub exchange_rate_stored: U256,
    pub supply_rate_per_block: U256,
    pub accrual_block: U256,
}

impl LendingRate {
    /// Rate accrued forward to `block`
    pub fn current(&self, block: u64) -> Result<U256, QuoteError> {
        let elapsed = sub(U256::from(block), self.accrual_block)?;
        let accrued = div(
            mul(mul(self.exchange_rate_stored, self.supply_rate_per_block)?, elapsed)?,
            E18,
        )?;
        add(self.exchange_rate_stored, accrued)
    }
}

/// Metapool view of the base pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaState {
    pub base: BasePoolState,
    pub base_cache_updated: u64,
    /// Virtual price cached in the metapool
    pub base_virtual_price: U256,
    /// Live `get_virtual_price()` of the base pool
    pub live_virtual_price: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StableSwapState {
    pub info: &'static CurvePoolInfo,
    pub a: U256,
    /// Fee over 1e10
    pub fee: U256,
    pub balances: Vec<U256>,
    pub offpeg_fee_multiplier: U256,
    pub lending_rates: Vec<LendingRate>,
    pub price_per_share: Vec<U256>,
    pub block_number: u64,
    pub timestamp: u64,
    pub meta: Option<MetaState>,
}

impl StableSwapState {
    pub fn new(info: &'static CurvePoolInfo, a: U256, fee: U256, balances: Vec<U256>) -> Self {
        Self {
            info,
            a,
            fee,
            balances,
            offpeg_fee_multiplier: U256::ZERO,
            lending_rates: Vec::new(),
            price_per_share: Vec::new(),
            block_number: 0,
            timestamp: 0,
            meta: None,
        }
    }

    fn kind(&self) -> Result<StableKind, QuoteError> {
        match self.info.family {
            CurveFamily::Stable(kind) => Ok(kind),
            _ => Err(QuoteError::OutOfBounds("not a legacy stableswap pool")),
        }
    }

    fn precision_mul(&self, k: usize) -> Result<U256, QuoteError> {
        self.info
            .precision_mul
            .get(k)
            .map(|p| u(*p))
            .ok_or(QuoteError::OutOfBounds("precision index"))
    }

    fn minus_one(&self) -> U256 {
        if self.info.get_y_minus_one {
            u(1)
        } else {
            U256::ZERO
        }
    }

    fn a_precision(&self) -> Result<U256, QuoteError> {
        self.info
            .a_precision
            .map(u)
            .ok_or(QuoteError::OutOfBounds("pool has no A precision"))
    }

    fn fee_of(&self, dy: U256) -> Result<U256, QuoteError> {
        div(mul(self.fee, dy)?, E10)
    }

    /// `rate * balance / 1e18` per coin
    fn scaled(&self, rates: &[U256]) -> Result<Vec<U256>, QuoteError> {
        self.balances
            .iter()
            .zip(rates)
            .map(|(b, r)| div(mul(*r, *b)?, E18))
            .collect()
    }

    /// Output of swapping `dx` of `tokens[i]` for `tokens[j]`.
    ///
    /// Whether the swap is direct or through underlying coins is decided by
    /// membership of the tokens in the pool's coin list.
    pub fn get_dy(&self, tokens: &[Address], i: usize, j: usize, dx: U256) -> Result<U256, QuoteError> {
        let n = self.balances.len();
        let direct_in = tokens.get(i).is_some_and(|t| self.info.has_coin(*t));
        let direct_out = tokens.get(j).is_some_and(|t| self.info.has_coin(*t));

        match self.kind()? {
            StableKind::Balances => {
                check(i, j, n)?;
                let xp = self.balances.clone();
                let x = add(xp[i], dx)?;
                let y = get_y(self.a, i, j, x, &xp, None, self.info.get_d_plus_one)?;
                let dy = sub(sub(xp[j], y)?, self.minus_one())?;
                sub(dy, self.fee_of(dy)?)
            }
            StableKind::Rates => {
                check(i, j, n)?;
                let xp = self.xp_precision()?;
                let x = add(xp[i], mul(dx, self.precision_mul(i)?)?)?;
                let y = get_y(self.a, i, j, x, &xp, None, false)?;
                let dy = div(sub(sub(xp[j], y)?, self.minus_one())?, self.precision_mul(j)?)?;
                sub(dy, self.fee_of(dy)?)
            }
            StableKind::Aave => {
                check(i, j, n)?;
                let a_prec = self.a_precision()?;
                let xp = self.xp_precision()?;
                let x = add(xp[i], mul(dx, self.precision_mul(i)?)?)?;
                let y = get_y(mul(self.a, a_prec)?, i, j, x, &xp, Some(a_prec), false)?;
                let dy = div(sub(sub(xp[j], y)?, self.minus_one())?, self.precision_mul(j)?)?;
                let fee = dynamic_fee(
                    div(add(xp[i], x)?, u(2))?,
                    div(add(xp[j], y)?, u(2))?,
                    self.fee,
                    self.offpeg_fee_multiplier,
                )?;
                sub(dy, div(mul(fee, dy)?, E10)?)
            }
            StableKind::StoredRates => {
                check(i, j, n)?;
                let a_prec = self.a_precision()?;
                let rates = (0..n)
                    .map(|k| mul(self.lending_rate(k)?.current(self.block_number)?, self.precision_mul(k)?))
                    .collect::<Result<Vec<_>, _>>()?;
                let xp = self.scaled(&rates)?;
                let amp = mul(self.a, a_prec)?;
                if direct_in {
                    let x = add(xp[i], div(mul(dx, rates[i])?, E18)?)?;
                    let y = get_y(amp, i, j, x, &xp, Some(a_prec), false)?;
                    let dy = sub(sub(xp[j], y)?, self.minus_one())?;
                    div(mul(sub(dy, self.fee_of(dy)?)?, E18)?, rates[j])
                } else {
                    let x = add(xp[i], mul(dx, self.precision_mul(i)?)?)?;
                    let y = get_y(amp, i, j, x, &xp, Some(a_prec), false)?;
                    let dy = sub(sub(xp[j], y)?, self.minus_one())?;
                    div(sub(dy, self.fee_of(dy)?)?, self.precision_mul(j)?)
                }
            }
            StableKind::Lending | StableKind::LendingPricePerShare => {
                check(i, j, n)?;
                let per_share = self.kind()? == StableKind::LendingPricePerShare;
                let rates = (0..n)
                    .map(|k| {
                        let rate = if !self.info.lending.get(k).copied().unwrap_or(false) {
                            E18
                        } else if per_share {
                            self.price_per_share
                                .get(k)
                                .copied()
                                .ok_or(QuoteError::OutOfBounds("price per share index"))?
                        } else {
                            self.lending_rate(k)?.current(self.block_number)?
                        };
                        mul(self.precision_mul(k)?, rate)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let xp = self.scaled(&rates)?;
                let direct = if per_share { direct_in && direct_out } else { direct_in };
                let dy = if direct {
                    let x = add(xp[i], div(mul(dx, rates[i])?, E18)?)?;
                    let y = get_y(self.a, i, j, x, &xp, None, false)?;
                    div(mul(sub(sub(xp[j], y)?, self.minus_one())?, E18)?, rates[j])?
                } else {
                    let x = add(xp[i], mul(dx, self.precision_mul(i)?)?)?;
                    let y = get_y(self.a, i, j, x, &xp, None, false)?;
                    div(sub(sub(xp[j], y)?, self.minus_one())?, self.precision_mul(j)?)?
                };
                sub(dy, self.fee_of(dy)?)
            }
            StableKind::RateMultipliers => {
                check(i, j, n)?;
                let rates = (0..n)
                    .map(|k| {
                        self.info
                            .rate_multipliers
                            .get(k)
                            .map(|r| U256::from(*r))
                            .ok_or(QuoteError::OutOfBounds("rate multiplier index"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let xp = self.scaled(&rates)?;
                let x = add(xp[i], div(mul(dx, rates[i])?, E18)?)?;
                let y = get_y(self.a, i, j, x, &xp, None, false)?;
                let dy = sub(sub(xp[j], y)?, self.minus_one())?;
                div(mul(sub(dy, self.fee_of(dy)?)?, E18)?, rates[j])
            }
            StableKind::BaseVirtualPrice => {
                if direct_in && direct_out {
                    self.meta_get_dy(i, j, dx)
                } else {
                    self.meta_get_dy_underlying(i, j, dx)
                }
            }
        }
    }

    fn xp_precision(&self) -> Result<Vec<U256>, QuoteError> {
        self.balances
            .iter()
            .enumerate()
            .map(|(k, b)| mul(self.precision_mul(k)?, *b))
            .collect()
    }

    fn lending_rate(&self, k: usize) -> Result<&LendingRate, QuoteError> {
        self.lending_rates
            .get(k)
            .ok_or(QuoteError::OutOfBounds("lending rate index"))
    }

    fn meta(&self) -> Result<&MetaState, QuoteError> {
        self.meta.as_ref().ok_or(QuoteError::OutOfBounds("metapool without base pool state"))
    }

    /// Cached virtual price unless the cache has expired
    pub fn virtual_price(&self) -> Result<U256, QuoteError> {
        let meta = self.meta()?;
        let expires = meta.base_cache_updated.saturating_add(self.info.base_cache_expires);
        Ok(if self.timestamp > expires {
            meta.live_virtual_price
        } else {
            meta.base_virtual_price
        })
    }

    fn meta_rates(&self, vp: U256) -> Result<Vec<U256>, QuoteError> {
        let n = self.balances.len();
        let mut rates = (0..n)
            .map(|k| mul(self.precision_mul(k)?, E18))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(last) = rates.last_mut() {
            *last = vp;
        }
        Ok(rates)
    }

    fn meta_get_dy(&self, i: usize, j: usize, dx: U256) -> Result<U256, QuoteError> {
        check(i, j, self.balances.len())?;
        let a_prec = self.a_precision()?;
        let rates = self.meta_rates(self.virtual_price()?)?;
        let xp = self.scaled(&rates)?;
        let x = add(xp[i], div(mul(dx, rates[i])?, E18)?)?;
        let y = get_y(mul(self.a, a_prec)?, i, j, x, &xp, Some(a_prec), false)?;
        let dy = sub(sub(xp[j], y)?, self.minus_one())?;
        div(mul(sub(dy, self.fee_of(dy)?)?, E18)?, rates[j])
    }

    /// Swap across the metapool's own coins and the base pool's coins.
    ///
    /// Indices count the metapool coins except the LP token first, then the
    /// base pool coins.
    fn meta_get_dy_underlying(&self, i: usize, j: usize, dx: U256) -> Result<U256, QuoteError> {
        let meta = self.meta()?;
        let n = self.balances.len();
        let max_coin = n.checked_sub(1).ok_or(QuoteError::OutOfBounds("empty pool"))?;
        let underlying = max_coin + meta.base.balances.len();
        if i == j || i >= underlying || j >= underlying {
            return Err(QuoteError::OutOfBounds("underlying coin index"));
        }
        let vp = self.virtual_price()?;
        let xp = self.scaled(&self.meta_rates(vp)?)?;

        let base_i = i.checked_sub(max_coin);
        let base_j = j.checked_sub(max_coin);
        let meta_i = if base_i.is_some() { max_coin } else { i };
        let meta_j = if base_j.is_some() { max_coin } else { j };

        let x = match (base_i, base_j) {
            (None, _) => add(xp[i], mul(dx, self.precision_mul(i)?)?)?,
            (Some(bi), None) => {
                let mut inputs = vec![U256::ZERO; meta.base.balances.len()];
                inputs[bi] = dx;
                let lp = div(mul(meta.base.calc_token_amount(&inputs, true)?, vp)?, E18)?;
                let lp = sub(lp, div(mul(lp, meta.base.fee)?, mul(u(2), E10)?)?)?;
                add(lp, xp[max_coin])?
            }
            (Some(bi), Some(bj)) => return meta.base.get_dy(bi, bj, dx),
        };

        let a_prec = self.a_precision()?;
        let y = get_y(mul(self.a, a_prec)?, meta_i, meta_j, x, &xp, Some(a_prec), false)?;
        let dy = sub(sub(xp[meta_j], y)?, self.minus_one())?;
        let dy = sub(dy, self.fee_of(dy)?)?;
        match base_j {
            None => div(dy, self.precision_mul(meta_j)?),
            Some(bj) => Ok(meta.base.calc_withdraw_one_coin(div(mul(dy, E18)?, vp)?, bj)?.0),
        }
    }
}

fn check(i: usize, j: usize, n: usize) -> Result<(), QuoteError> {
    if i == j || i >= n || j >= n {
        return Err(QuoteError::OutOfBounds("coin index"));
    }
    Ok(())
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

    fn e6(v: u64) -> U256 {
        u(v) * u(1_000_000)
    }

    fn pool(addr: Address, a: u64, fee: u64, balances: Vec<U256>) -> StableSwapState {
        StableSwapState::new(lookup(addr).unwrap(), u(a), u(fee), balances)
    }

    #[test]
    fn test_rates_pool_dai_to_usdc() {
        let state = pool(
            address!("bebc44782c7db0a1a60cb6fe97d0b483032ff1c7"),
            2_000,
            1_000_000,
            vec![e18(100_000_000), e6(100_000_000), e6(100_000_000)],
        );
        let out = state.get_dy(state.info.coins, 0, 1, e18(1_000_000)).unwrap();
        assert_eq!(out, U256::from(999_895_002_524u64));
    }

    #[test]
    fn test_balances_pool_with_d_plus_one() {
        let state = pool(
            address!("dc24316b9ae028f1497c275eb9192a3ea0f67022"),
            50,
            4_000_000,
            vec![e18(50_000), e18(48_000)],
        );
        let out = state.get_dy(state.info.coins, 0, 1, e18(100)).unwrap();
        assert_eq!(out, U256::from(99_875_962_326_141_341_954u128));
    }

    #[test]
    fn test_aave_offpeg_fee() {
        let mut state = pool(
            address!("debf20617708857ebe4f679508e7b7863a8a8eee"),
            200,
            3_000_000,
            vec![e18(30_000_000), e6(35_000_000), e6(25_000_000)],
        );
        let tokens = vec![Address::repeat_byte(1), Address::repeat_byte(2), Address::repeat_byte(3)];

        state.offpeg_fee_multiplier = u(2) * E10;
        let with_offpeg = state.get_dy(&tokens, 2, 0, e6(1_000_000)).unwrap();
        assert_eq!(with_offpeg, U256::from_str_radix("1000512989481778190085407", 10).unwrap());

        // a multiplier at or below 1e10 leaves the base fee
        state.offpeg_fee_multiplier = E10;
        let base_fee_only = state.get_dy(&tokens, 2, 0, e6(1_000_000)).unwrap();
        assert_eq!(base_fee_only, U256::from_str_radix("1000513785429175961240395", 10).unwrap());
    }

    #[test]
    fn test_rate_multipliers() {
        let state = pool(
            address!("9c3b46c0ceb5b9e304fcd6d88fc50f7dd24b31bc"),
            400,
            4_000_000,
            vec![e18(1_000), e18(1_200)],
        );
        let out = state.get_dy(state.info.coins, 1, 0, e18(5)).unwrap();
        assert_eq!(out, U256::from(4_995_637_054_832_571_918u64));
    }

    #[test]
    fn test_lending_rate_accrues() {
        let rate = LendingRate {
            exchange_rate_stored: e18(2),
            supply_rate_per_block: u(1_000_000_000),
            accrual_block: u(100),
        };
        assert_eq!(rate.current(100).unwrap(), e18(2));
        assert_eq!(rate.current(110).unwrap(), e18(2) + u(20_000_000_000));
        assert!(rate.current(99).is_err());
    }

    #[test]
    fn test_lending_pool_with_unit_rates_matches_rates_pool() {
        // none of the coins of this pool are lent out, so it prices like a rates pool
        let mut state = pool(
            address!("a5407eae9ba41422680e2e00537571bcc53efbfd"),
            2_000,
            1_000_000,
            vec![e18(100_000_000), e6(100_000_000), e6(100_000_000), e18(100_000_000)],
        );
        state.lending_rates = vec![LendingRate::default(); 4];
        let out = state.get_dy(state.info.coins, 1, 2, e6(1_000)).unwrap();
        assert!(out > e6(999) && out < e6(1_000));
    }

    fn meta_pool() -> StableSwapState {
        let mut state = pool(
            address!("0f9cb53ebe405d49a0bbdbd291a65ff571bc83e1"),
            100,
            4_000_000,
            vec![e18(5_000_000), e18(4_800_000)],
        );
        state.timestamp = 1_000;
        state.meta = Some(MetaState {
            base: three_pool(),
            base_cache_updated: 900,
            base_virtual_price: u(1_034_000_000_000_000_000),
            live_virtual_price: u(1_040_000_000_000_000_000),
        });
        state
    }

    #[test]
    fn test_meta_virtual_price_cache() {
        let mut state = meta_pool();
        assert_eq!(state.virtual_price().unwrap(), u(1_034_000_000_000_000_000));
        state.timestamp = 1_501;
        assert_eq!(state.virtual_price().unwrap(), u(1_040_000_000_000_000_000));
    }

    #[test]
    fn test_meta_direct() {
        let state = meta_pool();
        let out = state.get_dy(state.info.coins, 0, 1, e18(1_000)).unwrap();
        assert_eq!(out, U256::from(966_658_513_409_019_085_389u128));
    }

    #[test]
    fn test_meta_underlying_routes() {
        let state = meta_pool();
        let tokens = state.info.underlying_coins().unwrap();

        let to_usdc = state.get_dy(&tokens, 0, 2, e18(1_000)).unwrap();
        assert_eq!(to_usdc, u(999_941_564));

        let from_dai = state.get_dy(&tokens, 1, 0, e18(1_000)).unwrap();
        assert_eq!(from_dai, U256::from(999_154_654_674_705_580_548u128));

        // both coins in the base pool swap there directly
        let base_only = state.get_dy(&tokens, 2, 3, e6(1_000)).unwrap();
        assert_eq!(base_only, u(999_899_996));
    }

    #[test]
    fn test_meta_without_base_state() {
        let mut state = meta_pool();
        state.meta = None;
        assert!(state.get_dy(state.info.coins, 0, 1, e18(1)).is_err());
    }
}
