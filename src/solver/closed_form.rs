//! Optimal input for constant-product cycles.
//!
//! Each hop maps `x` to `a·x / (b + c·x)` with `a = (n - s)·R_out`,
//! `b = n·R_in` and `c = n - s`. Maps of this shape compose into another one,
//! so a whole path is `out(x) = P·x / (Q + K·x)`. Profit `out(x) - x` peaks
//! where `(Q + K·x)^2 = P·Q`, giving `x* = (sqrt(P·Q) - Q) / K`.

use std::collections::HashMap;

use alloy::primitives::{Address, Uint, U256};

use crate::dex::uniswap_v2::{apply_swap, get_amount_out};
use crate::dex::{FeeFraction, Pool, PoolState};
use crate::error::QuoteError;
use crate::types::{Path, SwapEvent};

/// Products of four hops of 256-bit reserves need more than 512 bits
pub(crate) type Wide = Uint<1024, 16>;

/// Reserves of one constant-product hop, oriented in trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub reserve_in: U256,
    pub reserve_out: U256,
    pub fee: FeeFraction,
}

impl Hop {
    /// Reserves of a constant-product pool in `token_in -> token_out` order
    pub fn from_pool(pool: &Pool, token_in: Address, token_out: Address) -> Option<Self> {
        let PoolState::V2 { reserve0, reserve1, fee } = &pool.state else {
            return None;
        };
        let (i, j) = (pool.index_of(token_in)?, pool.index_of(token_out)?);
        if i == j {
            return None;
        }
        let (reserve_in, reserve_out) = if i == 0 { (*reserve0, *reserve1) } else { (*reserve1, *reserve0) };
        Some(Self { reserve_in, reserve_out, fee: *fee })
    }

    /// Reserves once `event` has traded on the same pool
    pub fn after(self, event: &SwapEvent, token_in: Address) -> Option<Self> {
        let (reserve_in, reserve_out) = if event.token_in == token_in {
            (self.reserve_in.checked_add(event.amount_in)?, self.reserve_out.checked_sub(event.amount_out)?)
        } else {
            (self.reserve_in.checked_sub(event.amount_out)?, self.reserve_out.checked_add(event.amount_in)?)
        };
        Some(Self { reserve_in, reserve_out, ..self })
    }

    /// Swaps `amount_in` through the hop, returning the output and the moved hop
    pub fn swap(self, amount_in: U256) -> Result<(U256, Self), QuoteError> {
        let (reserve_in, reserve_out, amount_out) =
            apply_swap(amount_in, self.reserve_in, self.reserve_out, self.fee)?;
        Ok((amount_out, Self { reserve_in, reserve_out, ..self }))
    }

    /// The same pool traded the other way
    pub fn reversed(self) -> Self {
        Self { reserve_in: self.reserve_out, reserve_out: self.reserve_in, ..self }
    }
}

/// Coefficients of `P·x / (Q + K·x)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mobius {
    pub p: Wide,
    pub q: Wide,
    pub k: Wide,
}

pub(crate) fn widen(value: U256) -> Wide {
    let mut limbs = [0u64; 16];
    limbs[..4].copy_from_slice(value.as_limbs());
    Wide::from_limbs(limbs)
}

pub(crate) fn narrow(value: Wide) -> Option<U256> {
    let limbs = value.as_limbs();
    if limbs[4..].iter().any(|l| *l != 0) {
        return None;
    }
    Some(U256::from_limbs([limbs[0], limbs[1], limbs[2], limbs[3]]))
}

pub(crate) fn isqrt_wide(value: Wide) -> Wide {
    if value < Wide::from(2u64) {
        return value;
    }
    let mut x = Wide::from(1u64) << value.bit_len().div_ceil(2);
    loop {
        let y = (x + value / x) >> 1;
        if y >= x {
            return x;
        }
        x = y;
    }
}

impl Mobius {
    /// Composes the hops in order. `None` on overflow.
    pub fn compose(hops: &[Hop]) -> Option<Self> {
        let mut map = Mobius { p: Wide::from(1u64), q: Wide::from(1u64), k: Wide::ZERO };
        for hop in hops {
            let keep = Wide::from(hop.fee.keep());
            let a = keep.checked_mul(widen(hop.reserve_out))?;
            let b = Wide::from(hop.fee.n).checked_mul(widen(hop.reserve_in))?;
            // g(f(x)) = a·p·x / (b·q + (b·k + c·p)·x)
            let k = b.checked_mul(map.k)?.checked_add(keep.checked_mul(map.p)?)?;
            map = Mobius { p: a.checked_mul(map.p)?, q: b.checked_mul(map.q)?, k };
        }
        Some(map)
    }

    /// Profit-maximising input, `None` when no input is profitable
    pub fn optimum(&self) -> Option<U256> {
        if self.p <= self.q || self.k.is_zero() {
            return None;
        }
        let root = isqrt_wide(self.p.checked_mul(self.q)?);
        let x = root.checked_sub(self.q)? / self.k;
        narrow(x).filter(|x| !x.is_zero())
    }
}

/// Exact output of chaining `amount_in` through `hops`
pub fn amount_out(amount_in: U256, hops: &[Hop]) -> Result<U256, QuoteError> {
    hops.iter().try_fold(amount_in, |amount, hop| {
        get_amount_out(amount, hop.reserve_in, hop.reserve_out, hop.fee)
    })
}

/// Hop reserves for `path` after the victim's swaps land.
///
/// A victim swap in the hop's direction adds its input to `reserve_in` and
/// removes its output from `reserve_out`; a swap the other way does the
/// reverse. `None` when a hop is not a known constant-product pool.
pub fn path_hops(path: &Path, pools: &HashMap<Address, Pool>, events: &[SwapEvent]) -> Option<Vec<Hop>> {
    if !path.is_valid() {
        return None;
    }
    path.legs()
        .map(|(_, address, token_in, token_out)| {
            let mut hop = Hop::from_pool(pools.get(&address)?, token_in, token_out)?;
            for event in events.iter().filter(|e| e.pool == address) {
                hop = hop.after(event, token_in)?;
            }
            Some(hop)
        })
        .collect()
}

/// `(amount_in, revenue)` of the best input for `hops`, with revenue taken
/// from the exact integer quote. `(0, 0)` when reserves are degenerate, the
/// arithmetic overflows or no input is profitable.
pub fn optimal_amount_in(hops: &[Hop]) -> (U256, U256) {
    if hops.is_empty() || hops.iter().any(|h| h.reserve_in.is_zero() || h.reserve_out.is_zero()) {
        return (U256::ZERO, U256::ZERO);
    }
    let Some(x) = Mobius::compose(hops).and_then(|m| m.optimum()) else {
        return (U256::ZERO, U256::ZERO);
    };
    match amount_out(x, hops) {
        Ok(out) if out > x => (x, out - x),
        _ => (U256::ZERO, U256::ZERO),
    }
}

/// Closed-form solve of an all-constant-product arbitrage cycle
pub fn solve_arbitrage(path: &Path, pools: &HashMap<Address, Pool>, events: &[SwapEvent]) -> (U256, U256) {
    if !path.is_constant_product() || !path.is_cycle() {
        return (U256::ZERO, U256::ZERO);
    }
    match path_hops(path, pools, events) {
        Some(hops) => optimal_amount_in(&hops),
        None => (U256::ZERO, U256::ZERO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::Dex;

    fn e18(v: u64) -> U256 {
        U256::from(v) * U256::from(10u64).pow(U256::from(18u64))
    }

    fn hop(reserve_in: U256, reserve_out: U256) -> Hop {
        Hop { reserve_in, reserve_out, fee: FeeFraction::default() }
    }

    fn profit(x: U256, hops: &[Hop]) -> U256 {
        amount_out(x, hops).map(|out| out.saturating_sub(x)).unwrap_or_default()
    }

    /// Best profit over an even grid of `steps` inputs up to `max`
    fn grid_best(hops: &[Hop], max: U256, steps: u64) -> (U256, U256) {
        let step = max / U256::from(steps);
        (1..=steps)
            .map(|i| {
                let x = step * U256::from(i);
                (x, profit(x, hops))
            })
            .max_by_key(|(_, p)| *p)
            .unwrap()
    }

    #[test]
    fn test_single_hop_composition_is_the_hop() {
        let hops = [hop(e18(1_000), e18(2_000))];
        let m = Mobius::compose(&hops).unwrap();
        assert_eq!(m.p, widen(U256::from(997u64) * e18(2_000)));
        assert_eq!(m.q, widen(U256::from(1000u64) * e18(1_000)));
        assert_eq!(m.k, Wide::from(997u64));
    }

    #[test]
    fn test_composed_map_matches_chained_quotes() {
        let hops = [hop(e18(1_000), e18(2_000_000)), hop(e18(1_900_000), e18(1_000))];
        let m = Mobius::compose(&hops).unwrap();
        let x = e18(3);
        let formula = narrow(m.p * widen(x) / (m.q + m.k * widen(x))).unwrap();
        let chained = amount_out(x, &hops).unwrap();
        // the composed map is exact; each chained hop floors once
        assert!(formula >= chained && formula - chained <= U256::from(2u64));
    }

    #[test]
    fn test_two_hop_matches_brute_force() {
        let hops = [hop(e18(1_000), e18(2_000_000)), hop(e18(1_900_000), e18(1_000))];
        let (x, revenue) = optimal_amount_in(&hops);
        assert!(x > U256::ZERO);
        assert!(revenue > U256::ZERO);
        let (_, best) = grid_best(&hops, e18(40), 4_000);
        assert!(revenue + U256::from(10u64) >= best, "{} vs {}", revenue, best);
        // neighbours of the optimum do no better beyond rounding
        for delta in [e18(1) / U256::from(100u64), e18(1) / U256::from(10u64)] {
            assert!(revenue + U256::from(10u64) >= profit(x + delta, &hops));
            assert!(revenue + U256::from(10u64) >= profit(x - delta, &hops));
        }
    }

    #[test]
    fn test_three_hop_with_mixed_fees_matches_brute_force() {
        let hops = [
            Hop { reserve_in: e18(500), reserve_out: e18(800_000), fee: FeeFraction::new(10000, 25) },
            Hop { reserve_in: e18(400_000), reserve_out: e18(1_000_000), fee: FeeFraction::new(1000, 2) },
            hop(e18(2_000_000), e18(520)),
        ];
        let (x, revenue) = optimal_amount_in(&hops);
        assert!(x > U256::ZERO && revenue > U256::ZERO);
        let (_, best) = grid_best(&hops, e18(20), 4_000);
        assert!(revenue + U256::from(10u64) >= best, "{} vs {}", revenue, best);
    }

    #[test]
    fn test_no_profit_and_degenerate_reserves() {
        // same price both ways loses the fee twice
        let flat = [hop(e18(1_000), e18(1_000)), hop(e18(1_000), e18(1_000))];
        assert_eq!(optimal_amount_in(&flat), (U256::ZERO, U256::ZERO));
        let empty = [hop(U256::ZERO, e18(1)), hop(e18(1), e18(1))];
        assert_eq!(optimal_amount_in(&empty), (U256::ZERO, U256::ZERO));
        assert_eq!(optimal_amount_in(&[]), (U256::ZERO, U256::ZERO));
    }

    #[test]
    fn test_huge_reserves_fail_closed() {
        let big = U256::MAX >> 20;
        let hops = [hop(big, big), hop(big, big), hop(big, big), hop(big, big)];
        assert!(Mobius::compose(&hops).is_some());
        assert_eq!(optimal_amount_in(&hops), (U256::ZERO, U256::ZERO));
    }

    #[test]
    fn test_victim_trade_applied_before_solving() {
        let w = Address::repeat_byte(0xee);
        let t = Address::repeat_byte(1);
        let (p, q) = (Address::repeat_byte(20), Address::repeat_byte(21));
        let v2 = |r0, r1| PoolState::V2 { reserve0: r0, reserve1: r1, fee: FeeFraction::default() };
        let mut pools = HashMap::new();
        pools.insert(p, Pool::new(p, Dex::UniswapV2, vec![w, t], v2(e18(100), e18(200_000))).unwrap());
        pools.insert(q, Pool::new(q, Dex::PancakeswapV2, vec![t, w], v2(e18(2_000_000), e18(1_000))).unwrap());

        let victim = SwapEvent {
            dex: Dex::UniswapV2,
            pool: p,
            token_in: w,
            token_out: t,
            amount_in: e18(10),
            amount_out: get_amount_out(e18(10), e18(100), e18(200_000), FeeFraction::default()).unwrap(),
        };
        let path = Path::new(U256::ZERO, &[(Dex::PancakeswapV2, q), (Dex::UniswapV2, p)], vec![w, t, w]);

        let hops = path_hops(&path, &pools, std::slice::from_ref(&victim)).unwrap();
        assert_eq!((hops[0].reserve_in, hops[0].reserve_out), (e18(1_000), e18(2_000_000)));
        // the victim bought T on P, so selling T back there pays more
        assert_eq!(hops[1].reserve_in, e18(200_000) - victim.amount_out);
        assert_eq!(hops[1].reserve_out, e18(110));

        let (x, revenue) = solve_arbitrage(&path, &pools, &[victim]);
        assert!(x > U256::ZERO && revenue > U256::ZERO);
        let (before_x, _) = solve_arbitrage(&path, &pools, &[]);
        assert!(before_x < x);
    }
}
