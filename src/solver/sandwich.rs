//! Front-run sizing for constant-product sandwiches.
//!
//! The front-run `x` is the largest input that still leaves the victim at
//! least `m = floor(out * (1 - slippage))`. With `c = n - s` and the victim
//! pool's reserves `R -> R_out`, the victim output after the front-run stays
//! at `m` exactly when
//!
//! `n·c·m·x² + (n(n + c)R + c²v)·m·x + (n²R² + n·c·R·v)·m - n·c·R·R_out·v = 0`

use std::collections::HashMap;

use alloy::primitives::{Address, U256};
use tracing::trace;

use super::closed_form::{isqrt_wide, narrow, widen, Hop, Wide};
use crate::dex::uniswap_v2::get_amount_in;
use crate::dex::Pool;
use crate::error::QuoteError;
use crate::types::{Path, SwapEvent};

/// Rounding can leave the victim a few wei short; the front-run is shaved by
/// 0.1% per retry.
const SHAVE_RETRIES: usize = 16;

/// Victim's minimum output under `slippage_bps`
pub fn minimum_out(amount_out: U256, slippage_bps: u64) -> U256 {
    amount_out * U256::from(10_000u64.saturating_sub(slippage_bps)) / U256::from(10_000u64)
}

/// Largest front-run on `hop` that keeps a victim trading `victim_in` above
/// `min_out`. `None` when there is no room.
pub fn max_front_run(hop: Hop, victim_in: U256, min_out: U256) -> Option<U256> {
    let (n, c) = (Wide::from(hop.fee.n), Wide::from(hop.fee.keep()));
    let (r, r_out) = (widen(hop.reserve_in), widen(hop.reserve_out));
    let (v, m) = (widen(victim_in), widen(min_out));
    if m.is_zero() || v.is_zero() {
        return None;
    }

    let nc = n.checked_mul(c)?;
    let a = nc.checked_mul(m)?;
    let b = n
        .checked_mul(n.checked_add(c)?)?
        .checked_mul(r)?
        .checked_add(c.checked_mul(c)?.checked_mul(v)?)?
        .checked_mul(m)?;
    let held = n
        .checked_mul(n)?
        .checked_mul(r)?
        .checked_mul(r)?
        .checked_add(nc.checked_mul(r)?.checked_mul(v)?)?
        .checked_mul(m)?;
    let room = nc.checked_mul(r)?.checked_mul(r_out)?.checked_mul(v)?;
    // the constant term is `held - room` and must be negative
    let neg_c = room.checked_sub(held)?;
    if neg_c.is_zero() {
        return None;
    }

    let disc = b
        .checked_mul(b)?
        .checked_add(Wide::from(4u64).checked_mul(a)?.checked_mul(neg_c)?)?;
    let x = isqrt_wide(disc).checked_sub(b)? / a.checked_mul(Wide::from(2u64))?;
    narrow(x).filter(|x| !x.is_zero())
}

/// Front-run then victim on `hop`, shaving `x` until the victim clears
/// `min_out`. Returns `(x, tokens bought, hop after both trades)`.
fn front_and_victim(hop: Hop, mut x: U256, victim_in: U256, min_out: U256) -> Option<(U256, U256, Hop)> {
    for _ in 0..SHAVE_RETRIES {
        if x.is_zero() {
            return None;
        }
        let (bought, moved) = hop.swap(x).ok()?;
        let (victim_out, moved) = moved.swap(victim_in).ok()?;
        if victim_out >= min_out {
            return Some((x, bought, moved));
        }
        x = x * U256::from(999u64) / U256::from(1000u64);
    }
    None
}

/// Sells `amount` back through `hop` reversed
fn back_run(hop: Hop, amount: U256) -> Result<(U256, Hop), QuoteError> {
    hop.reversed().swap(amount)
}

/// `(front_amount_in, revenue)` in the wrapped token for a 1- or 2-hop
/// sandwich path ending on the victim's pool. `(0, 0)` when the pools are not
/// constant-product, the victim leaves no room or the sandwich loses.
pub fn solve_sandwich(
    path: &Path,
    pools: &HashMap<Address, Pool>,
    victim: &SwapEvent,
    slippage_bps: u64,
) -> (U256, U256) {
    let nothing = (U256::ZERO, U256::ZERO);
    if !path.is_valid() || !path.is_constant_product() || path.pools.last() != Some(&victim.pool) {
        return nothing;
    }
    let legs: Vec<_> = path.legs().collect();
    let Some(&(_, victim_pool, token_in, token_out)) = legs.last() else {
        return nothing;
    };
    if victim.token_in != token_in || victim.token_out != token_out {
        return nothing;
    }
    let Some(target) = pools.get(&victim_pool).and_then(|p| Hop::from_pool(p, token_in, token_out)) else {
        return nothing;
    };

    let min_out = minimum_out(victim.amount_out, slippage_bps);
    let Some(x) = max_front_run(target, victim.amount_in, min_out) else {
        trace!("No sandwich room on {}", victim_pool);
        return nothing;
    };
    let Some((x, bought, moved)) = front_and_victim(target, x, victim.amount_in, min_out) else {
        return nothing;
    };
    let Ok((recovered, _)) = back_run(moved, bought) else {
        return nothing;
    };

    match legs.as_slice() {
        [_] => {
            if recovered > x {
                (x, recovered - x)
            } else {
                nothing
            }
        }
        [(_, first_pool, wrapped, mid), _] => {
            let Some(first) = pools.get(first_pool).and_then(|p| Hop::from_pool(p, *wrapped, *mid)) else {
                return nothing;
            };
            // buy exactly `x` of the victim's input token with the wrapped token
            let Ok(cost) = get_amount_in(x, first.reserve_in, first.reserve_out, first.fee) else {
                return nothing;
            };
            let Ok((_, first)) = first.swap(cost) else {
                return nothing;
            };
            match back_run(first, recovered) {
                Ok((wrapped_out, _)) if wrapped_out > cost => (cost, wrapped_out - cost),
                _ => nothing,
            }
        }
        _ => nothing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::uniswap_v2::get_amount_out;
    use crate::dex::{Dex, FeeFraction, PoolState};

    const W: Address = Address::repeat_byte(0xee);

    fn e18(v: u64) -> U256 {
        U256::from(v) * U256::from(10u64).pow(U256::from(18u64))
    }

    fn hop(reserve_in: U256, reserve_out: U256) -> Hop {
        Hop { reserve_in, reserve_out, fee: FeeFraction::default() }
    }

    fn v2_pool(address: Address, dex: Dex, tokens: [Address; 2], r0: U256, r1: U256) -> Pool {
        let state = PoolState::V2 { reserve0: r0, reserve1: r1, fee: FeeFraction::default() };
        Pool::new(address, dex, tokens.to_vec(), state).unwrap()
    }

    fn victim_on(pool: Address, token_in: Address, token_out: Address, amount_in: U256, h: Hop) -> SwapEvent {
        SwapEvent {
            dex: Dex::UniswapV2,
            pool,
            token_in,
            token_out,
            amount_in,
            amount_out: get_amount_out(amount_in, h.reserve_in, h.reserve_out, h.fee).unwrap(),
        }
    }

    #[test]
    fn test_minimum_out() {
        assert_eq!(minimum_out(U256::from(10_000u64), 100), U256::from(9_900u64));
        assert_eq!(minimum_out(U256::from(999u64), 100), U256::from(989u64));
    }

    #[test]
    fn test_front_run_is_tight() {
        let target = hop(e18(100), e18(200_000));
        let v = e18(5);
        let out = get_amount_out(v, target.reserve_in, target.reserve_out, target.fee).unwrap();
        let min_out = minimum_out(out, 100);
        let x = max_front_run(target, v, min_out).unwrap();
        let (x, _, _) = front_and_victim(target, x, v, min_out).unwrap();

        // a visibly larger front-run breaks the victim's limit
        let bigger = x + x / U256::from(100u64);
        let (_, moved) = target.swap(bigger).unwrap();
        let (victim_out, _) = moved.swap(v).unwrap();
        assert!(victim_out < min_out);
    }

    #[test]
    fn test_no_room_without_slippage() {
        let target = hop(e18(100), e18(200_000));
        let v = e18(5);
        let out = get_amount_out(v, target.reserve_in, target.reserve_out, target.fee).unwrap();
        assert!(max_front_run(target, v, out).is_none());
        assert!(max_front_run(target, v, U256::ZERO).is_none());
    }

    #[test]
    fn test_one_hop_sandwich_profits() {
        let t = Address::repeat_byte(1);
        let p = Address::repeat_byte(20);
        let mut pools = HashMap::new();
        pools.insert(p, v2_pool(p, Dex::UniswapV2, [W, t], e18(100), e18(200_000)));
        let victim = victim_on(p, W, t, e18(10), hop(e18(100), e18(200_000)));
        let path = Path::new(victim.amount_in, &[(Dex::UniswapV2, p)], vec![W, t]);

        let (x, revenue) = solve_sandwich(&path, &pools, &victim, 100);
        assert!(x > U256::ZERO);
        assert!(revenue > U256::ZERO);
    }

    #[test]
    fn test_two_hop_sandwich_pays_for_the_first_pool() {
        let (a, b) = (Address::repeat_byte(1), Address::repeat_byte(2));
        let (f, p) = (Address::repeat_byte(30), Address::repeat_byte(31));
        let mut pools = HashMap::new();
        pools.insert(f, v2_pool(f, Dex::PancakeswapV2, [a, W], e18(5_000_000), e18(5_000)));
        pools.insert(p, v2_pool(p, Dex::UniswapV2, [a, b], e18(100_000), e18(100_000)));
        let victim = victim_on(p, a, b, e18(10_000), hop(e18(100_000), e18(100_000)));
        let path = Path::new(U256::ZERO, &[(Dex::PancakeswapV2, f), (Dex::UniswapV2, p)], vec![W, a, b]);

        let (cost, revenue) = solve_sandwich(&path, &pools, &victim, 100);
        assert!(cost > U256::ZERO);
        assert!(revenue > U256::ZERO);

        // the one-hop sandwich on the same pool in A terms earns more than the
        // wrapped revenue converted back, since the first pool charges twice
        let direct = Path::new(U256::ZERO, &[(Dex::UniswapV2, p)], vec![a, b]);
        let (_, direct_revenue) = solve_sandwich(&direct, &pools, &victim, 100);
        assert!(direct_revenue / U256::from(1_000u64) > revenue);
    }

    #[test]
    fn test_mismatched_victim_is_ignored() {
        let t = Address::repeat_byte(1);
        let p = Address::repeat_byte(20);
        let mut pools = HashMap::new();
        pools.insert(p, v2_pool(p, Dex::UniswapV2, [W, t], e18(100), e18(200_000)));
        let mut victim = victim_on(p, W, t, e18(10), hop(e18(100), e18(200_000)));
        victim.pool = Address::repeat_byte(21);
        let path = Path::new(victim.amount_in, &[(Dex::UniswapV2, p)], vec![W, t]);
        assert_eq!(solve_sandwich(&path, &pools, &victim, 100), (U256::ZERO, U256::ZERO));
    }
}
