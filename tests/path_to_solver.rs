//! Victim swap -> candidate paths -> closed-form sizing

use std::collections::HashMap;

use alloy::primitives::{Address, U256};
use mev_engine::dex::uniswap_v2::get_amount_out;
use mev_engine::dex::{Dex, FeeFraction, Pool, PoolState};
use mev_engine::graph::{find_arbitrage_paths, find_sandwich_paths, PoolIndex};
use mev_engine::solver::{amount_out, passes_gas_floor, path_hops, solve_arbitrage};
use mev_engine::types::SwapEvent;

const W: Address = Address::repeat_byte(0xee);
const T: Address = Address::repeat_byte(0x01);
const VICTIM_POOL: Address = Address::repeat_byte(0x20);
const LINK_POOL: Address = Address::repeat_byte(0x21);
const SHALLOW_POOL: Address = Address::repeat_byte(0x22);

fn e18(v: u64) -> U256 {
    U256::from(v) * U256::from(10u64).pow(U256::from(18u64))
}

fn v2(address: Address, dex: Dex, reserve_w: U256, reserve_t: U256) -> Pool {
    let state = PoolState::V2 { reserve0: reserve_w, reserve1: reserve_t, fee: FeeFraction::default() };
    Pool::new(address, dex, vec![W, T], state).unwrap()
}

/// Victim pool, a deep link pool at the same price and a shallow decoy
fn market() -> (HashMap<Address, Pool>, PoolIndex) {
    let pools = vec![
        v2(VICTIM_POOL, Dex::UniswapV2, e18(1_000), e18(1_000_000)),
        v2(LINK_POOL, Dex::PancakeswapV2, e18(10_000), e18(10_000_000)),
        v2(SHALLOW_POOL, Dex::BiswapV2, e18(5), e18(5_000)),
    ];
    let mut balances = HashMap::new();
    for pool in &pools {
        let PoolState::V2 { reserve0, reserve1, .. } = pool.state else { unreachable!() };
        balances.insert((pool.address, W), reserve0);
        balances.insert((pool.address, T), reserve1);
    }
    let index = PoolIndex::from_pools(&pools, balances);
    (pools.into_iter().map(|p| (p.address, p)).collect(), index)
}

/// Victim dumps `amount` of T into the victim pool
fn dump(pools: &HashMap<Address, Pool>, amount: U256) -> SwapEvent {
    let PoolState::V2 { reserve0, reserve1, fee } = pools[&VICTIM_POOL].state else { unreachable!() };
    SwapEvent {
        dex: Dex::UniswapV2,
        pool: VICTIM_POOL,
        token_in: T,
        token_out: W,
        amount_in: amount,
        amount_out: get_amount_out(amount, reserve1, reserve0, fee).unwrap(),
    }
}

#[test]
fn test_dump_yields_profitable_back_run() {
    let (pools, index) = market();
    let events = [dump(&pools, e18(100_000))];

    let paths = find_arbitrage_paths(&events, &index, W);
    assert_eq!(paths.len(), 1);
    let path = &paths[0];
    assert_eq!(path.pools, vec![VICTIM_POOL, LINK_POOL]);
    assert_eq!(path.tokens, vec![W, T, W]);

    let (amount_in, revenue) = solve_arbitrage(path, &pools, &events);
    assert!(!amount_in.is_zero());
    assert!(passes_gas_floor(revenue));

    // the closed form beats its neighbours on the post-victim reserves
    let hops = path_hops(path, &pools, &events).unwrap();
    let profit = |x: U256| amount_out(x, &hops).unwrap().saturating_sub(x);
    assert_eq!(profit(amount_in), revenue);
    for neighbour in [amount_in * U256::from(9u64) / U256::from(10u64), amount_in * U256::from(11u64) / U256::from(10u64)] {
        assert!(profit(neighbour) <= revenue);
    }
}

#[test]
fn test_native_buy_cycles_through_deeper_pool() {
    let (pools, index) = market();
    let PoolState::V2 { reserve0, reserve1, fee } = pools[&VICTIM_POOL].state else { unreachable!() };
    let amount = e18(10);
    let events = [SwapEvent {
        dex: Dex::UniswapV2,
        pool: VICTIM_POOL,
        token_in: W,
        token_out: T,
        amount_in: amount,
        amount_out: get_amount_out(amount, reserve0, reserve1, fee).unwrap(),
    }];

    let paths = find_arbitrage_paths(&events, &index, W);
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].pools, vec![LINK_POOL, VICTIM_POOL]);
    assert_eq!(paths[0].tokens.first(), paths[0].tokens.last());

    let (amount_in, revenue) = solve_arbitrage(&paths[0], &pools, &events);
    assert!(!amount_in.is_zero());
    assert!(!revenue.is_zero());
}

#[test]
fn test_no_dislocation_no_revenue() {
    let (pools, index) = market();
    // a dust-sized victim leaves prices inside the fee band
    let events = [dump(&pools, U256::from(1_000u64))];
    let paths = find_arbitrage_paths(&events, &index, W);
    assert_eq!(paths.len(), 1);
    assert_eq!(solve_arbitrage(&paths[0], &pools, &events), (U256::ZERO, U256::ZERO));
}

#[test]
fn test_buy_victim_is_sandwiched_on_its_pool() {
    let (pools, index) = market();
    let PoolState::V2 { reserve0, reserve1, fee } = pools[&VICTIM_POOL].state else { unreachable!() };
    let amount = e18(50);
    let buy = SwapEvent {
        dex: Dex::UniswapV2,
        pool: VICTIM_POOL,
        token_in: W,
        token_out: T,
        amount_in: amount,
        amount_out: get_amount_out(amount, reserve0, reserve1, fee).unwrap(),
    };
    let paths = find_sandwich_paths(&[buy], &index, W);
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].pools, vec![VICTIM_POOL]);
    assert_eq!(paths[0].tokens, vec![W, T]);
    assert_eq!(paths[0].amount_in, amount);
}
