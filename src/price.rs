//! Token prices in native-token terms, for revenue conversion

use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use eyre::{eyre, Result};
use tracing::debug;

use crate::dex::arith::full_mul_div;
use crate::dex::fetch::StateFetcher;
use crate::dex::{Dex, Pool, PoolState};

/// Value of `amount` of `token` in `wrapped`, priced at the spot rate of
/// `pool`. `None` when the pool does not pair the two tokens or is empty.
///
/// For a concentrated pool the spot price is `(sqrtPriceX96 / 2^96)^2` of
/// token1 per token0, so the value is `amount * sqrtP^2 / 2^192` when the
/// token is token0 and `amount * 2^192 / sqrtP^2` otherwise.
pub fn native_value(amount: U256, token: Address, wrapped: Address, pool: &Pool) -> Option<U256> {
    if token == wrapped {
        return Some(amount);
    }
    let (i, j) = (pool.index_of(token)?, pool.index_of(wrapped)?);
    match &pool.state {
        PoolState::V2 { reserve0, reserve1, .. } => {
            let (token_reserve, wrapped_reserve) = if i == 0 { (*reserve0, *reserve1) } else { (*reserve1, *reserve0) };
            full_mul_div(amount, wrapped_reserve, token_reserve).ok()
        }
        PoolState::V3(state) => {
            if state.sqrt_price_x96.is_zero() || i == j {
                return None;
            }
            let q96 = U256::from(1u64) << 96;
            if i == 0 {
                let once = full_mul_div(amount, state.sqrt_price_x96, q96).ok()?;
                full_mul_div(once, state.sqrt_price_x96, q96).ok()
            } else {
                let once = full_mul_div(amount, q96, state.sqrt_price_x96).ok()?;
                full_mul_div(once, q96, state.sqrt_price_x96).ok()
            }
        }
        _ => None,
    }
}

/// Prices `amount` of `token` in the wrapped native token through the Pancake
/// V2 pair, falling back to the first Pancake V3 pool
pub async fn token_native_value<P: Provider>(
    fetcher: &StateFetcher<P>,
    token: Address,
    wrapped: Address,
    amount: U256,
    block: Option<u64>,
) -> Result<U256> {
    if token == wrapped || amount.is_zero() {
        return Ok(amount);
    }
    let found = fetcher.find_pools(wrapped, token).await?;
    let candidates: Vec<(Address, Dex)> = [Dex::PancakeswapV2, Dex::PancakeswapV3]
        .iter()
        .filter_map(|dex| found.iter().find(|(_, d)| d == dex).copied())
        .collect();
    let pools = fetcher.load_pools(&candidates, block).await?;
    pools
        .iter()
        .find_map(|pool| native_value(amount, token, wrapped, pool))
        .ok_or_else(|| {
            debug!("No reference pool prices {} in {}", token, wrapped);
            eyre!("no reference pool for {}", token)
        })
}
