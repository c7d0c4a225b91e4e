//! Closed-form sizing for constant-product paths

pub mod closed_form;
pub mod sandwich;

use std::collections::HashMap;

use alloy::primitives::{Address, U256};

use crate::config::thresholds::GAS_FLOOR;
use crate::dex::uniswap_v3::{TickWordLoader, V3TickCache, MAX_SWAP_STEPS, TICK_WORD_RADIUS};
use crate::dex::{Pool, QuoteContext};
use crate::error::QuoteError;
use crate::types::Path;

pub use closed_form::{amount_out, optimal_amount_in, path_hops, solve_arbitrage, Hop};
pub use sandwich::{max_front_run, minimum_out, solve_sandwich};

/// Revenue worth handing to the simulator
pub fn passes_gas_floor(revenue: U256) -> bool {
    revenue >= U256::from(GAS_FLOOR)
}

/// Exact output of routing `amount_in` through every hop of `path` at the
/// pools' loaded state. Works for any pricing family.
pub fn quote_path(
    path: &Path,
    pools: &HashMap<Address, Pool>,
    amount_in: U256,
    ctx: &mut QuoteContext<'_>,
) -> Result<U256, QuoteError> {
    path.legs().try_fold(amount_in, |amount, (_, pool, token_in, token_out)| {
        let pool = pools.get(&pool).ok_or(QuoteError::UnknownPool(pool))?;
        pool.quote(amount, token_in, token_out, ctx)
    })
}

/// `quote_path` at `block` that reads the tick words the swap reaches but the
/// cache lacks, then quotes again. Gives up after `MAX_SWAP_STEPS` loads.
pub async fn quote_path_loading<L: TickWordLoader + ?Sized>(
    loader: &L,
    path: &Path,
    pools: &HashMap<Address, Pool>,
    amount_in: U256,
    block: u64,
    ticks: &mut V3TickCache,
) -> Result<U256, QuoteError> {
    for _ in 0..MAX_SWAP_STEPS {
        let mut ctx = QuoteContext { block, ticks: &mut *ticks };
        let (address, word) = match quote_path(path, pools, amount_in, &mut ctx) {
            Err(QuoteError::MissingTickWord(address, word)) => (address, word),
            quoted => return quoted,
        };
        let pool = pools.get(&address).ok_or(QuoteError::UnknownPool(address))?;
        let words: Vec<i16> = (word.saturating_sub(TICK_WORD_RADIUS)..=word.saturating_add(TICK_WORD_RADIUS)).collect();
        loader
            .load_words(pool, &words, block, ticks)
            .await
            .map_err(|e| QuoteError::Fetch(e.to_string()))?;
        if !ticks.is_fresh(address, word, block) {
            return Err(QuoteError::Fetch(format!("tick word {} of {} unreadable at block {}", word, address, block)));
        }
    }
    Err(QuoteError::TickBudgetExceeded(MAX_SWAP_STEPS))
}
