//! Concentrated-liquidity quoting.
//!
//! Quotes walk the tick bitmap the same way the pool contract does. Tick words
//! come from a bounded per-worker cache. Quoting itself never touches the
//! network: a word that is absent or stale surfaces as
//! `QuoteError::MissingTickWord`, a `TickWordLoader` fills it and the quote is
//! run again.

pub mod swap_math;
pub mod tick_bitmap;
pub mod tick_math;

use std::num::NonZeroUsize;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use lru::LruCache;

use crate::dex::arith::{add, sub};
use crate::dex::Pool;
use crate::error::QuoteError;
use swap_math::compute_swap_step;
use tick_bitmap::{compress, next_initialized_tick_within_one_word, position};
use tick_math::{get_sqrt_ratio_at_tick, get_tick_at_sqrt_ratio, MAX_SQRT_RATIO, MAX_TICK, MIN_SQRT_RATIO, MIN_TICK};

/// Swap loop iterations allowed before a quote is abandoned
pub const MAX_SWAP_STEPS: usize = 128;

/// Bitmap words read on each side of a word a quote needs
pub const TICK_WORD_RADIUS: i16 = 2;

pub fn tick_spacing_for_fee(fee: u32) -> Option<i32> {
    match fee {
        100 => Some(1),
        500 => Some(10),
        2500 => Some(50),
        3000 => Some(60),
        10000 => Some(200),
        _ => None,
    }
}

/// slot0 and in-range liquidity of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V3State {
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub liquidity: u128,
    /// Fee in hundredths of a bip
    pub fee: u32,
    pub tick_spacing: i32,
}

impl V3State {
    /// Word positions a quote of moderate size will read around the current tick
    pub fn words_around(&self, radius: i16) -> Vec<i16> {
        let (center, _) = position(compress(self.tick, self.tick_spacing));
        (center.saturating_sub(radius)..=center.saturating_add(radius)).collect()
    }

    /// State of the pool after `swap` executes
    pub fn after(&self, swap: &SwapResult) -> V3State {
        V3State {
            sqrt_price_x96: swap.sqrt_price_x96,
            tick: swap.tick,
            liquidity: swap.liquidity,
            ..self.clone()
        }
    }
}

/// Source of tick bitmap words and per-tick liquidity deltas
pub trait TickDataProvider {
    fn bitmap_word(&mut self, word_pos: i16) -> Result<U256, QuoteError>;
    fn liquidity_net(&mut self, tick: i32, tick_spacing: i32) -> Result<i128, QuoteError>;
}

/// Fetches tick words of one pool into the cache at a block
#[async_trait]
pub trait TickWordLoader: Send + Sync {
    /// Reads `words` of `pool` at `block`, returning how many were cached
    async fn load_words(
        &self,
        pool: &Pool,
        words: &[i16],
        block: u64,
        cache: &mut V3TickCache,
    ) -> eyre::Result<usize>;
}

/// One bitmap word of a pool with the liquidity net of its initialized ticks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickWord {
    pub bitmap: U256,
    pub liquidity_net: Vec<(i32, i128)>,
    /// Block the word was read at
    pub block: u64,
}

/// Bounded LRU of tick words keyed by `(pool, word)`
pub struct V3TickCache {
    words: LruCache<(Address, i16), TickWord>,
}

impl V3TickCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            words: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    pub fn insert(&mut self, pool: Address, word_pos: i16, word: TickWord) {
        self.words.put((pool, word_pos), word);
    }

    /// A word is usable when it was read at or after `block`
    pub fn is_fresh(&self, pool: Address, word_pos: i16, block: u64) -> bool {
        self.words
            .peek(&(pool, word_pos))
            .is_some_and(|word| word.block >= block)
    }

    pub fn get(&mut self, pool: Address, word_pos: i16, block: u64) -> Option<&TickWord> {
        self.words
            .get(&(pool, word_pos))
            .filter(|word| word.block >= block)
    }

    /// Words of `pool` that are missing or stale at `block`
    pub fn missing(&self, pool: Address, words: &[i16], block: u64) -> Vec<i16> {
        words
            .iter()
            .copied()
            .filter(|w| !self.is_fresh(pool, *w, block))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Cache view for a single pool at a single block
pub struct PoolTicks<'a> {
    cache: &'a mut V3TickCache,
    pool: Address,
    block: u64,
}

impl<'a> PoolTicks<'a> {
    pub fn new(cache: &'a mut V3TickCache, pool: Address, block: u64) -> Self {
        Self { cache, pool, block }
    }

    fn word(&mut self, word_pos: i16) -> Result<&TickWord, QuoteError> {
        let (pool, block) = (self.pool, self.block);
        self.cache
            .get(pool, word_pos, block)
            .ok_or(QuoteError::MissingTickWord(pool, word_pos))
    }
}

impl TickDataProvider for PoolTicks<'_> {
    fn bitmap_word(&mut self, word_pos: i16) -> Result<U256, QuoteError> {
        Ok(self.word(word_pos)?.bitmap)
    }

    fn liquidity_net(&mut self, tick: i32, tick_spacing: i32) -> Result<i128, QuoteError> {
        let (word_pos, _) = position(compress(tick, tick_spacing));
        Ok(self
            .word(word_pos)?
            .liquidity_net
            .iter()
            .find(|(t, _)| *t == tick)
            .map(|(_, net)| *net)
            .unwrap_or(0))
    }
}

/// Outcome of an exact-input swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapResult {
    pub amount_in: U256,
    pub amount_out: U256,
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub liquidity: u128,
    pub ticks_crossed: usize,
}

pub fn quote_exact_input<P: TickDataProvider + ?Sized>(
    state: &V3State,
    amount_in: U256,
    zero_for_one: bool,
    ticks: &mut P,
) -> Result<SwapResult, QuoteError> {
    quote_exact_input_bounded(state, amount_in, zero_for_one, ticks, MAX_SWAP_STEPS)
}

/// Exact-input quote that gives up after `max_steps` loop iterations.
///
/// Input that cannot be filled before the price limit is an error rather than
/// a partial fill.
pub fn quote_exact_input_bounded<P: TickDataProvider + ?Sized>(
    state: &V3State,
    amount_in: U256,
    zero_for_one: bool,
    ticks: &mut P,
    max_steps: usize,
) -> Result<SwapResult, QuoteError> {
    let one = U256::from(1u64);
    let price_limit = if zero_for_one {
        MIN_SQRT_RATIO + one
    } else {
        MAX_SQRT_RATIO - one
    };
    if state.tick_spacing <= 0 {
        return Err(QuoteError::OutOfBounds("tick spacing"));
    }
    if (zero_for_one && state.sqrt_price_x96 <= price_limit) || (!zero_for_one && state.sqrt_price_x96 >= price_limit) {
        return Err(QuoteError::OutOfBounds("price already at limit"));
    }

    let mut remaining = amount_in;
    let mut amount_out = U256::ZERO;
    let mut sqrt_price = state.sqrt_price_x96;
    let mut tick = state.tick;
    let mut liquidity = state.liquidity;
    let mut ticks_crossed = 0usize;
    let mut steps = 0usize;

    while !remaining.is_zero() && sqrt_price != price_limit {
        if steps == max_steps {
            return Err(QuoteError::TickBudgetExceeded(max_steps));
        }
        steps += 1;

        let step_start = sqrt_price;
        let (next_tick, initialized) =
            next_initialized_tick_within_one_word(ticks, tick, state.tick_spacing, zero_for_one)?;
        let next_tick = next_tick.clamp(MIN_TICK, MAX_TICK);
        let sqrt_next = get_sqrt_ratio_at_tick(next_tick)?;

        let target = if zero_for_one {
            sqrt_next.max(price_limit)
        } else {
            sqrt_next.min(price_limit)
        };

        let step = compute_swap_step(sqrt_price, target, liquidity, remaining, state.fee)?;
        remaining = sub(remaining, add(step.amount_in, step.fee_amount)?)?;
        amount_out = add(amount_out, step.amount_out)?;
        sqrt_price = step.sqrt_price_next_x96;

        if sqrt_price == sqrt_next {
            if initialized {
                let mut net = ticks.liquidity_net(next_tick, state.tick_spacing)?;
                if zero_for_one {
                    net = -net;
                }
                liquidity = add_delta(liquidity, net)?;
                ticks_crossed += 1;
            }
            tick = if zero_for_one { next_tick - 1 } else { next_tick };
        } else if sqrt_price != step_start {
            tick = get_tick_at_sqrt_ratio(sqrt_price)?;
        }
    }

    if !remaining.is_zero() {
        return Err(QuoteError::InsufficientLiquidity);
    }

    Ok(SwapResult {
        amount_in,
        amount_out,
        sqrt_price_x96: sqrt_price,
        tick,
        liquidity,
        ticks_crossed,
    })
}

fn add_delta(liquidity: u128, delta: i128) -> Result<u128, QuoteError> {
    if delta < 0 {
        liquidity
            .checked_sub(delta.unsigned_abs())
            .ok_or(QuoteError::OutOfBounds("liquidity underflow"))
    } else {
        liquidity.checked_add(delta as u128).ok_or(QuoteError::Overflow)
    }
}
