//! Batched pool state refresh.
//!
//! Every read goes through Multicall3 pinned to one block. Pools whose reads
//! revert are skipped with a debug log rather than failing the whole refresh.

use std::collections::HashMap;

use alloy::primitives::aliases::{I24, U24};
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::Provider;
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use eyre::Result;
use tracing::{debug, info};

use super::curve::base_pool::BasePoolState;
use super::curve::crypto::CryptoSwapState;
use super::curve::pool_info::{self, CurveFamily, CurvePoolInfo, StableKind, POOLS};
use super::curve::stable::{LendingRate, MetaState, StableSwapState};
use super::curve::stable_ng::StableNgState;
use super::curve::tricrypto::TriCryptoState;
use super::curve::tricrypto_ng::TriCryptoNgState;
use super::uniswap_v3::{TickWord, TickWordLoader, V3State, V3TickCache};
use super::{Amm, Dex, FeeFraction, Pool, PoolState};
use crate::config::contracts::{MULTICALL3, TICK_LENS};
use crate::config::factories::{self, FeeSource, Lookup, FACTORIES, V3_FEE_TIERS};
use crate::multicall::{batch_call, decode, Call};

sol! {
    interface IPair {
        function token0() external view returns (address);
        function token1() external view returns (address);
        function factory() external view returns (address);
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
        function swapFee() external view returns (uint32);
    }

    interface IPairFees {
        function getPairFees(address pair) external view returns (uint256);
    }

    interface IFactory {
        function getPair(address tokenA, address tokenB) external view returns (address);
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address);
        function poolByPair(address tokenA, address tokenB) external view returns (address);
    }

    interface IStableFactory {
        function getPair(address tokenA, address tokenB, bool stable) external view returns (address);
    }

    interface IConcentrated {
        function liquidity() external view returns (uint128);
        function fee() external view returns (uint24);
        function tickSpacing() external view returns (int24);
        function tickBitmap(int16 wordPosition) external view returns (uint256);
        // feeProtocol is uint8 on Uniswap and uint32 on PancakeSwap
        function slot0() external view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint32 feeProtocol, bool unlocked);
    }

    interface IAlgebra {
        function globalState() external view returns (uint160 price, int24 tick, uint16 fee, uint16 timepointIndex, uint8 communityFeeToken0, uint8 communityFeeToken1, bool unlocked);
        function tickTable(int16 wordPosition) external view returns (uint256);
        function ticks(int24 tick) external view returns (uint128 liquidityTotal, int128 liquidityDelta, uint256 outerFeeGrowth0Token, uint256 outerFeeGrowth1Token, int56 outerTickCumulative, uint160 outerSecondsPerLiquidity, uint32 outerSecondsSpent, bool initialized);
    }

    interface ITickLens {
        struct PopulatedTick {
            int24 tick;
            int128 liquidityNet;
            uint128 liquidityGross;
        }

        function getPopulatedTicksInWord(address pool, int16 tickBitmapIndex) external view returns (PopulatedTick[] memory populatedTicks);
    }

    interface ICurve {
        function A() external view returns (uint256);
        function fee() external view returns (uint256);
        function coins(uint256 i) external view returns (address);
        function balances(uint256 i) external view returns (uint256);
        function offpeg_fee_multiplier() external view returns (uint256);
        function base_cache_updated() external view returns (uint256);
        function base_virtual_price() external view returns (uint256);
        function get_virtual_price() external view returns (uint256);
        function get_balances() external view returns (uint256[] memory);
        function stored_rates() external view returns (uint256[] memory);
        function gamma() external view returns (uint256);
        function D() external view returns (uint256);
        function fee_gamma() external view returns (uint256);
        function mid_fee() external view returns (uint256);
        function out_fee() external view returns (uint256);
        function future_A_gamma_time() external view returns (uint256);
    }

    interface ICurveV1 {
        function balances(int128 i) external view returns (uint256);
    }

    interface ICryptoPool {
        function price_scale() external view returns (uint256);
    }

    interface ITriCrypto {
        function price_scale(uint256 k) external view returns (uint256);
        function precisions() external view returns (uint256[3] memory);
    }

    interface ILendingCoin {
        function exchangeRateStored() external view returns (uint256);
        function supplyRatePerBlock() external view returns (uint256);
        function accrualBlockNumber() external view returns (uint256);
        function getPricePerFullShare() external view returns (uint256);
    }

    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function totalSupply() external view returns (uint256);
    }

    interface IMulticall3 {
        function getCurrentBlockTimestamp() external view returns (uint256);
        function getBlockNumber() external view returns (uint256);
    }
}

/// Which value of a contract a batched read returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Field {
    Token0,
    Token1,
    Factory,
    Reserves,
    SwapFee,
    PairFees,
    Slot0,
    GlobalState,
    Liquidity,
    Fee,
    TickSpacing,
    Bitmap(i16),
    Populated(i16),
    Tick(i32),
    A,
    Balance(usize),
    Coin(usize),
    Offpeg,
    ExchangeRate,
    SupplyRate,
    AccrualBlock,
    PricePerShare,
    BaseCacheUpdated,
    BaseVirtualPrice,
    VirtualPrice,
    TotalSupply,
    Balances,
    StoredRates,
    Gamma,
    D,
    PriceScale(usize),
    Precisions,
    FeeGamma,
    MidFee,
    OutFee,
    FutureAGammaTime,
    Timestamp,
    BlockNumber,
    Lookup(u32),
    BalanceOf(Address),
}

type Key = (Address, Field);

/// Decoded view over one batch
struct Reads(HashMap<Key, Option<Bytes>>);

impl Reads {
    fn get<C: SolCall>(&self, target: Address, field: Field) -> Option<C::Return> {
        decode::<C>(self.0.get(&(target, field)).and_then(Option::as_ref))
    }
}

/// Collects keyed calls for one batch
#[derive(Default)]
struct Batch(Vec<(Key, Call)>);

impl Batch {
    fn push<C: SolCall>(&mut self, target: Address, field: Field, call: C) {
        self.push_as((target, field), target, call);
    }

    /// Queues a call to `target` stored under a key of another contract
    fn push_as<C: SolCall>(&mut self, key: Key, target: Address, call: C) {
        self.0.push((key, Call::new(target, call)));
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Reads pool state through Multicall3
pub struct StateFetcher<P> {
    provider: P,
    chunk_size: usize,
}

impl<P: Provider> StateFetcher<P> {
    pub fn new(provider: P, chunk_size: usize) -> Self {
        Self { provider, chunk_size }
    }

    async fn run(&self, batch: Batch, block: Option<u64>) -> Result<Reads> {
        Ok(Reads(batch_call(&self.provider, batch.0, self.chunk_size, block).await?))
    }

    /// Loads tokens and reserve state for `(address, dex)` pairs at `block`
    pub async fn load_pools(&self, specs: &[(Address, Dex)], block: Option<u64>) -> Result<Vec<Pool>> {
        let start = std::time::Instant::now();
        let mut batch = Batch::default();
        batch.push(MULTICALL3, Field::Timestamp, IMulticall3::getCurrentBlockTimestampCall {});
        batch.push(MULTICALL3, Field::BlockNumber, IMulticall3::getBlockNumberCall {});
        for (address, dex) in specs {
            queue_pool_reads(&mut batch, *address, *dex);
        }
        let reads = self.run(batch, block).await?;

        let timestamp = reads
            .get::<IMulticall3::getCurrentBlockTimestampCall>(MULTICALL3, Field::Timestamp)
            .map(|t| t.saturating_to::<u64>())
            .unwrap_or_default();
        let block_number = reads
            .get::<IMulticall3::getBlockNumberCall>(MULTICALL3, Field::BlockNumber)
            .map(|n| n.saturating_to::<u64>())
            .or(block)
            .unwrap_or_default();

        let mut pools = Vec::with_capacity(specs.len());
        for (address, dex) in specs {
            match assemble_pool(&reads, *address, *dex, block_number, timestamp) {
                Some(pool) => pools.push(pool),
                None => debug!("Skipping {} pool {}: incomplete state", dex, address),
            }
        }
        info!(
            "Loaded {}/{} pools at block {} in {}ms",
            pools.len(),
            specs.len(),
            block_number,
            start.elapsed().as_millis()
        );
        Ok(pools)
    }

    /// Reloads the state of `pools` in place; pools whose reads fail keep their old state
    pub async fn refresh(&self, pools: &mut [Pool], block: Option<u64>) -> Result<()> {
        let specs: Vec<(Address, Dex)> = pools.iter().map(|p| (p.address, p.dex)).collect();
        let fresh: HashMap<Address, Pool> = self
            .load_pools(&specs, block)
            .await?
            .into_iter()
            .map(|p| (p.address, p))
            .collect();
        for pool in pools.iter_mut() {
            if let Some(updated) = fresh.get(&pool.address) {
                pool.state = updated.state.clone();
            }
        }
        Ok(())
    }

    /// Fills `cache` with the words within `radius` of each concentrated pool's
    /// current tick that are missing or stale at `block`. Returns the number of
    /// words written.
    pub async fn load_tick_words(
        &self,
        pools: &[&Pool],
        radius: i16,
        block: u64,
        cache: &mut V3TickCache,
    ) -> Result<usize> {
        let mut wanted: Vec<(Address, Dex, i32, Vec<i16>)> = Vec::new();
        for pool in pools {
            if let PoolState::V3(state) = &pool.state {
                let words = cache.missing(pool.address, &state.words_around(radius), block);
                if !words.is_empty() {
                    wanted.push((pool.address, pool.dex, state.tick_spacing, words));
                }
            }
        }
        self.read_tick_words(wanted, block, cache).await
    }

    async fn read_tick_words(
        &self,
        wanted: Vec<(Address, Dex, i32, Vec<i16>)>,
        block: u64,
        cache: &mut V3TickCache,
    ) -> Result<usize> {
        if wanted.is_empty() {
            return Ok(0);
        }

        let mut batch = Batch::default();
        for (pool, dex, _, words) in &wanted {
            for word in words {
                if *dex == Dex::ThenaFusion {
                    batch.push(*pool, Field::Bitmap(*word), IAlgebra::tickTableCall { wordPosition: *word });
                } else {
                    batch.push(*pool, Field::Bitmap(*word), IConcentrated::tickBitmapCall { wordPosition: *word });
                    batch.push_as(
                        (*pool, Field::Populated(*word)),
                        TICK_LENS,
                        ITickLens::getPopulatedTicksInWordCall { pool: *pool, tickBitmapIndex: *word },
                    );
                }
            }
        }
        let reads = self.run(batch, Some(block)).await?;

        // Algebra pools expose no lens; read each initialized tick directly
        let mut tick_batch = Batch::default();
        for (pool, dex, spacing, words) in &wanted {
            if *dex != Dex::ThenaFusion {
                continue;
            }
            for word in words {
                if let Some(bitmap) = reads.get::<IAlgebra::tickTableCall>(*pool, Field::Bitmap(*word)) {
                    for tick in initialized_ticks(*word, bitmap, *spacing) {
                        if let Ok(arg) = I24::try_from(tick) {
                            tick_batch.push(*pool, Field::Tick(tick), IAlgebra::ticksCall { tick: arg });
                        }
                    }
                }
            }
        }
        let tick_reads = if !tick_batch.is_empty() {
            Some(self.run(tick_batch, Some(block)).await?)
        } else {
            None
        };

        let mut written = 0;
        for (pool, dex, spacing, words) in wanted {
            for word in words {
                let entry = if dex == Dex::ThenaFusion {
                    algebra_word(&reads, tick_reads.as_ref(), pool, word, spacing, block)
                } else {
                    lens_word(&reads, pool, word, block)
                };
                if let Some(entry) = entry {
                    cache.insert(pool, word, entry);
                    written += 1;
                }
            }
        }
        debug!("Loaded {} tick words at block {}", written, block);
        Ok(written)
    }

    /// Pools trading `token_a` against `token_b` across the configured factories
    /// and the known Curve pools
    pub async fn find_pools(&self, token_a: Address, token_b: Address) -> Result<Vec<(Address, Dex)>> {
        let mut batch = Batch::default();
        for factory in FACTORIES.iter() {
            match factory.lookup {
                Lookup::GetPair => {
                    batch.push(factory.address, Field::Lookup(0), IFactory::getPairCall { tokenA: token_a, tokenB: token_b });
                }
                Lookup::GetPairWithBool => {
                    for (k, stable) in [false, true].into_iter().enumerate() {
                        batch.push(
                            factory.address,
                            Field::Lookup(k as u32),
                            IStableFactory::getPairCall { tokenA: token_a, tokenB: token_b, stable },
                        );
                    }
                }
                Lookup::GetPool => {
                    for tier in V3_FEE_TIERS {
                        batch.push(
                            factory.address,
                            Field::Lookup(tier),
                            IFactory::getPoolCall { tokenA: token_a, tokenB: token_b, fee: U24::from(tier) },
                        );
                    }
                }
                Lookup::PoolByPair => {
                    batch.push(factory.address, Field::Lookup(0), IFactory::poolByPairCall { tokenA: token_a, tokenB: token_b });
                }
            }
        }
        let reads = self.run(batch, None).await?;

        let mut found = Vec::new();
        for factory in FACTORIES.iter() {
            let addresses: Vec<Option<Address>> = match factory.lookup {
                Lookup::GetPair => vec![reads.get::<IFactory::getPairCall>(factory.address, Field::Lookup(0))],
                Lookup::GetPairWithBool => (0..2)
                    .map(|k| reads.get::<IStableFactory::getPairCall>(factory.address, Field::Lookup(k)))
                    .collect(),
                Lookup::GetPool => V3_FEE_TIERS
                    .iter()
                    .map(|tier| reads.get::<IFactory::getPoolCall>(factory.address, Field::Lookup(*tier)))
                    .collect(),
                Lookup::PoolByPair => vec![reads.get::<IFactory::poolByPairCall>(factory.address, Field::Lookup(0))],
            };
            found.extend(
                addresses
                    .into_iter()
                    .flatten()
                    .filter(|a| !a.is_zero())
                    .map(|a| (a, factory.dex)),
            );
        }
        found.extend(curve_pools_for(token_a, token_b));
        Ok(found)
    }

    /// `balanceOf(holder)` for each `(holder, token)` pair
    pub async fn token_balances(
        &self,
        holdings: &[(Address, Address)],
        block: Option<u64>,
    ) -> Result<HashMap<(Address, Address), U256>> {
        let mut batch = Batch::default();
        for (holder, token) in holdings {
            batch.push(*token, Field::BalanceOf(*holder), IERC20::balanceOfCall { owner: *holder });
        }
        let reads = self.run(batch, block).await?;
        Ok(holdings
            .iter()
            .filter_map(|(holder, token)| {
                reads
                    .get::<IERC20::balanceOfCall>(*token, Field::BalanceOf(*holder))
                    .map(|b| ((*holder, *token), b))
            })
            .collect())
    }
}

#[async_trait]
impl<P: Provider> TickWordLoader for StateFetcher<P> {
    async fn load_words(&self, pool: &Pool, words: &[i16], block: u64, cache: &mut V3TickCache) -> Result<usize> {
        let PoolState::V3(state) = &pool.state else {
            return Ok(0);
        };
        let words = cache.missing(pool.address, words, block);
        if words.is_empty() {
            return Ok(0);
        }
        self.read_tick_words(vec![(pool.address, pool.dex, state.tick_spacing, words)], block, cache)
            .await
    }
}

/// Known Curve pools listing both tokens
pub fn curve_pools_for(token_a: Address, token_b: Address) -> Vec<(Address, Dex)> {
    POOLS
        .iter()
        .filter(|info| {
            let tokens = listed_tokens(info);
            tokens.contains(&token_a) && tokens.contains(&token_b)
        })
        .map(|info| (info.address, info.dex()))
        .collect()
}

/// Token order a Curve pool is quoted in: underlying coins for meta pools
pub fn listed_tokens(info: &CurvePoolInfo) -> Vec<Address> {
    info.underlying_coins().unwrap_or_else(|| info.coins.to_vec())
}

/// Ticks whose bit is set in `bitmap` at word `word`
pub fn initialized_ticks(word: i16, bitmap: U256, tick_spacing: i32) -> Vec<i32> {
    (0..256usize)
        .filter(|bit| bitmap.bit(*bit))
        .map(|bit| ((word as i32) * 256 + bit as i32) * tick_spacing)
        .collect()
}

fn lens_word(reads: &Reads, pool: Address, word: i16, block: u64) -> Option<TickWord> {
    let bitmap = reads.get::<IConcentrated::tickBitmapCall>(pool, Field::Bitmap(word))?;
    let liquidity_net = if bitmap.is_zero() {
        Vec::new()
    } else {
        reads
            .get::<ITickLens::getPopulatedTicksInWordCall>(pool, Field::Populated(word))?
            .into_iter()
            .map(|t| (t.tick.as_i32(), t.liquidityNet))
            .collect()
    };
    Some(TickWord { bitmap, liquidity_net, block })
}

fn algebra_word(
    reads: &Reads,
    tick_reads: Option<&Reads>,
    pool: Address,
    word: i16,
    spacing: i32,
    block: u64,
) -> Option<TickWord> {
    let bitmap = reads.get::<IAlgebra::tickTableCall>(pool, Field::Bitmap(word))?;
    let mut liquidity_net = Vec::new();
    for tick in initialized_ticks(word, bitmap, spacing) {
        let info = tick_reads?.get::<IAlgebra::ticksCall>(pool, Field::Tick(tick))?;
        liquidity_net.push((tick, info.liquidityDelta));
    }
    Some(TickWord { bitmap, liquidity_net, block })
}

fn queue_pool_reads(batch: &mut Batch, address: Address, dex: Dex) {
    match dex.amm() {
        Amm::ConstantProduct => {
            batch.push(address, Field::Token0, IPair::token0Call {});
            batch.push(address, Field::Token1, IPair::token1Call {});
            batch.push(address, Field::Factory, IPair::factoryCall {});
            batch.push(address, Field::Reserves, IPair::getReservesCall {});
            batch.push(address, Field::SwapFee, IPair::swapFeeCall {});
            for factory in FACTORIES.iter().filter(|f| f.dex == dex) {
                if let FeeSource::FactoryPairFees(_) = factory.fee {
                    batch.push(factory.address, Field::PairFees, IPairFees::getPairFeesCall { pair: address });
                }
            }
        }
        Amm::Concentrated => {
            batch.push(address, Field::Token0, IPair::token0Call {});
            batch.push(address, Field::Token1, IPair::token1Call {});
            batch.push(address, Field::Factory, IPair::factoryCall {});
            batch.push(address, Field::Liquidity, IConcentrated::liquidityCall {});
            batch.push(address, Field::TickSpacing, IConcentrated::tickSpacingCall {});
            if dex == Dex::ThenaFusion {
                batch.push(address, Field::GlobalState, IAlgebra::globalStateCall {});
            } else {
                batch.push(address, Field::Slot0, IConcentrated::slot0Call {});
                batch.push(address, Field::Fee, IConcentrated::feeCall {});
            }
        }
        _ => {
            if let Some(info) = pool_info::lookup(address) {
                queue_curve_reads(batch, info);
            }
        }
    }
}

fn queue_stable_base(batch: &mut Batch, base: &CurvePoolInfo) {
    batch.push(base.address, Field::A, ICurve::ACall {});
    batch.push(base.address, Field::Fee, ICurve::feeCall {});
    batch.push(base.address, Field::VirtualPrice, ICurve::get_virtual_priceCall {});
    for i in 0..base.n_coins {
        queue_balance(batch, base, i);
    }
    if let Some(lp) = base.lp_token {
        batch.push(lp, Field::TotalSupply, IERC20::totalSupplyCall {});
    }
}

fn queue_balance(batch: &mut Batch, info: &CurvePoolInfo, i: usize) {
    if info.vyper_v1 {
        batch.push(info.address, Field::Balance(i), ICurveV1::balancesCall { i: i as i128 });
    } else {
        batch.push(info.address, Field::Balance(i), ICurve::balancesCall { i: U256::from(i) });
    }
}

fn queue_curve_reads(batch: &mut Batch, info: &'static CurvePoolInfo) {
    let pool = info.address;
    batch.push(pool, Field::A, ICurve::ACall {});
    batch.push(pool, Field::Fee, ICurve::feeCall {});
    if info.coins.is_empty() {
        for i in 0..info.n_coins {
            batch.push(pool, Field::Coin(i), ICurve::coinsCall { i: U256::from(i) });
        }
    }

    match info.family {
        CurveFamily::Stable(kind) => {
            for i in 0..info.n_coins {
                queue_balance(batch, info, i);
            }
            match kind {
                StableKind::Aave => batch.push(pool, Field::Offpeg, ICurve::offpeg_fee_multiplierCall {}),
                StableKind::StoredRates | StableKind::Lending => {
                    for (k, coin) in info.coins.iter().enumerate() {
                        if kind == StableKind::StoredRates || info.lending.get(k).copied().unwrap_or(false) {
                            batch.push(*coin, Field::ExchangeRate, ILendingCoin::exchangeRateStoredCall {});
                            batch.push(*coin, Field::SupplyRate, ILendingCoin::supplyRatePerBlockCall {});
                            batch.push(*coin, Field::AccrualBlock, ILendingCoin::accrualBlockNumberCall {});
                        }
                    }
                }
                StableKind::LendingPricePerShare => {
                    for (k, coin) in info.coins.iter().enumerate() {
                        if info.lending.get(k).copied().unwrap_or(false) {
                            batch.push(*coin, Field::PricePerShare, ILendingCoin::getPricePerFullShareCall {});
                        }
                    }
                }
                StableKind::BaseVirtualPrice => {
                    batch.push(pool, Field::BaseCacheUpdated, ICurve::base_cache_updatedCall {});
                    batch.push(pool, Field::BaseVirtualPrice, ICurve::base_virtual_priceCall {});
                    if let Some(base) = info.base_pool.and_then(pool_info::lookup) {
                        queue_stable_base(batch, base);
                    }
                }
                _ => {}
            }
        }
        CurveFamily::StableNg => {
            batch.push(pool, Field::Offpeg, ICurve::offpeg_fee_multiplierCall {});
            batch.push(pool, Field::Balances, ICurve::get_balancesCall {});
            batch.push(pool, Field::StoredRates, ICurve::stored_ratesCall {});
            if let Some(base) = info.base_pool.and_then(pool_info::lookup) {
                queue_stable_base(batch, base);
            }
        }
        CurveFamily::Crypto | CurveFamily::TriCrypto | CurveFamily::TriCryptoNg => {
            batch.push(pool, Field::Gamma, ICurve::gammaCall {});
            batch.push(pool, Field::D, ICurve::DCall {});
            batch.push(pool, Field::FeeGamma, ICurve::fee_gammaCall {});
            batch.push(pool, Field::MidFee, ICurve::mid_feeCall {});
            batch.push(pool, Field::OutFee, ICurve::out_feeCall {});
            batch.push(pool, Field::FutureAGammaTime, ICurve::future_A_gamma_timeCall {});
            for i in 0..info.n_coins {
                batch.push(pool, Field::Balance(i), ICurve::balancesCall { i: U256::from(i) });
            }
            if info.family == CurveFamily::Crypto {
                batch.push(pool, Field::PriceScale(0), ICryptoPool::price_scaleCall {});
            } else {
                for k in 0..2 {
                    batch.push(pool, Field::PriceScale(k), ITriCrypto::price_scaleCall { k: U256::from(k) });
                }
            }
            if info.family == CurveFamily::TriCryptoNg {
                batch.push(pool, Field::Precisions, ITriCrypto::precisionsCall {});
            }
        }
    }
}

/// Exchange of the known factory that deployed `address`. Falls back to `dex`
/// when the factory is unknown or its pools are read another way.
fn deployed_by(reads: &Reads, address: Address, dex: Dex) -> Dex {
    let Some(factory) = reads
        .get::<IPair::factoryCall>(address, Field::Factory)
        .and_then(factories::by_address)
    else {
        return dex;
    };
    let same_reads = factory.dex.amm() == dex.amm() && (factory.dex == Dex::ThenaFusion) == (dex == Dex::ThenaFusion);
    if same_reads {
        factory.dex
    } else {
        dex
    }
}

fn assemble_pool(reads: &Reads, address: Address, dex: Dex, block: u64, timestamp: u64) -> Option<Pool> {
    let dex = deployed_by(reads, address, dex);
    let (tokens, state) = match dex.amm() {
        Amm::ConstantProduct => {
            let tokens = pair_tokens(reads, address)?;
            let reserves = reads.get::<IPair::getReservesCall>(address, Field::Reserves)?;
            let factory = reads.get::<IPair::factoryCall>(address, Field::Factory);
            let fee = v2_fee(reads, address, dex, factory)?;
            let state = PoolState::V2 {
                reserve0: U256::from(reserves.reserve0),
                reserve1: U256::from(reserves.reserve1),
                fee,
            };
            (tokens, state)
        }
        Amm::Concentrated => {
            let tokens = pair_tokens(reads, address)?;
            let liquidity = reads.get::<IConcentrated::liquidityCall>(address, Field::Liquidity)?;
            let tick_spacing = reads
                .get::<IConcentrated::tickSpacingCall>(address, Field::TickSpacing)?
                .as_i32();
            let (sqrt_price_x96, tick, fee) = if dex == Dex::ThenaFusion {
                let gs = reads.get::<IAlgebra::globalStateCall>(address, Field::GlobalState)?;
                (U256::from(gs.price), gs.tick.as_i32(), u32::from(gs.fee))
            } else {
                let slot0 = reads.get::<IConcentrated::slot0Call>(address, Field::Slot0)?;
                let fee = reads.get::<IConcentrated::feeCall>(address, Field::Fee)?;
                (U256::from(slot0.sqrtPriceX96), slot0.tick.as_i32(), fee.to::<u32>())
            };
            if tick_spacing <= 0 {
                return None;
            }
            let state = V3State { sqrt_price_x96, tick, liquidity, fee, tick_spacing };
            (tokens, PoolState::V3(state))
        }
        _ => {
            let info = pool_info::lookup(address)?;
            let tokens = if info.coins.is_empty() {
                (0..info.n_coins)
                    .map(|i| reads.get::<ICurve::coinsCall>(address, Field::Coin(i)))
                    .collect::<Option<Vec<_>>>()?
            } else {
                listed_tokens(info)
            };
            (tokens, curve_state(reads, info, block, timestamp)?)
        }
    };
    Pool::new(address, dex, tokens, state).ok()
}

fn pair_tokens(reads: &Reads, address: Address) -> Option<Vec<Address>> {
    let token0 = reads.get::<IPair::token0Call>(address, Field::Token0)?;
    let token1 = reads.get::<IPair::token1Call>(address, Field::Token1)?;
    Some(vec![token0, token1])
}

fn v2_fee(reads: &Reads, pair: Address, dex: Dex, factory: Option<Address>) -> Option<FeeFraction> {
    let source = match factory {
        Some(f) => factories::fee_source(f),
        None => FACTORIES
            .iter()
            .find(|f| f.dex == dex)
            .map(|f| f.fee)
            .unwrap_or(FeeSource::Fixed(FeeFraction::default())),
    };
    match source {
        FeeSource::Fixed(fee) => Some(fee),
        FeeSource::PairSwapFee(n) => {
            let s = reads.get::<IPair::swapFeeCall>(pair, Field::SwapFee)?;
            fee_fraction(n, u64::from(s))
        }
        FeeSource::FactoryPairFees(n) => {
            let factory = factory?;
            let s = reads.get::<IPairFees::getPairFeesCall>(factory, Field::PairFees)?;
            fee_fraction(n, s.saturating_to::<u64>())
        }
    }
}

fn fee_fraction(n: u64, s: u64) -> Option<FeeFraction> {
    FeeFraction::try_new(n, s)
}

fn read_u256(reads: &Reads, target: Address, field: Field) -> Option<U256> {
    // Every scalar Curve getter returns a single uint256, so any of them decodes the word
    reads.get::<ICurve::ACall>(target, field)
}

fn read_balances(reads: &Reads, info: &CurvePoolInfo) -> Option<Vec<U256>> {
    (0..info.n_coins)
        .map(|i| read_u256(reads, info.address, Field::Balance(i)))
        .collect()
}

fn read_base(reads: &Reads, info: &CurvePoolInfo) -> Option<(BasePoolState, U256)> {
    let base = pool_info::lookup(info.base_pool?)?;
    let state = BasePoolState {
        info: base,
        a: read_u256(reads, base.address, Field::A)?,
        fee: read_u256(reads, base.address, Field::Fee)?,
        balances: read_balances(reads, base)?,
        lp_total_supply: read_u256(reads, base.lp_token?, Field::TotalSupply)?,
    };
    let virtual_price = read_u256(reads, base.address, Field::VirtualPrice)?;
    Some((state, virtual_price))
}

fn curve_state(reads: &Reads, info: &'static CurvePoolInfo, block: u64, timestamp: u64) -> Option<PoolState> {
    let pool = info.address;
    let a = read_u256(reads, pool, Field::A)?;
    let fee = read_u256(reads, pool, Field::Fee)?;

    match info.family {
        CurveFamily::Stable(kind) => {
            let mut state = StableSwapState::new(info, a, fee, read_balances(reads, info)?);
            state.block_number = block;
            state.timestamp = timestamp;
            match kind {
                StableKind::Aave => state.offpeg_fee_multiplier = read_u256(reads, pool, Field::Offpeg)?,
                StableKind::StoredRates | StableKind::Lending => {
                    state.lending_rates = info
                        .coins
                        .iter()
                        .enumerate()
                        .map(|(k, coin)| {
                            if kind == StableKind::Lending && !info.lending.get(k).copied().unwrap_or(false) {
                                return Some(LendingRate::default());
                            }
                            Some(LendingRate {
                                exchange_rate_stored: read_u256(reads, *coin, Field::ExchangeRate)?,
                                supply_rate_per_block: read_u256(reads, *coin, Field::SupplyRate)?,
                                accrual_block: read_u256(reads, *coin, Field::AccrualBlock)?,
                            })
                        })
                        .collect::<Option<Vec<_>>>()?;
                }
                StableKind::LendingPricePerShare => {
                    state.price_per_share = info
                        .coins
                        .iter()
                        .enumerate()
                        .map(|(k, coin)| {
                            if info.lending.get(k).copied().unwrap_or(false) {
                                read_u256(reads, *coin, Field::PricePerShare)
                            } else {
                                Some(U256::ZERO)
                            }
                        })
                        .collect::<Option<Vec<_>>>()?;
                }
                StableKind::BaseVirtualPrice => {
                    let (base, live_virtual_price) = read_base(reads, info)?;
                    state.meta = Some(MetaState {
                        base,
                        base_cache_updated: read_u256(reads, pool, Field::BaseCacheUpdated)?.saturating_to(),
                        base_virtual_price: read_u256(reads, pool, Field::BaseVirtualPrice)?,
                        live_virtual_price,
                    });
                }
                _ => {}
            }
            Some(PoolState::CurveStable(state))
        }
        CurveFamily::StableNg => {
            let base = match info.base_pool {
                Some(_) => Some(read_base(reads, info)?.0),
                None => None,
            };
            Some(PoolState::CurveStableNg(StableNgState {
                info,
                a,
                fee,
                offpeg_fee_multiplier: read_u256(reads, pool, Field::Offpeg)?,
                balances: reads.get::<ICurve::get_balancesCall>(pool, Field::Balances)?,
                stored_rates: reads.get::<ICurve::stored_ratesCall>(pool, Field::StoredRates)?,
                base,
            }))
        }
        CurveFamily::Crypto => {
            let balances = read_balances(reads, info)?;
            Some(PoolState::CurveCrypto(CryptoSwapState {
                info,
                a,
                gamma: read_u256(reads, pool, Field::Gamma)?,
                d: read_u256(reads, pool, Field::D)?,
                price_scale: reads.get::<ICryptoPool::price_scaleCall>(pool, Field::PriceScale(0))?,
                fee_gamma: read_u256(reads, pool, Field::FeeGamma)?,
                mid_fee: read_u256(reads, pool, Field::MidFee)?,
                out_fee: read_u256(reads, pool, Field::OutFee)?,
                future_a_gamma_time: read_u256(reads, pool, Field::FutureAGammaTime)?,
                balances: balances.try_into().ok()?,
            }))
        }
        CurveFamily::TriCrypto | CurveFamily::TriCryptoNg => {
            let balances: [U256; 3] = read_balances(reads, info)?.try_into().ok()?;
            let price_scale = [
                reads.get::<ITriCrypto::price_scaleCall>(pool, Field::PriceScale(0))?,
                reads.get::<ITriCrypto::price_scaleCall>(pool, Field::PriceScale(1))?,
            ];
            let gamma = read_u256(reads, pool, Field::Gamma)?;
            let d = read_u256(reads, pool, Field::D)?;
            let fee_gamma = read_u256(reads, pool, Field::FeeGamma)?;
            let mid_fee = read_u256(reads, pool, Field::MidFee)?;
            let out_fee = read_u256(reads, pool, Field::OutFee)?;
            let future_a_gamma_time = read_u256(reads, pool, Field::FutureAGammaTime)?;
            if info.family == CurveFamily::TriCrypto {
                Some(PoolState::TriCrypto(TriCryptoState {
                    info,
                    a,
                    gamma,
                    d,
                    price_scale,
                    fee_gamma,
                    mid_fee,
                    out_fee,
                    future_a_gamma_time,
                    balances,
                }))
            } else {
                Some(PoolState::TriCryptoNg(TriCryptoNgState {
                    a,
                    gamma,
                    d,
                    price_scale,
                    precisions: reads.get::<ITriCrypto::precisionsCall>(pool, Field::Precisions)?,
                    fee_gamma,
                    mid_fee,
                    out_fee,
                    future_a_gamma_time,
                    balances,
                    timestamp,
                }))
            }
        }
    }
}
