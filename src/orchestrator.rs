//! Worker pool
//!
//! Each worker is an OS thread running its own current-thread runtime with
//! private node connections, fork engine and tick cache. Workers share only
//! the transaction queue and the accessible block value. An evaluation that
//! fails is logged and the worker moves on to the next transaction.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use crossbeam_channel::Receiver;
use eyre::{eyre, Result};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::thresholds::{MIN_SIMULATED_REVENUE, PROBE_AMOUNT, SANDWICH_SLIPPAGE_BPS};
use crate::config::{contracts, tokens, Config};
use crate::dex::fetch::StateFetcher;
use crate::dex::uniswap_v3::{TickWordLoader, V3TickCache, TICK_WORD_RADIUS};
use crate::dex::{Dex, Pool};
use crate::execution::{
    assemble_arbitrage, assemble_sandwich, gate, gate_sandwich, plan_arbitrage, plan_sandwich, BackRunCall,
    FrontRunCall, GateDecision, JsonRpcRelay, Submitter,
};
use crate::graph::path_finder::{arbitrage_link_pairs, find_arbitrage_paths, find_sandwich_paths, sandwich_link_pairs};
use crate::graph::PoolIndex;
use crate::price::token_native_value;
use crate::simulation::{
    maximum_rates, prepare_fork, simulate_arbitrage, simulate_sandwich, AnvilEngine, ForkGuard, SandwichTrial,
    SimulationSettings, Trial,
};
use crate::solver::{passes_gas_floor, quote_path_loading, solve_arbitrage, solve_sandwich};
use crate::stream::{run_accessible_block_feed, run_pending_stream};
use crate::types::{Path, SwapEvent, Transaction};

/// Which attack the workers look for
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Strategy {
    Arbitrage,
    Sandwich,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Arbitrage => write!(f, "arbitrage"),
            Strategy::Sandwich => write!(f, "sandwich"),
        }
    }
}

/// HTTP provider for `url`
pub fn connect(url: &str) -> Result<DynProvider> {
    Ok(ProviderBuilder::new().connect_http(url.parse()?).erased())
}

/// Attacker bytecode to install on every fork. Nothing is installed when a
/// deployed contract is configured.
pub fn load_attacker_code(config: &Config) -> Result<Option<Bytes>> {
    if config.contract_address.is_some() {
        return Ok(None);
    }
    let Some(path) = &config.attacker_bytecode_path else {
        return Err(eyre!("either CONTRACT_ADDRESS or ATTACKER_BYTECODE_PATH must be set"));
    };
    let raw = std::fs::read_to_string(path)?;
    let code = hex::decode(raw.trim().trim_start_matches("0x"))?;
    info!("Loaded {} bytes of attacker code from {}", code.len(), path);
    Ok(Some(Bytes::from(code)))
}

/// Runs both relay streams and the worker pool until the streams end
pub async fn run(config: Config, strategy: Strategy) -> Result<()> {
    let provider = connect(&config.http_endpoint)?;
    let (queue_tx, queue_rx) = crossbeam_channel::bounded(config.queue_capacity);
    let (accessible_tx, accessible_rx) = watch::channel(0i64);

    let workers = spawn_workers(&config, strategy, queue_rx, accessible_rx)?;
    info!("Started {} {} workers (queue capacity {})", workers.len(), strategy, config.queue_capacity);

    tokio::join!(
        run_pending_stream(&config, &provider, queue_tx),
        run_accessible_block_feed(&config, &provider, accessible_tx),
    );
    warn!("Relay streams ended");
    Ok(())
}

/// Starts `config.workers` worker threads on `queue`
pub fn spawn_workers(
    config: &Config,
    strategy: Strategy,
    queue: Receiver<Transaction>,
    accessible: watch::Receiver<i64>,
) -> Result<Vec<JoinHandle<()>>> {
    let attacker_code = load_attacker_code(config)?;
    (0..config.workers)
        .map(|id| {
            let config = config.clone();
            let queue = queue.clone();
            let accessible = accessible.clone();
            let attacker_code = attacker_code.clone();
            thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || run_worker(id, config, strategy, attacker_code, queue, accessible))
                .map_err(Into::into)
        })
        .collect()
}

fn run_worker(
    id: usize,
    config: Config,
    strategy: Strategy,
    attacker_code: Option<Bytes>,
    queue: Receiver<Transaction>,
    accessible: watch::Receiver<i64>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Worker {} has no runtime: {}", id, e);
            return;
        }
    };
    let mut worker = match runtime.block_on(Worker::connect(id, config, strategy, attacker_code, accessible)) {
        Ok(worker) => worker,
        Err(e) => {
            error!("Worker {} failed to start: {}", id, e);
            return;
        }
    };

    while let Ok(victim) = queue.recv() {
        runtime.block_on(worker.evaluate(victim));
    }
    info!("Worker {} stopping: queue closed", id);
}

/// Pool specs for `found` plus the victim's own pools. A pool found through
/// a factory keeps the factory's exchange.
fn merge_specs(found: Vec<(Address, Dex)>, events: &[SwapEvent]) -> Vec<(Address, Dex)> {
    let mut seen = HashSet::new();
    found
        .into_iter()
        .chain(events.iter().map(|e| (e.pool, e.dex)))
        .filter(|(pool, _)| seen.insert(*pool))
        .collect()
}

/// Victim swaps tagged with the exchange their pool loaded as. A trace only
/// tells V2 from V3.
fn resolve_exchanges(events: &[SwapEvent], pools: &HashMap<Address, Pool>) -> Vec<SwapEvent> {
    events
        .iter()
        .map(|event| match pools.get(&event.pool) {
            Some(pool) => SwapEvent { dex: pool.dex, ..event.clone() },
            None => event.clone(),
        })
        .collect()
}

/// Quotes `PROBE_AMOUNT` through each path the closed form cannot size,
/// loading tick words as the swap reaches them. Paths that fail to quote or
/// return nothing are dropped. Kept paths without a size of their own start
/// simulation at the quoted amount.
async fn screen_paths<L: TickWordLoader + ?Sized>(
    loader: &L,
    paths: Vec<Path>,
    pools: &HashMap<Address, Pool>,
    block: u64,
    ticks: &mut V3TickCache,
) -> Vec<Path> {
    let size = U256::from(PROBE_AMOUNT);
    let mut kept = Vec::with_capacity(paths.len());
    for mut path in paths {
        if !path.is_constant_product() {
            match quote_path_loading(loader, &path, pools, size, block, ticks).await {
                Ok(out) if !out.is_zero() => {
                    debug!("{} quotes {} -> {}", path, size, out);
                    if path.amount_in.is_zero() {
                        path.amount_in = size;
                    }
                }
                Ok(_) => {
                    debug!("{} returns nothing for {}", path, size);
                    continue;
                }
                Err(e) => {
                    debug!("{} does not quote: {}", path, e);
                    continue;
                }
            }
        }
        kept.push(path);
    }
    kept
}

/// Every `(pool, token)` balance the index ranks pools by
fn holdings(pools: &[Pool]) -> Vec<(Address, Address)> {
    pools
        .iter()
        .flat_map(|pool| pool.tokens.iter().map(move |token| (pool.address, *token)))
        .collect()
}

/// The victim's swap on the path's final pool
fn victim_event<'a>(path: &Path, victim: &'a Transaction) -> Option<&'a SwapEvent> {
    let target = path.pools.last()?;
    victim.swap_events.iter().find(|e| e.pool == *target)
}

/// Tokens of `path` that are not base tokens
fn non_base_tokens(path: &Path) -> Vec<Address> {
    let mut out: Vec<Address> = Vec::new();
    for token in &path.tokens {
        if !tokens::is_base(*token) && !out.contains(token) {
            out.push(*token);
        }
    }
    out
}

struct Market {
    pools: HashMap<Address, Pool>,
    index: PoolIndex,
}

struct Worker {
    id: usize,
    config: Config,
    strategy: Strategy,
    provider: DynProvider,
    fetcher: StateFetcher<DynProvider>,
    engine: Arc<AnvilEngine<DynProvider>>,
    ticks: V3TickCache,
    settings: SimulationSettings,
    attacker_code: Option<Bytes>,
    accessible: watch::Receiver<i64>,
    submitter: Option<Submitter<DynProvider, JsonRpcRelay>>,
}

impl Worker {
    async fn connect(
        id: usize,
        config: Config,
        strategy: Strategy,
        attacker_code: Option<Bytes>,
        accessible: watch::Receiver<i64>,
    ) -> Result<Self> {
        let provider = connect(&config.http_endpoint)?;
        let fork_url = config.fork_endpoint_for(id).to_string();
        let engine = Arc::new(AnvilEngine::new(connect(&fork_url)?));

        let signer = match &config.account_private_key {
            Some(key) => Some(key.parse::<PrivateKeySigner>()?),
            None => None,
        };
        let owner = signer.as_ref().map(|s| s.address()).unwrap_or(contracts::STATIC_CALLER);
        let submitter = match signer {
            Some(signer) => {
                let chain_id = provider.get_chain_id().await?;
                let relay = JsonRpcRelay::new(config.relay_http_endpoint.clone(), config.relay_authorization.clone())?;
                Some(Submitter::new(provider.clone(), relay, signer, chain_id))
            }
            None => {
                warn!("Worker {} has no signing key; attacks are only logged", id);
                None
            }
        };

        let settings = SimulationSettings {
            attacker: config.attacker(),
            owner,
            trial_timeout: config.trial_timeout,
            path_timeout: config.path_timeout,
        };
        info!("Worker {} ready, forking on {}", id, fork_url);
        Ok(Self {
            id,
            fetcher: StateFetcher::new(provider.clone(), config.multicall_chunk),
            ticks: V3TickCache::new(config.tick_cache_capacity),
            provider,
            engine,
            settings,
            attacker_code,
            accessible,
            submitter,
            strategy,
            config,
        })
    }

    async fn evaluate(&mut self, victim: Transaction) {
        let started = Instant::now();
        debug!("[{}] Worker {} picked up {} swaps", victim.hash, self.id, victim.swap_events.len());
        let outcome = match self.strategy {
            Strategy::Arbitrage => self.evaluate_arbitrage(&victim).await,
            Strategy::Sandwich => self.evaluate_sandwich(&victim).await,
        };
        match outcome {
            Ok(()) => debug!("[{}] Evaluated in {}ms", victim.hash, started.elapsed().as_millis()),
            Err(e) => warn!("[{}] Evaluation failed: {}", victim.hash, e),
        }
    }

    /// Loads every pool trading one of `pairs` plus the victim's pools
    async fn load_market(&self, victim: &Transaction, pairs: &[(Address, Address)], block: u64) -> Result<Market> {
        let mut found = Vec::new();
        for (a, b) in pairs {
            found.extend(self.fetcher.find_pools(*a, *b).await?);
        }
        let specs = merge_specs(found, &victim.swap_events);
        let pools = self.fetcher.load_pools(&specs, Some(block)).await?;
        let balances = self.fetcher.token_balances(&holdings(&pools), Some(block)).await?;
        let index = PoolIndex::from_pools(&pools, balances);
        debug!(
            "[{}] Indexed {} pools over {} tokens",
            victim.hash,
            index.pool_count(),
            index.node_count()
        );
        Ok(Market { pools: pools.into_iter().map(|p| (p.address, p)).collect(), index })
    }

    /// Forks at `block` and pins the fresh state
    async fn fork(&self, block: u64) -> Result<ForkGuard<AnvilEngine<DynProvider>>> {
        prepare_fork(
            self.engine.as_ref(),
            &self.config.http_endpoint,
            block,
            None,
            self.settings.attacker,
            self.attacker_code.clone(),
            self.config.wrapped_native,
        )
        .await?;
        Ok(ForkGuard::new(Arc::clone(&self.engine)).await?)
    }

    /// Drops paths the closed form cannot size that do not quote at the
    /// pre-victim state. Tick words around every concentrated pool are read in
    /// one batch first; words past them load as the quotes reach them.
    async fn quote_paths(&mut self, victim: &Transaction, paths: Vec<Path>, market: &Market, block: u64) -> Vec<Path> {
        let mut pools: Vec<&Pool> = paths
            .iter()
            .filter(|p| !p.is_constant_product())
            .flat_map(|p| p.pools.iter().filter_map(|a| market.pools.get(a)))
            .collect();
        pools.sort_by_key(|p| p.address);
        pools.dedup_by_key(|p| p.address);
        if let Err(e) = self.fetcher.load_tick_words(&pools, TICK_WORD_RADIUS, block, &mut self.ticks).await {
            debug!("[{}] Tick words not preloaded: {}", victim.hash, e);
        }
        let before = paths.len();
        let kept = screen_paths(&self.fetcher, paths, &market.pools, block, &mut self.ticks).await;
        if kept.len() < before {
            debug!("[{}] {} of {} paths do not quote", victim.hash, before - kept.len(), before);
        }
        kept
    }

    async fn evaluate_arbitrage(&mut self, victim: &Transaction) -> Result<()> {
        let wrapped = self.config.wrapped_native;
        let block = self.provider.get_block_number().await?;
        let pairs = arbitrage_link_pairs(&victim.swap_events, wrapped);
        let market = self.load_market(victim, &pairs, block).await?;
        let events = resolve_exchanges(&victim.swap_events, &market.pools);
        let paths = find_arbitrage_paths(&events, &market.index, wrapped);
        if paths.is_empty() {
            debug!("[{}] No arbitrage paths", victim.hash);
            return Ok(());
        }
        info!("[{}] {} arbitrage paths at block {}", victim.hash, paths.len(), block);
        let paths = self.quote_paths(victim, paths, &market, block).await;

        // Every trial reverts to the snapshot pinned here before it runs, so
        // the paths of one victim share the guard.
        let mut guard = self.fork(block).await?;
        let mut best: Option<(Path, Trial, U256)> = None;
        for mut path in paths {
            if path.is_constant_product() {
                let (amount_in, revenue) = solve_arbitrage(&path, &market.pools, &events);
                if !passes_gas_floor(revenue) {
                    debug!("[{}] {} below gas floor: {}", victim.hash, path, revenue);
                    continue;
                }
                path.amount_in = amount_in;
            }
            let trial = match simulate_arbitrage(&mut guard, &self.settings, victim, &path).await {
                Ok(Some(trial)) if trial.output >= U256::from(MIN_SIMULATED_REVENUE) => trial,
                Ok(_) => continue,
                Err(e) => {
                    warn!("[{}] Simulation of {} aborted: {}", victim.hash, path, e);
                    continue;
                }
            };
            let Some(last) = path.tokens.last().copied() else {
                continue;
            };
            match token_native_value(&self.fetcher, last, wrapped, trial.output, Some(block)).await {
                Ok(revenue) => {
                    best = Some((path, trial, revenue));
                    break;
                }
                Err(e) => debug!("[{}] Revenue of {} not priced: {}", victim.hash, path, e),
            }
        }
        if let Err(e) = guard.release().await {
            warn!("[{}] Fork release failed: {}", victim.hash, e);
        }

        let Some((path, trial, revenue)) = best else {
            return Ok(());
        };
        info!(
            "[{}] Arbitrage {} in {} revenue {} gas {}",
            victim.hash, path, trial.amount, revenue, trial.gas_used
        );
        if !self.still_pending(victim).await? {
            info!("[{}] Victim no longer pending", victim.hash);
            return Ok(());
        }

        let decision = gate(revenue, trial.gas_used, victim, *self.accessible.borrow());
        let Some(call) = decision.arbitrage_call() else {
            log_rejection(victim, &decision);
            return Ok(());
        };
        let attack = assemble_arbitrage(&path, trial.amount, revenue, trial.gas_used, call);
        let Some(tx) = plan_arbitrage(&attack, self.config.attacker(), &decision) else {
            return Ok(());
        };
        match &self.submitter {
            Some(submitter) => {
                if let Err(e) = submitter.submit_arbitrage(victim, &tx, &decision).await {
                    warn!("[{}] Arbitrage submission abandoned: {}", victim.hash, e);
                }
            }
            None => info!(
                "[{}] Dry run {} gas limit {} price {} value {}",
                victim.hash, attack.function, tx.gas_limit, tx.gas_price, tx.value
            ),
        }
        Ok(())
    }

    /// Adds each non-base token's pools against the base tokens to the index
    /// so balance rates can compare the path's pools with the deepest
    /// alternative.
    async fn index_base_pools(&self, market: &mut Market, paths: &[Path], block: u64) -> Result<()> {
        let mut wanted: Vec<Address> = Vec::new();
        for path in paths {
            for token in non_base_tokens(path) {
                if !wanted.contains(&token) {
                    wanted.push(token);
                }
            }
        }
        let mut holdings = Vec::new();
        for token in wanted {
            for base in tokens::BASE_TOKENS {
                for (pool, dex) in self.fetcher.find_pools(token, base).await? {
                    market.index.add_pool(pool, dex, &[token, base]);
                    holdings.push((pool, token));
                }
            }
        }
        for ((pool, token), balance) in self.fetcher.token_balances(&holdings, Some(block)).await? {
            market.index.set_balance(pool, token, balance);
        }
        Ok(())
    }

    async fn evaluate_sandwich(&mut self, victim: &Transaction) -> Result<()> {
        let wrapped = self.config.wrapped_native;
        let block = self.provider.get_block_number().await?;
        let pairs = sandwich_link_pairs(&victim.swap_events, wrapped);
        let mut market = self.load_market(victim, &pairs, block).await?;
        let events = resolve_exchanges(&victim.swap_events, &market.pools);
        let paths = find_sandwich_paths(&events, &market.index, wrapped);
        if paths.is_empty() {
            debug!("[{}] No sandwich paths", victim.hash);
            return Ok(());
        }
        info!("[{}] {} sandwich paths at block {}", victim.hash, paths.len(), block);
        let paths = self.quote_paths(victim, paths, &market, block).await;
        self.index_base_pools(&mut market, &paths, block).await?;

        // Trials revert to the pinned snapshot, as for arbitrage
        let mut guard = self.fork(block).await?;
        let mut best: Option<(Path, SandwichTrial, U256)> = None;
        for mut path in paths {
            if path.is_constant_product() {
                let Some(event) = victim_event(&path, victim) else {
                    continue;
                };
                let (amount_in, revenue) = solve_sandwich(&path, &market.pools, event, SANDWICH_SLIPPAGE_BPS);
                if !passes_gas_floor(revenue) {
                    debug!("[{}] {} below gas floor: {}", victim.hash, path, revenue);
                    continue;
                }
                path.amount_in = amount_in;
            }
            let rates = maximum_rates(&path, &market.index);
            let trial = match simulate_sandwich(&mut guard, &self.settings, victim, &path, path.amount_in, &rates).await
            {
                Ok(Some(trial)) if !trial.revenue.is_zero() => trial,
                Ok(_) => continue,
                Err(e) => {
                    warn!("[{}] Simulation of {} aborted: {}", victim.hash, path, e);
                    continue;
                }
            };
            let Some(first) = path.tokens.first().copied() else {
                continue;
            };
            match token_native_value(&self.fetcher, first, wrapped, trial.revenue, Some(block)).await {
                Ok(revenue) => {
                    best = Some((path, trial, revenue));
                    break;
                }
                Err(e) => debug!("[{}] Revenue of {} not priced: {}", victim.hash, path, e),
            }
        }
        if let Err(e) = guard.release().await {
            warn!("[{}] Fork release failed: {}", victim.hash, e);
        }

        let Some((path, trial, revenue)) = best else {
            return Ok(());
        };
        info!(
            "[{}] Sandwich {} front {} back {} revenue {}",
            victim.hash, path, trial.front_amount, trial.back_amount, revenue
        );
        if !self.still_pending(victim).await? {
            info!("[{}] Victim no longer pending", victim.hash);
            return Ok(());
        }

        let decision = gate_sandwich(
            revenue,
            trial.front_gas_used,
            trial.back_gas_used,
            victim,
            *self.accessible.borrow(),
        );
        if decision.is_reject() {
            log_rejection(victim, &decision);
            return Ok(());
        }
        let attack = assemble_sandwich(&path, &trial, revenue, FrontRunCall::Plain, BackRunCall::WithBloxroute);
        let Some((front, back)) = plan_sandwich(&attack, self.config.attacker(), &decision) else {
            return Ok(());
        };
        match &self.submitter {
            Some(submitter) => {
                if let Err(e) = submitter.submit_sandwich(victim, &front, &back, &decision).await {
                    warn!("[{}] Sandwich submission abandoned: {}", victim.hash, e);
                }
            }
            None => info!(
                "[{}] Dry run {} + {} gas limits {}/{} back value {}",
                victim.hash, attack.front_function, attack.back_function, front.gas_limit, back.gas_limit, back.value
            ),
        }
        Ok(())
    }

    /// Whether the node still sees the victim unmined
    async fn still_pending(&self, victim: &Transaction) -> Result<bool> {
        let tx = self.provider.get_transaction_by_hash(victim.hash).await?;
        Ok(tx.is_some_and(|tx| tx.block_number.is_none()))
    }
}

fn log_rejection(victim: &Transaction, decision: &GateDecision) {
    if let GateDecision::Reject(reason) = decision {
        info!("[{}] Attack rejected: {}", victim.hash, reason);
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::config::tokens::{USDT, WBNB};
    use crate::dex::uniswap_v3::tick_math::MAX_SQRT_RATIO;
    use crate::dex::uniswap_v3::{TickWord, V3State};
    use crate::dex::{FeeFraction, PoolState};

    const TOKEN: Address = Address::repeat_byte(0x01);
    const P1: Address = Address::repeat_byte(0x11);
    const P2: Address = Address::repeat_byte(0x12);

    fn event(pool: Address, dex: Dex) -> SwapEvent {
        SwapEvent {
            dex,
            pool,
            token_in: WBNB,
            token_out: TOKEN,
            amount_in: U256::from(10u64),
            amount_out: U256::from(5u64),
        }
    }

    #[test]
    fn test_merge_specs_prefers_factory_exchange() {
        let found = vec![(P1, Dex::PancakeswapV2), (P2, Dex::BiswapV2)];
        let events = [event(P1, Dex::UniswapV2), event(Address::repeat_byte(0x13), Dex::UniswapV3)];
        let specs = merge_specs(found, &events);
        assert_eq!(
            specs,
            vec![(P1, Dex::PancakeswapV2), (P2, Dex::BiswapV2), (Address::repeat_byte(0x13), Dex::UniswapV3)]
        );
    }

    #[test]
    fn test_victim_event_matches_last_pool() {
        let victim = Transaction { swap_events: vec![event(P1, Dex::UniswapV2), event(P2, Dex::UniswapV2)], ..Default::default() };
        let path = Path::new(U256::ZERO, &[(Dex::UniswapV2, P1), (Dex::UniswapV2, P2)], vec![WBNB, TOKEN, WBNB]);
        assert_eq!(victim_event(&path, &victim).map(|e| e.pool), Some(P2));

        let elsewhere = Path::new(U256::ZERO, &[(Dex::UniswapV2, P2), (Dex::UniswapV2, P1)], vec![WBNB, TOKEN, WBNB]);
        assert_eq!(victim_event(&elsewhere, &victim).map(|e| e.pool), Some(P1));
        assert!(victim_event(&Path::default(), &victim).is_none());
    }

    #[test]
    fn test_non_base_tokens() {
        let path = Path::new(U256::ZERO, &[(Dex::UniswapV2, P1), (Dex::UniswapV2, P2)], vec![WBNB, TOKEN, USDT]);
        assert_eq!(non_base_tokens(&path), vec![TOKEN]);
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(Strategy::Arbitrage.to_string(), "arbitrage");
        assert_eq!(Strategy::Sandwich.to_string(), "sandwich");
    }

    /// Every word is readable and holds no initialized tick
    struct EmptyWords;

    #[async_trait]
    impl TickWordLoader for EmptyWords {
        async fn load_words(&self, pool: &Pool, words: &[i16], block: u64, cache: &mut V3TickCache) -> Result<usize> {
            for word in words {
                cache.insert(pool.address, *word, TickWord { block, ..Default::default() });
            }
            Ok(words.len())
        }
    }

    fn v2_pool(address: Address, dex: Dex, reserve0: U256, reserve1: U256) -> Pool {
        let state = PoolState::V2 { reserve0, reserve1, fee: FeeFraction::default() };
        Pool::new(address, dex, vec![WBNB, TOKEN], state).unwrap()
    }

    fn v3_pool(address: Address, sqrt_price_x96: U256, tick: i32) -> Pool {
        let state = V3State { sqrt_price_x96, tick, liquidity: 1_000_000_000_000_000_000, fee: 3000, tick_spacing: 60 };
        Pool::new(address, Dex::PancakeswapV3, vec![WBNB, TOKEN], PoolState::V3(state)).unwrap()
    }

    #[tokio::test]
    async fn test_screen_drops_v3_paths_without_output() {
        let (live, pinned, dust, v2) = (P1, P2, Address::repeat_byte(0x13), Address::repeat_byte(0x14));
        let pools: HashMap<Address, Pool> = [
            v3_pool(live, U256::from(1u64) << 96, 0),
            // already at the upper price limit: nothing left to buy with TOKEN
            v3_pool(pinned, MAX_SQRT_RATIO - U256::from(1u64), 887_271),
            v2_pool(dust, Dex::PancakeswapV2, U256::from(10u64).pow(U256::from(30u64)), U256::from(1u64)),
            v2_pool(v2, Dex::UniswapV2, U256::from(1_000_000u64), U256::from(1_000_000u64)),
        ]
        .into_iter()
        .map(|p| (p.address, p))
        .collect();

        let kept_v3 = Path::new(U256::ZERO, &[(Dex::PancakeswapV3, live)], vec![WBNB, TOKEN]);
        let sized_v3 = Path::new(U256::from(77u64), &[(Dex::PancakeswapV3, live)], vec![WBNB, TOKEN]);
        let no_quote = Path::new(U256::ZERO, &[(Dex::PancakeswapV3, pinned)], vec![TOKEN, WBNB]);
        // the dust hop hands the concentrated pool nothing to swap
        let zero_out = Path::new(
            U256::ZERO,
            &[(Dex::PancakeswapV2, dust), (Dex::PancakeswapV3, live)],
            vec![WBNB, TOKEN, WBNB],
        );
        let constant_product = Path::new(U256::ZERO, &[(Dex::UniswapV2, v2)], vec![WBNB, TOKEN]);

        let mut ticks = V3TickCache::new(64);
        let paths = vec![kept_v3.clone(), no_quote, zero_out, sized_v3.clone(), constant_product.clone()];
        let kept = screen_paths(&EmptyWords, paths, &pools, 5, &mut ticks).await;

        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].pools, kept_v3.pools);
        assert_eq!(kept[0].amount_in, U256::from(PROBE_AMOUNT));
        assert_eq!(kept[1].amount_in, U256::from(77u64));
        assert_eq!(kept[2], constant_product);
        assert!(!ticks.is_empty());
    }

    #[test]
    fn test_victim_hop_uses_factory_exchange() {
        let pools: HashMap<Address, Pool> = [
            v2_pool(P1, Dex::PancakeswapV2, U256::from(1_000u64), U256::from(1_000u64)),
            v2_pool(P2, Dex::BiswapV2, U256::from(9_000u64), U256::from(9_000u64)),
        ]
        .into_iter()
        .map(|p| (p.address, p))
        .collect();
        let traced = [event(P1, Dex::UniswapV2), event(Address::repeat_byte(0x13), Dex::UniswapV3)];
        let events = resolve_exchanges(&traced, &pools);
        assert_eq!(events[0].dex, Dex::PancakeswapV2);
        assert_eq!(events[1].dex, Dex::UniswapV3);
        assert_eq!(events[0].amount_in, traced[0].amount_in);

        let mut index = PoolIndex::new();
        for pool in pools.values() {
            index.add_pool(pool.address, pool.dex, &pool.tokens);
            for token in &pool.tokens {
                index.set_balance(pool.address, *token, U256::from(1_000u64));
            }
        }
        let paths = find_arbitrage_paths(&events[..1], &index, WBNB);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].pools, vec![P2, P1]);
        assert_eq!(paths[0].exchanges, vec![Dex::BiswapV2.id(), Dex::PancakeswapV2.id()]);
    }
}
