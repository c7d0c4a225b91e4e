//! Engine configuration
//!
//! Runtime settings come from the environment (`.env` supported via dotenvy).
//! Chain constants live in the submodules below.

use alloy::primitives::{address, Address};
use eyre::{eyre, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Node JSON-RPC endpoint (reads, traces, submission fallback)
    pub http_endpoint: String,
    /// Mempool relay websocket endpoint
    pub relay_ws_endpoint: String,
    /// Relay block-feed websocket endpoint
    pub relay_block_ws_endpoint: String,
    /// Relay HTTP endpoint for bundle submission
    pub relay_http_endpoint: String,
    pub relay_authorization: String,
    /// Network name sent in relay subscriptions
    pub network: String,
    /// Anvil-compatible fork node used as the execution engine
    pub fork_endpoint: String,
    pub account_private_key: Option<String>,
    /// Deployed attacker contract. When unset the bytecode at
    /// `attacker_bytecode_path` is installed on the fork at `contracts::TEST_ATTACKER`.
    pub contract_address: Option<Address>,
    pub attacker_bytecode_path: Option<String>,
    pub wrapped_native: Address,
    pub workers: usize,
    pub queue_capacity: usize,
    pub multicall_chunk: usize,
    pub trial_timeout: Duration,
    pub path_timeout: Duration,
    /// Bounded LRU capacity of the per-worker V3 word cache
    pub tick_cache_capacity: usize,
    pub reconnect_delay: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let http_endpoint = env::var("HTTP_ENDPOINT")
            .map_err(|_| eyre!("HTTP_ENDPOINT not set"))?;

        Ok(Self {
            fork_endpoint: env::var("FORK_ENDPOINT")
                .unwrap_or_else(|_| "http://127.0.0.1:8545".to_string()),
            relay_ws_endpoint: env::var("RELAY_WS_ENDPOINT")
                .unwrap_or_else(|_| "wss://virginia.bsc.blxrbdn.com/ws".to_string()),
            relay_block_ws_endpoint: env::var("RELAY_BLOCK_WS_ENDPOINT")
                .unwrap_or_else(|_| "wss://virginia.bsc.blxrbdn.com/ws".to_string()),
            relay_http_endpoint: env::var("RELAY_HTTP_ENDPOINT")
                .unwrap_or_else(|_| "https://mev.api.blxrbdn.com".to_string()),
            relay_authorization: env::var("RELAY_AUTHORIZATION").unwrap_or_default(),
            network: env::var("RELAY_NETWORK").unwrap_or_else(|_| "BSC-Mainnet".to_string()),
            account_private_key: env::var("ACCOUNT_PRIVATE_KEY").ok(),
            contract_address: parse_opt_address("CONTRACT_ADDRESS")?,
            attacker_bytecode_path: env::var("ATTACKER_BYTECODE_PATH").ok(),
            wrapped_native: parse_opt_address("WRAPPED_NATIVE")?.unwrap_or(tokens::WBNB),
            workers: parse_or("WORKERS", 6)?,
            queue_capacity: parse_or("QUEUE_CAPACITY", 30)?,
            multicall_chunk: parse_or("MULTICALL_CHUNK", 100)?,
            trial_timeout: Duration::from_millis(parse_or("TRIAL_TIMEOUT_MS", 2_000)?),
            path_timeout: Duration::from_millis(parse_or("PATH_TIMEOUT_MS", 8_000)?),
            tick_cache_capacity: parse_or("TICK_CACHE_CAPACITY", 4_096)?,
            reconnect_delay: Duration::from_millis(parse_or("RECONNECT_DELAY_MS", 100)?),
            http_endpoint,
        })
    }

    /// Attacker contract address on the fork
    pub fn attacker(&self) -> Address {
        self.contract_address.unwrap_or(contracts::TEST_ATTACKER)
    }

    /// Fork node for worker `worker`. `FORK_ENDPOINT` may list several nodes
    /// separated by commas; workers take them round-robin.
    pub fn fork_endpoint_for(&self, worker: usize) -> &str {
        round_robin(&self.fork_endpoint, worker)
    }
}

fn round_robin(list: &str, index: usize) -> &str {
    let endpoints: Vec<&str> = list.split(',').map(str::trim).filter(|e| !e.is_empty()).collect();
    if endpoints.is_empty() {
        list
    } else {
        endpoints[index % endpoints.len()]
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| eyre!("{} has an invalid value: {}", key, raw)),
        Err(_) => Ok(default),
    }
}

fn parse_opt_address(key: &str) -> Result<Option<Address>> {
    match env::var(key) {
        Ok(raw) if !raw.is_empty() => Ok(Some(
            Address::from_str(raw.trim()).map_err(|e| eyre!("{} is not an address: {}", key, e))?,
        )),
        _ => Ok(None),
    }
}

/// Canonical token addresses (BSC mainnet)
pub mod tokens {
    use super::*;

    pub const WBNB: Address = address!("bb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c");
    pub const USDT: Address = address!("55d398326f99059fF775485246999027B3197955");
    pub const USDC: Address = address!("8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d");
    pub const BUSD: Address = address!("e9e7CEA3DedcA5984780Bafc599bD69ADd087D56");
    pub const ETH: Address = address!("2170Ed0880ac9A755fd29B2688956BD959F933F8");

    /// Reference tokens used for pool balance-rate checks
    pub const BASE_TOKENS: [Address; 5] = [WBNB, USDT, USDC, BUSD, ETH];

    pub fn symbol(addr: Address) -> &'static str {
        match addr {
            a if a == WBNB => "WBNB",
            a if a == USDT => "USDT",
            a if a == USDC => "USDC",
            a if a == BUSD => "BUSD",
            a if a == ETH => "ETH",
            _ => "???",
        }
    }

    pub fn is_base(addr: Address) -> bool {
        BASE_TOKENS.contains(&addr)
    }
}

/// Pool factories and their fee fractions
pub mod factories {
    use super::*;
    use crate::dex::{Dex, FeeFraction};

    /// How a V2 factory's swap fee is obtained
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FeeSource {
        Fixed(FeeFraction),
        /// `swapFee()(uint32)` on the pair, over the given denominator
        PairSwapFee(u64),
        /// `getPairFees(address)(uint256)` on the factory, over the given denominator
        FactoryPairFees(u64),
    }

    /// Lookup method exposed by a factory
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Lookup {
        GetPair,
        GetPairWithBool,
        GetPool,
        PoolByPair,
    }

    #[derive(Debug, Clone, Copy)]
    pub struct Factory {
        pub dex: Dex,
        pub address: Address,
        pub lookup: Lookup,
        pub fee: FeeSource,
    }

    const DEFAULT_V2: FeeSource = FeeSource::Fixed(FeeFraction::new(1000, 3));

    pub const FACTORIES: [Factory; 16] = [
        Factory { dex: Dex::UniswapV2, address: address!("8909Dc15e40173Ff4699343b6eB8132c65e18eC6"), lookup: Lookup::GetPair, fee: DEFAULT_V2 },
        Factory { dex: Dex::SushiswapV2, address: address!("c35DADB65012eC5796536bD9864eD8773aBc74C4"), lookup: Lookup::GetPair, fee: DEFAULT_V2 },
        Factory { dex: Dex::PancakeswapV2, address: address!("cA143Ce32Fe78f1f7019d7d551a6402fC5350c73"), lookup: Lookup::GetPair, fee: FeeSource::Fixed(FeeFraction::new(10000, 25)) },
        Factory { dex: Dex::PancakeswapV2, address: address!("BCfCcbde45cE874adCB698cC183deBcF17952812"), lookup: Lookup::GetPair, fee: FeeSource::Fixed(FeeFraction::new(1000, 2)) },
        Factory { dex: Dex::BiswapV2, address: address!("858E3312ed3A876947EA49d572A7C42DE08af7EE"), lookup: Lookup::GetPair, fee: FeeSource::PairSwapFee(1000) },
        Factory { dex: Dex::Apeswap, address: address!("0841BD0B734E4F5853f0dD8d7Ea041c241fb0Da6"), lookup: Lookup::GetPair, fee: FeeSource::Fixed(FeeFraction::new(1000, 2)) },
        Factory { dex: Dex::Mdex, address: address!("3CD1C46068dAEa5Ebb0d3f55F6915B10648062B8"), lookup: Lookup::GetPair, fee: FeeSource::FactoryPairFees(1000) },
        Factory { dex: Dex::Babyswap, address: address!("86407bEa2078ea5f5EB5A52B2caA963bC1F889Da"), lookup: Lookup::GetPair, fee: FeeSource::Fixed(FeeFraction::new(1000, 2)) },
        Factory { dex: Dex::Nomiswap, address: address!("d6715A8be3944ec72738F0BFDC739d48C3c29349"), lookup: Lookup::GetPair, fee: FeeSource::PairSwapFee(1000) },
        Factory { dex: Dex::Bakeryswap, address: address!("01bF7C66c6BD861915CdaaE475042d3c4BaE16A7"), lookup: Lookup::GetPair, fee: DEFAULT_V2 },
        Factory { dex: Dex::Waultswap, address: address!("B42E3FE71b7E0673335b3331B3e1053BD9822570"), lookup: Lookup::GetPair, fee: FeeSource::Fixed(FeeFraction::new(1000, 2)) },
        Factory { dex: Dex::Gibxswap, address: address!("97bCD9BB482144291D77ee53bFa99317A82066E8"), lookup: Lookup::GetPair, fee: DEFAULT_V2 },
        Factory { dex: Dex::Thena, address: address!("AFD89d21BdB66d00817d4153E055830B1c2B3970"), lookup: Lookup::GetPairWithBool, fee: DEFAULT_V2 },
        Factory { dex: Dex::UniswapV3, address: address!("dB1d10011AD0Ff90774D0C6Bb92e5C5c8b4461F7"), lookup: Lookup::GetPool, fee: DEFAULT_V2 },
        Factory { dex: Dex::PancakeswapV3, address: address!("0BFbCF9fa4f9C56B0F40a671Ad40E0805A091865"), lookup: Lookup::GetPool, fee: DEFAULT_V2 },
        Factory { dex: Dex::ThenaFusion, address: address!("306F06C147f064A010530292A1EB6737c3e378e4"), lookup: Lookup::PoolByPair, fee: DEFAULT_V2 },
    ];

    /// V3 fee tiers probed through `getPool`
    pub const V3_FEE_TIERS: [u32; 5] = [100, 500, 2500, 3000, 10000];

    pub fn by_address(factory: Address) -> Option<&'static Factory> {
        FACTORIES.iter().find(|f| f.address == factory)
    }

    /// Fee fraction of a V2 pair created by `factory`; unknown factories trade at 0.3%
    pub fn fee_source(factory: Address) -> FeeSource {
        by_address(factory).map(|f| f.fee).unwrap_or(DEFAULT_V2)
    }
}

/// Well-known contract addresses
pub mod contracts {
    use super::*;

    pub const MULTICALL3: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");
    pub const TICK_LENS: Address = address!("bfd8137f7d1516D3ea5cA83523914859ec47F573");
    /// Registry of validators that accept club bundles only
    pub const CLUB48_REGISTRY: Address = address!("5cc05fde1d231a840061c1a2d7e913cedc8eabaf");
    /// Where the attacker bytecode is installed on the fork when no contract is configured
    pub const TEST_ATTACKER: Address = address!("00000000000000000000000000000000000a77ac");
    /// Wrapped-native holder that seeds the fork attacker's balance
    pub const WRAPPED_HOLDER: Address = address!("8894E0a0c962CB723c1976a4421c95949bE2D4E3");
    /// Caller used for static reads on the fork
    pub const STATIC_CALLER: Address = address!("d8dA6BF26964aF9D7eEd9e03E53415D37aA96045");
}

/// Economic thresholds (all amounts in wei of the native token)
pub mod thresholds {
    /// Probe size used to check that a path is executable at all
    pub const PROBE_AMOUNT: u128 = 100_000_000_000_000;
    /// Minimum simulated revenue for an arbitrage to be kept
    pub const MIN_SIMULATED_REVENUE: u128 = 100_000_000_000_000;
    /// Closed-form revenue floor: 100k gas * 2 txs * 1 gwei
    pub const GAS_FLOOR: u128 = 1_000_000_000 * 100_000 * 2;
    /// Relay bundle fee
    pub const BUNDLE_FEE: u128 = 400_000_000_000_000;
    /// Revenue must exceed gas cost times 3/2
    pub const SAFETY_NUM: u128 = 3;
    pub const SAFETY_DEN: u128 = 2;
    /// Bundle gas price is shaded to 9/10 of the break-even price
    pub const GAS_PRICE_SHADE_NUM: u128 = 9;
    pub const GAS_PRICE_SHADE_DEN: u128 = 10;
    pub const GWEI: u128 = 1_000_000_000;
    /// Native-in swaps below these sizes are ignored
    pub const DUST_PENDING: u128 = 1_000_000_000_000_000;
    pub const DUST_MINED: u128 = 10_000_000_000_000_000;
    /// Victim slippage assumed by the sandwich closed form, in basis points
    pub const SANDWICH_SLIPPAGE_BPS: u64 = 100;
    /// Value attached to relay-paid arbitrage transactions
    pub const RELAY_TIP: u128 = 400_000_000_000_000;
}
