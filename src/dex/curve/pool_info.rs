//! Static metadata for known Curve pools, keyed by pool address.

use alloy::primitives::{address, Address};

use crate::dex::Dex;

/// How a plain or meta stableswap pool scales balances before the invariant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StableKind {
    /// Raw balances
    Balances,
    /// `precision_mul * balance`
    Rates,
    /// Rates with `A_PRECISION` and the off-peg fee multiplier
    Aave,
    /// Compound-style stored exchange rates accrued to the current block
    StoredRates,
    /// Stored exchange rates on the coins flagged in `lending`, no `A_PRECISION`
    Lending,
    /// Yearn-style `getPricePerFullShare` on the coins flagged in `lending`
    LendingPricePerShare,
    /// Fixed per-coin rate multipliers
    RateMultipliers,
    /// Meta pool priced against the base pool's virtual price
    BaseVirtualPrice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveFamily {
    Stable(StableKind),
    StableNg,
    Crypto,
    TriCrypto,
    TriCryptoNg,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurvePoolInfo {
    pub address: Address,
    pub family: CurveFamily,
    pub n_coins: usize,
    /// Direct coins of the pool; empty when the pool is only listed by index
    pub coins: &'static [Address],
    pub precision_mul: &'static [u64],
    pub rate_multipliers: &'static [u128],
    pub lending: &'static [bool],
    pub a_precision: Option<u64>,
    pub get_y_minus_one: bool,
    pub get_d_plus_one: bool,
    pub lp_token: Option<Address>,
    pub base_pool: Option<Address>,
    pub base_n_coins: usize,
    /// Seconds a cached base virtual price stays valid
    pub base_cache_expires: u64,
    /// Pool uses `balances(int128)` rather than `balances(uint256)`
    pub vyper_v1: bool,
}

impl CurvePoolInfo {
    const EMPTY: CurvePoolInfo = CurvePoolInfo {
        address: Address::ZERO,
        family: CurveFamily::Stable(StableKind::Balances),
        n_coins: 2,
        coins: &[],
        precision_mul: &[],
        rate_multipliers: &[],
        lending: &[],
        a_precision: None,
        get_y_minus_one: false,
        get_d_plus_one: false,
        lp_token: None,
        base_pool: None,
        base_n_coins: 0,
        base_cache_expires: 0,
        vyper_v1: false,
    };

    pub fn dex(&self) -> Dex {
        match self.family {
            CurveFamily::Stable(_) => Dex::CurveStableSwap,
            CurveFamily::StableNg => Dex::CurveStableSwapNg,
            CurveFamily::Crypto => Dex::CurveCryptoSwap,
            CurveFamily::TriCrypto => Dex::CurveTriCrypto,
            CurveFamily::TriCryptoNg => Dex::CurveTriCryptoNg,
        }
    }

    pub fn is_meta(&self) -> bool {
        self.base_pool.is_some()
    }

    pub fn has_coin(&self, token: Address) -> bool {
        self.coins.contains(&token)
    }

    /// Token list of the underlying listing of a meta pool: the pool's own
    /// coins except the base LP token, then the base pool's coins
    pub fn underlying_coins(&self) -> Option<Vec<Address>> {
        let base = lookup(self.base_pool?)?;
        let max_coin = self.n_coins.checked_sub(1)?;
        let mut coins: Vec<Address> = self.coins.iter().take(max_coin).copied().collect();
        coins.extend_from_slice(base.coins);
        Some(coins)
    }
}

const THREE_POOL: Address = address!("bebc44782c7db0a1a60cb6fe97d0b483032ff1c7");
const THREE_POOL_LP: Address = address!("6c3f90f043a72fa612cbac8115ee7e52bde6e490");
const DAI: Address = address!("6b175474e89094c44da98b954eedeac495271d0f");
const USDC: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
const USDT: Address = address!("dac17f958d2ee523a2206206994597c13d831ec7");
const WETH: Address = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
const WBTC: Address = address!("2260fac5e5542a773aa44fbcfedf7c193bc2c599");
const CDAI: Address = address!("5d3a536e4d6dbd6114cc1ead35777bab948e3643");
const CUSDC: Address = address!("39aa39c021dfbae8fac545936693ac917d5e7563");

pub static POOLS: &[CurvePoolInfo] = &[
    CurvePoolInfo {
        address: address!("dc24316b9ae028f1497c275eb9192a3ea0f67022"),
        family: CurveFamily::Stable(StableKind::Balances),
        get_y_minus_one: true,
        get_d_plus_one: true,
        precision_mul: &[1, 1_000_000_000_000],
        coins: &[
            address!("eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee"),
            address!("ae7ab96520de3a18e5e111b5eaab095312d7fe84"),
        ],
        lp_token: Some(address!("06325440d014e39736583c165c2963ba99faf14e")),
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("9c3b46c0ceb5b9e304fcd6d88fc50f7dd24b31bc"),
        family: CurveFamily::Stable(StableKind::RateMultipliers),
        get_y_minus_one: true,
        rate_multipliers: &[1_000_000_000_000_000_000, 1_000_000_000_000_000_000],
        coins: &[WETH, address!("5e8422345238f34275888049021821e8e08caa1f")],
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: THREE_POOL,
        family: CurveFamily::Stable(StableKind::Rates),
        n_coins: 3,
        get_y_minus_one: true,
        precision_mul: &[1, 1_000_000_000_000, 1_000_000_000_000],
        coins: &[DAI, USDC, USDT],
        lp_token: Some(THREE_POOL_LP),
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("a5407eae9ba41422680e2e00537571bcc53efbfd"),
        family: CurveFamily::Stable(StableKind::Lending),
        n_coins: 4,
        lending: &[false, false, false, false],
        precision_mul: &[1, 1_000_000_000_000, 1_000_000_000_000, 1],
        coins: &[DAI, USDC, USDT, address!("57ab1ec28d129707052df4df418d58a2d46d5f51")],
        vyper_v1: true,
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("52ea46506b9cc5ef470c5bf89f17dc28bb35d85c"),
        family: CurveFamily::Stable(StableKind::Lending),
        n_coins: 3,
        lending: &[true, true, false],
        precision_mul: &[1, 1_000_000_000_000, 1_000_000_000_000],
        coins: &[CDAI, CUSDC, USDT],
        vyper_v1: true,
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("debf20617708857ebe4f679508e7b7863a8a8eee"),
        family: CurveFamily::Stable(StableKind::Aave),
        n_coins: 3,
        a_precision: Some(100),
        precision_mul: &[1, 1_000_000_000_000, 1_000_000_000_000],
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("2dded6da1bf5dbdf597c45fcfaa3194e53ecfeaf"),
        family: CurveFamily::Stable(StableKind::StoredRates),
        n_coins: 3,
        get_y_minus_one: true,
        a_precision: Some(100),
        precision_mul: &[1, 1_000_000_000_000, 1_000_000_000_000],
        coins: &[
            address!("8e595470ed749b85c6f7669de83eae304c2ec68f"),
            address!("76eb2fe28b36b3ee97f3adae0c69606eedb2a37c"),
            address!("48759f220ed983db51fa7a8c0d2aab8f3ce4166a"),
        ],
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("a2b47e3d5c44877cca798226b7b8118f9bfb7a56"),
        family: CurveFamily::Stable(StableKind::Lending),
        lending: &[true, true],
        precision_mul: &[1, 1_000_000_000_000],
        coins: &[CDAI, CUSDC],
        vyper_v1: true,
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("06364f10b501e868329afbc005b3492902d6c763"),
        family: CurveFamily::Stable(StableKind::LendingPricePerShare),
        n_coins: 4,
        get_y_minus_one: true,
        lending: &[true, true, true, false],
        precision_mul: &[1, 1_000_000_000_000, 1_000_000_000_000, 1],
        coins: &[
            address!("99d1fa417f94dcd62bfe781a1213c092a47041bc"),
            address!("9777d7e2b60bb01759d0e2f8be2095df444cb07e"),
            address!("1be5d71f2da660bfdee8012ddc58d024448a0a59"),
            address!("8e870d67f660d95d5be530380d0ec0bd388289e1"),
        ],
        vyper_v1: true,
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("0f9cb53ebe405d49a0bbdbd291a65ff571bc83e1"),
        family: CurveFamily::Stable(StableKind::BaseVirtualPrice),
        get_y_minus_one: true,
        a_precision: Some(100),
        base_pool: Some(THREE_POOL),
        base_n_coins: 3,
        base_cache_expires: 600,
        precision_mul: &[1, 1],
        coins: &[address!("674c6ad92fd080e4004b2312b45f796a192d27a0"), THREE_POOL_LP],
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("4f062658eaaf2c1ccf8c8e36d6824cdf41167956"),
        family: CurveFamily::Stable(StableKind::BaseVirtualPrice),
        get_y_minus_one: true,
        a_precision: Some(100),
        base_pool: Some(THREE_POOL),
        base_n_coins: 3,
        base_cache_expires: 600,
        precision_mul: &[10_000_000_000_000_000, 1],
        coins: &[address!("056fd409e1d7a124bd7017459dfea2f387b6d5cd"), THREE_POOL_LP],
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("a5588f7cdf560811710a2d82d3c9c99769db1dcb"),
        family: CurveFamily::StableNg,
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("ce6431d21e3fb1036ce9973a3312368ed96f5ce7"),
        family: CurveFamily::StableNg,
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("00e6fd108c4640d21b40d02f18dd6fe7c7f725ca"),
        family: CurveFamily::StableNg,
        base_pool: Some(THREE_POOL),
        base_n_coins: 3,
        coins: &[address!("0e573ce2736dd9637a0b21058352e1667925c7a8"), THREE_POOL_LP],
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("c83b79c07ece44b8b99ffa0e235c00add9124f9e"),
        family: CurveFamily::StableNg,
        base_pool: Some(THREE_POOL),
        base_n_coins: 3,
        coins: &[address!("59d9356e565ab3a36dd77763fc0d87feaf85508c"), THREE_POOL_LP],
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("9409280dc1e6d33ab7a8c6ec03e5763fb61772b5"),
        family: CurveFamily::Crypto,
        coins: &[WETH, address!("5a98fcbea516cf06857215779fd812ca3bef1b32")],
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("b576491f1e6e5e62f1d8f26062ee822b40b0e0d4"),
        family: CurveFamily::Crypto,
        coins: &[WETH, address!("4e3fbd56cd56c3e72c1403e103b45db9da5b9d2b")],
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("d51a44d3fae010294c616388b506acda1bfaae46"),
        family: CurveFamily::TriCrypto,
        n_coins: 3,
        precision_mul: &[1_000_000_000_000, 10_000_000_000, 1],
        coins: &[USDT, WBTC, WETH],
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("7f86bf177dd4f3494b841a37e810a34dd56c829b"),
        family: CurveFamily::TriCryptoNg,
        n_coins: 3,
        coins: &[USDC, WBTC, WETH],
        ..CurvePoolInfo::EMPTY
    },
    CurvePoolInfo {
        address: address!("2570f1bd5d2735314fc102eb12fc1afe9e6e7193"),
        family: CurveFamily::TriCryptoNg,
        n_coins: 3,
        coins: &[
            address!("7f39c581f595b53c5cb19bd0b3f8da6c935e2ca0"),
            address!("ae78736cd615f374d3085123a210448e74fc6393"),
            address!("ac3e018457b222d93114458476f3e3416abbe38f"),
        ],
        ..CurvePoolInfo::EMPTY
    },
];

pub fn lookup(pool: Address) -> Option<&'static CurvePoolInfo> {
    POOLS.iter().find(|info| info.address == pool)
}
