pub mod arith;
pub mod curve;
pub mod fetch;
pub mod uniswap_v2;
pub mod uniswap_v3;

use alloy::primitives::{Address, U256};

use crate::error::QuoteError;
use curve::{
    crypto::CryptoSwapState, stable::StableSwapState, stable_ng::StableNgState,
    tricrypto::TriCryptoState, tricrypto_ng::TriCryptoNgState,
};
use uniswap_v3::{PoolTicks, V3State, V3TickCache};

/// Supported exchanges. The discriminant is the on-chain exchange id the attacker
/// contract dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Dex {
    UniswapV2 = 0,
    UniswapV3 = 1,
    SushiswapV2 = 2,
    SushiswapV3 = 3,
    PancakeswapV2 = 4,
    PancakeswapV3 = 5,
    Thena = 6,
    BiswapV2 = 7,
    Apeswap = 8,
    Mdex = 9,
    Babyswap = 10,
    Nomiswap = 11,
    Waultswap = 12,
    Gibxswap = 13,
    Bakeryswap = 14,
    ThenaFusion = 15,
    CurveStableSwap = 16,
    CurveStableSwapNg = 17,
    CurveCryptoSwap = 18,
    CurveTriCrypto = 19,
    CurveTriCryptoNg = 20,
}

/// Pricing family of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Amm {
    ConstantProduct,
    Concentrated,
    StableSwap,
    StableSwapNg,
    CryptoSwap,
    TriCrypto,
    TriCryptoNg,
}

impl Dex {
    pub const ALL: [Dex; 21] = [
        Dex::UniswapV2,
        Dex::UniswapV3,
        Dex::SushiswapV2,
        Dex::SushiswapV3,
        Dex::PancakeswapV2,
        Dex::PancakeswapV3,
        Dex::Thena,
        Dex::BiswapV2,
        Dex::Apeswap,
        Dex::Mdex,
        Dex::Babyswap,
        Dex::Nomiswap,
        Dex::Waultswap,
        Dex::Gibxswap,
        Dex::Bakeryswap,
        Dex::ThenaFusion,
        Dex::CurveStableSwap,
        Dex::CurveStableSwapNg,
        Dex::CurveCryptoSwap,
        Dex::CurveTriCrypto,
        Dex::CurveTriCryptoNg,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Dex> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn amm(self) -> Amm {
        match self {
            Dex::UniswapV3 | Dex::SushiswapV3 | Dex::PancakeswapV3 | Dex::ThenaFusion => {
                Amm::Concentrated
            }
            Dex::CurveStableSwap => Amm::StableSwap,
            Dex::CurveStableSwapNg => Amm::StableSwapNg,
            Dex::CurveCryptoSwap => Amm::CryptoSwap,
            Dex::CurveTriCrypto => Amm::TriCrypto,
            Dex::CurveTriCryptoNg => Amm::TriCryptoNg,
            _ => Amm::ConstantProduct,
        }
    }

    pub fn is_constant_product(self) -> bool {
        self.amm() == Amm::ConstantProduct
    }
}

impl std::fmt::Display for Dex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Dex::UniswapV2 => "Uniswap V2",
            Dex::UniswapV3 => "Uniswap V3",
            Dex::SushiswapV2 => "SushiSwap V2",
            Dex::SushiswapV3 => "SushiSwap V3",
            Dex::PancakeswapV2 => "PancakeSwap V2",
            Dex::PancakeswapV3 => "PancakeSwap V3",
            Dex::Thena => "Thena",
            Dex::BiswapV2 => "Biswap",
            Dex::Apeswap => "ApeSwap",
            Dex::Mdex => "MDEX",
            Dex::Babyswap => "BabySwap",
            Dex::Nomiswap => "NomiSwap",
            Dex::Waultswap => "WaultSwap",
            Dex::Gibxswap => "GibXSwap",
            Dex::Bakeryswap => "BakerySwap",
            Dex::ThenaFusion => "Thena Fusion",
            Dex::CurveStableSwap => "Curve StableSwap",
            Dex::CurveStableSwapNg => "Curve StableSwap-NG",
            Dex::CurveCryptoSwap => "Curve CryptoSwap",
            Dex::CurveTriCrypto => "Curve TriCrypto",
            Dex::CurveTriCryptoNg => "Curve TriCrypto-NG",
        };
        write!(f, "{}", name)
    }
}

/// Constant-product fee as the fraction `(n - s) / n`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeeFraction {
    pub n: u64,
    pub s: u64,
}

impl FeeFraction {
    pub const fn new(n: u64, s: u64) -> Self {
        Self { n, s }
    }

    /// `None` unless the fee leaves part of the input to trade
    pub const fn try_new(n: u64, s: u64) -> Option<Self> {
        if s < n {
            Some(Self { n, s })
        } else {
            None
        }
    }

    /// Share of the input that trades, out of `n`. Zero for a fee of 100% or more.
    pub fn keep(&self) -> u64 {
        self.n.saturating_sub(self.s)
    }
}

impl Default for FeeFraction {
    fn default() -> Self {
        Self::new(1000, 3)
    }
}

/// Reserve state of a pool, one shape per pricing family
#[derive(Debug, Clone)]
pub enum PoolState {
    V2 {
        reserve0: U256,
        reserve1: U256,
        fee: FeeFraction,
    },
    V3(V3State),
    CurveStable(StableSwapState),
    CurveStableNg(StableNgState),
    CurveCrypto(CryptoSwapState),
    TriCrypto(TriCryptoState),
    TriCryptoNg(TriCryptoNgState),
}

impl PoolState {
    pub fn amm(&self) -> Amm {
        match self {
            PoolState::V2 { .. } => Amm::ConstantProduct,
            PoolState::V3(_) => Amm::Concentrated,
            PoolState::CurveStable(_) => Amm::StableSwap,
            PoolState::CurveStableNg(_) => Amm::StableSwapNg,
            PoolState::CurveCrypto(_) => Amm::CryptoSwap,
            PoolState::TriCrypto(_) => Amm::TriCrypto,
            PoolState::TriCryptoNg(_) => Amm::TriCryptoNg,
        }
    }
}

/// Per-quote context: the block being priced and the worker's tick cache
pub struct QuoteContext<'a> {
    pub block: u64,
    pub ticks: &'a mut V3TickCache,
}

/// A liquidity pool with its latest reserve state
#[derive(Debug, Clone)]
pub struct Pool {
    pub address: Address,
    pub dex: Dex,
    /// Tokens in pool index order
    pub tokens: Vec<Address>,
    pub state: PoolState,
}

impl Pool {
    pub fn new(address: Address, dex: Dex, tokens: Vec<Address>, state: PoolState) -> Result<Self, QuoteError> {
        if dex.amm() != state.amm() {
            return Err(QuoteError::OutOfBounds("pool state does not match exchange family"));
        }
        Ok(Self { address, dex, tokens, state })
    }

    pub fn index_of(&self, token: Address) -> Option<usize> {
        self.tokens.iter().position(|t| *t == token)
    }

    pub fn trades(&self, token_in: Address, token_out: Address) -> bool {
        token_in != token_out && self.index_of(token_in).is_some() && self.index_of(token_out).is_some()
    }

    /// Exact output of swapping `amount_in` of `token_in` for `token_out`.
    pub fn quote(
        &self,
        amount_in: U256,
        token_in: Address,
        token_out: Address,
        ctx: &mut QuoteContext<'_>,
    ) -> Result<U256, QuoteError> {
        let (i, j) = match (self.index_of(token_in), self.index_of(token_out)) {
            (Some(i), Some(j)) if i != j => (i, j),
            _ => return Err(QuoteError::UnsupportedPair(token_in, token_out)),
        };

        match &self.state {
            PoolState::V2 { reserve0, reserve1, fee } => {
                let (reserve_in, reserve_out) = if i == 0 {
                    (*reserve0, *reserve1)
                } else {
                    (*reserve1, *reserve0)
                };
                uniswap_v2::get_amount_out(amount_in, reserve_in, reserve_out, *fee)
            }
            PoolState::V3(state) => {
                let mut ticks = PoolTicks::new(ctx.ticks, self.address, ctx.block);
                let zero_for_one = i == 0;
                uniswap_v3::quote_exact_input(state, amount_in, zero_for_one, &mut ticks)
                    .map(|swap| swap.amount_out)
            }
            PoolState::CurveStable(state) => state.get_dy(&self.tokens, i, j, amount_in),
            PoolState::CurveStableNg(state) => state.get_dy(&self.tokens, i, j, amount_in),
            PoolState::CurveCrypto(state) => state.get_dy(i, j, amount_in),
            PoolState::TriCrypto(state) => state.get_dy(i, j, amount_in),
            PoolState::TriCryptoNg(state) => state.get_dy(i, j, amount_in),
        }
    }
}
