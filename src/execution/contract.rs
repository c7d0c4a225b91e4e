//! Attacker contract interface and calldata builders

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;

use crate::types::Path;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IAttacker {
        function multiHopArbitrageWithBloxroute(
            uint8 startIdx,
            uint256 amountIn,
            uint8[] exchanges,
            address[] poolAddresses,
            address[] tokenAddresses
        ) external payable;

        function multiHopArbitrageWithoutRelay(
            uint8 startIdx,
            uint256 amountIn,
            uint8[] exchanges,
            address[] poolAddresses,
            address[] tokenAddresses
        ) external;

        function sandwichFrontRun(
            uint256 amountIn,
            uint8[] exchanges,
            address[] poolAddresses,
            address[] tokenAddresses
        ) external;

        function sandwichBackRun(
            uint256 amountIn,
            uint8[] exchanges,
            address[] poolAddresses,
            address[] tokenAddresses
        ) external;

        function sandwichBackRunWithBloxroute(
            uint256 amountIn,
            uint8[] exchanges,
            address[] poolAddresses,
            address[] tokenAddresses
        ) external payable;

        function sandwichFrontRunDifficult(
            uint256 amountIn,
            uint8[] exchanges,
            address[] poolAddresses,
            address[] tokenAddresses,
            uint256 amountOut,
            uint256 poolBalance
        ) external;

        function sandwichBackRunDifficult(
            uint256 amountIn,
            uint8[] exchanges,
            address[] poolAddresses,
            address[] tokenAddresses,
            uint256 blockNumber
        ) external;

        function balanceOf(address token) external view returns (uint256);

        function deposit(address token, uint256 amount) external;

        function withdraw(address token, address to, uint256 amount) external;
    }
}

/// Arbitrage entry points; the relay variant pays the relay from the attack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitrageCall {
    WithBloxroute,
    WithoutRelay,
}

impl ArbitrageCall {
    pub fn name(self) -> &'static str {
        match self {
            ArbitrageCall::WithBloxroute => "multiHopArbitrageWithBloxroute",
            ArbitrageCall::WithoutRelay => "multiHopArbitrageWithoutRelay",
        }
    }

    pub fn encode(self, amount_in: U256, path: &Path) -> Bytes {
        let (exchanges, pools, tokens) = path_args(path);
        let data = match self {
            ArbitrageCall::WithBloxroute => IAttacker::multiHopArbitrageWithBloxrouteCall {
                startIdx: 0,
                amountIn: amount_in,
                exchanges,
                poolAddresses: pools,
                tokenAddresses: tokens,
            }
            .abi_encode(),
            ArbitrageCall::WithoutRelay => IAttacker::multiHopArbitrageWithoutRelayCall {
                startIdx: 0,
                amountIn: amount_in,
                exchanges,
                poolAddresses: pools,
                tokenAddresses: tokens,
            }
            .abi_encode(),
        };
        Bytes::from(data)
    }
}

/// Front-run entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontRunCall {
    Plain,
    /// Also carries the expected back-run amount and the victim pool balance
    Difficult { back_amount: U256, pool_balance: U256 },
}

impl FrontRunCall {
    pub fn name(self) -> &'static str {
        match self {
            FrontRunCall::Plain => "sandwichFrontRun",
            FrontRunCall::Difficult { .. } => "sandwichFrontRunDifficult",
        }
    }

    pub fn encode(self, amount_in: U256, path: &Path) -> Bytes {
        let (exchanges, pools, tokens) = path_args(path);
        let data = match self {
            FrontRunCall::Plain => IAttacker::sandwichFrontRunCall {
                amountIn: amount_in,
                exchanges,
                poolAddresses: pools,
                tokenAddresses: tokens,
            }
            .abi_encode(),
            FrontRunCall::Difficult { back_amount, pool_balance } => IAttacker::sandwichFrontRunDifficultCall {
                amountIn: amount_in,
                exchanges,
                poolAddresses: pools,
                tokenAddresses: tokens,
                amountOut: back_amount,
                poolBalance: pool_balance,
            }
            .abi_encode(),
        };
        Bytes::from(data)
    }
}

/// Back-run entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackRunCall {
    Plain,
    WithBloxroute,
    /// Only valid in `block_number`
    Difficult { block_number: u64 },
}

impl BackRunCall {
    pub fn name(self) -> &'static str {
        match self {
            BackRunCall::Plain => "sandwichBackRun",
            BackRunCall::WithBloxroute => "sandwichBackRunWithBloxroute",
            BackRunCall::Difficult { .. } => "sandwichBackRunDifficult",
        }
    }

    pub fn encode(self, amount_in: U256, path: &Path) -> Bytes {
        let (exchanges, pools, tokens) = path_args(path);
        let data = match self {
            BackRunCall::Plain => IAttacker::sandwichBackRunCall {
                amountIn: amount_in,
                exchanges,
                poolAddresses: pools,
                tokenAddresses: tokens,
            }
            .abi_encode(),
            BackRunCall::WithBloxroute => IAttacker::sandwichBackRunWithBloxrouteCall {
                amountIn: amount_in,
                exchanges,
                poolAddresses: pools,
                tokenAddresses: tokens,
            }
            .abi_encode(),
            BackRunCall::Difficult { block_number } => IAttacker::sandwichBackRunDifficultCall {
                amountIn: amount_in,
                exchanges,
                poolAddresses: pools,
                tokenAddresses: tokens,
                blockNumber: U256::from(block_number),
            }
            .abi_encode(),
        };
        Bytes::from(data)
    }
}

fn path_args(path: &Path) -> (Vec<u8>, Vec<Address>, Vec<Address>) {
    (path.exchanges.clone(), path.pools.clone(), path.tokens.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::Dex;

    fn path() -> Path {
        Path::new(
            U256::ZERO,
            &[(Dex::PancakeswapV2, Address::repeat_byte(9)), (Dex::UniswapV3, Address::repeat_byte(8))],
            vec![Address::repeat_byte(1), Address::repeat_byte(2), Address::repeat_byte(1)],
        )
    }

    #[test]
    fn test_arbitrage_calldata_round_trips() {
        let data = ArbitrageCall::WithoutRelay.encode(U256::from(77u64), &path());
        assert_eq!(&data[..4], IAttacker::multiHopArbitrageWithoutRelayCall::SELECTOR.as_slice());
        let decoded = IAttacker::multiHopArbitrageWithoutRelayCall::abi_decode(&data).unwrap();
        assert_eq!(decoded.startIdx, 0);
        assert_eq!(decoded.amountIn, U256::from(77u64));
        assert_eq!(decoded.exchanges, vec![4, 1]);
        assert_eq!(decoded.poolAddresses, path().pools);
    }

    #[test]
    fn test_sandwich_variants_use_distinct_selectors() {
        let p = path();
        let front = FrontRunCall::Plain.encode(U256::from(1u64), &p);
        let difficult = FrontRunCall::Difficult { back_amount: U256::from(2u64), pool_balance: U256::from(3u64) }
            .encode(U256::from(1u64), &p);
        assert_ne!(front[..4], difficult[..4]);
        let decoded = IAttacker::sandwichFrontRunDifficultCall::abi_decode(&difficult).unwrap();
        assert_eq!(decoded.amountOut, U256::from(2u64));
        assert_eq!(decoded.poolBalance, U256::from(3u64));

        let back = BackRunCall::Difficult { block_number: 42 }.encode(U256::from(5u64), &p);
        let decoded = IAttacker::sandwichBackRunDifficultCall::abi_decode(&back).unwrap();
        assert_eq!(decoded.blockNumber, U256::from(42u64));
        assert_eq!(BackRunCall::WithBloxroute.name(), "sandwichBackRunWithBloxroute");
    }
}
