//! Victim transactions, swap events, paths and attacks.

use std::fmt;

use alloy::eips::eip2930::AccessList;
use alloy::primitives::{Address, Bytes, B256, U256};

use crate::config::tokens;
use crate::dex::Dex;

/// One swap observed in a traced call tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SwapEvent {
    pub dex: Dex,
    pub pool: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub amount_out: U256,
}

impl SwapEvent {
    pub fn is_valid(&self) -> bool {
        !self.pool.is_zero()
            && !self.token_in.is_zero()
            && !self.token_out.is_zero()
            && self.token_in != self.token_out
            && !self.amount_in.is_zero()
            && !self.amount_out.is_zero()
    }

    pub fn touches(&self, token: Address) -> bool {
        self.token_in == token || self.token_out == token
    }
}

impl fmt::Display for SwapEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {} -> {} {}",
            self.dex,
            self.pool,
            self.amount_in,
            tokens::symbol(self.token_in),
            self.amount_out,
            tokens::symbol(self.token_out)
        )
    }
}

/// Signature components kept for byte-exact replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxSignature {
    /// Raw `v`: 27/28, EIP-155 encoded, or the y-parity for typed transactions
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

/// Envelope type of a victim transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxKind {
    #[default]
    Legacy,
    Eip2930,
    Eip1559,
}

/// A pending or mined transaction under evaluation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub hash: B256,
    pub kind: TxKind,
    pub chain_id: Option<u64>,
    pub nonce: u64,
    pub gas: u64,
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub caller: Address,
    /// `None` for contract creation
    pub receiver: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub access_list: AccessList,
    pub signature: TxSignature,
    pub swap_events: Vec<SwapEvent>,
}

impl Transaction {
    /// Legacy gas price, else the EIP-1559 fee cap
    pub fn effective_gas_price(&self) -> u128 {
        self.gas_price.or(self.max_fee_per_gas).unwrap_or_default()
    }

    pub fn is_contract_creation(&self) -> bool {
        self.receiver.is_none()
    }

    /// Plain value transfers and creations carry no swaps worth tracing
    pub fn is_traceable(&self) -> bool {
        !self.is_contract_creation() && self.gas != 21_000 && !self.input.is_empty()
    }
}

/// A multi-hop route. `tokens[i] -> tokens[i + 1]` trades on `pools[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    pub amount_in: U256,
    pub exchanges: Vec<u8>,
    pub pools: Vec<Address>,
    pub tokens: Vec<Address>,
}

impl Path {
    pub fn new(amount_in: U256, hops: &[(Dex, Address)], tokens: Vec<Address>) -> Self {
        Self {
            amount_in,
            exchanges: hops.iter().map(|(dex, _)| dex.id()).collect(),
            pools: hops.iter().map(|(_, pool)| *pool).collect(),
            tokens,
        }
    }

    pub fn hops(&self) -> usize {
        self.pools.len()
    }

    pub fn is_cycle(&self) -> bool {
        self.tokens.len() > 1 && self.tokens.first() == self.tokens.last()
    }

    /// Shapes agree and every hop changes token
    pub fn is_valid(&self) -> bool {
        !self.pools.is_empty()
            && self.exchanges.len() == self.pools.len()
            && self.tokens.len() == self.pools.len() + 1
            && self.tokens.windows(2).all(|pair| pair[0] != pair[1])
            && self.exchanges.iter().all(|id| Dex::from_id(*id).is_some())
    }

    pub fn dexes(&self) -> impl Iterator<Item = Dex> + '_ {
        self.exchanges.iter().filter_map(|id| Dex::from_id(*id))
    }

    /// Every hop prices with the constant-product formula
    pub fn is_constant_product(&self) -> bool {
        self.exchanges.len() == self.hops()
            && self
                .exchanges
                .iter()
                .all(|id| Dex::from_id(*id).is_some_and(Dex::is_constant_product))
    }

    /// `(dex, pool, token_in, token_out)` per hop
    pub fn legs(&self) -> impl Iterator<Item = (Option<Dex>, Address, Address, Address)> + '_ {
        self.pools.iter().enumerate().filter_map(move |(i, pool)| {
            let dex = self.exchanges.get(i).and_then(|id| Dex::from_id(*id));
            Some((dex, *pool, *self.tokens.get(i)?, *self.tokens.get(i + 1)?))
        })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pool) in self.pools.iter().enumerate() {
            let dex = self
                .exchanges
                .get(i)
                .and_then(|id| Dex::from_id(*id))
                .map(|d| d.to_string())
                .unwrap_or_else(|| "?".to_string());
            let (from, to) = (self.tokens.get(i), self.tokens.get(i + 1));
            if i > 0 {
                write!(f, " | ")?;
            }
            match (from, to) {
                (Some(from), Some(to)) => write!(f, "[{}] {} ({} -> {})", dex, pool, from, to)?,
                _ => write!(f, "[{}] {}", dex, pool)?,
            }
        }
        Ok(())
    }
}

/// A solved arbitrage ready for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbitrageAttack {
    pub function: &'static str,
    pub calldata: Bytes,
    pub path: Path,
    /// Expected revenue in native-token wei
    pub revenue: U256,
    pub gas_used: u64,
}

impl ArbitrageAttack {
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.calldata.get(..4).and_then(|s| s.try_into().ok())
    }
}

/// A solved sandwich: the front-run and back-run around one victim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandwichAttack {
    pub front_function: &'static str,
    pub front_calldata: Bytes,
    pub front_gas_used: u64,
    pub back_function: &'static str,
    pub back_calldata: Bytes,
    pub back_gas_used: u64,
    pub path: Path,
    pub front_amount_in: U256,
    pub back_amount_in: U256,
    /// Expected revenue in native-token wei
    pub revenue: U256,
}

impl SandwichAttack {
    pub fn gas_used(&self) -> u64 {
        self.front_gas_used + self.back_gas_used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    #[test]
    fn test_swap_event_validity() {
        let mut event = SwapEvent {
            dex: Dex::PancakeswapV2,
            pool: addr(9),
            token_in: addr(1),
            token_out: addr(2),
            amount_in: U256::from(10u64),
            amount_out: U256::from(20u64),
        };
        assert!(event.is_valid());
        event.amount_out = U256::ZERO;
        assert!(!event.is_valid());
        event.amount_out = U256::from(1u64);
        event.pool = Address::ZERO;
        assert!(!event.is_valid());
    }

    #[test]
    fn test_path_shape() {
        let path = Path::new(
            U256::ZERO,
            &[(Dex::UniswapV2, addr(10)), (Dex::PancakeswapV3, addr(11))],
            vec![addr(1), addr(2), addr(1)],
        );
        assert_eq!(path.hops(), 2);
        assert!(path.is_cycle());
        assert!(path.is_valid());
        assert!(!path.is_constant_product());
        assert_eq!(path.exchanges, vec![0, 5]);

        let broken = Path { tokens: vec![addr(1), addr(2)], ..path.clone() };
        assert!(!broken.is_valid());
        let repeated = Path { tokens: vec![addr(1), addr(1), addr(2)], ..path };
        assert!(!repeated.is_valid());
    }

    #[test]
    fn test_effective_gas_price() {
        let mut tx = Transaction { max_fee_per_gas: Some(7), ..Default::default() };
        assert_eq!(tx.effective_gas_price(), 7);
        tx.gas_price = Some(5);
        assert_eq!(tx.effective_gas_price(), 5);
    }

    #[test]
    fn test_traceable() {
        let mut tx = Transaction {
            receiver: Some(addr(3)),
            gas: 200_000,
            input: Bytes::from(vec![1, 2, 3, 4]),
            ..Default::default()
        };
        assert!(tx.is_traceable());
        tx.gas = 21_000;
        assert!(!tx.is_traceable());
        tx.gas = 200_000;
        tx.receiver = None;
        assert!(!tx.is_traceable());
    }
}
