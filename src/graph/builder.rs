use alloy::primitives::{Address, U256};
use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::HashMap;

use crate::dex::{Dex, Pool};

/// Edge payload: the pool linking two tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolEdge {
    pub pool: Address,
    pub dex: Dex,
}

/// Undirected token graph whose edges are pools, with the observed token
/// balance of every pool for depth ranking
pub struct PoolIndex {
    pub graph: UnGraph<Address, PoolEdge>,
    token_to_node: HashMap<Address, NodeIndex>,
    pool_tokens: HashMap<Address, Vec<Address>>,
    pool_dex: HashMap<Address, Dex>,
    balances: HashMap<(Address, Address), U256>,
}

impl Default for PoolIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolIndex {
    pub fn new() -> Self {
        Self {
            graph: UnGraph::new_undirected(),
            token_to_node: HashMap::new(),
            pool_tokens: HashMap::new(),
            pool_dex: HashMap::new(),
            balances: HashMap::new(),
        }
    }

    /// Index built from loaded pools and `(pool, token) -> balance` reads
    pub fn from_pools(pools: &[Pool], balances: HashMap<(Address, Address), U256>) -> Self {
        let mut index = Self::new();
        for pool in pools {
            index.add_pool(pool.address, pool.dex, &pool.tokens);
        }
        index.balances = balances;
        index
    }

    fn get_or_create_node(&mut self, token: Address) -> NodeIndex {
        if let Some(&node) = self.token_to_node.get(&token) {
            node
        } else {
            let node = self.graph.add_node(token);
            self.token_to_node.insert(token, node);
            node
        }
    }

    /// Adds one edge per token pair of the pool. Adding a pool twice is a no-op.
    pub fn add_pool(&mut self, pool: Address, dex: Dex, tokens: &[Address]) {
        if self.pool_tokens.contains_key(&pool) {
            return;
        }
        for (i, a) in tokens.iter().enumerate() {
            for b in &tokens[i + 1..] {
                if a == b {
                    continue;
                }
                let na = self.get_or_create_node(*a);
                let nb = self.get_or_create_node(*b);
                self.graph.add_edge(na, nb, PoolEdge { pool, dex });
            }
        }
        self.pool_tokens.insert(pool, tokens.to_vec());
        self.pool_dex.insert(pool, dex);
    }

    pub fn set_balance(&mut self, pool: Address, token: Address, balance: U256) {
        self.balances.insert((pool, token), balance);
    }

    pub fn balance(&self, pool: Address, token: Address) -> U256 {
        self.balances.get(&(pool, token)).copied().unwrap_or_default()
    }

    pub fn dex_of(&self, pool: Address) -> Option<Dex> {
        self.pool_dex.get(&pool).copied()
    }

    pub fn tokens_of(&self, pool: Address) -> Option<&[Address]> {
        self.pool_tokens.get(&pool).map(Vec::as_slice)
    }

    /// Pools trading `a` against `b`
    pub fn pools_between(&self, a: Address, b: Address) -> Vec<PoolEdge> {
        match (self.token_to_node.get(&a), self.token_to_node.get(&b)) {
            (Some(na), Some(nb)) => self.graph.edges_connecting(*na, *nb).map(|e| *e.weight()).collect(),
            _ => Vec::new(),
        }
    }

    /// Pools for `{a, b}` other than those in `exclude`, deepest first by their
    /// balance of `measure`
    pub fn ranked(&self, a: Address, b: Address, measure: Address, exclude: &[Address]) -> Vec<PoolEdge> {
        let mut pools: Vec<PoolEdge> = self
            .pools_between(a, b)
            .into_iter()
            .filter(|edge| !exclude.contains(&edge.pool))
            .collect();
        // stable sort keeps insertion order among equal balances
        pools.sort_by(|x, y| self.balance(y.pool, measure).cmp(&self.balance(x.pool, measure)));
        pools
    }

    /// Deepest pool for `{a, b}` by its balance of `a`, skipping `exclude`.
    /// Pools with no observed balance are never chosen.
    pub fn deepest(&self, a: Address, b: Address, exclude: &[Address]) -> Option<PoolEdge> {
        self.ranked(a, b, a, exclude)
            .into_iter()
            .find(|edge| !self.balance(edge.pool, a).is_zero())
    }

    /// Deepest and second deepest pools for `{a, b}` by their balance of `a`
    pub fn deepest_two(&self, a: Address, b: Address, exclude: &[Address]) -> (Option<PoolEdge>, Option<PoolEdge>) {
        let mut funded = self
            .ranked(a, b, a, exclude)
            .into_iter()
            .filter(|edge| !self.balance(edge.pool, a).is_zero());
        (funded.next(), funded.next())
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn pool_count(&self) -> usize {
        self.pool_tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    #[test]
    fn test_multi_coin_pool_links_every_pair() {
        let mut index = PoolIndex::new();
        index.add_pool(addr(10), Dex::CurveStableSwap, &[addr(1), addr(2), addr(3)]);
        index.add_pool(addr(10), Dex::CurveStableSwap, &[addr(1), addr(2), addr(3)]);
        assert_eq!(index.node_count(), 3);
        assert_eq!(index.graph.edge_count(), 3);
        assert_eq!(index.pools_between(addr(3), addr(1)).len(), 1);
        assert_eq!(index.pool_count(), 1);
    }

    #[test]
    fn test_deepest_by_balance() {
        let mut index = PoolIndex::new();
        index.add_pool(addr(10), Dex::UniswapV2, &[addr(1), addr(2)]);
        index.add_pool(addr(11), Dex::PancakeswapV2, &[addr(2), addr(1)]);
        index.add_pool(addr(12), Dex::BiswapV2, &[addr(1), addr(2)]);
        index.set_balance(addr(10), addr(1), U256::from(5u64));
        index.set_balance(addr(11), addr(1), U256::from(50u64));
        index.set_balance(addr(12), addr(1), U256::from(20u64));

        assert_eq!(index.deepest(addr(1), addr(2), &[]).unwrap().pool, addr(11));
        assert_eq!(index.deepest(addr(1), addr(2), &[addr(11)]).unwrap().pool, addr(12));

        let (first, second) = index.deepest_two(addr(1), addr(2), &[]);
        assert_eq!(first.unwrap().pool, addr(11));
        assert_eq!(second.unwrap().pool, addr(12));

        // no balance of token 2 observed anywhere
        assert!(index.deepest(addr(2), addr(1), &[]).is_none());
        assert!(index.deepest(addr(1), addr(3), &[]).is_none());
    }
}
