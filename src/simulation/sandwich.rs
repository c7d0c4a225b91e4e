use std::time::Instant;

use alloy::primitives::{Address, U256};
use tracing::{debug, info};

use super::engine::{EvmEngine, ForkGuard};
use super::iterator::SimulationIterator;
use super::{balance_of, replay_victim, within, SimulationSettings};
use crate::config::tokens;
use crate::error::SimulationError;
use crate::execution::contract::{BackRunCall, FrontRunCall};
use crate::graph::PoolIndex;
use crate::types::{Path, Transaction};

/// Lower bound on `after / before` of a pool's output-token balance across
/// the front-run, as `numerator / denominator`. Zero means unchecked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BalanceRate {
    pub numerator: U256,
    pub denominator: U256,
}

impl BalanceRate {
    pub fn is_unchecked(&self) -> bool {
        self.numerator.is_zero() || self.denominator.is_zero()
    }

    /// `after / before >= numerator / denominator`
    pub fn admits(&self, before: U256, after: U256) -> bool {
        if self.is_unchecked() {
            return true;
        }
        if before.is_zero() {
            return false;
        }
        after.saturating_mul(self.denominator) >= self.numerator.saturating_mul(before)
    }
}

/// Per hop, the largest ratio between another base-token pool's balance of
/// the hop's non-base token and the path pool's balance of it.
///
/// Hops trading two base tokens, or none, are left unchecked. `index` must
/// carry the balances of the non-base token in the path pools and in its
/// pools against every base token.
pub fn maximum_rates(path: &Path, index: &PoolIndex) -> Vec<BalanceRate> {
    path.legs()
        .map(|(_, pool, token_in, token_out)| {
            let token = match (tokens::is_base(token_in), tokens::is_base(token_out)) {
                (true, false) => token_out,
                (false, true) => token_in,
                _ => return BalanceRate::default(),
            };
            let own = index.balance(pool, token);
            let deepest_other = tokens::BASE_TOKENS
                .iter()
                .flat_map(|base| index.pools_between(token, *base))
                .filter(|edge| edge.pool != pool)
                .map(|edge| index.balance(edge.pool, token))
                .max()
                .unwrap_or_default();
            BalanceRate { numerator: deepest_other, denominator: own }
        })
        .collect()
}

/// Best sandwich found by simulation, amounts in the path's first token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SandwichTrial {
    pub front_amount: U256,
    pub back_amount: U256,
    pub front_gas_used: u64,
    pub back_gas_used: u64,
    pub revenue: U256,
}

/// Searches the front-run size that maximises the attacker's gain in the
/// path's first token.
///
/// Each trial front-runs, checks every path pool against `rates`, replays the
/// victim and back-runs with whatever the front-run bought. A trial that
/// reverts or fails a rate check yields zero.
pub async fn simulate_sandwich<E: EvmEngine + 'static>(
    guard: &mut ForkGuard<E>,
    settings: &SimulationSettings,
    victim: &Transaction,
    path: &Path,
    amount_in: U256,
    rates: &[BalanceRate],
) -> Result<Option<SandwichTrial>, SimulationError> {
    let (Some(first), Some(last)) = (path.tokens.first().copied(), path.tokens.last().copied()) else {
        return Ok(None);
    };
    let Some(target) = path.pools.last() else {
        return Ok(None);
    };
    if !victim.swap_events.iter().any(|e| e.pool == *target) {
        debug!("[{}] Victim never trades on {}", victim.hash, target);
        return Ok(None);
    }

    guard.reset().await?;
    let base = balance_of(guard.engine(), settings.attacker, first).await?;
    let start = if amount_in.is_zero() { base } else { amount_in };
    let mut iterator = SimulationIterator::sandwich(start, base).with_deadline(Instant::now() + settings.path_timeout);
    let outputs: Vec<(Address, Address)> = path
        .pools
        .iter()
        .zip(path.tokens.iter().skip(1))
        .map(|(pool, token)| (*pool, *token))
        .collect();

    let mut best = SandwichTrial::default();
    while let Some(amount) = iterator.next_amount() {
        guard.reset().await?;
        let trial = async {
            let engine = guard.engine();
            let held_before = balance_of(engine, settings.attacker, last).await?;
            let mut pool_before = Vec::with_capacity(outputs.len());
            for (pool, token) in &outputs {
                pool_before.push(balance_of(engine, *pool, *token).await?);
            }

            let front = FrontRunCall::Plain.encode(amount, path);
            let front = engine.call(settings.owner, settings.attacker, U256::ZERO, front, false).await?;

            for (i, (pool, token)) in outputs.iter().enumerate() {
                let after = balance_of(engine, *pool, *token).await?;
                let rate = rates.get(i).copied().unwrap_or_default();
                if !rate.admits(pool_before[i], after) {
                    return Err(SimulationError::Revert(format!("balance rate of {} below bound", pool)));
                }
            }

            replay_victim(engine, victim).await?;

            let mut held = balance_of(engine, settings.attacker, last).await?;
            if first == last {
                held = held.saturating_add(amount);
            }
            let back_amount = held.saturating_sub(held_before);
            let back = BackRunCall::Plain.encode(back_amount, path);
            let back = engine.call(settings.owner, settings.attacker, U256::ZERO, back, false).await?;

            let revenue = balance_of(engine, settings.attacker, first).await?.saturating_sub(base);
            Ok::<_, SimulationError>(SandwichTrial {
                front_amount: amount,
                back_amount,
                front_gas_used: front.gas_used,
                back_gas_used: back.gas_used,
                revenue,
            })
        };
        let outcome = match within(settings.trial_timeout, trial).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("[{}] Sandwich trial at {} failed: {}", victim.hash, amount, e);
                SandwichTrial::default()
            }
        };
        iterator.record(outcome.revenue, outcome.front_gas_used + outcome.back_gas_used);
        if outcome.revenue > best.revenue {
            best = outcome;
        }
    }

    if best.revenue.is_zero() {
        return Ok(None);
    }
    info!(
        "[{}] Sandwich best after {} trials: front {} back {} revenue {}",
        victim.hash,
        iterator.count(),
        best.front_amount,
        best.back_amount,
        best.revenue
    );
    Ok(Some(best))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tokens::{USDT, WBNB};
    use crate::dex::Dex;
    use crate::execution::contract::IAttacker;
    use crate::simulation::engine::mock::MockEngine;
    use crate::types::SwapEvent;
    use alloy::primitives::Bytes;
    use alloy::sol_types::SolCall;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    const T: Address = Address::repeat_byte(0x01);
    const POOL: Address = Address::repeat_byte(0x20);
    const ATTACKER: Address = Address::repeat_byte(0xaa);
    const OWNER: Address = Address::repeat_byte(0xab);
    const ROUTER: Address = Address::repeat_byte(0xdd);

    #[test]
    fn test_balance_rate() {
        let rate = BalanceRate { numerator: U256::from(9u64), denominator: U256::from(10u64) };
        assert!(rate.admits(U256::from(100u64), U256::from(90u64)));
        assert!(!rate.admits(U256::from(100u64), U256::from(89u64)));
        assert!(BalanceRate::default().admits(U256::from(100u64), U256::ZERO));
    }

    #[test]
    fn test_maximum_rates() {
        let mut index = PoolIndex::new();
        index.add_pool(POOL, Dex::UniswapV2, &[WBNB, T]);
        index.add_pool(Address::repeat_byte(0x21), Dex::PancakeswapV2, &[T, USDT]);
        index.add_pool(Address::repeat_byte(0x22), Dex::BiswapV2, &[T, WBNB]);
        index.set_balance(POOL, T, U256::from(1_000u64));
        index.set_balance(Address::repeat_byte(0x21), T, U256::from(3_000u64));
        index.set_balance(Address::repeat_byte(0x22), T, U256::from(500u64));

        let path = Path::new(U256::ZERO, &[(Dex::UniswapV2, POOL)], vec![WBNB, T]);
        let rates = maximum_rates(&path, &index);
        assert_eq!(rates, vec![BalanceRate { numerator: U256::from(3_000u64), denominator: U256::from(1_000u64) }]);

        let base_only = Path::new(U256::ZERO, &[(Dex::UniswapV2, POOL)], vec![WBNB, USDT]);
        assert!(maximum_rates(&base_only, &index)[0].is_unchecked());
    }

    /// Front-run buys T at 1:1, the victim pushes the price, the back-run
    /// sells T for 1.1 W each
    fn engine() -> Arc<MockEngine> {
        let mut balances = HashMap::new();
        balances.insert((ATTACKER, WBNB), U256::from(100_000u64));
        balances.insert((POOL, T), U256::from(1_000_000u64));
        Arc::new(MockEngine::new(
            balances,
            Box::new(|balances, _caller, to, calldata| {
                if to == ROUTER {
                    balances.insert((ROUTER, T), U256::from(1u64));
                    return Ok(120_000);
                }
                if let Ok(front) = IAttacker::sandwichFrontRunCall::abi_decode(calldata) {
                    let x = front.amountIn;
                    let held = balances.entry((ATTACKER, WBNB)).or_default();
                    *held = held.checked_sub(x).ok_or(SimulationError::Revert("balance".into()))?;
                    *balances.entry((ATTACKER, T)).or_default() += x;
                    *balances.entry((POOL, T)).or_default() -= x;
                    return Ok(90_000);
                }
                if let Ok(back) = IAttacker::sandwichBackRunCall::abi_decode(calldata) {
                    let y = back.amountIn;
                    *balances.entry((ATTACKER, T)).or_default() -= y;
                    let paid = if balances.contains_key(&(ROUTER, T)) { y * U256::from(11u64) / U256::from(10u64) } else { y };
                    // the market only absorbs 20k T at the better price
                    let paid = if y > U256::from(20_000u64) { y } else { paid };
                    *balances.entry((ATTACKER, WBNB)).or_default() += paid;
                    return Ok(80_000);
                }
                Err(SimulationError::Revert("unknown".into()))
            }),
        ))
    }

    fn victim() -> Transaction {
        Transaction {
            receiver: Some(ROUTER),
            input: Bytes::from(vec![1]),
            swap_events: vec![SwapEvent {
                dex: Dex::UniswapV2,
                pool: POOL,
                token_in: WBNB,
                token_out: T,
                amount_in: U256::from(5_000u64),
                amount_out: U256::from(5_000u64),
            }],
            ..Default::default()
        }
    }

    fn settings() -> SimulationSettings {
        SimulationSettings {
            attacker: ATTACKER,
            owner: OWNER,
            trial_timeout: Duration::from_secs(1),
            path_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_sandwich_search() {
        let engine = engine();
        let mut guard = ForkGuard::new(Arc::clone(&engine)).await.unwrap();
        let path = Path::new(U256::ZERO, &[(Dex::UniswapV2, POOL)], vec![WBNB, T]);
        let best = simulate_sandwich(&mut guard, &settings(), &victim(), &path, U256::from(10_000u64), &[])
            .await
            .unwrap()
            .unwrap();
        assert!(best.front_amount <= U256::from(20_000u64));
        assert_eq!(best.back_amount, best.front_amount);
        assert_eq!(best.revenue, best.front_amount / U256::from(10u64));
        assert_eq!((best.front_gas_used, best.back_gas_used), (90_000, 80_000));
    }

    #[tokio::test]
    async fn test_rate_bound_blocks_every_trial() {
        let engine = engine();
        let mut guard = ForkGuard::new(Arc::clone(&engine)).await.unwrap();
        let path = Path::new(U256::ZERO, &[(Dex::UniswapV2, POOL)], vec![WBNB, T]);
        let strict = [BalanceRate { numerator: U256::from(2u64), denominator: U256::from(1u64) }];
        let best = simulate_sandwich(&mut guard, &settings(), &victim(), &path, U256::from(10_000u64), &strict)
            .await
            .unwrap();
        assert!(best.is_none());
    }
}
