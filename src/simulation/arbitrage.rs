use std::time::Instant;

use alloy::primitives::U256;
use tracing::{debug, info};

use super::engine::{EvmEngine, ForkGuard};
use super::iterator::{SimulationIterator, Trial};
use super::{balance_of, replay_victim, within, SimulationSettings};
use crate::config::thresholds::PROBE_AMOUNT;
use crate::error::SimulationError;
use crate::execution::contract::ArbitrageCall;
use crate::types::{Path, Transaction};

/// Best arbitrage trade along `path` after the victim executes.
///
/// A probe of `PROBE_AMOUNT` first confirms the path executes at all. The
/// search then starts from the path's amount, or the attacker's balance of the
/// start token when the path carries none. Trial output is the attacker's
/// gain in the last token of the path. `Ok(None)` when no trial profits.
pub async fn simulate_arbitrage<E: EvmEngine + 'static>(
    guard: &mut ForkGuard<E>,
    settings: &SimulationSettings,
    victim: &Transaction,
    path: &Path,
) -> Result<Option<Trial>, SimulationError> {
    let (Some(first), Some(last)) = (path.tokens.first().copied(), path.tokens.last().copied()) else {
        return Ok(None);
    };

    guard.reset().await?;
    let probe = async {
        let engine = guard.engine();
        replay_victim(engine, victim).await?;
        let base = balance_of(engine, settings.attacker, first).await?;
        let calldata = ArbitrageCall::WithoutRelay.encode(U256::from(PROBE_AMOUNT), path);
        engine.call(settings.owner, settings.attacker, U256::ZERO, calldata, false).await?;
        Ok::<_, SimulationError>(base)
    };
    let base = match within(settings.trial_timeout, probe).await {
        Ok(base) => base,
        Err(e) => {
            info!("[{}] No possibility of arbitrage on {}: {}", victim.hash, path, e);
            return Ok(None);
        }
    };

    let start = if path.amount_in.is_zero() { base } else { path.amount_in };
    let mut iterator = SimulationIterator::arbitrage(start).with_deadline(Instant::now() + settings.path_timeout);

    while let Some(amount) = iterator.next_amount() {
        guard.reset().await?;
        let trial = async {
            let engine = guard.engine();
            replay_victim(engine, victim).await?;
            let calldata = ArbitrageCall::WithoutRelay.encode(amount, path);
            let outcome = engine.call(settings.owner, settings.attacker, U256::ZERO, calldata, false).await?;
            let after = balance_of(engine, settings.attacker, last).await?;
            Ok::<_, SimulationError>((after.saturating_sub(base), outcome.gas_used))
        };
        let (output, gas_used) = match within(settings.trial_timeout, trial).await {
            Ok(result) => result,
            Err(e) => {
                debug!("[{}] Arbitrage trial at {} failed: {}", victim.hash, amount, e);
                (U256::ZERO, 0)
            }
        };
        iterator.record(output, gas_used);
    }

    let best = iterator.finish();
    if let Some(trial) = &best {
        info!(
            "[{}] Arbitrage best after {} trials: in {} out {} gas {}",
            victim.hash,
            iterator.count(),
            trial.amount,
            trial.output,
            trial.gas_used
        );
    }
    Ok(best)
}
