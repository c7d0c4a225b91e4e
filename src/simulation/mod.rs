//! Fork-based validation and sizing of attacks
//!
//! Every trial starts from the pinned fork state, replays the victim where the
//! attack needs it, executes the attacker contract and reads balances back.
//! Reverts and timeouts make a zero trial; only engine failures on reset end
//! a path early.

pub mod arbitrage;
pub mod engine;
pub mod iterator;
pub mod sandwich;

use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use tracing::{debug, info};

use crate::config::contracts::{STATIC_CALLER, WRAPPED_HOLDER};
use crate::dex::fetch::IERC20;
use crate::error::SimulationError;
use crate::types::Transaction;

pub use arbitrage::simulate_arbitrage;
pub use engine::{AnvilEngine, CallOutcome, EvmEngine, ForkGuard, SnapshotId};
pub use iterator::{IteratorSettings, SimulationIterator, Trial};
pub use sandwich::{maximum_rates, simulate_sandwich, BalanceRate, SandwichTrial};

sol! {
    interface ITransfer {
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

/// Wrapped-native balance given to a freshly installed attacker
const ATTACKER_SEED: u128 = 1_000_000_000_000_000_000;

/// Who sends attacks and how long they may take
#[derive(Debug, Clone, Copy)]
pub struct SimulationSettings {
    pub attacker: Address,
    pub owner: Address,
    pub trial_timeout: Duration,
    pub path_timeout: Duration,
}

/// ERC-20 balance of `holder`, read statically
pub async fn balance_of<E: EvmEngine + ?Sized>(
    engine: &E,
    holder: Address,
    token: Address,
) -> Result<U256, SimulationError> {
    let calldata = Bytes::from(IERC20::balanceOfCall { owner: holder }.abi_encode());
    let outcome = engine.call(STATIC_CALLER, token, U256::ZERO, calldata, true).await?;
    IERC20::balanceOfCall::abi_decode_returns(&outcome.output).map_err(|e| SimulationError::Decode(e.to_string()))
}

/// Executes the victim transaction on the fork as its sender
pub async fn replay_victim<E: EvmEngine + ?Sized>(engine: &E, tx: &Transaction) -> Result<CallOutcome, SimulationError> {
    let receiver = tx
        .receiver
        .ok_or_else(|| SimulationError::Engine(format!("{} creates a contract", tx.hash)))?;
    engine.call(tx.caller, receiver, tx.value, tx.input.clone(), false).await
}

/// Forks at `block` and, when `attacker_code` is given, installs the attacker
/// at `attacker` and seeds it with wrapped native from a known holder
pub async fn prepare_fork<E: EvmEngine + ?Sized>(
    engine: &E,
    url: &str,
    block: u64,
    timestamp: Option<u64>,
    attacker: Address,
    attacker_code: Option<Bytes>,
    wrapped: Address,
) -> Result<(), SimulationError> {
    engine.fork(url, block, timestamp).await?;
    info!("Fork ready at block {}", block);
    let Some(code) = attacker_code else {
        return Ok(());
    };
    engine.set_code(attacker, code).await?;
    let transfer = ITransfer::transferCall { to: attacker, amount: U256::from(ATTACKER_SEED) };
    engine
        .call(WRAPPED_HOLDER, wrapped, U256::ZERO, Bytes::from(transfer.abi_encode()), false)
        .await?;
    debug!("Installed attacker at {} with {} wrapped", attacker, ATTACKER_SEED);
    Ok(())
}

/// Runs `trial` under `budget`; a timeout is reported as such
pub(crate) async fn within<T, F>(budget: Duration, trial: F) -> Result<T, SimulationError>
where
    F: std::future::Future<Output = Result<T, SimulationError>>,
{
    tokio::time::timeout(budget, trial).await.unwrap_or(Err(SimulationError::Timeout))
}
