//! Attack assembly and the economic gate
//!
//! The gate decides, from simulated revenue and gas, whether an attack is
//! worth sending and how: a single private transaction racing the victim or
//! a bundle behind it in a relay-accessible block.

use alloy::primitives::{Address, Bytes, U256};
use tracing::debug;

use super::contract::{ArbitrageCall, BackRunCall, FrontRunCall};
use crate::config::thresholds::{
    BUNDLE_FEE, GAS_PRICE_SHADE_DEN, GAS_PRICE_SHADE_NUM, GWEI, RELAY_TIP, SAFETY_DEN, SAFETY_NUM,
};
use crate::simulation::SandwichTrial;
use crate::types::{ArbitrageAttack, Path, SandwichAttack, Transaction};

/// Share of the sandwich surplus paid to the relay, in percent
const SANDWICH_FEE_PERCENT: u64 = 98;

/// How (and whether) an attack is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Reject(String),
    /// One private transaction priced like the victim
    Single { gas_price: u128 },
    /// A bundle after the victim, valid only in `target_block`
    Bundle { gas_price: u128, target_block: u64, bundle_fee: U256 },
}

impl GateDecision {
    pub fn is_reject(&self) -> bool {
        matches!(self, GateDecision::Reject(_))
    }

    /// Contract entry point the decision pays through
    pub fn arbitrage_call(&self) -> Option<ArbitrageCall> {
        match self {
            GateDecision::Reject(_) => None,
            GateDecision::Single { .. } => Some(ArbitrageCall::WithoutRelay),
            GateDecision::Bundle { .. } => Some(ArbitrageCall::WithBloxroute),
        }
    }
}

fn reject(reason: impl Into<String>) -> GateDecision {
    GateDecision::Reject(reason.into())
}

/// `gas_used * gas_price * SAFETY`
fn safety_cost(gas_used: u64, gas_price: u128) -> U256 {
    U256::from(gas_used) * U256::from(gas_price) * U256::from(SAFETY_NUM) / U256::from(SAFETY_DEN)
}

/// Gate for an arbitrage behind `victim`.
///
/// `accessible_block` is `0` when the next validator is unknown, `-1` when it
/// only takes club bundles, otherwise the block a relay bundle can land in.
pub fn gate(revenue: U256, gas_used: u64, victim: &Transaction, accessible_block: i64) -> GateDecision {
    if gas_used == 0 {
        return reject("no gas estimate");
    }
    let victim_price = victim.effective_gas_price();
    if safety_cost(gas_used, victim_price) >= revenue {
        return reject(format!("revenue {} does not cover gas at {}", revenue, victim_price));
    }

    let target_block = match accessible_block {
        0 => return GateDecision::Single { gas_price: victim_price },
        b if b < 0 => return reject("next validator only accepts club bundles"),
        b => b as u64,
    };

    let bundle_fee = U256::from(BUNDLE_FEE);
    if revenue <= bundle_fee {
        return reject(format!("revenue {} below bundle fee", revenue));
    }
    let gas = U256::from(gas_used);
    let min_gas_price = (U256::from(victim.gas) + gas) * U256::from(GWEI) / gas;
    let max_gas_price = (revenue - bundle_fee) * U256::from(SAFETY_DEN * GAS_PRICE_SHADE_NUM)
        / (U256::from(SAFETY_NUM * GAS_PRICE_SHADE_DEN) * gas);
    if min_gas_price > max_gas_price {
        return reject(format!("gas price window empty: min {} max {}", min_gas_price, max_gas_price));
    }

    let gas_price: u128 = max_gas_price.saturating_to();
    if safety_cost(gas_used, gas_price) + bundle_fee > revenue {
        return reject("bundle cost exceeds revenue");
    }
    debug!("[{}] Bundle gas price {} (floor {})", victim.hash, gas_price, min_gas_price);
    GateDecision::Bundle { gas_price, target_block, bundle_fee }
}

/// Gate for a sandwich around `victim`. Sandwiches always go out as a
/// bundle, so only a relay-accessible block admits one.
///
/// The front-run is priced at 1 gwei; the back-run outbids the victim's gas
/// share and the relay takes most of what is left.
pub fn gate_sandwich(
    revenue: U256,
    front_gas_used: u64,
    back_gas_used: u64,
    victim: &Transaction,
    accessible_block: i64,
) -> GateDecision {
    let target_block = match accessible_block {
        b if b > 0 => b as u64,
        0 => return reject("next validator unknown"),
        _ => return reject("next validator only accepts club bundles"),
    };
    if front_gas_used == 0 || back_gas_used == 0 {
        return reject("no gas estimate");
    }

    let back_gas = U256::from(back_gas_used);
    let back_gas_price = (U256::from(victim.gas) + back_gas) * U256::from(GWEI) / back_gas;
    let cost = U256::from(GWEI) * U256::from(front_gas_used) + back_gas_price * back_gas;
    if cost >= revenue {
        return reject(format!("revenue {} does not cover gas {}", revenue, cost));
    }
    let bundle_fee = (revenue - cost) * U256::from(SANDWICH_FEE_PERCENT) / U256::from(100u64);
    if bundle_fee < U256::from(GWEI) {
        return reject(format!("bundle fee {} too small", bundle_fee));
    }
    GateDecision::Bundle { gas_price: back_gas_price.saturating_to(), target_block, bundle_fee }
}

pub fn assemble_arbitrage(path: &Path, amount_in: U256, revenue: U256, gas_used: u64, call: ArbitrageCall) -> ArbitrageAttack {
    ArbitrageAttack {
        function: call.name(),
        calldata: call.encode(amount_in, path),
        path: path.clone(),
        revenue,
        gas_used,
    }
}

pub fn assemble_sandwich(path: &Path, trial: &SandwichTrial, revenue: U256, front: FrontRunCall, back: BackRunCall) -> SandwichAttack {
    SandwichAttack {
        front_function: front.name(),
        front_calldata: front.encode(trial.front_amount, path),
        front_gas_used: trial.front_gas_used,
        back_function: back.name(),
        back_calldata: back.encode(trial.back_amount, path),
        back_gas_used: trial.back_gas_used,
        path: path.clone(),
        front_amount_in: trial.front_amount,
        back_amount_in: trial.back_amount,
        revenue,
    }
}

/// An attacker-contract call ready to be signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTx {
    pub to: Address,
    pub calldata: Bytes,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: u128,
}

/// The arbitrage transaction for an admitted decision. The gas limit is
/// twice the simulated gas.
pub fn plan_arbitrage(attack: &ArbitrageAttack, contract: Address, decision: &GateDecision) -> Option<PlannedTx> {
    let (gas_price, value) = match decision {
        GateDecision::Reject(_) => return None,
        GateDecision::Single { gas_price } => (*gas_price, U256::ZERO),
        GateDecision::Bundle { gas_price, .. } => (*gas_price, U256::from(RELAY_TIP)),
    };
    Some(PlannedTx {
        to: contract,
        calldata: attack.calldata.clone(),
        value,
        gas_limit: attack.gas_used.saturating_mul(2),
        gas_price,
    })
}

/// Front-run and back-run transactions of a bundled sandwich. The back-run
/// carries the bundle fee.
pub fn plan_sandwich(attack: &SandwichAttack, contract: Address, decision: &GateDecision) -> Option<(PlannedTx, PlannedTx)> {
    let GateDecision::Bundle { gas_price, bundle_fee, .. } = decision else {
        return None;
    };
    let front = PlannedTx {
        to: contract,
        calldata: attack.front_calldata.clone(),
        value: U256::ZERO,
        gas_limit: attack.front_gas_used.saturating_mul(11) / 10,
        gas_price: GWEI,
    };
    let back = PlannedTx {
        to: contract,
        calldata: attack.back_calldata.clone(),
        value: *bundle_fee,
        gas_limit: attack.back_gas_used.saturating_mul(2),
        gas_price: *gas_price,
    };
    Some((front, back))
}
