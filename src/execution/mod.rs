pub mod assembler;
pub mod contract;
pub mod raw_tx;
pub mod relay;

pub use assembler::{
    assemble_arbitrage, assemble_sandwich, gate, gate_sandwich, plan_arbitrage, plan_sandwich, GateDecision,
    PlannedTx,
};
pub use contract::{ArbitrageCall, BackRunCall, FrontRunCall, IAttacker};
pub use raw_tx::raw_transaction;
pub use relay::{next_block_base_fee, BundleRelay, JsonRpcRelay, Submitter};
