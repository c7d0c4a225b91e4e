//! Forked execution engine.
//!
//! `EvmEngine` is the capability the simulator needs from an EVM: fork at a
//! block, snapshot and revert, and execute calls. `AnvilEngine` drives an
//! anvil-compatible fork node over JSON-RPC.

use std::sync::Arc;

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::SimulationError;

/// Gas limit for state-changing calls sent to the fork
const CALL_GAS_LIMIT: u64 = 10_000_000;

/// Engine-side snapshot handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotId(pub U256);

/// Result of a successful call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallOutcome {
    pub output: Bytes,
    pub gas_used: u64,
}

#[async_trait]
pub trait EvmEngine: Send + Sync {
    /// Resets the engine onto `url` at `block`. The next block is stamped
    /// with `timestamp` when given.
    async fn fork(&self, url: &str, block: u64, timestamp: Option<u64>) -> Result<(), SimulationError>;

    async fn snapshot(&self) -> Result<SnapshotId, SimulationError>;

    async fn revert(&self, id: SnapshotId) -> Result<(), SimulationError>;

    /// Executes a message call. Static calls leave no state behind; a revert
    /// is `SimulationError::Revert`.
    async fn call(
        &self,
        caller: Address,
        to: Address,
        value: U256,
        calldata: Bytes,
        is_static: bool,
    ) -> Result<CallOutcome, SimulationError>;

    async fn set_code(&self, address: Address, code: Bytes) -> Result<(), SimulationError>;

    async fn block_number(&self) -> Result<u64, SimulationError>;
}

/// Pins a snapshot for the lifetime of one path evaluation.
///
/// `reset` rolls the engine back to the pinned state before a trial. The
/// final rollback is spawned on drop, so the fork is released however the
/// evaluation ends.
pub struct ForkGuard<E: EvmEngine + 'static> {
    engine: Arc<E>,
    pinned: Option<SnapshotId>,
}

impl<E: EvmEngine + 'static> ForkGuard<E> {
    pub async fn new(engine: Arc<E>) -> Result<Self, SimulationError> {
        let pinned = engine.snapshot().await?;
        Ok(Self { engine, pinned: Some(pinned) })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Reverts to the pinned state and pins it again
    pub async fn reset(&mut self) -> Result<(), SimulationError> {
        let pinned = self.pinned.take().ok_or(SimulationError::NotForked)?;
        self.engine.revert(pinned).await?;
        self.pinned = Some(self.engine.snapshot().await?);
        Ok(())
    }

    /// Rolls back to the pinned state now instead of on drop
    pub async fn release(mut self) -> Result<(), SimulationError> {
        match self.pinned.take() {
            Some(pinned) => self.engine.revert(pinned).await,
            None => Ok(()),
        }
    }
}

impl<E: EvmEngine + 'static> Drop for ForkGuard<E> {
    fn drop(&mut self) {
        let Some(pinned) = self.pinned.take() else {
            return;
        };
        let engine = Arc::clone(&self.engine);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = engine.revert(pinned).await {
                        warn!("Final fork revert failed: {}", e);
                    }
                });
            }
            Err(_) => warn!("No runtime to release fork snapshot {}", pinned.0),
        }
    }
}

/// Reverts carry "revert" in the node's error message
fn classify(err: impl std::fmt::Display) -> SimulationError {
    let message = err.to_string();
    if message.to_lowercase().contains("revert") {
        SimulationError::Revert(message)
    } else {
        SimulationError::Engine(message)
    }
}

/// `EvmEngine` over an anvil-compatible fork node
pub struct AnvilEngine<P> {
    provider: P,
}

impl<P: Provider> AnvilEngine<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    async fn rpc<R>(&self, method: &'static str, params: serde_json::Value) -> Result<R, SimulationError>
    where
        R: serde::de::DeserializeOwned + std::fmt::Debug + Send + Sync + Unpin + 'static,
    {
        self.provider
            .raw_request::<_, R>(method.into(), params)
            .await
            .map_err(|e| SimulationError::Engine(format!("{}: {}", method, e)))
    }
}

#[async_trait]
impl<P: Provider + Send + Sync> EvmEngine for AnvilEngine<P> {
    async fn fork(&self, url: &str, block: u64, timestamp: Option<u64>) -> Result<(), SimulationError> {
        let params = json!([{ "forking": { "jsonRpcUrl": url, "blockNumber": block } }]);
        self.rpc::<serde_json::Value>("anvil_reset", params).await?;
        if let Some(timestamp) = timestamp {
            self.rpc::<serde_json::Value>("evm_setNextBlockTimestamp", json!([timestamp])).await?;
        }
        debug!("Forked {} at block {}", url, block);
        Ok(())
    }

    async fn snapshot(&self) -> Result<SnapshotId, SimulationError> {
        self.rpc::<U256>("evm_snapshot", json!([])).await.map(SnapshotId)
    }

    async fn revert(&self, id: SnapshotId) -> Result<(), SimulationError> {
        let reverted = self.rpc::<bool>("evm_revert", json!([id.0])).await?;
        if reverted {
            Ok(())
        } else {
            Err(SimulationError::Engine(format!("unknown snapshot {}", id.0)))
        }
    }

    async fn call(
        &self,
        caller: Address,
        to: Address,
        value: U256,
        calldata: Bytes,
        is_static: bool,
    ) -> Result<CallOutcome, SimulationError> {
        let tx = TransactionRequest::default()
            .with_from(caller)
            .with_to(to)
            .with_value(value)
            .with_input(calldata)
            .with_gas_limit(CALL_GAS_LIMIT);

        // eth_call surfaces the return data and the revert reason
        let output = self.provider.call(tx.clone()).await.map_err(classify)?;
        if is_static {
            return Ok(CallOutcome { output, gas_used: 0 });
        }

        self.rpc::<serde_json::Value>("anvil_impersonateAccount", json!([caller])).await?;
        let receipt = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(classify)?
            .get_receipt()
            .await
            .map_err(|e| SimulationError::Engine(e.to_string()))?;
        if !receipt.status() {
            return Err(SimulationError::Revert(format!("{} reverted on fork", receipt.transaction_hash)));
        }
        Ok(CallOutcome { output, gas_used: receipt.gas_used })
    }

    async fn set_code(&self, address: Address, code: Bytes) -> Result<(), SimulationError> {
        self.rpc::<serde_json::Value>("anvil_setCode", json!([address, code])).await?;
        Ok(())
    }

    async fn block_number(&self) -> Result<u64, SimulationError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| SimulationError::Engine(e.to_string()))
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockEngine;
    use super::*;

    const HOLDER: Address = Address::repeat_byte(1);
    const TOKEN: Address = Address::repeat_byte(2);

    fn engine() -> Arc<MockEngine> {
        let mut balances = std::collections::HashMap::new();
        balances.insert((HOLDER, TOKEN), U256::from(10u64));
        Arc::new(MockEngine::new(
            balances,
            Box::new(|balances, _, _, _| {
                *balances.entry((HOLDER, TOKEN)).or_default() += U256::from(5u64);
                Ok(21_000)
            }),
        ))
    }

    #[tokio::test]
    async fn test_reset_restores_pinned_state() {
        let engine = engine();
        let mut guard = ForkGuard::new(Arc::clone(&engine)).await.unwrap();

        guard.engine().call(HOLDER, TOKEN, U256::ZERO, Bytes::new(), false).await.unwrap();
        assert_eq!(engine.balances.lock()[&(HOLDER, TOKEN)], U256::from(15u64));

        guard.reset().await.unwrap();
        assert_eq!(engine.balances.lock()[&(HOLDER, TOKEN)], U256::from(10u64));

        guard.engine().call(HOLDER, TOKEN, U256::ZERO, Bytes::new(), false).await.unwrap();
        guard.reset().await.unwrap();
        assert_eq!(engine.balances.lock()[&(HOLDER, TOKEN)], U256::from(10u64));
    }

    #[tokio::test]
    async fn test_drop_releases_snapshot() {
        let engine = engine();
        {
            let guard = ForkGuard::new(Arc::clone(&engine)).await.unwrap();
            guard.engine().call(HOLDER, TOKEN, U256::ZERO, Bytes::new(), false).await.unwrap();
        }
        // let the spawned revert run
        tokio::task::yield_now().await;
        assert_eq!(*engine.reverts.lock(), 1);
        assert_eq!(engine.balances.lock()[&(HOLDER, TOKEN)], U256::from(10u64));
    }

    #[tokio::test]
    async fn test_release_reverts_once() {
        let engine = engine();
        let guard = ForkGuard::new(Arc::clone(&engine)).await.unwrap();
        guard.engine().call(HOLDER, TOKEN, U256::ZERO, Bytes::new(), false).await.unwrap();
        guard.release().await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(*engine.reverts.lock(), 1);
        assert_eq!(engine.balances.lock()[&(HOLDER, TOKEN)], U256::from(10u64));
    }

    #[test]
    fn test_revert_messages_classified() {
        assert!(classify("execution reverted: K").is_revert());
        assert!(!classify("connection refused").is_revert());
    }
}
