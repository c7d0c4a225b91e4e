//! Relay submission
//!
//! Attacks leave either as one private transaction or as an ordered bundle
//! pinned to a target block. Failures are logged by the caller and abandoned.

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::assembler::{GateDecision, PlannedTx};
use super::raw_tx::raw_transaction;
use crate::error::SubmissionError;
use crate::types::Transaction;

const RELAY_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// EIP-1559 base fee of the block after one that used `gas_used` of
/// `gas_limit` at `base_fee`
pub fn next_block_base_fee(gas_used: u64, gas_limit: u64, base_fee: u128) -> u128 {
    let target = u128::from(gas_limit / 2);
    let used = u128::from(gas_used);
    if target == 0 || used == target {
        return base_fee;
    }
    if used > target {
        let delta = (base_fee * (used - target) / target / 8).max(1);
        base_fee + delta
    } else {
        let delta = base_fee * (target - used) / target / 8;
        base_fee.saturating_sub(delta)
    }
}

/// A private transaction relay that also accepts bundles
#[async_trait]
pub trait BundleRelay: Send + Sync {
    /// Submits `raw_txs` in order for `target_block`; returns the bundle id
    async fn submit_bundle(&self, raw_txs: &[Bytes], target_block: u64) -> Result<String, SubmissionError>;

    /// Sends one transaction privately; returns its hash
    async fn send_private(&self, raw_tx: &Bytes) -> Result<String, SubmissionError>;
}

/// JSON-RPC relay over HTTP
pub struct JsonRpcRelay {
    url: String,
    authorization: String,
    client: Client,
}

impl JsonRpcRelay {
    pub fn new(url: impl Into<String>, authorization: impl Into<String>) -> Result<Self, SubmissionError> {
        let client = Client::builder().timeout(RELAY_HTTP_TIMEOUT).build()?;
        Ok(Self { url: url.into(), authorization: authorization.into(), client })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, SubmissionError> {
        let payload = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let mut request = self.client.post(&self.url).json(&payload);
        if !self.authorization.is_empty() {
            request = request.header("Authorization", &self.authorization);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SubmissionError::Http(format!("HTTP {}: {}", status, body)));
        }
        let parsed: Value = serde_json::from_str(&body).map_err(|e| SubmissionError::Rejected(e.to_string()))?;
        result_of(parsed)
    }
}

/// The `result` of a JSON-RPC response, or its error as a rejection
fn result_of(response: Value) -> Result<Value, SubmissionError> {
    if let Some(err) = response.get("error") {
        let message = err.get("message").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(SubmissionError::Rejected(message.to_string()));
    }
    match response.get("result") {
        None | Some(Value::Null) => Err(SubmissionError::Rejected("empty result".into())),
        Some(result) => Ok(result.clone()),
    }
}

/// Bundle ids come back bare or as `{ "bundleHash": ... }`
fn bundle_id(result: &Value) -> Result<String, SubmissionError> {
    result
        .as_str()
        .or_else(|| result.get("bundleHash").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| SubmissionError::Rejected(format!("no bundle hash in {}", result)))
}

#[async_trait]
impl BundleRelay for JsonRpcRelay {
    async fn submit_bundle(&self, raw_txs: &[Bytes], target_block: u64) -> Result<String, SubmissionError> {
        let txs: Vec<String> = raw_txs.iter().map(|tx| tx.to_string()).collect();
        let params = json!([{
            "txs": txs,
            "blockNumber": format!("{:#x}", target_block),
        }]);
        let result = self.request("eth_sendBundle", params).await?;
        bundle_id(&result)
    }

    async fn send_private(&self, raw_tx: &Bytes) -> Result<String, SubmissionError> {
        let result = self.request("eth_sendRawTransaction", json!([raw_tx.to_string()])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SubmissionError::Rejected(format!("unexpected result {}", result)))
    }
}

/// Signs `tx` as a legacy transaction
pub async fn sign_planned(
    wallet: &EthereumWallet,
    from: Address,
    tx: &PlannedTx,
    nonce: u64,
    chain_id: u64,
) -> Result<Bytes, SubmissionError> {
    let request = TransactionRequest::default()
        .with_from(from)
        .with_to(tx.to)
        .with_input(tx.calldata.clone())
        .with_value(tx.value)
        .with_gas_limit(tx.gas_limit)
        .with_gas_price(tx.gas_price)
        .with_nonce(nonce)
        .with_chain_id(chain_id);
    let envelope = request
        .build(wallet)
        .await
        .map_err(|e| SubmissionError::Signing(e.to_string()))?;
    Ok(Bytes::from(envelope.encoded_2718()))
}

/// Signs attacker transactions and hands them to a relay
pub struct Submitter<P, R> {
    provider: P,
    relay: R,
    wallet: EthereumWallet,
    sender: Address,
    chain_id: u64,
}

impl<P: Provider, R: BundleRelay> Submitter<P, R> {
    pub fn new(provider: P, relay: R, signer: PrivateKeySigner, chain_id: u64) -> Self {
        let sender = signer.address();
        Self { provider, relay, wallet: EthereumWallet::from(signer), sender, chain_id }
    }

    async fn nonce(&self) -> Result<u64, SubmissionError> {
        self.provider
            .get_transaction_count(self.sender)
            .await
            .map_err(|e| SubmissionError::Http(e.to_string()))
    }

    /// Sends an arbitrage as decided: alone, or bundled behind the victim
    pub async fn submit_arbitrage(
        &self,
        victim: &Transaction,
        tx: &PlannedTx,
        decision: &GateDecision,
    ) -> Result<String, SubmissionError> {
        let signed = sign_planned(&self.wallet, self.sender, tx, self.nonce().await?, self.chain_id).await?;
        match decision {
            GateDecision::Reject(reason) => Err(SubmissionError::Gated(reason.clone())),
            GateDecision::Single { gas_price } => {
                let hash = self.relay.send_private(&signed).await?;
                info!("[{}] Arbitrage sent privately at {} wei gas: {}", victim.hash, gas_price, hash);
                Ok(hash)
            }
            GateDecision::Bundle { target_block, .. } => {
                let bundle = [raw_transaction(victim)?, signed];
                let id = self.relay.submit_bundle(&bundle, *target_block).await?;
                info!("[{}] Arbitrage bundle for block {}: {}", victim.hash, target_block, id);
                Ok(id)
            }
        }
    }

    /// Bundles front-run, victim and back-run for the decided block
    pub async fn submit_sandwich(
        &self,
        victim: &Transaction,
        front: &PlannedTx,
        back: &PlannedTx,
        decision: &GateDecision,
    ) -> Result<String, SubmissionError> {
        let GateDecision::Bundle { target_block, bundle_fee, .. } = decision else {
            return Err(SubmissionError::Gated("sandwiches are only bundled".into()));
        };
        let nonce = self.nonce().await?;
        let front = sign_planned(&self.wallet, self.sender, front, nonce, self.chain_id).await?;
        let back = sign_planned(&self.wallet, self.sender, back, nonce + 1, self.chain_id).await?;
        let bundle = [front, raw_transaction(victim)?, back];
        debug!("[{}] Sandwich bundle fee {}", victim.hash, bundle_fee);
        let id = self.relay.submit_bundle(&bundle, *target_block).await?;
        info!("[{}] Sandwich bundle for block {}: {}", victim.hash, target_block, id);
        Ok(id)
    }
}
