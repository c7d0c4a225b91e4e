//! Relay websocket producers
//!
//! One stream feeds traced pending transactions into the worker queue, the
//! other keeps the accessible block up to date. Both reconnect after a fixed
//! delay on any transport error; nothing missed while down is replayed.

use std::collections::HashSet;
use std::future::Future;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, Bytes, B256, U256, U64};
use alloy::providers::Provider;
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use alloy::sol;
use alloy::sol_types::SolCall;
use crossbeam_channel::{Sender, TrySendError};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::contracts::CLUB48_REGISTRY;
use crate::config::thresholds::DUST_PENDING;
use crate::config::Config;
use crate::error::TransportError;
use crate::trace::trace_pending;
use crate::types::{Transaction, TxKind, TxSignature};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pending transactions must arrive at least this often
const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Fields requested for every pending transaction
const PENDING_TX_FIELDS: [&str; 16] = [
    "tx_hash",
    "tx_contents.chain_id",
    "tx_contents.input",
    "tx_contents.v",
    "tx_contents.r",
    "tx_contents.s",
    "tx_contents.type",
    "tx_contents.to",
    "tx_contents.from",
    "tx_contents.value",
    "tx_contents.nonce",
    "tx_contents.gas",
    "tx_contents.gas_price",
    "tx_contents.max_priority_fee_per_gas",
    "tx_contents.max_fee_per_gas",
    "tx_contents.max_fee_per_blob_gas",
];

sol! {
    interface IClubRegistry {
        function getPuissants() external view returns (address[]);
    }
}

/// Runs `connect_and_serve` forever, sleeping `delay` after each failure
pub async fn reconnecting<F, Fut>(tag: &str, delay: Duration, mut connect_and_serve: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), TransportError>>,
{
    loop {
        match connect_and_serve().await {
            Ok(()) => warn!("{} stream ended, reconnecting", tag),
            Err(e) => error!("{} stream failed: {}, reconnecting", tag, e),
        }
        tokio::time::sleep(delay).await;
    }
}

async fn connect(url: &str, authorization: &str) -> Result<WsStream, TransportError> {
    let mut request = url.into_client_request()?;
    if !authorization.is_empty() {
        let value = HeaderValue::from_str(authorization).map_err(|e| TransportError::Protocol(e.to_string()))?;
        request.headers_mut().insert("Authorization", value);
    }
    let (stream, _) = connect_async(request).await?;
    Ok(stream)
}

/// Next text frame, answering pings on the way
async fn next_text(ws: &mut WsStream) -> Result<String, TransportError> {
    loop {
        let message = timeout(READ_TIMEOUT, ws.next())
            .await
            .map_err(|_| TransportError::Timeout)?
            .ok_or(TransportError::Closed)??;
        match message {
            Message::Text(text) => return Ok(text),
            Message::Ping(data) => ws.send(Message::Pong(data)).await?,
            Message::Close(_) => return Err(TransportError::Closed),
            _ => {}
        }
    }
}

/// `txContents` of a relay pending-transaction notification
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxContents {
    #[serde(default)]
    pub chain_id: Option<U64>,
    #[serde(default, rename = "type")]
    pub tx_type: Option<U64>,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub value: U256,
    #[serde(default)]
    pub input: Bytes,
    #[serde(default)]
    pub nonce: U64,
    #[serde(default)]
    pub gas: U64,
    #[serde(default)]
    pub gas_price: Option<U256>,
    #[serde(default)]
    pub max_fee_per_gas: Option<U256>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<U256>,
    #[serde(default)]
    pub v: U64,
    #[serde(default)]
    pub r: U256,
    #[serde(default)]
    pub s: U256,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTx {
    pub tx_hash: B256,
    pub tx_contents: TxContents,
}

impl PendingTx {
    /// The notified transaction, or `None` for blob and other unsupported types
    pub fn into_transaction(self) -> Option<Transaction> {
        let c = self.tx_contents;
        let kind = match c.tx_type.map(|t| t.to::<u64>()).unwrap_or_default() {
            0 => TxKind::Legacy,
            1 => TxKind::Eip2930,
            2 => TxKind::Eip1559,
            _ => return None,
        };
        let price = |p: Option<U256>| p.map(|p| p.saturating_to::<u128>());
        Some(Transaction {
            hash: self.tx_hash,
            kind,
            chain_id: c.chain_id.map(|id| id.to::<u64>()),
            nonce: c.nonce.to::<u64>(),
            gas: c.gas.to::<u64>(),
            gas_price: price(c.gas_price),
            max_fee_per_gas: price(c.max_fee_per_gas),
            max_priority_fee_per_gas: price(c.max_priority_fee_per_gas),
            caller: c.from,
            receiver: c.to,
            value: c.value,
            input: c.input,
            signature: TxSignature { v: c.v.to::<u64>(), r: c.r, s: c.s },
            ..Default::default()
        })
    }
}

/// The pending transaction carried by a subscription notification
pub fn parse_notification(text: &str) -> Result<Option<PendingTx>, TransportError> {
    let message: Value = serde_json::from_str(text).map_err(|e| TransportError::Protocol(e.to_string()))?;
    let Some(result) = message.get("params").and_then(|p| p.get("result")) else {
        return Ok(None);
    };
    serde_json::from_value(result.clone())
        .map(Some)
        .map_err(|e| TransportError::Protocol(e.to_string()))
}

async fn serve_pending<P: Provider>(
    config: &Config,
    provider: &P,
    queue: &Sender<Transaction>,
) -> Result<(), TransportError> {
    let mut ws = connect(&config.relay_ws_endpoint, &config.relay_authorization).await?;
    let subscribe = json!({
        "id": 1,
        "method": "subscribe",
        "params": ["newTxs", { "blockchain_network": config.network, "include": PENDING_TX_FIELDS }],
    });
    ws.send(Message::Text(subscribe.to_string())).await?;
    next_text(&mut ws).await?;

    let dust = U256::from(DUST_PENDING);
    loop {
        let text = next_text(&mut ws).await?;
        let pending = parse_notification(&text).unwrap_or_else(|e| {
            debug!("Skipping notification: {}", e);
            None
        });
        let Some(tx) = pending.and_then(PendingTx::into_transaction) else {
            continue;
        };
        if !tx.is_traceable() {
            continue;
        }
        if queue.is_full() {
            warn!("[{}] Queue full, dropping", tx.hash);
            continue;
        }
        let hash = tx.hash;
        let started = Instant::now();
        let tx = match trace_pending(provider, tx, config.wrapped_native, dust).await {
            Ok(tx) => tx,
            Err(e) => {
                debug!("[{}] Not queued: {}", hash, e);
                continue;
            }
        };
        match queue.try_send(tx) {
            Ok(()) => info!("[{}] Queued after {:?}", hash, started.elapsed()),
            Err(TrySendError::Full(_)) => warn!("[{}] Queue full, dropping", hash),
            Err(TrySendError::Disconnected(_)) => return Err(TransportError::Closed),
        }
    }
}

/// Subscribes to pending transactions, traces the ones that may swap and
/// queues those that do. A full queue drops the transaction.
pub async fn run_pending_stream<P: Provider>(config: &Config, provider: &P, queue: Sender<Transaction>) {
    info!("Streaming pending transactions from {}", config.relay_ws_endpoint);
    reconnecting("pending transactions", config.reconnect_delay, || serve_pending(config, provider, &queue)).await
}

/// Who builds the next block
#[derive(Debug, Clone, Deserialize)]
pub struct FutureValidator {
    pub block_height: u64,
    pub wallet_id: Address,
}

/// `-1` when the validator only takes club bundles, the block height when the
/// relay reaches it, `0` otherwise
pub fn accessible_block(next: &FutureValidator, club: &HashSet<Address>, relay: &HashSet<Address>) -> i64 {
    if club.contains(&next.wallet_id) {
        -1
    } else if relay.contains(&next.wallet_id) {
        i64::try_from(next.block_height).unwrap_or_default()
    } else {
        0
    }
}

/// Validators registered with the privileged club
pub async fn club_validators<P: Provider>(provider: &P) -> eyre::Result<HashSet<Address>> {
    let request = TransactionRequest::default()
        .to(CLUB48_REGISTRY)
        .input(TransactionInput::new(Bytes::from(IClubRegistry::getPuissantsCall {}.abi_encode())));
    let output = provider.call(request).await?;
    let validators = IClubRegistry::getPuissantsCall::abi_decode_returns(&output)?;
    Ok(validators.into_iter().collect())
}

/// Validators reachable through the relay
pub async fn relay_validators(config: &Config) -> eyre::Result<HashSet<Address>> {
    let payload = json!({
        "id": "1",
        "method": "bsc_mev_validators",
        "params": { "blockchain_network": config.network },
    });
    let response: Value = reqwest::Client::new()
        .post(&config.relay_http_endpoint)
        .header("Authorization", &config.relay_authorization)
        .json(&payload)
        .send()
        .await?
        .json()
        .await?;
    Ok(parse_validators(&response))
}

fn parse_validators(response: &Value) -> HashSet<Address> {
    response
        .pointer("/result/validators")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(|v| v.as_str()?.parse().ok()).collect())
        .unwrap_or_default()
}

fn parse_future_validator(text: &str) -> Result<Option<FutureValidator>, TransportError> {
    let message: Value = serde_json::from_str(text).map_err(|e| TransportError::Protocol(e.to_string()))?;
    let Some(first) = message.pointer("/params/result/future_validator_info/0") else {
        return Ok(None);
    };
    serde_json::from_value(first.clone())
        .map(Some)
        .map_err(|e| TransportError::Protocol(e.to_string()))
}

/// Keeps `accessible` set from the relay's next-validator notifications.
/// This is the only writer of the value.
pub async fn run_accessible_block_feed<P: Provider>(config: &Config, provider: &P, accessible: watch::Sender<i64>) {
    let club = club_validators(provider).await.unwrap_or_else(|e| {
        warn!("Club validator list unavailable: {}", e);
        HashSet::new()
    });
    let relay = relay_validators(config).await.unwrap_or_else(|e| {
        warn!("Relay validator list unavailable: {}", e);
        HashSet::new()
    });
    info!("Validators: {} club, {} relay", club.len(), relay.len());

    reconnecting("accessible block", config.reconnect_delay, || {
        serve_accessible_block(config, &club, &relay, &accessible)
    })
    .await
}

async fn serve_accessible_block(
    config: &Config,
    club: &HashSet<Address>,
    relay: &HashSet<Address>,
    accessible: &watch::Sender<i64>,
) -> Result<(), TransportError> {
    let mut ws = connect(&config.relay_block_ws_endpoint, &config.relay_authorization).await?;
    let subscribe = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "subscribe",
        "params": ["bdnBlocks", { "include": ["header", "future_validator_info"] }, { "blockchain_network": config.network }],
    });
    ws.send(Message::Text(subscribe.to_string())).await?;
    next_text(&mut ws).await?;
    loop {
        let text = next_text(&mut ws).await?;
        if let Some(next) = parse_future_validator(&text)? {
            let value = accessible_block(&next, club, relay);
            accessible.send_replace(value);
            debug!("Next block {} by {}: accessible {}", next.block_height, next.wallet_id, value);
        }
    }
}
