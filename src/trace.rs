//! Swap extraction from `callTracer` output.
//!
//! Pools are recognised by their swap selectors; token movements come from
//! the ERC-20 transfers around them. A pool that receives a token gains an
//! input, a pool that sends one gains an output.

use alloy::consensus::{Signed, TxEnvelope};
use alloy::primitives::{Address, Bytes, B256, I256, U256};
use alloy::providers::Provider;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::dex::Dex;
use crate::error::TraceError;
use crate::types::{SwapEvent, Transaction, TxKind, TxSignature};

const V2_SWAP: [u8; 4] = [0x02, 0x2c, 0x0d, 0x9f];
const BAKERY_SWAP: [u8; 4] = [0x6d, 0x9a, 0x64, 0x0a];
const V3_SWAP: [u8; 4] = [0x12, 0x8a, 0xcb, 0x08];
const TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
const TRANSFER_FROM: [u8; 4] = [0x23, 0xb8, 0x72, 0xdd];

/// One frame of a `callTracer` result
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallFrame {
    #[serde(default)]
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub input: Bytes,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub calls: Vec<CallFrame>,
}

/// A swap under construction; amounts may go negative while transfers net out
#[derive(Debug, Clone, PartialEq, Eq)]
struct PartialSwap {
    dex: Option<Dex>,
    pool: Address,
    token_in: Option<Address>,
    token_out: Option<Address>,
    amount_in: I256,
    amount_out: I256,
}

impl PartialSwap {
    fn new(pool: Address) -> Self {
        Self { dex: None, pool, token_in: None, token_out: None, amount_in: I256::ZERO, amount_out: I256::ZERO }
    }

    fn flip_if_negative(&mut self) {
        if self.amount_in.is_negative() || self.amount_out.is_negative() {
            std::mem::swap(&mut self.token_in, &mut self.token_out);
            let (amount_in, amount_out) = (-self.amount_out, -self.amount_in);
            self.amount_in = amount_in;
            self.amount_out = amount_out;
        }
    }

    fn complete(self) -> Option<SwapEvent> {
        if !self.amount_in.is_positive() || !self.amount_out.is_positive() {
            return None;
        }
        let event = SwapEvent {
            dex: self.dex?,
            pool: self.pool,
            token_in: self.token_in?,
            token_out: self.token_out?,
            amount_in: self.amount_in.into_raw(),
            amount_out: self.amount_out.into_raw(),
        };
        event.is_valid().then_some(event)
    }
}

fn mark_pool(swaps: &mut Vec<PartialSwap>, dex: Dex, pool: Address) {
    let mut found = false;
    for swap in swaps.iter_mut().filter(|s| s.pool == pool) {
        swap.dex = Some(dex);
        found = true;
    }
    if !found {
        let mut swap = PartialSwap::new(pool);
        swap.dex = Some(dex);
        swaps.push(swap);
    }
}

/// Books `value` of `token` moving from `sender` to `recipient`
fn record_transfer(swaps: &mut Vec<PartialSwap>, sender: Address, token: Address, recipient: Address, value: I256) {
    let (mut recipient_seen, mut sender_seen) = (false, false);
    for swap in swaps.iter_mut() {
        if swap.pool == recipient && swap.token_in.is_none_or(|t| t == token) {
            swap.token_in = Some(token);
            swap.amount_in += value;
            recipient_seen = true;
        } else if swap.pool == sender && swap.token_out.is_none_or(|t| t == token) {
            swap.token_out = Some(token);
            swap.amount_out += value;
            sender_seen = true;
        } else if swap.pool == recipient && swap.token_out == Some(token) {
            // refund of an output
            swap.amount_out -= value;
            swap.flip_if_negative();
            recipient_seen = true;
        } else if swap.pool == sender && swap.token_in == Some(token) {
            swap.amount_in -= value;
            swap.flip_if_negative();
            sender_seen = true;
        }
    }
    if !recipient_seen {
        let mut swap = PartialSwap::new(recipient);
        swap.token_in = Some(token);
        swap.amount_in = value;
        swaps.push(swap);
    }
    if !sender_seen {
        let mut swap = PartialSwap::new(sender);
        swap.token_out = Some(token);
        swap.amount_out = value;
        swaps.push(swap);
    }
}

fn word_address(word: &[u8]) -> Address {
    Address::from_slice(&word[12..32])
}

/// `(sender, recipient, value)` of an ERC-20 transfer frame
fn decode_transfer(frame: &CallFrame) -> Option<(Address, Address, U256)> {
    let input = frame.input.as_ref();
    let selector: [u8; 4] = input.get(..4)?.try_into().ok()?;
    match selector {
        TRANSFER => {
            let args = input.get(4..68)?;
            Some((frame.from, word_address(&args[..32]), U256::from_be_slice(&args[32..64])))
        }
        TRANSFER_FROM => {
            let args = input.get(4..100)?;
            Some((word_address(&args[..32]), word_address(&args[32..64]), U256::from_be_slice(&args[64..96])))
        }
        _ => None,
    }
}

/// Walks the call tree depth first, in call order. Transfer frames are
/// leaves: whatever they call is bookkeeping of the token itself.
fn collect(root: &CallFrame) -> Vec<PartialSwap> {
    let mut swaps = Vec::new();
    let mut stack = vec![root];
    while let Some(frame) = stack.pop() {
        let Some(to) = frame.to else {
            continue;
        };
        let selector = frame.input.get(..4);
        match selector {
            Some(s) if s == V2_SWAP => mark_pool(&mut swaps, Dex::UniswapV2, to),
            Some(s) if s == BAKERY_SWAP => mark_pool(&mut swaps, Dex::Bakeryswap, to),
            Some(s) if s == V3_SWAP => mark_pool(&mut swaps, Dex::UniswapV3, to),
            _ => {}
        }

        if let Some((sender, recipient, value)) = decode_transfer(frame) {
            if let Ok(value) = I256::try_from(value) {
                if value.is_positive() {
                    record_transfer(&mut swaps, sender, to, recipient, value);
                    continue;
                }
            }
        }
        stack.extend(frame.calls.iter().rev());
    }
    swaps
}

/// Swaps in `root`, ordered by exchange id. Swaps paying in less than `dust`
/// of the wrapped native token are dropped.
pub fn swap_events(root: &CallFrame, wrapped: Address, dust: U256) -> Vec<SwapEvent> {
    let mut events: Vec<SwapEvent> = collect(root)
        .into_iter()
        .filter_map(PartialSwap::complete)
        .filter(|e| !(e.token_in == wrapped && e.amount_in < dust))
        .collect();
    events.sort_by_key(|e| e.dex.id());
    events
}

fn tracer_error(response: &Value) -> Option<String> {
    response.get("error").and_then(Value::as_str).map(str::to_string)
}

fn into_frame(response: Value) -> Result<CallFrame, TraceError> {
    if let Some(err) = tracer_error(&response) {
        return Err(TraceError::Unavailable(err));
    }
    let frame: CallFrame = serde_json::from_value(response).map_err(|e| TraceError::Malformed(e.to_string()))?;
    if frame.calls.is_empty() {
        return Err(TraceError::NoCalls);
    }
    Ok(frame)
}

/// Call tree of `tx` executed on top of the latest block
pub async fn trace_call<P: Provider>(provider: &P, tx: &Transaction) -> Result<CallFrame, TraceError> {
    let call = json!({
        "from": tx.caller,
        "to": tx.receiver,
        "gas": format!("{:#x}", tx.gas),
        "gasPrice": format!("{:#x}", tx.effective_gas_price()),
        "value": tx.value,
        "data": tx.input,
    });
    let response: Value = provider
        .raw_request("debug_traceCall".into(), (call, "latest", json!({ "tracer": "callTracer" })))
        .await
        .map_err(|e| TraceError::Unavailable(e.to_string()))?;
    into_frame(response)
}

/// Call tree of a mined transaction
pub async fn trace_mined<P: Provider>(provider: &P, hash: B256) -> Result<CallFrame, TraceError> {
    let response: Value = provider
        .raw_request("debug_traceTransaction".into(), (hash, json!({ "tracer": "callTracer" })))
        .await
        .map_err(|e| TraceError::Unavailable(e.to_string()))?;
    into_frame(response)
}

/// Traces a pending `tx` and attaches its swaps. Fails when it has none.
pub async fn trace_pending<P: Provider>(
    provider: &P,
    mut tx: Transaction,
    wrapped: Address,
    dust: U256,
) -> Result<Transaction, TraceError> {
    let frame = trace_call(provider, &tx).await?;
    tx.swap_events = swap_events(&frame, wrapped, dust);
    if tx.swap_events.is_empty() {
        debug!("[{}] No swap events", tx.hash);
        return Err(TraceError::NoSwaps);
    }
    Ok(tx)
}

/// Fetches and traces a mined transaction by hash
pub async fn trace_transaction<P: Provider>(
    provider: &P,
    hash: B256,
    wrapped: Address,
    dust: U256,
) -> Result<Transaction, TraceError> {
    let rpc_tx = provider
        .get_transaction_by_hash(hash)
        .await
        .map_err(|e| TraceError::Unavailable(e.to_string()))?
        .ok_or_else(|| TraceError::Unavailable(format!("{} not found", hash)))?;
    let mut tx = from_envelope(rpc_tx.inner.inner(), rpc_tx.inner.signer())
        .ok_or_else(|| TraceError::Malformed(format!("{} has an unsupported type", hash)))?;
    let frame = trace_mined(provider, hash).await?;
    tx.swap_events = swap_events(&frame, wrapped, dust);
    Ok(tx)
}

fn parity(signed_v: bool) -> u64 {
    u64::from(signed_v)
}

fn signature_of<T>(signed: &Signed<T>) -> (bool, U256, U256) {
    let sig = signed.signature();
    (sig.v(), sig.r(), sig.s())
}

/// A signed envelope as a victim transaction, without swaps
pub fn from_envelope(envelope: &TxEnvelope, caller: Address) -> Option<Transaction> {
    let hash = *envelope.tx_hash();
    let tx = match envelope {
        TxEnvelope::Legacy(signed) => {
            let (y, r, s) = signature_of(signed);
            let inner = signed.tx();
            let v = match inner.chain_id {
                Some(chain_id) => 35 + 2 * chain_id + parity(y),
                None => 27 + parity(y),
            };
            Transaction {
                hash,
                kind: TxKind::Legacy,
                chain_id: inner.chain_id,
                nonce: inner.nonce,
                gas: inner.gas_limit,
                gas_price: Some(inner.gas_price),
                receiver: inner.to.to().copied(),
                value: inner.value,
                input: inner.input.clone(),
                signature: TxSignature { v, r, s },
                caller,
                ..Default::default()
            }
        }
        TxEnvelope::Eip2930(signed) => {
            let (y, r, s) = signature_of(signed);
            let inner = signed.tx();
            Transaction {
                hash,
                kind: TxKind::Eip2930,
                chain_id: Some(inner.chain_id),
                nonce: inner.nonce,
                gas: inner.gas_limit,
                gas_price: Some(inner.gas_price),
                receiver: inner.to.to().copied(),
                value: inner.value,
                input: inner.input.clone(),
                access_list: inner.access_list.clone(),
                signature: TxSignature { v: parity(y), r, s },
                caller,
                ..Default::default()
            }
        }
        TxEnvelope::Eip1559(signed) => {
            let (y, r, s) = signature_of(signed);
            let inner = signed.tx();
            Transaction {
                hash,
                kind: TxKind::Eip1559,
                chain_id: Some(inner.chain_id),
                nonce: inner.nonce,
                gas: inner.gas_limit,
                max_fee_per_gas: Some(inner.max_fee_per_gas),
                max_priority_fee_per_gas: Some(inner.max_priority_fee_per_gas),
                receiver: inner.to.to().copied(),
                value: inner.value,
                input: inner.input.clone(),
                access_list: inner.access_list.clone(),
                signature: TxSignature { v: parity(y), r, s },
                caller,
                ..Default::default()
            }
        }
        _ => return None,
    };
    Some(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const WBNB: Address = address!("bb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c");
    const TOKEN: Address = address!("0e09fabb73bd3ade0a17ecc321fd13a19e81ce82");
    const USER: Address = Address::repeat_byte(0x11);
    const ROUTER: Address = Address::repeat_byte(0x22);
    const PAIR: Address = Address::repeat_byte(0x33);
    const V3_POOL: Address = Address::repeat_byte(0x44);

    fn word(address: Address) -> Vec<u8> {
        let mut w = vec![0u8; 12];
        w.extend_from_slice(address.as_slice());
        w
    }

    fn transfer(from: Address, token: Address, to: Address, value: u128) -> CallFrame {
        let mut input = TRANSFER.to_vec();
        input.extend(word(to));
        input.extend(U256::from(value).to_be_bytes::<32>());
        CallFrame { from, to: Some(token), input: Bytes::from(input), ..Default::default() }
    }

    fn transfer_from(caller: Address, token: Address, from: Address, to: Address, value: u128) -> CallFrame {
        let mut input = TRANSFER_FROM.to_vec();
        input.extend(word(from));
        input.extend(word(to));
        input.extend(U256::from(value).to_be_bytes::<32>());
        CallFrame { from: caller, to: Some(token), input: Bytes::from(input), ..Default::default() }
    }

    fn call(from: Address, to: Address, selector: [u8; 4], calls: Vec<CallFrame>) -> CallFrame {
        CallFrame { from, to: Some(to), input: Bytes::from(selector.to_vec()), calls, ..Default::default() }
    }

    /// user -> router: WBNB into the pair, pair swaps out TOKEN to the user
    fn v2_swap_tree(amount_in: u128) -> CallFrame {
        call(
            USER,
            ROUTER,
            [0x38, 0xed, 0x17, 0x39],
            vec![
                transfer_from(ROUTER, WBNB, USER, PAIR, amount_in),
                call(ROUTER, PAIR, V2_SWAP, vec![transfer(PAIR, TOKEN, USER, 5_000)]),
            ],
        )
    }

    #[test]
    fn test_v2_swap_extracted() {
        let events = swap_events(&v2_swap_tree(10u128.pow(17)), WBNB, U256::from(10u128.pow(15)));
        assert_eq!(
            events,
            vec![SwapEvent {
                dex: Dex::UniswapV2,
                pool: PAIR,
                token_in: WBNB,
                token_out: TOKEN,
                amount_in: U256::from(10u128.pow(17)),
                amount_out: U256::from(5_000u64),
            }]
        );
    }

    #[test]
    fn test_dust_dropped() {
        let events = swap_events(&v2_swap_tree(10u128.pow(14)), WBNB, U256::from(10u128.pow(15)));
        assert!(events.is_empty());
    }

    #[test]
    fn test_multi_pool_sorted_by_dex() {
        // V3 pool first in call order, then a V2 pair; V2 sorts first
        let tree = call(
            USER,
            ROUTER,
            [0xc0, 0x4b, 0x8d, 0x59],
            vec![
                call(
                    ROUTER,
                    V3_POOL,
                    V3_SWAP,
                    vec![transfer(V3_POOL, TOKEN, PAIR, 7_000), transfer(ROUTER, WBNB, V3_POOL, 10u128.pow(18))],
                ),
                call(ROUTER, PAIR, V2_SWAP, vec![transfer(PAIR, WBNB, USER, 10u128.pow(16))]),
            ],
        );
        let events = swap_events(&tree, WBNB, U256::from(10u128.pow(15)));
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].dex, events[0].pool), (Dex::UniswapV2, PAIR));
        assert_eq!((events[0].token_in, events[0].token_out), (TOKEN, WBNB));
        assert_eq!((events[1].dex, events[1].pool), (Dex::UniswapV3, V3_POOL));
        assert_eq!(events[1].amount_in, U256::from(10u128.pow(18)));
        assert_eq!(events[1].amount_out, U256::from(7_000u64));
    }

    #[test]
    fn test_refund_flips_direction() {
        let mut swaps = vec![PartialSwap::new(PAIR)];
        swaps[0].dex = Some(Dex::UniswapV2);
        let amount = |v: i64| I256::try_from(v).unwrap();
        record_transfer(&mut swaps, PAIR, TOKEN, USER, amount(100));
        record_transfer(&mut swaps, USER, WBNB, PAIR, amount(10));
        // more TOKEN comes back than went out
        record_transfer(&mut swaps, USER, TOKEN, PAIR, amount(150));
        let pair = swaps.iter().find(|s| s.pool == PAIR).unwrap().clone();
        assert_eq!((pair.token_in, pair.token_out), (Some(TOKEN), Some(WBNB)));
        assert_eq!((pair.amount_in, pair.amount_out), (amount(50), amount(-10)));
        assert!(pair.complete().is_none());
    }

    #[test]
    fn test_transfer_children_ignored() {
        let mut inner = transfer(PAIR, TOKEN, USER, 5_000);
        inner.calls = vec![call(TOKEN, PAIR, V2_SWAP, vec![])];
        let tree = call(USER, ROUTER, [0, 0, 0, 1], vec![inner]);
        assert!(collect(&tree).iter().all(|s| s.dex.is_none()));
    }

    #[test]
    fn test_frame_deserializes() {
        let raw = json!({
            "from": "0x1111111111111111111111111111111111111111",
            "to": "0x2222222222222222222222222222222222222222",
            "input": "0x022c0d9f",
            "gas": "0x1",
            "calls": [{ "from": "0x2222222222222222222222222222222222222222", "input": "0x" }]
        });
        let frame = into_frame(raw).unwrap();
        assert_eq!(frame.to, Some(ROUTER));
        assert_eq!(frame.calls.len(), 1);
        assert!(frame.calls[0].to.is_none());

        let no_calls = json!({ "from": "0x1111111111111111111111111111111111111111", "input": "0x" });
        assert!(matches!(into_frame(no_calls), Err(TraceError::NoCalls)));
    }
}
