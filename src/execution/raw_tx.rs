//! Re-encoding observed transactions for bundle inclusion.
//!
//! A bundle must carry the victim byte-for-byte, so its envelope is rebuilt
//! from the decoded fields and the original signature.

use alloy::consensus::{SignableTransaction, TxEip1559, TxEip2930, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Bytes, Signature, TxKind as Destination, B256};

use crate::error::SubmissionError;
use crate::types::{Transaction, TxKind};

/// `(chain_id, y_parity)` carried by a legacy `v`
fn legacy_parity(v: u64) -> Result<(Option<u64>, bool), SubmissionError> {
    match v {
        27 | 28 => Ok((None, v == 28)),
        v if v >= 35 => Ok((Some((v - 35) / 2), (v - 35) % 2 == 1)),
        _ => Err(SubmissionError::Signing(format!("invalid legacy v {}", v))),
    }
}

fn typed_parity(v: u64) -> Result<bool, SubmissionError> {
    match v {
        0 | 27 => Ok(false),
        1 | 28 => Ok(true),
        _ => Err(SubmissionError::Signing(format!("invalid y parity {}", v))),
    }
}

/// The signed envelope of `tx`
pub fn envelope(tx: &Transaction) -> Result<TxEnvelope, SubmissionError> {
    let to = tx.receiver.map(Destination::Call).unwrap_or(Destination::Create);
    let missing = |field: &str| SubmissionError::Signing(format!("{} is missing {}", tx.hash, field));
    let (r, s) = (tx.signature.r, tx.signature.s);

    let envelope = match tx.kind {
        TxKind::Legacy => {
            let (v_chain_id, parity) = legacy_parity(tx.signature.v)?;
            let unsigned = TxLegacy {
                chain_id: tx.chain_id.or(v_chain_id),
                nonce: tx.nonce,
                gas_price: tx.gas_price.ok_or_else(|| missing("gas price"))?,
                gas_limit: tx.gas,
                to,
                value: tx.value,
                input: tx.input.clone(),
            };
            TxEnvelope::from(unsigned.into_signed(Signature::new(r, s, parity)))
        }
        TxKind::Eip2930 => {
            let unsigned = TxEip2930 {
                chain_id: tx.chain_id.ok_or_else(|| missing("chain id"))?,
                nonce: tx.nonce,
                gas_price: tx.gas_price.ok_or_else(|| missing("gas price"))?,
                gas_limit: tx.gas,
                to,
                value: tx.value,
                access_list: tx.access_list.clone(),
                input: tx.input.clone(),
            };
            TxEnvelope::from(unsigned.into_signed(Signature::new(r, s, typed_parity(tx.signature.v)?)))
        }
        TxKind::Eip1559 => {
            let unsigned = TxEip1559 {
                chain_id: tx.chain_id.ok_or_else(|| missing("chain id"))?,
                nonce: tx.nonce,
                gas_limit: tx.gas,
                max_fee_per_gas: tx.max_fee_per_gas.ok_or_else(|| missing("max fee"))?,
                max_priority_fee_per_gas: tx.max_priority_fee_per_gas.ok_or_else(|| missing("priority fee"))?,
                to,
                value: tx.value,
                access_list: tx.access_list.clone(),
                input: tx.input.clone(),
            };
            TxEnvelope::from(unsigned.into_signed(Signature::new(r, s, typed_parity(tx.signature.v)?)))
        }
    };
    Ok(envelope)
}

/// EIP-2718 bytes of `tx`
pub fn raw_transaction(tx: &Transaction) -> Result<Bytes, SubmissionError> {
    Ok(Bytes::from(envelope(tx)?.encoded_2718()))
}

/// Hash of the rebuilt envelope; matches `tx.hash` when the fields are complete
pub fn rebuilt_hash(tx: &Transaction) -> Result<B256, SubmissionError> {
    Ok(*envelope(tx)?.tx_hash())
}
