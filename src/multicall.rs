use alloy::eips::BlockId;
use alloy::primitives::{Address, Bytes};
use alloy::providers::Provider;
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use alloy::sol;
use alloy::sol_types::SolCall;
use eyre::Result;
use futures::future::join_all;
use std::collections::HashMap;
use std::hash::Hash;
use tracing::{debug, warn};

use crate::config::contracts::MULTICALL3;

// Multicall3 interface
sol! {
    #[derive(Debug)]
    struct Call3 {
        address target;
        bool allowFailure;
        bytes callData;
    }

    #[derive(Debug)]
    struct MulticallResult {
        bool success;
        bytes returnData;
    }

    #[derive(Debug)]
    function aggregate3(Call3[] calldata calls) external payable returns (MulticallResult[] memory returnData);
}

/// One read in a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target: Address,
    pub calldata: Bytes,
}

impl Call {
    pub fn new<C: SolCall>(target: Address, call: C) -> Self {
        Self {
            target,
            calldata: Bytes::from(call.abi_encode()),
        }
    }
}

/// Decode the return data of a successful read
pub fn decode<C: SolCall>(data: Option<&Bytes>) -> Option<C::Return> {
    C::abi_decode_returns(data?).ok()
}

/// Executes `calls` through Multicall3 in chunks of `chunk_size`, pinned to `block`
/// when given.
///
/// Each id maps to the raw return data, or `None` when that call reverted. A chunk
/// whose aggregate call fails maps all its ids to `None`; the batch fails only when
/// every chunk does.
pub async fn batch_call<P, K>(
    provider: &P,
    calls: Vec<(K, Call)>,
    chunk_size: usize,
    block: Option<u64>,
) -> Result<HashMap<K, Option<Bytes>>>
where
    P: Provider,
    K: Eq + Hash + Clone,
{
    let start = std::time::Instant::now();
    let chunk_size = chunk_size.max(1);
    let total = calls.len();

    let requests = calls.chunks(chunk_size).map(|chunk| {
        let calldata = aggregate3Call {
            calls: chunk
                .iter()
                .map(|(_, call)| Call3 {
                    target: call.target,
                    allowFailure: true,
                    callData: call.calldata.clone(),
                })
                .collect(),
        }
        .abi_encode();

        let tx = TransactionRequest::default()
            .to(MULTICALL3)
            .input(TransactionInput::new(Bytes::from(calldata)));

        async move {
            let call = provider.call(tx);
            let raw = match block {
                Some(number) => call.block(BlockId::number(number)).await,
                None => call.await,
            };
            raw.map_err(eyre::Report::from)
                .and_then(|bytes| aggregate3Call::abi_decode_returns(&bytes).map_err(eyre::Report::from))
        }
    });

    let responses = join_all(requests).await;
    let chunk_count = responses.len();
    let mut last_error = None;

    let mut results = HashMap::with_capacity(total);
    let mut failed = 0;
    for (chunk, response) in calls.chunks(chunk_size).zip(responses) {
        match response {
            Ok(decoded) => {
                for ((id, _), res) in chunk.iter().zip(decoded) {
                    let data = res.success.then_some(res.returnData);
                    results.insert(id.clone(), data);
                }
            }
            Err(e) => {
                warn!("Multicall chunk of {} calls failed: {}", chunk.len(), e);
                for (id, _) in chunk {
                    results.insert(id.clone(), None);
                }
                failed += 1;
                last_error = Some(e);
            }
        }
    }

    if let Some(e) = last_error.filter(|_| failed == chunk_count) {
        return Err(e.wrap_err("every multicall chunk failed"));
    }

    debug!("Multicall of {} calls completed in {}ms", total, start.elapsed().as_millis());
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    sol! {
        function balanceOf(address owner) external view returns (uint256);
    }

    #[test]
    fn test_call_encodes_selector() {
        let call = Call::new(Address::repeat_byte(1), balanceOfCall { owner: Address::repeat_byte(2) });
        assert_eq!(&call.calldata[..4], &[0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(call.calldata.len(), 36);
    }

    #[test]
    fn test_decode_return() {
        let data = Bytes::from(U256::from(42u64).to_be_bytes::<32>().to_vec());
        assert_eq!(decode::<balanceOfCall>(Some(&data)), Some(U256::from(42u64)));
        assert_eq!(decode::<balanceOfCall>(None), None);
    }
}
