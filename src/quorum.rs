use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, TxHash, U64},
};
use colored::*;
use futures_util::stream::{FuturesOrdered, StreamExt};
use log::*;
use serde_json::{Value, json};
use std::time::Duration;
use url::Url;

use crate::rpc::{ETH_CHAIN_ID, ETH_GET_TRANSACTION_COUNT, ETH_GET_TRANSACTION_RECEIPT, Transport};

/// Reads a value from the first endpoint that answers.
///
/// All endpoints are queried concurrently but answers are consumed in list
/// order, so the result is always the one from the earliest endpoint in the
/// list that succeeded. Requests still in flight once a winner is known are
/// dropped. No aggregation, no disagreement detection, no retries.
pub struct QuorumReader<'a, T> {
    transport: &'a T,
    endpoints: &'a [Url],
    timeout: Duration,
}

// Manual impls, derive would require `T: Clone`
impl<T> Clone for QuorumReader<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for QuorumReader<'_, T> {}

impl<'a, T: Transport> QuorumReader<'a, T> {
    pub fn new(transport: &'a T, endpoints: &'a [Url], timeout: Duration) -> Self {
        Self {
            transport,
            endpoints,
            timeout,
        }
    }

    /// Same reader with a different per endpoint timeout
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub async fn read<V, F>(&self, method: &'static str, params: Value, extract: F) -> Option<V>
    where
        F: Fn(Value) -> Option<V>,
    {
        let extract = &extract;
        let mut answers: FuturesOrdered<_> = self
            .endpoints
            .iter()
            .map(|endpoint| {
                let params = params.clone();
                async move {
                    self.transport
                        .call(endpoint, method, params, self.timeout)
                        .await
                        .and_then(extract)
                        .map(|value| (endpoint, value))
                }
            })
            .collect();
        while let Some(answer) = answers.next().await {
            if let Some((endpoint, value)) = answer {
                trace!("{} answered by {}", method, endpoint);
                return Some(value);
            }
        }
        None
    }

    pub async fn nonce(&self, address: Address, tag: BlockNumberOrTag) -> Option<u64> {
        self.read(ETH_GET_TRANSACTION_COUNT, json!([address, tag]), parse_quantity)
            .await
    }

    /// Receipt presence only, `null` results count as "not yet seen"
    pub async fn receipt(&self, tx_hash: TxHash) -> Option<Value> {
        self.read(ETH_GET_TRANSACTION_RECEIPT, json!([tx_hash]), |v| {
            (!v.is_null()).then_some(v)
        })
        .await
    }

    pub async fn chain_id(&self) -> Option<u64> {
        self.read(ETH_CHAIN_ID, json!([]), parse_quantity).await
    }
}

/// Logs the chain id reported by the endpoints, warning when it differs from
/// the configured one. Signing uses the configured id regardless.
pub async fn check_chain_id<T: Transport>(reader: &QuorumReader<'_, T>, expected: u64) {
    match reader.chain_id().await {
        Some(id) if id == expected => debug!("Connected to chainId {}", id.to_string().blue()),
        Some(id) => warn!(
            "Endpoints report chainId {} but {} is configured",
            id.to_string().red(),
            expected.to_string().blue()
        ),
        None => warn!("No endpoint answered {}", ETH_CHAIN_ID),
    }
}

/// Decodes a hex encoded JSON-RPC quantity ("0x1a")
pub fn parse_quantity(value: Value) -> Option<u64> {
    serde_json::from_value::<U64>(value)
        .ok()
        .map(|q| q.to::<u64>())
}
