use alloy::primitives::{Bytes, TxHash};
use colored::*;
use futures_util::future::join_all;
use log::*;
use serde_json::json;
use std::time::Duration;
use url::Url;

use crate::rpc::{ETH_SEND_RAW_TRANSACTION, Transport};

/// Pushes a signed transaction to every endpoint at once.
///
/// Rejections ("already known", node down, node refuses) are expected in a
/// partitioned network and are swallowed, one acceptance is enough.
pub struct Broadcaster<'a, T> {
    transport: &'a T,
    endpoints: &'a [Url],
    timeout: Duration,
}

impl<'a, T: Transport> Broadcaster<'a, T> {
    pub fn new(transport: &'a T, endpoints: &'a [Url], timeout: Duration) -> Self {
        Self {
            transport,
            endpoints,
            timeout,
        }
    }

    /// Returns the tx hash echoed by the last accepting endpoint (in list
    /// order), `None` only if every endpoint failed.
    pub async fn send(&self, raw_tx: &Bytes) -> Option<TxHash> {
        let params = json!([raw_tx]);
        let answers = join_all(self.endpoints.iter().map(|endpoint| {
            let params = params.clone();
            async move {
                let hash = self
                    .transport
                    .call(endpoint, ETH_SEND_RAW_TRANSACTION, params, self.timeout)
                    .await
                    .and_then(|v| serde_json::from_value::<TxHash>(v).ok());
                if hash.is_none() {
                    trace!("{} did not accept tx", endpoint.as_str().blue());
                }
                hash
            }
        }))
        .await;
        answers.into_iter().flatten().last()
    }
}
