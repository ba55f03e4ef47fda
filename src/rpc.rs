use alloy::{
    rpc::client::RpcClient,
    transports::http::{Http, reqwest},
};
use colored::*;
use eyre::{Result, WrapErr};
use log::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

pub const ETH_GET_TRANSACTION_COUNT: &str = "eth_getTransactionCount";
pub const ETH_SEND_RAW_TRANSACTION: &str = "eth_sendRawTransaction";
pub const ETH_GET_TRANSACTION_RECEIPT: &str = "eth_getTransactionReceipt";
pub const ETH_CHAIN_ID: &str = "eth_chainId";

/// A single JSON-RPC round trip against one endpoint.
///
/// Implementations never fail loudly: transport errors, non-2xx replies,
/// JSON-RPC error objects, malformed payloads and timeouts all collapse into
/// `None`. Retries are the caller's business.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn call(
        &self,
        endpoint: &Url,
        method: &'static str,
        params: Value,
        timeout: Duration,
    ) -> Option<Value>;
}

/// HTTP transport backed by alloy's JSON-RPC client, one client per endpoint
/// sharing a single connection pool.
pub struct HttpTransport {
    http: reqwest::Client,
    clients: Mutex<HashMap<Url, RpcClient>>,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        // Endpoints live on private (docker) networks, never go through
        // a system proxy
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .wrap_err_with(|| "failed to build HTTP client")?;
        Ok(Self {
            http,
            clients: Mutex::new(HashMap::new()),
        })
    }

    fn client(&self, endpoint: &Url) -> RpcClient {
        // Lock only while fetching, requests run without holding the mutex
        let mut clients = match self.clients.lock() {
            Ok(clients) => clients,
            Err(poisoned) => poisoned.into_inner(),
        };
        clients
            .entry(endpoint.clone())
            .or_insert_with(|| {
                RpcClient::new(Http::with_client(self.http.clone(), endpoint.clone()), false)
            })
            .clone()
    }
}

impl Transport for HttpTransport {
    async fn call(
        &self,
        endpoint: &Url,
        method: &'static str,
        params: Value,
        timeout: Duration,
    ) -> Option<Value> {
        let client = self.client(endpoint);
        let request = client.request::<_, Value>(method, params);
        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                trace!("{} {} failed: {}", endpoint.as_str().blue(), method, e);
                None
            }
            Err(_) => {
                trace!("{} {} timed out", endpoint.as_str().blue(), method);
                None
            }
        }
    }
}
