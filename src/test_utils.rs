//! In-memory fakes for the JSON-RPC transport and the signing service.

use alloy::primitives::{Address, Bytes, TxHash, address};
use eyre::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::{
    config::{KeyMaterial, RunConfig, Timeouts},
    deposit::DepositIntent,
    rpc::Transport,
    signer::{ContractCall, SigningService},
};

pub const DEPOSIT_CONTRACT: Address = address!("0x4242424242424242424242424242424242424242");
pub const GATER: Address = address!("0x00000000000000000000000000000000000000ab");
pub const DEPOSITOR: Address = address!("0x00000000000000000000000000000000000000aa");

/// `http://el-{i}:8545`, the index is what `MockTransport` handlers see
pub fn endpoints(n: usize) -> Vec<Url> {
    (0..n)
        .map(|i| Url::parse(&format!("http://el-{i}:8545")).unwrap())
        .collect()
}

pub fn tx_hash(n: u8) -> TxHash {
    TxHash::with_last_byte(n)
}

pub fn intents(n: usize) -> Vec<DepositIntent> {
    (0..n)
        .map(|i| {
            let b = i as u8;
            DepositIntent {
                public_key: Bytes::from(vec![0xa0, b]),
                withdrawal_credentials: Bytes::from(vec![0x01, b]),
                signature: Bytes::from(vec![0xb0, b]),
                deposit_data_root: Bytes::from(vec![0xc0, b]),
            }
        })
        .collect()
}

/// Config with fast timings, `n` mock endpoints and every key set
pub fn run_config(n: usize) -> RunConfig {
    RunConfig {
        chain_id: 1337,
        endpoints: endpoints(n),
        depositor_key: Some(KeyMaterial::new(
            "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
        )),
        depositor_addr: Some(DEPOSITOR),
        deposit_contract: Some(DEPOSIT_CONTRACT),
        deposit_amount_wei: "32000000000000000000".parse().unwrap(),
        batch_size: 10,
        gas_limit: 150_000,
        docker_network: Some("testnet".to_string()),
        foundry_image: "ghcr.io/foundry-rs/foundry:latest".to_string(),
        admin_key: Some(KeyMaterial::new(
            "0x5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a",
        )),
        gater_address: Some(GATER),
        timeouts: Timeouts {
            rpc: Duration::from_millis(200),
            receipt_rpc: Duration::from_millis(200),
            sign_batch: Duration::from_secs(1),
            sign_mint: Duration::from_secs(1),
            pace: Duration::from_secs(1),
            receipt: Duration::from_secs(1),
            poll_interval: Duration::from_millis(5),
        },
    }
}

type Handler = Box<dyn Fn(usize, &str, &Value) -> Option<Value> + Send + Sync>;

/// Answers calls with a handler keyed on (endpoint index, method, params).
pub struct MockTransport {
    handler: Handler,
    delays: Vec<Duration>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(usize, &str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            delays: vec![],
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Per endpoint latency, endpoints past the end answer immediately
    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }

    pub fn calls(&self, method: &str) -> usize {
        *self.calls.lock().unwrap().get(method).unwrap_or(&0)
    }
}

fn endpoint_index(endpoint: &Url) -> usize {
    endpoint
        .host_str()
        .and_then(|h| h.strip_prefix("el-"))
        .and_then(|i| i.parse().ok())
        .unwrap()
}

impl Transport for MockTransport {
    async fn call(
        &self,
        endpoint: &Url,
        method: &'static str,
        params: Value,
        _timeout: Duration,
    ) -> Option<Value> {
        let idx = endpoint_index(endpoint);
        *self
            .calls
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default() += 1;
        if let Some(delay) = self.delays.get(idx) {
            tokio::time::sleep(*delay).await;
        }
        (self.handler)(idx, method, &params)
    }
}

type SignFn = Box<dyn Fn(&[ContractCall]) -> Result<Vec<Option<Bytes>>> + Send + Sync>;

/// Records every batch it is asked to sign.
pub struct MockSigner {
    sign_fn: SignFn,
    batches: Mutex<Vec<Vec<ContractCall>>>,
}

impl MockSigner {
    pub fn new<F>(sign_fn: F) -> Self
    where
        F: Fn(&[ContractCall]) -> Result<Vec<Option<Bytes>>> + Send + Sync + 'static,
    {
        Self {
            sign_fn: Box::new(sign_fn),
            batches: Mutex::new(vec![]),
        }
    }

    /// Signs everything, the raw tx encodes the nonce
    pub fn ok() -> Self {
        Self::new(|calls| {
            Ok(calls
                .iter()
                .map(|c| {
                    let nonce = c.nonce.unwrap_or_default().to_be_bytes();
                    Some(Bytes::from([&[0x02u8][..], &nonce[..]].concat()))
                })
                .collect())
        })
    }

    /// Nonces of every signed batch, in call order
    pub fn nonces(&self) -> Vec<Vec<u64>> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|calls| calls.iter().filter_map(|c| c.nonce).collect())
            .collect()
    }
}

impl SigningService for MockSigner {
    async fn sign(&self, calls: &[ContractCall], _timeout: Duration) -> Result<Vec<Option<Bytes>>> {
        self.batches.lock().unwrap().push(calls.to_vec());
        (self.sign_fn)(calls)
    }
}
