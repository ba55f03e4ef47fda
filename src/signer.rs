use alloy::primitives::{Address, Bytes, U256, hex};
use colored::*;
use eyre::{Result, WrapErr, bail};
use log::*;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::process::Command;
use url::Url;

use crate::{
    config::{KeyMaterial, RunConfig},
    deposit::DepositIntent,
};

pub const DEPOSIT_SIGNATURE: &str = "deposit(bytes,bytes,bytes,bytes32)";
pub const MINT_SIGNATURE: &str = "mint(address,uint256)";

/// Line printed by the signer script in place of a tx it could not sign
pub const SIGN_FAILED: &str = "SIGN_FAILED";
/// Signer script exit status when no endpoint answers the liveness probe
pub const NO_SIGNER_RPC_EXIT: i32 = 3;

/// An unsigned contract call. Unset nonce/gas/value are left to the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub private_key: KeyMaterial,
    pub chain_id: u64,
    pub to: Address,
    pub signature: &'static str,
    pub args: Vec<String>,
    pub value: Option<U256>,
    pub nonce: Option<u64>,
    pub gas_limit: Option<u64>,
}

impl ContractCall {
    /// `cast mktx` invocation, signs against `$SIGN_RPC`
    pub fn to_cast_command(&self) -> String {
        let mut cmd = format!(
            "cast mktx --private-key {} --rpc-url $SIGN_RPC --chain-id {}",
            self.private_key.expose(),
            self.chain_id
        );
        if let Some(value) = self.value {
            cmd.push_str(&format!(" --value {}", value));
        }
        if let Some(nonce) = self.nonce {
            cmd.push_str(&format!(" --nonce {}", nonce));
        }
        if let Some(gas_limit) = self.gas_limit {
            cmd.push_str(&format!(" --gas-limit {}", gas_limit));
        }
        cmd.push_str(&format!(" {} '{}'", self.to, self.signature));
        for arg in &self.args {
            cmd.push(' ');
            cmd.push_str(arg);
        }
        cmd
    }
}

/// The external signing boundary.
///
/// Output is positionally aligned with `calls`, `None` marks a call that
/// failed to sign. An `Err` means the whole batch failed (no reachable
/// endpoint, signer process failure, timeout).
#[allow(async_fn_in_trait)]
pub trait SigningService {
    async fn sign(&self, calls: &[ContractCall], timeout: Duration) -> Result<Vec<Option<Bytes>>>;
}

/// Signs with foundry's `cast` inside a throwaway container, one container
/// per batch.
pub struct DockerSigner {
    endpoints: Vec<Url>,
    network: Option<String>,
    image: String,
    /// Container CLI and its leading args, `["docker"]` unless overridden
    launcher: Vec<String>,
    runs: AtomicU64,
}

impl DockerSigner {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            endpoints: config.endpoints.clone(),
            network: config.docker_network.clone(),
            image: config.foundry_image.clone(),
            launcher: vec!["docker".to_string()],
            runs: AtomicU64::new(0),
        }
    }

    /// Runs the container through another CLI (`podman`, `sudo docker`, ...),
    /// it must accept docker's `run` and `kill` arguments
    pub fn with_launcher<I, A>(mut self, launcher: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.launcher = launcher.into_iter().map(Into::into).collect();
        self
    }

    fn container_name(&self) -> String {
        format!(
            "deposit-signer-{}-{}",
            std::process::id(),
            self.runs.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn launcher(&self) -> Command {
        let mut cmd = Command::new(self.launcher.first().map_or("docker", String::as_str));
        cmd.args(self.launcher.iter().skip(1));
        cmd
    }

    /// Shell script run by the container: pick the first endpoint that
    /// answers `cast chain-id`, then print one line per call.
    pub fn script(&self, calls: &[ContractCall]) -> String {
        let rpc_list = self
            .endpoints
            .iter()
            .map(|url| url.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let mut script = format!(
            "SIGN_RPC=''; \
             for rpc in {rpc_list}; do \
               cast chain-id --rpc-url $rpc >/dev/null 2>&1 && SIGN_RPC=$rpc && break; \
             done; \
             [ -z \"$SIGN_RPC\" ] && exit {NO_SIGNER_RPC_EXIT}; "
        );
        for call in calls {
            script.push_str(&format!(
                "{} 2>/dev/null || echo {SIGN_FAILED}; ",
                call.to_cast_command()
            ));
        }
        script
    }

    fn command(&self, name: &str, script: String) -> Command {
        let mut cmd = self.launcher();
        cmd.args(["run", "--rm", "--name", name]);
        if let Some(network) = &self.network {
            cmd.args(["--network", network]);
        }
        cmd.args(["-e", "FOUNDRY_DISABLE_NIGHTLY_WARNING=1"])
            .arg(&self.image)
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropped on timeout, take the docker client down with it
            .kill_on_drop(true);
        cmd
    }

    /// Killing the docker client leaves the `--rm` container running, stop
    /// it by name in the background
    fn kill_container(&self, name: &str) {
        let mut cmd = self.launcher();
        cmd.args(["kill", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let name = name.to_string();
        tokio::spawn(async move {
            match cmd.status().await {
                Ok(status) => debug!("kill {} exited with {}", name, status),
                Err(e) => warn!("Failed to kill signer container {}: {}", name, e),
            }
        });
    }
}

impl SigningService for DockerSigner {
    async fn sign(&self, calls: &[ContractCall], timeout: Duration) -> Result<Vec<Option<Bytes>>> {
        if calls.is_empty() {
            return Ok(vec![]);
        }
        let name = self.container_name();
        let mut cmd = self.command(&name, self.script(calls));
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(output) => output.wrap_err_with(|| "failed to run docker")?,
            Err(_) => {
                self.kill_container(&name);
                bail!("signer {} timed out after {:?}", name, timeout)
            }
        };

        match output.status.code() {
            Some(0) => Ok(parse_signer_output(
                &String::from_utf8_lossy(&output.stdout),
                calls.len(),
            )),
            Some(NO_SIGNER_RPC_EXIT) => bail!("no reachable signer endpoint"),
            status => bail!(
                "signer exited with {:?}: {}",
                status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
    }
}

/// Maps signer stdout to one slot per call: a `0x` hex line is a signed tx,
/// anything else (`SIGN_FAILED`, garbage, missing line) is a failure.
pub fn parse_signer_output(stdout: &str, expected: usize) -> Vec<Option<Bytes>> {
    let lines: Vec<&str> = stdout.trim().lines().map(str::trim).collect();
    if lines.len() > expected {
        warn!(
            "Signer printed {} lines for {} calls, ignoring the extra ones",
            lines.len(),
            expected
        );
    }
    (0..expected)
        .map(|i| {
            lines
                .get(i)
                .filter(|line| line.starts_with("0x"))
                .and_then(|line| hex::decode(line).ok())
                .filter(|raw| !raw.is_empty())
                .map(Bytes::from)
        })
        .collect()
}

/// A signed, network ready tx or the marker of a slot that failed to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignedTx {
    Raw(Bytes),
    Failed,
}

impl SignedTx {
    pub fn raw(&self) -> Option<&Bytes> {
        match self {
            SignedTx::Raw(raw) => Some(raw),
            SignedTx::Failed => None,
        }
    }
}

/// Turns deposit intents plus a base nonce into signed deposit txs.
pub struct SigningGateway<'a, S> {
    service: &'a S,
    config: &'a RunConfig,
}

impl<'a, S: SigningService> SigningGateway<'a, S> {
    pub fn new(service: &'a S, config: &'a RunConfig) -> Self {
        Self { service, config }
    }

    /// Deposit calls with nonces `base_nonce`, `base_nonce + 1`, ... in input order
    pub fn deposit_calls(
        &self,
        intents: &[DepositIntent],
        base_nonce: u64,
    ) -> Result<Vec<ContractCall>> {
        let private_key = self.config.depositor_key()?;
        let to = self.config.deposit_contract()?;
        Ok(intents
            .iter()
            .zip(base_nonce..)
            .map(|(intent, nonce)| ContractCall {
                private_key: private_key.clone(),
                chain_id: self.config.chain_id,
                to,
                signature: DEPOSIT_SIGNATURE,
                args: intent.call_args(),
                value: Some(self.config.deposit_amount_wei),
                nonce: Some(nonce),
                gas_limit: Some(self.config.gas_limit),
            })
            .collect())
    }

    /// Always returns one slot per intent, a batch level failure marks every
    /// slot failed.
    pub async fn sign(&self, intents: &[DepositIntent], base_nonce: u64) -> Vec<SignedTx> {
        let failed = || vec![SignedTx::Failed; intents.len()];
        let calls = match self.deposit_calls(intents, base_nonce) {
            Ok(calls) => calls,
            Err(e) => {
                error!("Cannot build deposit calls: {:?}", e);
                return failed();
            }
        };
        match self
            .service
            .sign(&calls, self.config.timeouts.sign_batch)
            .await
        {
            Ok(signed) => {
                if signed.len() != intents.len() {
                    warn!(
                        "Signer returned {} txs for {} deposits",
                        signed.len(),
                        intents.len()
                    );
                }
                let mut signed = signed.into_iter();
                (0..intents.len())
                    .map(|_| match signed.next().flatten() {
                        Some(raw) => SignedTx::Raw(raw),
                        None => SignedTx::Failed,
                    })
                    .collect()
            }
            Err(e) => {
                error!(
                    "Batch at nonce {} failed to sign: {:?}",
                    base_nonce.to_string().magenta(),
                    e
                );
                failed()
            }
        }
    }
}
