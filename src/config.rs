use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{fs::File, io::BufReader};

use alloy::{
    primitives::{Address, U256, utils::Unit},
    signers::local::PrivateKeySigner,
};
use eyre::{Result, WrapErr, bail, eyre};
use serde_derive::Deserialize;
use url::Url;

use clap_serde_derive::{
    ClapSerde,
    clap::{self, Parser, Subcommand},
};

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_GAS_LIMIT: u64 = 150_000;
pub const DEFAULT_FOUNDRY_IMAGE: &str = "ghcr.io/foundry-rs/foundry:latest";
pub const DEFAULT_LOG_LEVEL: u8 = 3;

#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Config file (.toml, .json or .jsonc)
    #[arg(short, long = "config")]
    pub config_path: Option<PathBuf>,

    /// Inline JSON config, overrides values from the config file
    #[arg(long = "config-json")]
    pub config_json: Option<String>,

    /// Global arguments, override both config file and inline JSON
    #[command(flatten)]
    pub config: <ConfigArgs as ClapSerde>::Opt,

    // Subcommands
    #[command(subcommand)]
    pub command: CliCmd,
}

// All values are optional (or empty) so that a partial config file, or no
// config file at all, still parses. Required keys are checked in `RunConfig`
#[derive(Debug, Clone, ClapSerde, Deserialize)]
pub struct ConfigArgs {
    /// Logging level (0: critical .. 5: trace)
    #[arg(short, long = "log-level", required = false)]
    pub log_level: Option<u8>,

    /// Depositor private key
    #[arg(long = "depositor-key", required = false)]
    pub depositor_key: Option<String>,

    /// Depositor address, derived from the depositor key if omitted
    #[arg(long = "depositor-addr", required = false)]
    pub depositor_addr: Option<String>,

    /// Chain Id
    #[arg(long = "chain-id", required = false)]
    pub chain_id: Option<u64>,

    /// Deposit contract address
    #[arg(long = "deposit-contract", required = false)]
    pub deposit_contract: Option<String>,

    /// Value sent with every deposit (wei)
    #[arg(long = "deposit-amount-wei", required = false)]
    pub deposit_amount_wei: Option<String>,

    /// Deposits signed and broadcast per round
    #[arg(long = "batch-size", required = false)]
    pub batch_size: Option<usize>,

    /// Gas limit of every deposit tx
    #[arg(long = "gas-limit", required = false)]
    pub gas_limit: Option<u64>,

    /// EL JsonRPC endpoints, comma separated, in query order
    #[arg(long = "el-endpoints", required = false, value_delimiter = ',')]
    pub el_endpoints: Vec<String>,

    /// Docker network the signer container joins
    #[arg(long = "docker-network", required = false)]
    pub docker_network: Option<String>,

    /// Foundry image used for signing
    #[arg(long = "foundry-image", required = false)]
    pub foundry_image: Option<String>,

    /// Gater admin private key (mint only)
    #[arg(long = "admin-key", required = false)]
    pub admin_key: Option<String>,

    /// Gater contract address (mint only)
    #[arg(long = "gater-address", required = false)]
    pub gater_address: Option<String>,

    /// Per endpoint JsonRPC timeout in seconds
    #[arg(long = "rpc-timeout", required = false)]
    pub rpc_timeout_secs: Option<u64>,

    /// Per endpoint receipt query timeout in seconds
    #[arg(long = "receipt-rpc-timeout", required = false)]
    pub receipt_rpc_timeout_secs: Option<u64>,

    /// Batch signing timeout in seconds
    #[arg(long = "sign-timeout", required = false)]
    pub sign_timeout_secs: Option<u64>,

    /// Mint signing timeout in seconds
    #[arg(long = "mint-sign-timeout", required = false)]
    pub mint_sign_timeout_secs: Option<u64>,

    /// Max wait for the confirmed nonce between batches in seconds
    #[arg(long = "pace-timeout", required = false)]
    pub pace_timeout_secs: Option<u64>,

    /// Max wait for the mint receipt in seconds
    #[arg(long = "receipt-timeout", required = false)]
    pub receipt_timeout_secs: Option<u64>,

    /// Poll interval for nonce and receipt waits in seconds
    #[arg(long = "poll-interval", required = false)]
    pub poll_interval_secs: Option<u64>,
}

// Command line cmds
#[derive(Subcommand)]
pub enum CliCmd {
    /// Print version information
    #[clap(visible_alias = "ver")]
    Version {},
    /// Sign and broadcast a slice of a deposit data file in batches
    #[clap(visible_aliases = &["dep", "d"])]
    Deposits {
        /// Deposit data JSON file
        #[arg(required = true)]
        file: PathBuf,
        /// Index of the first deposit to send
        #[arg(required = true)]
        offset: usize,
        /// Number of deposits to send
        #[arg(required = true)]
        count: usize,
    },
    /// Mint gater tokens to the depositor address
    #[clap(visible_alias = "m")]
    Mint {
        /// Token amount (base units)
        #[arg(required = true)]
        amount: U256,
    },
}

/// Private key material handed verbatim to the signer, never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial(String);

impl KeyMaterial {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("KeyMaterial(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    pub rpc: Duration,
    pub receipt_rpc: Duration,
    pub sign_batch: Duration,
    pub sign_mint: Duration,
    pub pace: Duration,
    pub receipt: Duration,
    pub poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            rpc: Duration::from_secs(5),
            receipt_rpc: Duration::from_secs(3),
            sign_batch: Duration::from_secs(120),
            sign_mint: Duration::from_secs(60),
            pace: Duration::from_secs(120),
            receipt: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Validated, immutable run configuration shared by every component.
///
/// Keys only one of the two entry points needs stay optional here and are
/// checked by the accessors below when that entry point asks for them.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub chain_id: u64,
    pub endpoints: Vec<Url>,
    pub depositor_key: Option<KeyMaterial>,
    pub depositor_addr: Option<Address>,
    pub deposit_contract: Option<Address>,
    pub deposit_amount_wei: U256,
    pub batch_size: usize,
    pub gas_limit: u64,
    pub docker_network: Option<String>,
    pub foundry_image: String,
    pub admin_key: Option<KeyMaterial>,
    pub gater_address: Option<Address>,
    pub timeouts: Timeouts,
}

fn parse_address(name: &str, value: &Option<String>) -> Result<Option<Address>> {
    value
        .as_deref()
        .map(|s| {
            Address::from_str(s.trim()).wrap_err_with(|| format!("invalid {name}: '{s}'"))
        })
        .transpose()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl TryFrom<ConfigArgs> for RunConfig {
    type Error = eyre::Report;

    fn try_from(args: ConfigArgs) -> Result<Self> {
        let chain_id = args.chain_id.ok_or_else(|| eyre!("missing chain_id"))?;

        let endpoints = args
            .el_endpoints
            .iter()
            .map(|s| Url::parse(s.trim()).wrap_err_with(|| format!("invalid endpoint '{s}'")))
            .collect::<Result<Vec<_>>>()?;
        if endpoints.is_empty() {
            bail!("must specify at least one el_endpoints entry")
        }

        let batch_size = args.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            bail!("batch_size must be greater than 0")
        }

        let deposit_amount_wei = match non_empty(args.deposit_amount_wei) {
            Some(wei) => U256::from_str(wei.trim())
                .wrap_err_with(|| format!("invalid deposit_amount_wei: '{wei}'"))?,
            None => U256::from(32) * Unit::ETHER.wei(),
        };

        let depositor_key = non_empty(args.depositor_key).map(KeyMaterial::new);
        let depositor_addr = match parse_address("depositor_addr", &args.depositor_addr)? {
            Some(addr) => Some(addr),
            None => match &depositor_key {
                Some(key) => Some(
                    PrivateKeySigner::from_str(key.expose())
                        .wrap_err_with(|| "invalid depositor_key")?
                        .address(),
                ),
                None => None,
            },
        };

        let defaults = Timeouts::default();
        let secs = |v: Option<u64>, default: Duration| v.map(Duration::from_secs).unwrap_or(default);
        let timeouts = Timeouts {
            rpc: secs(args.rpc_timeout_secs, defaults.rpc),
            receipt_rpc: secs(args.receipt_rpc_timeout_secs, defaults.receipt_rpc),
            sign_batch: secs(args.sign_timeout_secs, defaults.sign_batch),
            sign_mint: secs(args.mint_sign_timeout_secs, defaults.sign_mint),
            pace: secs(args.pace_timeout_secs, defaults.pace),
            receipt: secs(args.receipt_timeout_secs, defaults.receipt),
            poll_interval: secs(args.poll_interval_secs, defaults.poll_interval),
        };

        Ok(RunConfig {
            chain_id,
            endpoints,
            depositor_key,
            depositor_addr,
            deposit_contract: parse_address("deposit_contract", &args.deposit_contract)?,
            deposit_amount_wei,
            batch_size,
            gas_limit: args.gas_limit.unwrap_or(DEFAULT_GAS_LIMIT),
            docker_network: non_empty(args.docker_network),
            foundry_image: non_empty(args.foundry_image)
                .unwrap_or_else(|| DEFAULT_FOUNDRY_IMAGE.to_string()),
            admin_key: non_empty(args.admin_key).map(KeyMaterial::new),
            gater_address: parse_address("gater_address", &args.gater_address)?,
            timeouts,
        })
    }
}

impl RunConfig {
    pub fn depositor_key(&self) -> Result<&KeyMaterial> {
        self.depositor_key
            .as_ref()
            .ok_or_else(|| eyre!("missing depositor_key"))
    }

    pub fn depositor_addr(&self) -> Result<Address> {
        self.depositor_addr
            .ok_or_else(|| eyre!("missing depositor_addr (or depositor_key)"))
    }

    pub fn deposit_contract(&self) -> Result<Address> {
        self.deposit_contract
            .ok_or_else(|| eyre!("missing deposit_contract"))
    }

    pub fn admin_key(&self) -> Result<&KeyMaterial> {
        self.admin_key.as_ref().ok_or_else(|| eyre!("missing admin_key"))
    }

    pub fn gater_address(&self) -> Result<Address> {
        self.gater_address
            .ok_or_else(|| eyre!("missing gater_address"))
    }
}

/// Builds the final `ConfigArgs`: config file, then inline JSON, then the
/// command line, each layer overriding the keys it sets.
pub fn merge_args<T>(
    args: <T as ClapSerde>::Opt,
    maybe_path: Option<PathBuf>,
    maybe_json: Option<String>,
) -> Result<T>
where
    T: ClapSerde + serde::de::DeserializeOwned,
{
    let mut config = match maybe_path {
        Some(path) => {
            let path = PathBuf::from(
                shellexpand::full(&path.to_string_lossy())
                    .wrap_err_with(|| format!("{:?}", path))?
                    .to_string(),
            );
            if !path.exists() {
                bail!("config file {:?} does not exist", path)
            }
            let file_cfg = match path.extension().and_then(OsStr::to_str) {
                Some("toml") => read_toml_config::<T>(&path),
                Some("json") => read_json_config::<T>(&path),
                Some("jsonc") => read_jsonc_config::<T>(&path),
                _ => {
                    bail!("Unsupported config file type: {:?}", path);
                }
            }?;
            T::from(file_cfg)
        }
        None => T::default(),
    };
    if let Some(json) = maybe_json {
        let json_cfg = serde_json::from_str::<<T as ClapSerde>::Opt>(&json)
            .wrap_err_with(|| "invalid --config-json")?;
        config = config.merge(json_cfg);
    }
    // Fields which are not None in `args` replace the ones in `config`
    Ok(config.merge(args))
}

fn read_toml_config<T>(path: &Path) -> Result<<T as ClapSerde>::Opt>
where
    T: ClapSerde + serde::de::DeserializeOwned,
{
    let content = std::fs::read_to_string(path).wrap_err_with(|| format!("{:?}", path))?;
    Ok(toml::from_str(&content)?)
}

fn read_json_config<T>(path: &Path) -> Result<<T as ClapSerde>::Opt>
where
    T: ClapSerde + serde::de::DeserializeOwned,
{
    let f = File::open(path).wrap_err_with(|| format!("{:?}", path))?;
    let json_cfg = serde_json::from_reader::<_, <T as ClapSerde>::Opt>(BufReader::new(f))?;
    Ok(json_cfg)
}

fn read_jsonc_config<T>(path: &Path) -> Result<<T as ClapSerde>::Opt>
where
    T: ClapSerde + serde::de::DeserializeOwned,
{
    let f = File::open(path).wrap_err_with(|| format!("{:?}", path))?;
    let jsonc_cfg = serde_jsonc::from_reader::<_, <T as ClapSerde>::Opt>(BufReader::new(f))?;
    Ok(jsonc_cfg)
}
