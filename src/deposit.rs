use alloy::primitives::{Bytes, hex};
use eyre::{Result, WrapErr};
use serde_derive::Deserialize;
use std::{fs::File, io::BufReader, path::Path};

/// One entry of a `deposit_data-*.json` file, one future deposit tx.
///
/// Fields are carried as opaque bytes, the deposit contract is the one
/// validating them. Other keys in the file (amount, fork version, network
/// name, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DepositIntent {
    /// Validator public key
    #[serde(rename = "pubkey")]
    pub public_key: Bytes,
    /// Withdrawal credentials
    pub withdrawal_credentials: Bytes,
    /// Deposit signature
    pub signature: Bytes,
    /// SSZ root of the DepositData
    pub deposit_data_root: Bytes,
}

impl DepositIntent {
    /// Arguments of `deposit(bytes,bytes,bytes,bytes32)`, 0x prefixed hex
    pub fn call_args(&self) -> Vec<String> {
        [
            &self.public_key,
            &self.withdrawal_credentials,
            &self.signature,
            &self.deposit_data_root,
        ]
        .into_iter()
        .map(hex::encode_prefixed)
        .collect()
    }
}

/// Loads `count` deposits starting at `offset`, the range is clipped to the
/// end of the file.
pub fn load<P: AsRef<Path>>(path: P, offset: usize, count: usize) -> Result<Vec<DepositIntent>> {
    let path = path.as_ref();
    let f = File::open(path).wrap_err_with(|| format!("{:?}", path))?;
    let all = serde_json::from_reader::<_, Vec<DepositIntent>>(BufReader::new(f))
        .wrap_err_with(|| format!("malformed deposit data {:?}", path))?;
    Ok(slice(all, offset, count))
}

fn slice(all: Vec<DepositIntent>, offset: usize, count: usize) -> Vec<DepositIntent> {
    all.into_iter().skip(offset).take(count).collect()
}
