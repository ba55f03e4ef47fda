pub mod broadcast;
pub mod config;
pub mod deposit;
pub mod dispatcher;
pub mod helpers;
pub mod logger;
pub mod mint;
pub mod quorum;
pub mod rpc;
pub mod signer;

#[cfg(test)]
pub(crate) mod test_utils;
