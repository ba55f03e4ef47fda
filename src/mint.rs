use alloy::primitives::{TxHash, U256};
use colored::*;
use eyre::{Result, WrapErr, eyre};
use log::*;
use serde_json::Value;

use crate::{
    broadcast::Broadcaster,
    config::RunConfig,
    helpers::poll_until,
    quorum::{QuorumReader, check_chain_id},
    rpc::Transport,
    signer::{ContractCall, MINT_SIGNATURE, SigningService},
};

/// `mint(depositor, amount)` on the gater contract, signed by the gater admin.
/// Nonce, gas and fees are left to the signer.
pub fn mint_call(config: &RunConfig, amount: U256) -> Result<ContractCall> {
    Ok(ContractCall {
        private_key: config.admin_key()?.clone(),
        chain_id: config.chain_id,
        to: config.gater_address()?,
        signature: MINT_SIGNATURE,
        args: vec![config.depositor_addr()?.to_string(), amount.to_string()],
        value: None,
        nonce: None,
        gas_limit: None,
    })
}

/// Signs, broadcasts and waits for the receipt of a single mint tx.
///
/// Any failure before the broadcast short-circuits without waiting. Success
/// requires a receipt within `timeouts.receipt`.
pub async fn mint<T: Transport, S: SigningService>(
    config: &RunConfig,
    transport: &T,
    signer: &S,
    amount: U256,
) -> Result<(TxHash, Value)> {
    let call = mint_call(config, amount)?;
    let timeouts = &config.timeouts;
    let reader = QuorumReader::new(transport, &config.endpoints, timeouts.rpc);
    check_chain_id(&reader, config.chain_id).await;

    let raw_tx = signer
        .sign(std::slice::from_ref(&call), timeouts.sign_mint)
        .await
        .wrap_err_with(|| "mint signing failed")?
        .into_iter()
        .next()
        .flatten()
        .ok_or_else(|| eyre!("signer returned no mint transaction"))?;

    let tx_hash = Broadcaster::new(transport, &config.endpoints, timeouts.rpc)
        .send(&raw_tx)
        .await
        .ok_or_else(|| eyre!("no endpoint accepted the mint transaction"))?;
    info!(
        "Mint of {} to {} sent: {}",
        amount.to_string().yellow(),
        call.args[0].blue(),
        tx_hash.to_string().red()
    );

    let reader = reader.with_timeout(timeouts.receipt_rpc);
    let receipt = poll_until(
        timeouts.receipt,
        timeouts.poll_interval,
        || reader.receipt(tx_hash),
        |_| true,
    )
    .await
    .map_err(|_| {
        eyre!(
            "no receipt for mint tx {} after {:?}",
            tx_hash,
            timeouts.receipt
        )
    })?;
    debug!("Mint receipt: {}", receipt);
    Ok((tx_hash, receipt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{ETH_GET_TRANSACTION_RECEIPT, ETH_SEND_RAW_TRANSACTION};
    use crate::test_utils::{MockSigner, MockTransport, run_config, tx_hash};
    use alloy::primitives::Bytes;
    use serde_json::json;
    use std::time::Duration;

    fn mint_config() -> RunConfig {
        let mut config = run_config(2);
        config.timeouts.receipt = Duration::from_millis(30);
        config.timeouts.poll_interval = Duration::from_millis(5);
        config
    }

    #[test]
    fn renders_mint_command() {
        let config = mint_config();
        let call = mint_call(&config, U256::from(1000)).unwrap();
        assert_eq!(
            call.to_cast_command(),
            format!(
                "cast mktx --private-key {} --rpc-url $SIGN_RPC --chain-id 1337 {} 'mint(address,uint256)' {} 1000",
                config.admin_key().unwrap().expose(),
                config.gater_address().unwrap(),
                config.depositor_addr().unwrap()
            )
        );
    }

    #[test]
    fn mint_requires_admin_key() {
        let mut config = mint_config();
        config.admin_key = None;
        assert!(mint_call(&config, U256::from(1)).is_err());
    }

    #[tokio::test]
    async fn succeeds_once_receipt_is_seen() {
        let config = mint_config();
        let transport = MockTransport::new(|_, method, _| match method {
            ETH_SEND_RAW_TRANSACTION => Some(json!(tx_hash(7))),
            ETH_GET_TRANSACTION_RECEIPT => Some(json!({"status": "0x1"})),
            _ => None,
        });
        let signer = MockSigner::ok();
        let (hash, receipt) = mint(&config, &transport, &signer, U256::from(5))
            .await
            .unwrap();
        assert_eq!(hash, tx_hash(7));
        assert_eq!(receipt["status"], "0x1");
    }

    #[tokio::test]
    async fn fails_without_receipt_in_time() {
        let config = mint_config();
        let transport = MockTransport::new(|_, method, _| match method {
            ETH_SEND_RAW_TRANSACTION => Some(json!(tx_hash(7))),
            ETH_GET_TRANSACTION_RECEIPT => Some(Value::Null),
            _ => None,
        });
        let signer = MockSigner::ok();
        assert!(
            mint(&config, &transport, &signer, U256::from(5))
                .await
                .is_err()
        );
        assert!(transport.calls(ETH_GET_TRANSACTION_RECEIPT) > 0);
    }

    #[tokio::test]
    async fn signer_failure_short_circuits() {
        let config = mint_config();
        let transport = MockTransport::new(|_, _, _| Some(json!(tx_hash(7))));
        let signer = MockSigner::new(|_| Err(eyre!("no reachable signer endpoint")));
        assert!(
            mint(&config, &transport, &signer, U256::from(5))
                .await
                .is_err()
        );
        assert_eq!(transport.calls(ETH_SEND_RAW_TRANSACTION), 0);
        assert_eq!(transport.calls(ETH_GET_TRANSACTION_RECEIPT), 0);
    }

    #[tokio::test]
    async fn unsigned_slot_short_circuits() {
        let config = mint_config();
        let transport = MockTransport::new(|_, _, _| Some(json!(tx_hash(7))));
        let signer = MockSigner::new(|_| Ok(vec![None]));
        assert!(
            mint(&config, &transport, &signer, U256::from(5))
                .await
                .is_err()
        );
        assert_eq!(transport.calls(ETH_SEND_RAW_TRANSACTION), 0);
    }

    #[tokio::test]
    async fn rejected_broadcast_short_circuits() {
        let config = mint_config();
        let transport = MockTransport::new(|_, method, _| match method {
            ETH_GET_TRANSACTION_RECEIPT => Some(json!({"status": "0x1"})),
            _ => None,
        });
        let signer = MockSigner::new(|_| Ok(vec![Some(Bytes::from_static(&[0x02]))]));
        assert!(
            mint(&config, &transport, &signer, U256::from(5))
                .await
                .is_err()
        );
        assert_eq!(transport.calls(ETH_GET_TRANSACTION_RECEIPT), 0);
    }
}
