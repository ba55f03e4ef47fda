use alloy::{eips::BlockNumberOrTag, primitives::Address};
use colored::*;
use eyre::{Result, bail};
use log::*;
use std::fmt;

use crate::{
    broadcast::Broadcaster,
    config::RunConfig,
    deposit::DepositIntent,
    helpers::poll_until,
    quorum::{QuorumReader, check_chain_id},
    rpc::Transport,
    signer::{SigningGateway, SigningService},
};

/// Result of waiting for the confirmed nonce between two batches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaceOutcome {
    /// The `latest` nonce reached the expected value
    Reached(u64),
    /// Deadline elapsed, carries the last nonce seen (if any endpoint answered)
    TimedOut(Option<u64>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub base_nonce: u64,
    pub size: usize,
    pub sent: usize,
    pub failed: usize,
    /// `None` for the last batch, nothing to pace against
    pub pace: Option<PaceOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub initial_nonce: u64,
    /// One past the highest nonce allocated during the run
    pub next_nonce: u64,
    pub sent: usize,
    pub failed: usize,
    pub batches: Vec<BatchReport>,
}

// Final stdout line, scripts grep for it
impl fmt::Display for DispatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DONE sent={} failed={}", self.sent, self.failed)
    }
}

pub fn starting_line(nonce: u64) -> String {
    format!("Starting nonce: {}", nonce)
}

/// Running totals after a batch, `done` counts sent and failed deposits
pub fn progress_line(done: usize, total: usize, failed: usize) -> String {
    format!("Sent {}/{} deposits ({} failed)", done, total, failed)
}

pub fn pace_warning(expected: u64, got: Option<u64>) -> String {
    format!(
        "WARNING: nonce did not advance to {} (got {})",
        expected,
        match got {
            Some(n) => n.to_string(),
            None => "None".to_string(),
        }
    )
}

/// Signs and broadcasts deposits batch by batch, holding back each batch
/// until the previous one is confirmed on chain (or the wait expires).
///
/// Nonces are allocated locally from the initial `pending` nonce and every
/// slot of a batch consumes one, whether it was sent or not.
pub struct Dispatcher<'a, T, S> {
    config: &'a RunConfig,
    reader: QuorumReader<'a, T>,
    broadcaster: Broadcaster<'a, T>,
    gateway: SigningGateway<'a, S>,
}

impl<'a, T: Transport, S: SigningService> Dispatcher<'a, T, S> {
    pub fn new(config: &'a RunConfig, transport: &'a T, signer: &'a S) -> Self {
        Self {
            config,
            reader: QuorumReader::new(transport, &config.endpoints, config.timeouts.rpc),
            broadcaster: Broadcaster::new(transport, &config.endpoints, config.timeouts.rpc),
            gateway: SigningGateway::new(signer, config),
        }
    }

    /// Fails only when the signing config is incomplete or the starting
    /// nonce cannot be read, every later problem ends up in the failed count.
    pub async fn run(&self, intents: &[DepositIntent]) -> Result<DispatchSummary> {
        let address = self.config.depositor_addr()?;
        self.config.depositor_key()?;
        self.config.deposit_contract()?;
        check_chain_id(&self.reader, self.config.chain_id).await;

        let Some(initial_nonce) = self.reader.nonce(address, BlockNumberOrTag::Pending).await
        else {
            bail!("could not get nonce for {} from any endpoint", address);
        };
        println!("{}", starting_line(initial_nonce));
        info!(
            "Sending {} deposits from {} in batches of {}",
            intents.len().to_string().yellow(),
            address.to_string().blue(),
            self.config.batch_size
        );

        let total = intents.len();
        let mut nonce = initial_nonce;
        let mut summary = DispatchSummary {
            initial_nonce,
            next_nonce: initial_nonce,
            sent: 0,
            failed: 0,
            batches: Vec::with_capacity(total.div_ceil(self.config.batch_size)),
        };

        let mut batches = intents.chunks(self.config.batch_size).peekable();
        while let Some(batch) = batches.next() {
            let (sent, failed) = self.send_batch(batch, nonce).await;
            summary.sent += sent;
            summary.failed += failed;
            let expected_nonce = nonce + batch.len() as u64;

            println!(
                "{}",
                progress_line(summary.sent + summary.failed, total, summary.failed)
            );

            let pace = match batches.peek() {
                Some(_) => Some(self.wait_for_nonce(address, expected_nonce).await),
                None => None,
            };
            summary.batches.push(BatchReport {
                base_nonce: nonce,
                size: batch.len(),
                sent,
                failed,
                pace,
            });
            nonce = expected_nonce;
        }
        summary.next_nonce = nonce;

        println!("{}", summary);
        Ok(summary)
    }

    /// Returns (sent, failed) for one batch
    async fn send_batch(&self, batch: &[DepositIntent], base_nonce: u64) -> (usize, usize) {
        debug!(
            "Batch of {} at nonce {}",
            batch.len(),
            base_nonce.to_string().magenta()
        );
        let signed = self.gateway.sign(batch, base_nonce).await;

        let mut sent = 0;
        let mut failed = 0;
        for (tx, nonce) in signed.iter().zip(base_nonce..) {
            let tx_hash = match tx.raw() {
                Some(raw) => self.broadcaster.send(raw).await,
                None => None,
            };
            match tx_hash {
                Some(tx_hash) => {
                    trace!("nonce {} -> {}", nonce, tx_hash.to_string().red());
                    sent += 1;
                }
                None => {
                    debug!("Deposit at nonce {} not sent", nonce.to_string().magenta());
                    failed += 1;
                }
            }
        }
        (sent, failed)
    }

    async fn wait_for_nonce(&self, address: Address, expected: u64) -> PaceOutcome {
        let timeouts = &self.config.timeouts;
        match poll_until(
            timeouts.pace,
            timeouts.poll_interval,
            || self.reader.nonce(address, BlockNumberOrTag::Latest),
            |current| *current >= expected,
        )
        .await
        {
            Ok(current) => PaceOutcome::Reached(current),
            Err(current) => {
                warn!(
                    "Confirmed nonce of {} still {:?} after {:?}, expected {}",
                    address.to_string().blue(),
                    current,
                    timeouts.pace,
                    expected.to_string().magenta()
                );
                println!("{}", pace_warning(expected, current));
                PaceOutcome::TimedOut(current)
            }
        }
    }
}
