//! Synthetic block source for dev and test runs

use super::{HeadSender, SourceBlock};
use crate::config::TriggerConfig;
use crate::contract::ContractInterface;
use crate::error::{RelayerError, RelayerResult};

use ethers::types::{Address, Bytes, Transaction, H256, U256, U64};
use ethers::utils::keccak256;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Emits blocks carrying one bridge transaction on a fixed schedule
pub struct TriggerSource {
    config: TriggerConfig,
    bridge_address: Address,
    contract: Arc<dyn ContractInterface>,
    sender: HeadSender,
    cancellation: CancellationToken,
}

impl TriggerSource {
    pub fn new(
        config: TriggerConfig,
        bridge_address: Address,
        contract: Arc<dyn ContractInterface>,
        sender: HeadSender,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            config,
            bridge_address,
            contract,
            sender,
            cancellation,
        }
    }

    /// Sleep for each interval, then offer a synthetic block to the head
    /// buffer. One pass unless `repeat` is set.
    pub async fn run(self) -> RelayerResult<()> {
        // The trigger method is called without arguments.
        let input = self.contract.pack_call(&self.config.method, &[]).map_err(|e| {
            RelayerError::Config(format!(
                "Trigger method {} cannot be packed: {}",
                self.config.method, e
            ))
        })?;

        info!(
            intervals = self.config.intervals_ms.len(),
            repeat = self.config.repeat,
            "Starting synthetic block trigger"
        );

        let mut sequence = 0u64;
        loop {
            for interval in &self.config.intervals_ms {
                tokio::select! {
                    _ = self.cancellation.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_millis(*interval)) => {}
                }

                sequence += 1;
                let block = self.synthesize(sequence, input.clone());
                let delivered = self.sender.offer(Some(block));
                info!(sequence, delivered, "Generated block to trigger a cross-chain event");
            }

            if !self.config.repeat {
                break;
            }
        }

        info!(generated = sequence, "Synthetic block trigger finished");
        Ok(())
    }

    /// Block `sequence` with a single transaction to the bridge contract.
    /// Hashes depend only on the sequence number.
    pub fn synthesize(&self, sequence: u64, input: Bytes) -> SourceBlock {
        let mut seed = b"bridge-trigger".to_vec();
        seed.extend_from_slice(&sequence.to_be_bytes());
        let tx_hash = H256::from(keccak256(&seed));

        let tx = Transaction {
            hash: tx_hash,
            nonce: U256::from(sequence),
            block_number: Some(U64::from(sequence)),
            transaction_index: Some(U64::zero()),
            from: self.config.sender,
            to: Some(self.bridge_address),
            value: U256::from(self.config.value),
            input,
            ..Default::default()
        };

        SourceBlock {
            hash: Some(H256::from(keccak256(tx_hash.as_bytes()))),
            number: Some(U64::from(sequence)),
            transactions: vec![tx],
            ..Default::default()
        }
    }
}
