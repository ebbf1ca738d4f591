//! Per-block classification: extract, dedupe, assemble, hand off

use super::{CrossChainEvent, EventAssembler, EventExtractor, RelayKey, TxSummary};
use crate::chain::{BlockHandler, SourceBlock};
use crate::error::{RelayerError, RelayerResult};
use crate::state::RelayLedger;

use async_trait::async_trait;
use ethers::types::H256;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Source-chain release fired for a queued cross-chain event
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReleaseTrigger: Send + Sync {
    async fn release_for_event(&self, event: &CrossChainEvent) -> RelayerResult<H256>;
}

/// Block handler wired into the head tracker
pub struct BlockClassifier {
    extractor: EventExtractor,
    assembler: EventAssembler,
    ledger: Arc<dyn RelayLedger>,
    release: Option<Arc<dyn ReleaseTrigger>>,
}

impl BlockClassifier {
    pub fn new(
        extractor: EventExtractor,
        assembler: EventAssembler,
        ledger: Arc<dyn RelayLedger>,
    ) -> Self {
        Self {
            extractor,
            assembler,
            ledger,
            release: None,
        }
    }

    /// Fire a source-chain release after every successful handoff
    pub fn with_release_trigger(mut self, release: Arc<dyn ReleaseTrigger>) -> Self {
        self.release = Some(release);
        self
    }

    async fn process(&self, summary: TxSummary) {
        let key = RelayKey::new(self.assembler.source_chain().clone(), summary.source_tx_hash);

        match self.ledger.claim(&key).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(key = %key, "Source tx already relayed, skipping");
                crate::metrics::record_duplicate_delivery(self.assembler.source_chain());
                return;
            }
            Err(e) => {
                error!(key = %key, "Failed to claim relay key: {}", e);
                return;
            }
        }

        match self.assembler.relay(summary).await {
            Ok(event) => self.fire_release(&event).await,
            // Logged by the assembler; the claim stays so the event is not re-offered.
            Err(RelayerError::PoolRejection { .. }) => {}
            Err(e) => {
                warn!(key = %key, "Failed to assemble cross-chain event: {}", e);
                if let Err(e) = self.ledger.release(&key).await {
                    error!(key = %key, "Failed to release relay claim: {}", e);
                }
            }
        }
    }

    async fn fire_release(&self, event: &CrossChainEvent) {
        let Some(release) = &self.release else {
            return;
        };

        match release.release_for_event(event).await {
            Ok(tx_hash) => info!(
                source_tx = ?event.source_tx_hash(),
                release_tx = ?tx_hash,
                "Submitted release for cross-chain event"
            ),
            // Logged where the release was abandoned.
            Err(e) => debug!(
                source_tx = ?event.source_tx_hash(),
                "Release for cross-chain event failed: {}", e
            ),
        }
    }
}

#[async_trait]
impl BlockHandler for BlockClassifier {
    async fn handle_block(&self, block: Option<SourceBlock>) {
        let Some(block) = block else {
            warn!("Received nil block from head notification");
            crate::metrics::record_nil_block();
            return;
        };

        if let Some(number) = block.number {
            crate::metrics::record_source_head(number.as_u64());
        }

        // Block order within one block is kept.
        for summary in self.extractor.extract(&block) {
            self.process(summary).await;
        }
    }
}
