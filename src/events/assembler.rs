//! Nonce-keyed event assembly and handoff to the event pool

use super::{CrossChainEvent, TxSummary};
use crate::chain::{ChainTag, DestinationChain, EventPool, InternalChainAdapter};
use crate::error::{RelayerError, RelayerResult};

use ethers::types::Address;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds cross-chain events keyed by the destination bridge-state nonce
pub struct EventAssembler {
    source_chain: ChainTag,
    /// Account whose destination-chain nonce orders events.
    bridge_state_address: Address,
    destination: Arc<dyn DestinationChain>,
    adapter: Arc<dyn InternalChainAdapter>,
    pool: Arc<dyn EventPool>,
}

impl EventAssembler {
    pub fn new(
        source_chain: ChainTag,
        bridge_state_address: Address,
        destination: Arc<dyn DestinationChain>,
        adapter: Arc<dyn InternalChainAdapter>,
        pool: Arc<dyn EventPool>,
    ) -> Self {
        Self {
            source_chain,
            bridge_state_address,
            destination,
            adapter,
            pool,
        }
    }

    pub fn source_chain(&self) -> &ChainTag {
        &self.source_chain
    }

    /// Build the event for one summary, reading the ordering nonce once
    pub async fn assemble(&self, summary: TxSummary) -> RelayerResult<CrossChainEvent> {
        let nonce = self
            .destination
            .get_account_nonce(self.bridge_state_address)
            .await
            .map_err(|e| match e {
                RelayerError::StateRead { .. } => e,
                other => RelayerError::StateRead {
                    chain: "destination".to_string(),
                    message: other.to_string(),
                },
            })?;

        let metadata = self.adapter.compute_tx_metadata(&summary).await;
        if metadata.is_none() {
            debug!(
                source_tx = ?summary.source_tx_hash,
                "Pending tx metadata unavailable"
            );
        }

        Ok(CrossChainEvent::external(nonce, self.source_chain.clone(), summary)
            .with_pending_metadata(metadata))
    }

    /// Assemble and hand off to the event pool.
    ///
    /// A pool rejection is returned to the caller and never retried here.
    pub async fn relay(&self, summary: TxSummary) -> RelayerResult<CrossChainEvent> {
        let event = self.assemble(summary).await?;

        match self.pool.add_event(event.clone()).await {
            Ok(()) => {
                info!(
                    nonce = event.nonce(),
                    source_tx = ?event.source_tx_hash(),
                    method = %event.summary().method,
                    value = %event.summary().value,
                    "Submitted cross-chain event to event pool"
                );
                crate::metrics::record_event_queued(&self.source_chain);
                Ok(event)
            }
            Err(e) => {
                warn!(
                    nonce = event.nonce(),
                    source_tx = ?event.source_tx_hash(),
                    "Event pool rejected event: {}", e
                );
                crate::metrics::record_event_rejected(&self.source_chain);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockDestinationChain, MockEventPool, MockInternalChainAdapter};
    use crate::events::TxMetadata;
    use ethers::types::{H256, U256};
    use std::sync::atomic::{AtomicU64, Ordering};

    const STATE_ACCOUNT: Address = Address::repeat_byte(0x5a);

    fn summary(byte: u8) -> TxSummary {
        TxSummary {
            method: "deposit".to_string(),
            value: U256::from(1000),
            source_tx_hash: H256::repeat_byte(byte),
        }
    }

    fn no_metadata() -> MockInternalChainAdapter {
        let mut adapter = MockInternalChainAdapter::new();
        adapter.expect_compute_tx_metadata().returning(|_| None);
        adapter
    }

    fn assembler(
        destination: MockDestinationChain,
        adapter: MockInternalChainAdapter,
        pool: MockEventPool,
    ) -> EventAssembler {
        EventAssembler::new(
            ChainTag::new("ETH"),
            STATE_ACCOUNT,
            Arc::new(destination),
            Arc::new(adapter),
            Arc::new(pool),
        )
    }

    #[tokio::test]
    async fn test_assemble_reads_nonce_once_and_attaches_metadata() {
        let mut destination = MockDestinationChain::new();
        destination
            .expect_get_account_nonce()
            .withf(|addr| *addr == STATE_ACCOUNT)
            .times(1)
            .returning(|_| Ok(42));

        let mut adapter = MockInternalChainAdapter::new();
        adapter.expect_compute_tx_metadata().times(1).returning(|s| {
            Some(TxMetadata {
                tx_hash: s.source_tx_hash,
                target_chain: ChainTag::new("ETH"),
            })
        });

        let event = assembler(destination, adapter, MockEventPool::new())
            .assemble(summary(0x01))
            .await
            .unwrap();

        assert_eq!(event.nonce(), 42);
        assert!(event.is_external());
        assert_eq!(event.source_chain(), &ChainTag::new("ETH"));
        assert_eq!(event.source_tx_hash(), H256::repeat_byte(0x01));
        let metadata = event.pending_tx_metadata().unwrap();
        assert_eq!(metadata.tx_hash, H256::repeat_byte(0x01));
    }

    #[tokio::test]
    async fn test_sequential_events_carry_non_decreasing_nonces() {
        let counter = Arc::new(AtomicU64::new(7));
        let mut destination = MockDestinationChain::new();
        let c = counter.clone();
        destination
            .expect_get_account_nonce()
            .returning(move |_| Ok(c.fetch_add(1, Ordering::SeqCst)));

        let mut pool = MockEventPool::new();
        pool.expect_add_event().times(3).returning(|_| Ok(()));

        let assembler = assembler(destination, no_metadata(), pool);
        let mut nonces = Vec::new();
        for byte in 1..=3u8 {
            nonces.push(assembler.relay(summary(byte)).await.unwrap().nonce());
        }

        assert_eq!(nonces, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn test_state_read_failure_aborts_before_pool() {
        let mut destination = MockDestinationChain::new();
        destination.expect_get_account_nonce().returning(|_| {
            Err(RelayerError::ChainConnection {
                chain: "KAI".to_string(),
                message: "connection refused".to_string(),
            })
        });

        let mut adapter = MockInternalChainAdapter::new();
        adapter.expect_compute_tx_metadata().never();
        let mut pool = MockEventPool::new();
        pool.expect_add_event().never();

        let err = assembler(destination, adapter, pool)
            .relay(summary(0x02))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayerError::StateRead { .. }));
    }

    #[tokio::test]
    async fn test_pool_rejection_is_propagated() {
        let mut destination = MockDestinationChain::new();
        destination.expect_get_account_nonce().returning(|_| Ok(3));

        let mut pool = MockEventPool::new();
        pool.expect_add_event().times(1).returning(|_| {
            Err(RelayerError::PoolRejection {
                pool: "event pool".to_string(),
                message: "duplicate nonce".to_string(),
            })
        });

        let err = assembler(destination, no_metadata(), pool)
            .relay(summary(0x03))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayerError::PoolRejection { .. }));
    }
}
