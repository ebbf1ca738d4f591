//! Outbound settlement engine
//!
//! Flow (a) releases on the source chain for an observed transfer. Flow (b)
//! polls the bridge master for the amount awaiting release and, for each new
//! snapshot, submits a source-chain release plus a destination-chain debit of
//! the same amount. The two legs are independent and best-effort.

use super::outbox::{Leg, LegState, OutboxRecord, PendingSnapshot, SettlementOutbox};
use crate::chain::{ChainTag, DestinationChain, InternalChainAdapter, TxPool};
use crate::config::SettlementConfig;
use crate::error::RelayerResult;
use crate::events::{CrossChainEvent, ReleaseTrigger, TxMetadata, TxSummary};
use crate::tx::{DebitBuilder, ReleaseBuilder};

use async_trait::async_trait;
use ethers::types::{H256, U256};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Nothing is pending release.
    Idle,
    /// This snapshot was already handled by an earlier cycle.
    AlreadySettled,
    /// Final state of each leg after this cycle.
    Settled { release: LegState, debit: LegState },
}

/// Two-sided settlement between source releases and destination debits
pub struct SettlementEngine {
    config: SettlementConfig,
    /// Chain the releases land on; reported as the metadata target.
    source_tag: ChainTag,
    release: ReleaseBuilder,
    debit: DebitBuilder,
    destination: Arc<dyn DestinationChain>,
    source_pool: Arc<dyn TxPool>,
    destination_pool: Arc<dyn TxPool>,
    outbox: Arc<dyn SettlementOutbox>,
}

impl SettlementEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SettlementConfig,
        source_tag: ChainTag,
        release: ReleaseBuilder,
        debit: DebitBuilder,
        destination: Arc<dyn DestinationChain>,
        source_pool: Arc<dyn TxPool>,
        destination_pool: Arc<dyn TxPool>,
        outbox: Arc<dyn SettlementOutbox>,
    ) -> Self {
        Self {
            config,
            source_tag,
            release,
            debit,
            destination,
            source_pool,
            destination_pool,
            outbox,
        }
    }

    /// Build and submit a source-chain release. Failures are returned and
    /// never retried.
    pub async fn release(&self, amount: U256) -> RelayerResult<H256> {
        let result = match self.release.build_release(amount).await {
            Ok(tx) => self.source_pool.submit(tx).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(tx_hash) => {
                info!(amount = %amount, tx_hash = ?tx_hash, "Submitted release tx to source tx pool");
                crate::metrics::record_leg_submission(Leg::Release, true);
            }
            Err(e) => {
                error!(amount = %amount, "Failed to submit release tx: {}", e);
                crate::metrics::record_leg_submission(Leg::Release, false);
            }
        }
        result
    }

    async fn submit_debit(&self, amount: U256, nonce: u64) -> RelayerResult<H256> {
        let result = match self.debit.build_debit(amount, nonce) {
            Ok(tx) => self.destination_pool.submit(tx).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(tx_hash) => {
                info!(amount = %amount, tx_hash = ?tx_hash, "Submitted debit tx to destination tx pool");
                crate::metrics::record_leg_submission(Leg::Debit, true);
            }
            Err(e) => {
                error!(amount = %amount, "Failed to submit debit tx: {}", e);
                crate::metrics::record_leg_submission(Leg::Debit, false);
            }
        }
        result
    }

    /// Amount the bridge master holds for release on the source chain
    pub async fn read_pending_amount(&self) -> RelayerResult<U256> {
        let abi = self.debit.master_abi();
        let method = &self.config.pending_amount_method;

        let call = abi.pack_call(method, &[])?;
        let output = self
            .destination
            .call_view(self.debit.master_contract(), call)
            .await?;
        let amount = abi.decode_uint_output(method, &output)?;

        crate::metrics::record_pending_amount(amount);
        Ok(amount)
    }

    /// One poll cycle of flow (b)
    pub async fn settle_once(&self) -> RelayerResult<SettlementOutcome> {
        let amount = self.read_pending_amount().await?;
        debug!(amount = %amount, "Bridge master pending amount");
        if amount.is_zero() {
            crate::metrics::record_settlement_poll("idle");
            return Ok(SettlementOutcome::Idle);
        }

        let debit_nonce = self
            .destination
            .get_account_nonce(self.debit.signer_address())
            .await?;
        let snapshot = PendingSnapshot {
            amount,
            debit_nonce,
        };
        let record = self.outbox.open(&snapshot).await?;

        for leg in [Leg::Release, Leg::Debit] {
            if matches!(record.leg(leg), LegState::InFlight) {
                warn!(
                    key = %record.key,
                    leg = %leg,
                    "Settlement leg was interrupted mid-submission, needs reconciliation"
                );
            }
        }

        if record.is_settled() {
            debug!(key = %record.key, "Pending snapshot already settled");
            crate::metrics::record_settlement_poll("already_settled");
            return Ok(SettlementOutcome::AlreadySettled);
        }

        let release = self.settle_leg(&record, Leg::Release).await;
        let debit = self.settle_leg(&record, Leg::Debit).await;

        info!(
            key = %record.key,
            release = release.label(),
            debit = debit.label(),
            "Settlement cycle complete"
        );
        crate::metrics::record_settlement_poll("settled");
        Ok(SettlementOutcome::Settled { release, debit })
    }

    /// Attempt one leg if it is still pending. Only a failure to mark the leg
    /// in flight prevents the submission.
    async fn settle_leg(&self, record: &OutboxRecord, leg: Leg) -> LegState {
        let current = record.leg(leg);
        if !current.is_pending() {
            return current.clone();
        }

        if let Err(e) = self
            .outbox
            .record_leg(&record.key, leg, &LegState::InFlight)
            .await
        {
            error!(key = %record.key, leg = %leg, "Failed to mark leg in flight: {}", e);
            return LegState::Pending;
        }

        let amount = record.snapshot.amount;
        let result = match leg {
            Leg::Release => self.release(amount).await,
            Leg::Debit => self.submit_debit(amount, record.snapshot.debit_nonce).await,
        };
        let state = match result {
            Ok(tx_hash) => LegState::Submitted { tx_hash },
            Err(e) => LegState::Failed {
                reason: e.to_string(),
            },
        };

        if let Err(e) = self.outbox.record_leg(&record.key, leg, &state).await {
            error!(
                key = %record.key,
                leg = %leg,
                state = state.label(),
                "Failed to record leg outcome: {}", e
            );
        }
        state
    }

    /// Poll until cancelled
    pub async fn run(&self, cancellation: CancellationToken) -> RelayerResult<()> {
        let mut poll = interval(Duration::from_millis(self.config.poll_interval_ms));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.config.poll_interval_ms,
            "Settlement engine started"
        );

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = poll.tick() => {
                    match self.settle_once().await {
                        Ok(outcome) => debug!(?outcome, "Settlement poll"),
                        Err(e) => {
                            warn!(
                                kind = e.kind(),
                                retryable = e.is_retryable(),
                                "Settlement poll failed: {}", e
                            );
                            crate::metrics::record_settlement_poll("error");
                        }
                    }
                }
            }
        }

        info!("Settlement engine stopped");
        Ok(())
    }
}

#[async_trait]
impl ReleaseTrigger for SettlementEngine {
    async fn release_for_event(&self, event: &CrossChainEvent) -> RelayerResult<H256> {
        self.release(event.summary().value).await
    }
}

#[async_trait]
impl InternalChainAdapter for SettlementEngine {
    /// Hash of the release the event would produce; nothing is submitted
    async fn compute_tx_metadata(&self, summary: &TxSummary) -> Option<TxMetadata> {
        match self.release.build_release(summary.value).await {
            Ok(tx) => Some(TxMetadata {
                tx_hash: tx.hash,
                target_chain: self.source_tag.clone(),
            }),
            Err(e) => {
                warn!(
                    source_tx = ?summary.source_tx_hash,
                    "Cannot compute release metadata: {}", e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockDestinationChain, MockSourceChain, MockTxPool};
    use crate::coordination::outbox::MockSettlementOutbox;
    use crate::contract::{BridgeAbi, SourceBridgeContract, BRIDGE_MASTER_ABI, SOURCE_BRIDGE_ABI};
    use crate::error::RelayerError;
    use crate::state::MemoryState;
    use crate::tx::signer::tests::test_signer;
    use crate::tx::TxKind;
    use ethers::abi::Token;
    use ethers::types::{Address, Bytes};
    use std::sync::atomic::{AtomicU64, Ordering};

    const MASTER: Address = Address::repeat_byte(0xdd);

    fn settlement_config() -> SettlementConfig {
        SettlementConfig {
            enabled: true,
            poll_interval_ms: 10,
            release_on_event: false,
            release_method: "release".to_string(),
            pending_amount_method: "getEthToSend".to_string(),
            debit_method: "removeEth".to_string(),
        }
    }

    fn source_with_nonce(nonce: u64) -> MockSourceChain {
        let mut source = MockSourceChain::new();
        source
            .expect_get_account_nonce()
            .returning(move |_| Ok(nonce));
        source
    }

    fn destination_with_pending(amount: u64, debit_nonce: u64) -> MockDestinationChain {
        let mut destination = MockDestinationChain::new();
        destination
            .expect_call_view()
            .withf(|contract, _| *contract == MASTER)
            .returning(move |_, _| Ok(Bytes::from(ethers::abi::encode(&[Token::Uint(U256::from(amount))]))));
        destination
            .expect_get_account_nonce()
            .returning(move |_| Ok(debit_nonce));
        destination
    }

    fn pool_expecting(times: usize, kind: TxKind, ok: bool) -> MockTxPool {
        let mut pool = MockTxPool::new();
        if times == 0 {
            pool.expect_submit().never();
            return pool;
        }
        pool.expect_submit()
            .withf(move |tx| tx.kind == kind && tx.amount == U256::from(500))
            .times(times)
            .returning(move |tx| {
                if ok {
                    Ok(tx.hash)
                } else {
                    Err(RelayerError::PoolRejection {
                        pool: "tx pool".to_string(),
                        message: "nonce too low".to_string(),
                    })
                }
            });
        pool
    }

    fn engine(
        source: MockSourceChain,
        destination: MockDestinationChain,
        source_pool: MockTxPool,
        destination_pool: MockTxPool,
        outbox: Arc<dyn SettlementOutbox>,
    ) -> SettlementEngine {
        let contract = SourceBridgeContract::new(
            BridgeAbi::from_json(SOURCE_BRIDGE_ABI).unwrap(),
            "release",
            Some(test_signer(4)),
        );
        let release = ReleaseBuilder::new(
            Arc::new(source),
            Arc::new(contract),
            Address::repeat_byte(0xbb),
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0xcc),
        );
        let debit = DebitBuilder::new(
            BridgeAbi::from_json(BRIDGE_MASTER_ABI).unwrap(),
            MASTER,
            "removeEth",
            test_signer(100),
        );

        SettlementEngine::new(
            settlement_config(),
            ChainTag::new("ETH"),
            release,
            debit,
            Arc::new(destination),
            Arc::new(source_pool),
            Arc::new(destination_pool),
            outbox,
        )
    }

    #[tokio::test]
    async fn test_zero_pending_amount_is_idle() {
        let engine = engine(
            source_with_nonce(5),
            destination_with_pending(0, 1),
            pool_expecting(0, TxKind::Release, true),
            pool_expecting(0, TxKind::Debit, true),
            Arc::new(MemoryState::new()),
        );

        assert_eq!(engine.settle_once().await.unwrap(), SettlementOutcome::Idle);
    }

    #[tokio::test]
    async fn test_pending_amount_submits_release_and_debit() {
        let engine = engine(
            source_with_nonce(5),
            destination_with_pending(500, 1),
            pool_expecting(1, TxKind::Release, true),
            pool_expecting(1, TxKind::Debit, true),
            Arc::new(MemoryState::new()),
        );

        match engine.settle_once().await.unwrap() {
            SettlementOutcome::Settled { release, debit } => {
                assert_eq!(release.label(), "submitted");
                assert_eq!(debit.label(), "submitted");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_both_legs_attempted_when_both_fail() {
        let engine = engine(
            source_with_nonce(5),
            destination_with_pending(500, 1),
            pool_expecting(1, TxKind::Release, false),
            pool_expecting(1, TxKind::Debit, false),
            Arc::new(MemoryState::new()),
        );

        match engine.settle_once().await.unwrap() {
            SettlementOutcome::Settled { release, debit } => {
                assert_eq!(release.label(), "failed");
                assert_eq!(debit.label(), "failed");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_repoll_of_same_snapshot_submits_nothing() {
        let engine = engine(
            source_with_nonce(5),
            destination_with_pending(500, 1),
            pool_expecting(1, TxKind::Release, true),
            pool_expecting(1, TxKind::Debit, true),
            Arc::new(MemoryState::new()),
        );

        assert!(matches!(
            engine.settle_once().await.unwrap(),
            SettlementOutcome::Settled { .. }
        ));
        assert_eq!(
            engine.settle_once().await.unwrap(),
            SettlementOutcome::AlreadySettled
        );
    }

    #[tokio::test]
    async fn test_advanced_debit_nonce_opens_new_snapshot() {
        let nonce = Arc::new(AtomicU64::new(1));
        let n = nonce.clone();
        let mut destination = MockDestinationChain::new();
        destination.expect_call_view().returning(|_, _| {
            Ok(Bytes::from(ethers::abi::encode(&[Token::Uint(U256::from(500))])))
        });
        destination
            .expect_get_account_nonce()
            .returning(move |_| Ok(n.fetch_add(1, Ordering::SeqCst)));

        let engine = engine(
            source_with_nonce(5),
            destination,
            pool_expecting(2, TxKind::Release, true),
            pool_expecting(2, TxKind::Debit, true),
            Arc::new(MemoryState::new()),
        );

        for _ in 0..2 {
            assert!(matches!(
                engine.settle_once().await.unwrap(),
                SettlementOutcome::Settled { .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_in_flight_leg_is_not_resubmitted() {
        let store = Arc::new(MemoryState::new());
        let record = store
            .open(&PendingSnapshot {
                amount: U256::from(500),
                debit_nonce: 1,
            })
            .await
            .unwrap();
        store
            .record_leg(&record.key, Leg::Release, &LegState::InFlight)
            .await
            .unwrap();

        let engine = engine(
            source_with_nonce(5),
            destination_with_pending(500, 1),
            pool_expecting(0, TxKind::Release, true),
            pool_expecting(1, TxKind::Debit, true),
            store,
        );

        match engine.settle_once().await.unwrap() {
            SettlementOutcome::Settled { release, debit } => {
                assert_eq!(release, LegState::InFlight);
                assert_eq!(debit.label(), "submitted");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leg_not_marked_in_flight_is_skipped() {
        let mut outbox = MockSettlementOutbox::new();
        outbox
            .expect_open()
            .times(1)
            .returning(|snapshot| Ok(OutboxRecord::new(*snapshot)));
        outbox.expect_record_leg().returning(|_, leg, state| {
            if leg == Leg::Release && *state == LegState::InFlight {
                Err(RelayerError::Internal("outbox unavailable".to_string()))
            } else {
                Ok(())
            }
        });

        let engine = engine(
            source_with_nonce(5),
            destination_with_pending(500, 1),
            pool_expecting(0, TxKind::Release, true),
            pool_expecting(1, TxKind::Debit, true),
            Arc::new(outbox),
        );

        match engine.settle_once().await.unwrap() {
            SettlementOutcome::Settled { release, debit } => {
                assert_eq!(release, LegState::Pending);
                assert_eq!(debit.label(), "submitted");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_source_nonce_skips_release_but_debits() {
        let engine = engine(
            source_with_nonce(0),
            destination_with_pending(500, 1),
            pool_expecting(0, TxKind::Release, true),
            pool_expecting(1, TxKind::Debit, true),
            Arc::new(MemoryState::new()),
        );

        match engine.settle_once().await.unwrap() {
            SettlementOutcome::Settled { release, debit } => {
                assert!(matches!(release, LegState::Failed { ref reason } if reason.contains("Nonce unavailable")));
                assert_eq!(debit.label(), "submitted");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pending_read_failure_submits_nothing() {
        let mut destination = MockDestinationChain::new();
        destination.expect_call_view().returning(|_, _| {
            Err(RelayerError::StateRead {
                chain: "KAI".to_string(),
                message: "unavailable".to_string(),
            })
        });
        let engine = engine(
            source_with_nonce(5),
            destination,
            pool_expecting(0, TxKind::Release, true),
            pool_expecting(0, TxKind::Debit, true),
            Arc::new(MemoryState::new()),
        );

        assert!(matches!(
            engine.settle_once().await.unwrap_err(),
            RelayerError::StateRead { .. }
        ));
    }

    #[tokio::test]
    async fn test_metadata_is_would_be_release() {
        let engine = engine(
            source_with_nonce(5),
            MockDestinationChain::new(),
            pool_expecting(0, TxKind::Release, true),
            pool_expecting(0, TxKind::Debit, true),
            Arc::new(MemoryState::new()),
        );
        let summary = TxSummary {
            method: "deposit".to_string(),
            value: U256::from(1000),
            source_tx_hash: H256::repeat_byte(1),
        };

        let metadata = engine.compute_tx_metadata(&summary).await.unwrap();
        assert_eq!(metadata.target_chain, ChainTag::new("ETH"));
        assert!(!metadata.tx_hash.is_zero());
    }

    #[tokio::test]
    async fn test_metadata_unavailable_on_state_read_failure() {
        let mut source = MockSourceChain::new();
        source.expect_get_account_nonce().returning(|_| {
            Err(RelayerError::StateRead {
                chain: "ETH".to_string(),
                message: "unavailable".to_string(),
            })
        });
        let engine = engine(
            source,
            MockDestinationChain::new(),
            pool_expecting(0, TxKind::Release, true),
            pool_expecting(0, TxKind::Debit, true),
            Arc::new(MemoryState::new()),
        );
        let summary = TxSummary {
            method: "deposit".to_string(),
            value: U256::from(1000),
            source_tx_hash: H256::repeat_byte(1),
        };

        assert!(engine.compute_tx_metadata(&summary).await.is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let engine = engine(
            source_with_nonce(5),
            destination_with_pending(0, 1),
            pool_expecting(0, TxKind::Release, true),
            pool_expecting(0, TxKind::Debit, true),
            Arc::new(MemoryState::new()),
        );
        let cancellation = CancellationToken::new();
        let token = cancellation.clone();

        let handle = tokio::spawn(async move { engine.run(token).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancellation.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
