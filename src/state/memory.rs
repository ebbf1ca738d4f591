//! In-memory relay store

use super::{RelayLedger, RelayStats, RelayStore};
use crate::chain::EventPool;
use crate::coordination::{Leg, LegState, OutboxRecord, PendingSnapshot, SettlementOutbox};
use crate::error::{RelayerError, RelayerResult};
use crate::events::{CrossChainEvent, RelayKey};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ethers::types::H256;
use tracing::debug;

/// Volatile store; contents are lost on restart
#[derive(Default)]
pub struct MemoryState {
    claims: DashMap<RelayKey, DateTime<Utc>>,
    events: DashMap<H256, CrossChainEvent>,
    outbox: DashMap<String, OutboxRecord>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepted events ordered by nonce
    pub fn events(&self) -> Vec<CrossChainEvent> {
        let mut events: Vec<_> = self.events.iter().map(|e| e.value().clone()).collect();
        events.sort_by_key(|e| e.nonce());
        events
    }
}

#[async_trait]
impl EventPool for MemoryState {
    async fn add_event(&self, event: CrossChainEvent) -> RelayerResult<()> {
        match self.events.entry(event.hash()) {
            Entry::Occupied(entry) => Err(RelayerError::PoolRejection {
                pool: "event pool".to_string(),
                message: format!("duplicate event {:?}", entry.key()),
            }),
            Entry::Vacant(entry) => {
                entry.insert(event);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RelayLedger for MemoryState {
    async fn claim(&self, key: &RelayKey) -> RelayerResult<bool> {
        match self.claims.entry(key.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(Utc::now());
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &RelayKey) -> RelayerResult<()> {
        self.claims.remove(key);
        Ok(())
    }
}

#[async_trait]
impl SettlementOutbox for MemoryState {
    async fn open(&self, snapshot: &PendingSnapshot) -> RelayerResult<OutboxRecord> {
        let record = self
            .outbox
            .entry(snapshot.key())
            .or_insert_with(|| OutboxRecord::new(*snapshot));
        Ok(record.value().clone())
    }

    async fn record_leg(&self, key: &str, leg: Leg, state: &LegState) -> RelayerResult<()> {
        let mut record = self
            .outbox
            .get_mut(key)
            .ok_or_else(|| RelayerError::Internal(format!("No outbox record {}", key)))?;

        if !record.advance(leg, state.clone()) {
            return Err(RelayerError::Internal(format!(
                "Illegal {} transition {} -> {} for {}",
                leg,
                record.leg(leg).label(),
                state.label(),
                key
            )));
        }
        debug!(key, leg = %leg, state = state.label(), "Recorded settlement leg");
        Ok(())
    }
}

#[async_trait]
impl RelayStore for MemoryState {
    async fn health_check(&self) -> RelayerResult<()> {
        Ok(())
    }

    async fn stats(&self) -> RelayerResult<RelayStats> {
        let mut stats = RelayStats {
            relayed_transactions: self.claims.len() as u64,
            events: self.events.len() as u64,
            settlements: self.outbox.len() as u64,
            ..Default::default()
        };

        for record in self.outbox.iter() {
            for leg in [&record.release, &record.debit] {
                match leg {
                    LegState::Submitted { .. } => stats.legs_submitted += 1,
                    LegState::Failed { .. } => stats.legs_failed += 1,
                    LegState::InFlight => stats.legs_in_flight += 1,
                    LegState::Pending => {}
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainTag;
    use crate::events::TxSummary;
    use ethers::types::U256;
    use tokio_test::{assert_err, assert_ok};

    fn event(nonce: u64, byte: u8) -> CrossChainEvent {
        CrossChainEvent::external(
            nonce,
            ChainTag::new("ETH"),
            TxSummary {
                method: "deposit".to_string(),
                value: U256::from(10),
                source_tx_hash: H256::repeat_byte(byte),
            },
        )
    }

    #[tokio::test]
    async fn test_duplicate_event_is_rejected() {
        let store = MemoryState::new();

        assert_ok!(store.add_event(event(1, 1)).await);
        let err = assert_err!(store.add_event(event(1, 1)).await);
        assert!(matches!(err, RelayerError::PoolRejection { .. }));

        assert_ok!(store.add_event(event(2, 1)).await);
        let nonces: Vec<_> = store.events().iter().map(|e| e.nonce()).collect();
        assert_eq!(nonces, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_released() {
        let store = MemoryState::new();
        let key = RelayKey::new(ChainTag::new("ETH"), H256::repeat_byte(7));

        assert!(store.claim(&key).await.unwrap());
        assert!(!store.claim(&key).await.unwrap());

        assert_ok!(store.release(&key).await);
        assert!(store.claim(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_outbox_reopens_existing_record() {
        let store = MemoryState::new();
        let snapshot = PendingSnapshot {
            amount: U256::from(500),
            debit_nonce: 2,
        };

        let record = store.open(&snapshot).await.unwrap();
        assert_ok!(store.record_leg(&record.key, Leg::Release, &LegState::InFlight).await);

        let reopened = store.open(&snapshot).await.unwrap();
        assert_eq!(reopened.release, LegState::InFlight);
        assert_eq!(reopened.debit, LegState::Pending);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.settlements, 1);
        assert_eq!(stats.legs_in_flight, 1);
    }

    #[tokio::test]
    async fn test_leg_taken_in_flight_only_once() {
        let store = MemoryState::new();
        let snapshot = PendingSnapshot {
            amount: U256::from(500),
            debit_nonce: 2,
        };
        let first = store.open(&snapshot).await.unwrap();
        let second = store.open(&snapshot).await.unwrap();
        assert!(first.release.is_pending() && second.release.is_pending());

        assert_ok!(store.record_leg(&first.key, Leg::Release, &LegState::InFlight).await);
        assert_err!(store.record_leg(&second.key, Leg::Release, &LegState::InFlight).await);
        assert_err!(store.record_leg(&first.key, Leg::Release, &LegState::Pending).await);
    }

    #[tokio::test]
    async fn test_illegal_leg_transition_rejected() {
        let store = MemoryState::new();
        let record = store
            .open(&PendingSnapshot {
                amount: U256::from(1),
                debit_nonce: 0,
            })
            .await
            .unwrap();

        let err = assert_err!(
            store
                .record_leg(
                    &record.key,
                    Leg::Debit,
                    &LegState::Submitted {
                        tx_hash: H256::zero()
                    }
                )
                .await
        );
        assert!(matches!(err, RelayerError::Internal(_)));
        assert_err!(store.record_leg("missing", Leg::Debit, &LegState::InFlight).await);
    }
}
