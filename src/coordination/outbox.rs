//! Settlement outbox: idempotency records for two-sided settlement
//!
//! A record is opened for every non-zero pending-amount snapshot before any
//! transaction is submitted. Each leg only ever moves forward:
//! `pending -> in_flight -> submitted | failed`. A leg found `in_flight` was
//! interrupted mid-submission and is never retried automatically.

use crate::error::RelayerResult;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pending amount as observed together with the debit account's nonce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSnapshot {
    pub amount: U256,
    /// Destination nonce of the debit signer; advances once a debit lands.
    pub debit_nonce: u64,
}

impl PendingSnapshot {
    /// Idempotency key of the snapshot
    pub fn key(&self) -> String {
        format!("{}:{}", self.amount, self.debit_nonce)
    }
}

/// Side of a settlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leg {
    /// Source-chain release
    Release,
    /// Destination-chain debit
    Debit,
}

impl Leg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Leg::Release => "release",
            Leg::Debit => "debit",
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one settlement leg
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LegState {
    Pending,
    InFlight,
    Submitted { tx_hash: H256 },
    Failed { reason: String },
}

impl LegState {
    pub fn label(&self) -> &'static str {
        match self {
            LegState::Pending => "pending",
            LegState::InFlight => "in_flight",
            LegState::Submitted { .. } => "submitted",
            LegState::Failed { .. } => "failed",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, LegState::Pending)
    }

    /// Label of the only state this one may be reached from; `None` for
    /// `Pending`, which is never a transition target.
    pub fn predecessor(&self) -> Option<&'static str> {
        match self {
            LegState::Pending => None,
            LegState::InFlight => Some(LegState::Pending.label()),
            LegState::Submitted { .. } | LegState::Failed { .. } => {
                Some(LegState::InFlight.label())
            }
        }
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(&self, next: &LegState) -> bool {
        matches!(
            (self, next),
            (LegState::Pending, LegState::InFlight)
                | (LegState::InFlight, LegState::Submitted { .. })
                | (LegState::InFlight, LegState::Failed { .. })
        )
    }
}

/// Outbox entry for one pending-amount snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub key: String,
    pub snapshot: PendingSnapshot,
    pub release: LegState,
    pub debit: LegState,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// Fresh record with both legs pending
    pub fn new(snapshot: PendingSnapshot) -> Self {
        Self {
            key: snapshot.key(),
            snapshot,
            release: LegState::Pending,
            debit: LegState::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn leg(&self, leg: Leg) -> &LegState {
        match leg {
            Leg::Release => &self.release,
            Leg::Debit => &self.debit,
        }
    }

    /// Move a leg forward; illegal transitions are ignored and reported
    pub fn advance(&mut self, leg: Leg, next: LegState) -> bool {
        let current = match leg {
            Leg::Release => &mut self.release,
            Leg::Debit => &mut self.debit,
        };
        if !current.can_advance_to(&next) {
            return false;
        }
        *current = next;
        true
    }

    /// No leg is left to attempt
    pub fn is_settled(&self) -> bool {
        !self.release.is_pending() && !self.debit.is_pending()
    }
}

/// Durable store of outbox records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettlementOutbox: Send + Sync {
    /// Existing record for the snapshot, or a newly persisted one
    async fn open(&self, snapshot: &PendingSnapshot) -> RelayerResult<OutboxRecord>;

    /// Persist a leg transition
    async fn record_leg(&self, key: &str, leg: Leg, state: &LegState) -> RelayerResult<()>;
}
