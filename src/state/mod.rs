//! Relay state persistence
//!
//! Handles:
//! - The relay ledger deduplicating source transactions
//! - Cross-chain events handed to the event pool
//! - The settlement outbox
//!
//! PostgreSQL backs production runs; the in-memory store serves dev and tests.

mod manager;
mod memory;

pub use manager::StateManager;
pub use memory::MemoryState;

use crate::chain::EventPool;
use crate::coordination::SettlementOutbox;
use crate::error::RelayerResult;
use crate::events::RelayKey;

use async_trait::async_trait;
use serde::Serialize;

/// Claims on source transactions, one relay attempt per key
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelayLedger: Send + Sync {
    /// `false` when the key is already claimed
    async fn claim(&self, key: &RelayKey) -> RelayerResult<bool>;

    /// Drop a claim so a later delivery can retry
    async fn release(&self, key: &RelayKey) -> RelayerResult<()>;
}

/// Everything the relay persists
#[async_trait]
pub trait RelayStore: EventPool + RelayLedger + SettlementOutbox {
    async fn health_check(&self) -> RelayerResult<()>;

    async fn stats(&self) -> RelayerResult<RelayStats>;
}

/// Store counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub relayed_transactions: u64,
    pub events: u64,
    pub settlements: u64,
    pub legs_submitted: u64,
    pub legs_failed: u64,
    /// Legs interrupted mid-submission, awaiting reconciliation.
    pub legs_in_flight: u64,
}
