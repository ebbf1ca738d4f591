//! Chain module - collaborator contracts for both ledgers and source-head relaying
//!
//! This module provides:
//! - The narrow interfaces the relay core consumes from each chain
//! - An ethers JSON-RPC provider with failover that implements them
//! - The head tracker relaying source blocks into classification
//! - A synthetic trigger source for dev and test runs

pub mod listener;
pub mod provider;
pub mod trigger;

pub use listener::{BlockHandler, HeadSender, HeadTracker};
pub use provider::ChainProvider;
pub use trigger::TriggerSource;

use crate::error::RelayerResult;
use crate::events::{CrossChainEvent, TxMetadata, TxSummary};
use crate::tx::SignedTx;

use async_trait::async_trait;
use ethers::types::{Address, Block, Bytes, Transaction, H256};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A full source-chain block as delivered by a head notification
pub type SourceBlock = Block<Transaction>;

/// Stream of head notifications. `None` is a notification without a block.
pub type HeadStream = BoxStream<'static, Option<SourceBlock>>;

/// Short chain identifier carried in cross-chain events (e.g. "ETH")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainTag(String);

impl ChainTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read access to the source chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceChain: Send + Sync {
    /// Current nonce of an account
    async fn get_account_nonce(&self, address: Address) -> RelayerResult<u64>;

    /// Subscribe to new-head notifications
    async fn subscribe_new_heads(&self) -> RelayerResult<HeadStream>;
}

/// Read access to the destination chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DestinationChain: Send + Sync {
    /// Current nonce of an account
    async fn get_account_nonce(&self, address: Address) -> RelayerResult<u64>;

    /// Execute a read-only contract call against current state
    async fn call_view(&self, contract: Address, data: Bytes) -> RelayerResult<Bytes>;
}

/// A chain's transaction pool
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TxPool: Send + Sync {
    /// Submit a signed transaction; inclusion is up to the chain
    async fn submit(&self, tx: SignedTx) -> RelayerResult<H256>;
}

/// Admission pipeline for cross-chain events on the destination chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPool: Send + Sync {
    async fn add_event(&self, event: CrossChainEvent) -> RelayerResult<()>;
}

/// Computes destination-side metadata for an observed transfer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InternalChainAdapter: Send + Sync {
    /// `None` means metadata is unavailable, never a zero value
    async fn compute_tx_metadata(&self, summary: &TxSummary) -> Option<TxMetadata>;
}
