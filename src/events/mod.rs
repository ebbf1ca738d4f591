//! Cross-chain event types and the classification pipeline
//!
//! A source-chain transaction addressed to the bridge contract is reduced to a
//! [`TxSummary`] by the extractor, keyed with a destination-chain nonce by the
//! assembler, and handed to the event pool as a [`CrossChainEvent`].

pub mod assembler;
pub mod extractor;
pub mod pipeline;

pub use assembler::EventAssembler;
pub use extractor::EventExtractor;
pub use pipeline::{BlockClassifier, ReleaseTrigger};

use crate::chain::ChainTag;

use ethers::types::{H256, U256};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Decoded view of a bridge-addressed source transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSummary {
    pub method: String,
    /// Native value transferred on the source chain.
    pub value: U256,
    pub source_tx_hash: H256,
}

/// Destination-side transaction a cross-chain event is expected to produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMetadata {
    pub tx_hash: H256,
    pub target_chain: ChainTag,
}

/// Normalized record of an observed source-chain transfer intent.
///
/// Immutable once built; the pending metadata can only be attached by
/// consuming the freshly assembled value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainEvent {
    nonce: u64,
    is_external: bool,
    source_chain: ChainTag,
    source_tx_hash: H256,
    summary: TxSummary,
    pending_tx_metadata: Option<TxMetadata>,
}

impl CrossChainEvent {
    /// Event for a transfer observed on an external chain
    pub fn external(nonce: u64, source_chain: ChainTag, summary: TxSummary) -> Self {
        Self {
            nonce,
            is_external: true,
            source_chain,
            source_tx_hash: summary.source_tx_hash,
            summary,
            pending_tx_metadata: None,
        }
    }

    pub fn with_pending_metadata(mut self, metadata: Option<TxMetadata>) -> Self {
        self.pending_tx_metadata = metadata;
        self
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn is_external(&self) -> bool {
        self.is_external
    }

    pub fn source_chain(&self) -> &ChainTag {
        &self.source_chain
    }

    pub fn source_tx_hash(&self) -> H256 {
        self.source_tx_hash
    }

    pub fn summary(&self) -> &TxSummary {
        &self.summary
    }

    pub fn pending_tx_metadata(&self) -> Option<&TxMetadata> {
        self.pending_tx_metadata.as_ref()
    }

    /// Keccak-256 over every field
    pub fn hash(&self) -> H256 {
        let mut hasher = Keccak256::new();
        hasher.update(self.nonce.to_be_bytes());
        hasher.update([self.is_external as u8]);
        hash_str(&mut hasher, self.source_chain.as_str());
        hasher.update(self.source_tx_hash.as_bytes());
        hash_str(&mut hasher, &self.summary.method);
        let mut value = [0u8; 32];
        self.summary.value.to_big_endian(&mut value);
        hasher.update(value);
        hasher.update(self.summary.source_tx_hash.as_bytes());
        match &self.pending_tx_metadata {
            Some(metadata) => {
                hasher.update([1u8]);
                hasher.update(metadata.tx_hash.as_bytes());
                hash_str(&mut hasher, metadata.target_chain.as_str());
            }
            None => hasher.update([0u8]),
        }
        H256::from_slice(&hasher.finalize())
    }
}

fn hash_str(hasher: &mut Keccak256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

/// Idempotency key of a relayed source transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelayKey {
    pub source_chain: ChainTag,
    pub source_tx_hash: H256,
}

impl RelayKey {
    pub fn new(source_chain: ChainTag, source_tx_hash: H256) -> Self {
        Self {
            source_chain,
            source_tx_hash,
        }
    }
}

impl fmt::Display for RelayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.source_chain, self.source_tx_hash)
    }
}
