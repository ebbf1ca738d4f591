//! Error types for the bridge relayer

use ethers::types::{Address, H256};
use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain connection error for {chain}: {message}")]
    ChainConnection { chain: String, message: String },

    /// Reading account or contract state from either chain failed.
    #[error("State read failed on {chain}: {message}")]
    StateRead { chain: String, message: String },

    /// A bridge-addressed transaction whose call input could not be decoded.
    #[error("Failed to extract summary from tx {tx_hash:?}: {message}")]
    Extraction { tx_hash: H256, message: String },

    /// The source-chain signing account reports nonce zero.
    #[error("Nonce unavailable for signing account {address:?}")]
    NonceUnavailable { address: Address },

    /// The event pool or a transaction pool refused a submission.
    #[error("{pool} rejected submission: {message}")]
    PoolRejection { pool: String, message: String },

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is transient
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayerError::ChainConnection { .. })
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RelayerError::Config(_) => "config",
            RelayerError::Database(_) => "database",
            RelayerError::ChainConnection { .. } => "chain_connection",
            RelayerError::StateRead { .. } => "state_read",
            RelayerError::Extraction { .. } => "extraction",
            RelayerError::NonceUnavailable { .. } => "nonce_unavailable",
            RelayerError::PoolRejection { .. } => "pool_rejection",
            RelayerError::Contract(_) => "contract",
            RelayerError::Wallet(_) => "wallet",
            RelayerError::Internal(_) => "internal",
        }
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connectivity_errors_are_retryable() {
        let conn = RelayerError::ChainConnection {
            chain: "ETH".to_string(),
            message: "refused".to_string(),
        };
        assert!(conn.is_retryable());

        let rejected = RelayerError::PoolRejection {
            pool: "event pool".to_string(),
            message: "duplicate".to_string(),
        };
        assert!(!rejected.is_retryable());
        assert!(!RelayerError::NonceUnavailable { address: Address::zero() }.is_retryable());
    }

    #[test]
    fn test_kind_labels() {
        let err = RelayerError::StateRead {
            chain: "KAI".to_string(),
            message: "trie missing".to_string(),
        };
        assert_eq!(err.kind(), "state_read");
        assert_eq!(RelayerError::Contract("bad".into()).kind(), "contract");
    }
}
