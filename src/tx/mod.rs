//! Transaction construction: signing keys, release and debit builders

mod debit;
mod release;
pub(crate) mod signer;

pub use debit::DebitBuilder;
pub use release::ReleaseBuilder;
pub use signer::TxSigner;

use ethers::types::{Address, Bytes, H256, U256};
use serde::Serialize;
use std::fmt;

/// What a signed transaction does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    /// Pays out on the source chain.
    Release,
    /// Decrements the tracked external balance on the destination chain.
    Debit,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxKind::Release => write!(f, "release"),
            TxKind::Debit => write!(f, "debit"),
        }
    }
}

/// A signed, RLP-encoded transaction ready for a transaction pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub kind: TxKind,
    pub hash: H256,
    pub raw: Bytes,
    pub to: Address,
    pub nonce: u64,
    /// Value moved by the call, whether native or as a call argument.
    pub amount: U256,
}
