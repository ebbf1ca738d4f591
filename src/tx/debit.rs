//! Destination-chain debit construction

use super::{SignedTx, TxKind, TxSigner};
use crate::contract::BridgeAbi;
use crate::error::RelayerResult;

use ethers::abi::Token;
use ethers::types::{Address, U256};
use tracing::info;

/// Builds debits against the bridge master from the system account
pub struct DebitBuilder {
    master_abi: BridgeAbi,
    master_contract: Address,
    debit_method: String,
    signer: TxSigner,
}

impl DebitBuilder {
    pub fn new(
        master_abi: BridgeAbi,
        master_contract: Address,
        debit_method: impl Into<String>,
        signer: TxSigner,
    ) -> Self {
        Self {
            master_abi,
            master_contract,
            debit_method: debit_method.into(),
            signer,
        }
    }

    /// Account that signs debits
    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    pub fn master_abi(&self) -> &BridgeAbi {
        &self.master_abi
    }

    pub fn master_contract(&self) -> Address {
        self.master_contract
    }

    /// Signed debit of exactly `amount`
    pub fn build_debit(&self, amount: U256, nonce: u64) -> RelayerResult<SignedTx> {
        let data = self
            .master_abi
            .pack_call(&self.debit_method, &[Token::Uint(amount)])?;
        let (hash, raw) = self
            .signer
            .sign_call(self.master_contract, data, U256::zero(), nonce)?;

        info!(
            method = %self.debit_method,
            amount = %amount,
            nonce,
            tx_hash = ?hash,
            "Created debit tx"
        );

        Ok(SignedTx {
            kind: TxKind::Debit,
            hash,
            raw,
            to: self.master_contract,
            nonce,
            amount,
        })
    }
}
