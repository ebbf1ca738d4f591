//! Contract-interface descriptor for the source-chain bridge contract
//!
//! Decodes which bridge method a transaction calls, packs calls, and builds
//! signed release transactions.

mod abi;

pub use abi::{BridgeAbi, BRIDGE_MASTER_ABI, SOURCE_BRIDGE_ABI};

use crate::error::{RelayerError, RelayerResult};
use crate::tx::{SignedTx, TxKind, TxSigner};

use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};
use tracing::info;

/// Contract descriptor used by extraction and settlement
pub trait ContractInterface: Send + Sync {
    /// Name of the method invoked by a call input
    fn input_method_name(&self, input: &[u8]) -> RelayerResult<String>;

    /// Encode a call
    fn pack_call(&self, method: &str, args: &[Token]) -> RelayerResult<Bytes>;

    /// Build a signed release paying `amount` to `recipient`
    fn build_release_tx(
        &self,
        contract: Address,
        amount: U256,
        recipient: Address,
        nonce: u64,
    ) -> RelayerResult<SignedTx>;
}

/// Source-chain bridge contract backed by a parsed ABI
pub struct SourceBridgeContract {
    abi: BridgeAbi,
    release_method: String,
    /// Without a signer the descriptor can still decode and pack.
    signer: Option<TxSigner>,
}

impl SourceBridgeContract {
    pub fn new(abi: BridgeAbi, release_method: impl Into<String>, signer: Option<TxSigner>) -> Self {
        Self {
            abi,
            release_method: release_method.into(),
            signer,
        }
    }

    /// Address that signs releases, if a key is loaded
    pub fn signer_address(&self) -> Option<Address> {
        self.signer.as_ref().map(TxSigner::address)
    }
}

impl ContractInterface for SourceBridgeContract {
    fn input_method_name(&self, input: &[u8]) -> RelayerResult<String> {
        self.abi.input_method_name(input)
    }

    fn pack_call(&self, method: &str, args: &[Token]) -> RelayerResult<Bytes> {
        self.abi.pack_call(method, args)
    }

    fn build_release_tx(
        &self,
        contract: Address,
        amount: U256,
        recipient: Address,
        nonce: u64,
    ) -> RelayerResult<SignedTx> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| RelayerError::Wallet("No release signing key loaded".to_string()))?;

        let data = self.abi.pack_call(
            &self.release_method,
            &[Token::Address(recipient), Token::Uint(amount)],
        )?;
        let (hash, raw) = signer.sign_call(contract, data, U256::zero(), nonce)?;

        info!(
            quantity = %amount,
            nonce,
            tx_hash = ?hash,
            "Created release tx"
        );

        Ok(SignedTx {
            kind: TxKind::Release,
            hash,
            raw,
            to: contract,
            nonce,
            amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::signer::tests::test_signer;

    #[test]
    fn test_release_tx_carries_amount_and_nonce() {
        let abi = BridgeAbi::from_json(SOURCE_BRIDGE_ABI).unwrap();
        let contract = SourceBridgeContract::new(abi, "release", Some(test_signer(4)));
        let bridge = Address::repeat_byte(0xaa);

        let tx = contract
            .build_release_tx(bridge, U256::from(500), Address::repeat_byte(0xcc), 3)
            .unwrap();

        assert_eq!(tx.kind, TxKind::Release);
        assert_eq!(tx.amount, U256::from(500));
        assert_eq!(tx.nonce, 3);
        assert_eq!(tx.to, bridge);
    }

    #[test]
    fn test_release_without_signer_fails() {
        let abi = BridgeAbi::from_json(SOURCE_BRIDGE_ABI).unwrap();
        let contract = SourceBridgeContract::new(abi, "release", None);

        let err = contract
            .build_release_tx(Address::zero(), U256::one(), Address::zero(), 1)
            .unwrap_err();
        assert!(matches!(err, RelayerError::Wallet(_)));
        assert!(contract.signer_address().is_none());
    }
}
