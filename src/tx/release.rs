//! Source-chain release construction

use super::SignedTx;
use crate::chain::SourceChain;
use crate::contract::ContractInterface;
use crate::error::{RelayerError, RelayerResult};

use ethers::types::{Address, U256};
use std::sync::Arc;
use tracing::debug;

/// Builds signed releases from the contract-controlled signing account
pub struct ReleaseBuilder {
    source: Arc<dyn SourceChain>,
    contract: Arc<dyn ContractInterface>,
    /// Account whose source-chain nonce signs releases.
    sign_account: Address,
    bridge_address: Address,
    recipient: Address,
}

impl ReleaseBuilder {
    pub fn new(
        source: Arc<dyn SourceChain>,
        contract: Arc<dyn ContractInterface>,
        sign_account: Address,
        bridge_address: Address,
        recipient: Address,
    ) -> Self {
        Self {
            source,
            contract,
            sign_account,
            bridge_address,
            recipient,
        }
    }

    /// Build a release for `amount`, reading the signing nonce from source
    /// state. A zero nonce means the account is not provisioned yet.
    pub async fn build_release(&self, amount: U256) -> RelayerResult<SignedTx> {
        let nonce = self.source.get_account_nonce(self.sign_account).await?;
        if nonce == 0 {
            debug!(
                addr = ?self.sign_account,
                "Source state returned 0 for nonce of signing account"
            );
            return Err(RelayerError::NonceUnavailable {
                address: self.sign_account,
            });
        }

        self.contract
            .build_release_tx(self.bridge_address, amount, self.recipient, nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockSourceChain;
    use crate::contract::{BridgeAbi, SourceBridgeContract, SOURCE_BRIDGE_ABI};
    use crate::tx::signer::tests::test_signer;
    use crate::tx::TxKind;

    const SIGN_ACCOUNT: Address = Address::repeat_byte(0xbb);

    fn builder(source: MockSourceChain) -> ReleaseBuilder {
        let abi = BridgeAbi::from_json(SOURCE_BRIDGE_ABI).unwrap();
        ReleaseBuilder::new(
            Arc::new(source),
            Arc::new(SourceBridgeContract::new(abi, "release", Some(test_signer(4)))),
            SIGN_ACCOUNT,
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0xcc),
        )
    }

    #[tokio::test]
    async fn test_release_uses_source_nonce() {
        let mut source = MockSourceChain::new();
        source
            .expect_get_account_nonce()
            .withf(|addr| *addr == SIGN_ACCOUNT)
            .returning(|_| Ok(12));

        let tx = builder(source).build_release(U256::from(500)).await.unwrap();

        assert_eq!(tx.kind, TxKind::Release);
        assert_eq!(tx.nonce, 12);
        assert_eq!(tx.amount, U256::from(500));
        assert_eq!(tx.to, Address::repeat_byte(0xaa));
    }

    #[tokio::test]
    async fn test_zero_nonce_is_unavailable() {
        let mut source = MockSourceChain::new();
        source.expect_get_account_nonce().returning(|_| Ok(0));

        let err = builder(source).build_release(U256::from(500)).await.unwrap_err();
        assert!(matches!(err, RelayerError::NonceUnavailable { address } if address == SIGN_ACCOUNT));
    }

    #[tokio::test]
    async fn test_state_read_failure_propagates() {
        let mut source = MockSourceChain::new();
        source.expect_get_account_nonce().returning(|_| {
            Err(RelayerError::StateRead {
                chain: "ETH".to_string(),
                message: "timeout".to_string(),
            })
        });

        let err = builder(source).build_release(U256::one()).await.unwrap_err();
        assert!(matches!(err, RelayerError::StateRead { .. }));
    }
}
