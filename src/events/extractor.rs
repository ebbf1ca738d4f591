//! Block classification: pick out bridge-addressed transactions

use super::TxSummary;
use crate::chain::SourceBlock;
use crate::contract::ContractInterface;
use crate::error::{RelayerError, RelayerResult};

use ethers::types::{Address, Transaction};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Extracts transaction summaries for one bridge contract
pub struct EventExtractor {
    bridge_address: Address,
    contract: Arc<dyn ContractInterface>,
}

impl EventExtractor {
    pub fn new(bridge_address: Address, contract: Arc<dyn ContractInterface>) -> Self {
        Self {
            bridge_address,
            contract,
        }
    }

    /// Summaries of every decodable bridge transaction, in block order.
    ///
    /// A transaction whose input cannot be decoded is logged and skipped; the
    /// rest of the block is still scanned.
    pub fn extract(&self, block: &SourceBlock) -> Vec<TxSummary> {
        let mut summaries = Vec::new();

        for tx in &block.transactions {
            match self.classify(tx) {
                None => {}
                Some(Ok(summary)) => summaries.push(summary),
                Some(Err(e)) => {
                    warn!(
                        block_number = ?block.number,
                        "Skipping bridge tx: {}", e
                    );
                    crate::metrics::record_extraction_failure();
                }
            }
        }

        debug!(
            block_number = ?block.number,
            txns = block.transactions.len(),
            matched = summaries.len(),
            "Classified block"
        );
        summaries
    }

    /// `None` when the transaction is not addressed to the bridge contract
    pub fn classify(&self, tx: &Transaction) -> Option<RelayerResult<TxSummary>> {
        if tx.to != Some(self.bridge_address) {
            return None;
        }

        info!(
            addr = ?self.bridge_address,
            value = %tx.value,
            tx_hash = ?tx.hash,
            "New tx detected on bridge contract"
        );

        let summary = self
            .contract
            .input_method_name(&tx.input)
            .map(|method| TxSummary {
                method,
                value: tx.value,
                source_tx_hash: tx.hash,
            })
            .map_err(|e| RelayerError::Extraction {
                tx_hash: tx.hash,
                message: e.to_string(),
            });

        Some(summary)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::contract::{BridgeAbi, SourceBridgeContract, SOURCE_BRIDGE_ABI};
    use ethers::abi::Token;
    use ethers::types::{Bytes, H256, U256, U64};

    pub(crate) const BRIDGE: Address = Address::repeat_byte(0xaa);

    pub(crate) fn contract() -> Arc<SourceBridgeContract> {
        let abi = BridgeAbi::from_json(SOURCE_BRIDGE_ABI).unwrap();
        Arc::new(SourceBridgeContract::new(abi, "release", None))
    }

    pub(crate) fn bridge_tx(hash_byte: u8, method: &str, value: u64) -> Transaction {
        let args = match method {
            "depositTo" => vec![Token::Address(Address::repeat_byte(0x01))],
            _ => vec![],
        };
        Transaction {
            hash: H256::repeat_byte(hash_byte),
            to: Some(BRIDGE),
            value: U256::from(value),
            input: contract().pack_call(method, &args).unwrap(),
            ..Default::default()
        }
    }

    pub(crate) fn block_with(transactions: Vec<Transaction>) -> SourceBlock {
        SourceBlock {
            number: Some(U64::from(10)),
            transactions,
            ..Default::default()
        }
    }

    fn extractor() -> EventExtractor {
        EventExtractor::new(BRIDGE, contract())
    }

    #[test]
    fn test_extracts_only_bridge_transactions_in_order() {
        let other = Transaction {
            hash: H256::repeat_byte(0x02),
            to: Some(Address::repeat_byte(0xbb)),
            value: U256::from(5),
            ..Default::default()
        };
        let creation = Transaction {
            hash: H256::repeat_byte(0x03),
            to: None,
            ..Default::default()
        };
        let block = block_with(vec![
            bridge_tx(0x10, "deposit", 1000),
            other,
            bridge_tx(0x11, "depositTo", 20),
            creation,
            bridge_tx(0x12, "deposit", 3),
        ]);

        let summaries = extractor().extract(&block);

        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].source_tx_hash, H256::repeat_byte(0x10));
        assert_eq!(summaries[0].method, "deposit");
        assert_eq!(summaries[0].value, U256::from(1000));
        assert_eq!(summaries[1].method, "depositTo");
        assert_eq!(summaries[1].value, U256::from(20));
        assert_eq!(summaries[2].source_tx_hash, H256::repeat_byte(0x12));
    }

    #[test]
    fn test_undecodable_tx_is_skipped_and_scan_continues() {
        let mut broken = bridge_tx(0x20, "deposit", 7);
        broken.input = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]);

        let block = block_with(vec![broken.clone(), bridge_tx(0x21, "deposit", 8)]);
        let summaries = extractor().extract(&block);

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].source_tx_hash, H256::repeat_byte(0x21));

        let err = extractor().classify(&broken).unwrap().unwrap_err();
        assert!(matches!(err, RelayerError::Extraction { tx_hash, .. } if tx_hash == broken.hash));
    }

    #[test]
    fn test_unrelated_tx_is_not_classified() {
        let tx = Transaction {
            to: Some(Address::repeat_byte(0xbb)),
            ..Default::default()
        };
        assert!(extractor().classify(&tx).is_none());
        assert!(extractor().extract(&block_with(vec![])).is_empty());
    }
}
