//! Key loading and legacy transaction signing

use crate::config::GasConfig;
use crate::error::{RelayerError, RelayerResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use tracing::info;

const GWEI: u64 = 1_000_000_000;

/// Signs contract calls for one chain with a single local key
#[derive(Debug, Clone)]
pub struct TxSigner {
    wallet: LocalWallet,
    chain_id: u64,
    gas_limit: U256,
    gas_price: U256,
}

impl TxSigner {
    /// Load the signing key from the named environment variable
    pub fn from_env(var: &str, chain_id: u64, gas: &GasConfig) -> RelayerResult<Self> {
        let key = std::env::var(var).map_err(|_| {
            RelayerError::Wallet(format!("Signing key variable {} is not set", var))
        })?;
        let signer = Self::from_key(&key, chain_id, gas)?;
        info!(
            chain_id,
            address = ?signer.address(),
            "Loaded signing key from {}", var
        );
        Ok(signer)
    }

    /// Build a signer from a hex private key
    pub fn from_key(key: &str, chain_id: u64, gas: &GasConfig) -> RelayerResult<Self> {
        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|e| RelayerError::Wallet(format!("Invalid private key: {}", e)))?
            .with_chain_id(chain_id);

        Ok(Self {
            wallet,
            chain_id,
            gas_limit: U256::from(gas.gas_limit),
            gas_price: U256::from(gas.gas_price_gwei) * U256::from(GWEI),
        })
    }

    /// Address of the signing key
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Sign a legacy call; returns the transaction hash and raw encoding
    pub fn sign_call(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
        nonce: u64,
    ) -> RelayerResult<(H256, Bytes)> {
        let request = TransactionRequest::new()
            .from(self.wallet.address())
            .to(to)
            .data(data)
            .value(value)
            .nonce(nonce)
            .gas(self.gas_limit)
            .gas_price(self.gas_price)
            .chain_id(self.chain_id);
        let tx = TypedTransaction::Legacy(request);

        let signature = self
            .wallet
            .sign_transaction_sync(&tx)
            .map_err(|e| RelayerError::Wallet(e.to_string()))?;

        Ok((tx.hash(&signature), tx.rlp_signed(&signature)))
    }
}
