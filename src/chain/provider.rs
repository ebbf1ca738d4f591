//! Chain provider with multi-RPC support and automatic failover

use super::{ChainTag, DestinationChain, HeadStream, SourceBlock, SourceChain, TxPool};
use crate::config::{DestinationChainConfig, SourceChainConfig};
use crate::error::{RelayerError, RelayerResult};
use crate::tx::SignedTx;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, Ws};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256};
use futures::StreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Heads buffered between a WebSocket subscription and the head tracker
const HEAD_CHANNEL_SIZE: usize = 5;

/// Default pause between block-number polls
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Multi-provider wrapper with automatic failover
#[derive(Clone)]
pub struct ChainProvider {
    tag: ChainTag,
    chain_id: u64,
    /// HTTP providers (multiple for failover)
    http_providers: Arc<Vec<Provider<Http>>>,
    /// Current active provider index
    current_provider: Arc<AtomicUsize>,
    /// WebSocket provider (optional, for head subscriptions)
    ws_provider: Option<Provider<Ws>>,
    poll_interval: Duration,
}

impl ChainProvider {
    /// Connect to a chain over its configured endpoints
    pub async fn connect(
        tag: ChainTag,
        chain_id: u64,
        rpc_urls: &[String],
        ws_url: Option<&str>,
        poll_interval: Duration,
    ) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();

        for url in rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider.interval(Duration::from_millis(100)));
                    debug!("Added HTTP provider for chain {}: {}", tag, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::ChainConnection {
                chain: tag.to_string(),
                message: "No valid RPC providers".to_string(),
            });
        }

        let ws_provider = match ws_url.filter(|url| !url.is_empty()) {
            Some(ws_url) => match Provider::<Ws>::connect(ws_url).await {
                Ok(provider) => {
                    info!("WebSocket connected for chain {}", tag);
                    Some(provider)
                }
                Err(e) => {
                    warn!("WebSocket connection failed for chain {}: {}", tag, e);
                    None
                }
            },
            None => None,
        };

        let provider = Self {
            tag,
            chain_id,
            http_providers: Arc::new(http_providers),
            current_provider: Arc::new(AtomicUsize::new(0)),
            ws_provider,
            poll_interval,
        };
        provider.verify_chain_id().await?;

        Ok(provider)
    }

    /// Provider for the source chain
    pub async fn for_source(config: &SourceChainConfig) -> RelayerResult<Self> {
        Self::connect(
            ChainTag::new(config.tag.clone()),
            config.chain_id,
            &config.rpc_urls,
            config.ws_url.as_deref(),
            Duration::from_millis(config.head_poll_interval_ms),
        )
        .await
    }

    /// Provider for the destination chain
    pub async fn for_destination(config: &DestinationChainConfig) -> RelayerResult<Self> {
        Self::connect(
            ChainTag::new(config.tag.clone()),
            config.chain_id,
            &config.rpc_urls,
            None,
            DEFAULT_POLL_INTERVAL,
        )
        .await
    }

    pub fn tag(&self) -> &ChainTag {
        &self.tag
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.tag, next);
    }

    /// Run a read against each provider in turn until one answers
    async fn with_failover<T, F, Fut>(&self, operation: &str, call: F) -> RelayerResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        for _ in 0..self.http_providers.len() {
            match call(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("Failed to {} on chain {}: {}", operation, self.tag, e);
                    self.failover();
                }
            }
        }

        Err(RelayerError::ChainConnection {
            chain: self.tag.to_string(),
            message: format!("All providers failed to {}", operation),
        })
    }

    async fn verify_chain_id(&self) -> RelayerResult<()> {
        match self.http().get_chainid().await {
            Ok(id) if id.as_u64() != self.chain_id => Err(RelayerError::Config(format!(
                "Chain {} reports chain id {}, expected {}",
                self.tag, id, self.chain_id
            ))),
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("Could not verify chain id for {}: {}", self.tag, e);
                Ok(())
            }
        }
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> RelayerResult<u64> {
        let number = self
            .with_failover("get block number", |p| async move { p.get_block_number().await })
            .await?;
        Ok(number.as_u64())
    }

    /// Full block with transactions; `None` when the node has no such block
    pub async fn get_block_with_txs(&self, number: u64) -> RelayerResult<Option<SourceBlock>> {
        self.with_failover("get block", |p| async move { p.get_block_with_txs(number).await })
            .await
    }

    /// Account nonce at the latest block
    pub async fn get_transaction_count(&self, address: Address) -> RelayerResult<u64> {
        let count = self
            .with_failover("get transaction count", |p| async move {
                p.get_transaction_count(address, None).await
            })
            .await?;
        Ok(count.as_u64())
    }

    /// `eth_call` against the latest block
    pub async fn call(&self, to: Address, data: Bytes) -> RelayerResult<Bytes> {
        self.with_failover("call contract", |p| {
            let tx: TypedTransaction = TransactionRequest::new().to(to).data(data.clone()).into();
            async move { p.call(&tx, None).await }
        })
        .await
    }

    /// Broadcast a signed transaction. Errors are treated as a rejection and
    /// not re-sent to another provider.
    pub async fn send_raw(&self, raw: Bytes) -> RelayerResult<H256> {
        let pending = self.http().send_raw_transaction(raw).await.map_err(|e| {
            RelayerError::PoolRejection {
                pool: format!("{} tx pool", self.tag),
                message: e.to_string(),
            }
        })?;
        Ok(pending.tx_hash())
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.tag, e);
                false
            }
        }
    }

    fn state_read(&self, e: RelayerError) -> RelayerError {
        RelayerError::StateRead {
            chain: self.tag.to_string(),
            message: e.to_string(),
        }
    }

    /// Heads from a `newHeads` subscription, resolved to full blocks
    fn ws_heads(&self, ws: Provider<Ws>) -> HeadStream {
        let (tx, rx) = mpsc::channel(HEAD_CHANNEL_SIZE);
        let tag = self.tag.clone();

        tokio::spawn(async move {
            let mut heads = match ws.subscribe_blocks().await {
                Ok(heads) => heads,
                Err(e) => {
                    error!("Failed to subscribe to heads on {}: {}", tag, e);
                    return;
                }
            };

            while let Some(head) = heads.next().await {
                let block = match head.hash {
                    Some(hash) => match ws.get_block_with_txs(hash).await {
                        Ok(block) => block,
                        Err(e) => {
                            warn!(block_hash = ?hash, "Failed to fetch head block on {}: {}", tag, e);
                            None
                        }
                    },
                    None => None,
                };

                if tx.send(block).await.is_err() {
                    break;
                }
            }

            info!("Head subscription on {} closed", tag);
        });

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|block| (block, rx))
        })
        .boxed()
    }

    /// Heads discovered by polling the block number
    fn polling_heads(&self) -> HeadStream {
        futures::stream::unfold((self.clone(), None::<u64>), |(provider, next)| async move {
            loop {
                match provider.get_block_number().await {
                    Ok(head) => {
                        let number = next.unwrap_or(head);
                        if number <= head {
                            let block = provider
                                .get_block_with_txs(number)
                                .await
                                .unwrap_or_else(|e| {
                                    warn!(number, "Failed to fetch block: {}", e);
                                    None
                                });
                            return Some((block, (provider, Some(number + 1))));
                        }
                    }
                    Err(e) => warn!("Head poll failed: {}", e),
                }
                tokio::time::sleep(provider.poll_interval).await;
            }
        })
        .boxed()
    }
}

#[async_trait]
impl SourceChain for ChainProvider {
    async fn get_account_nonce(&self, address: Address) -> RelayerResult<u64> {
        self.get_transaction_count(address)
            .await
            .map_err(|e| self.state_read(e))
    }

    async fn subscribe_new_heads(&self) -> RelayerResult<HeadStream> {
        match &self.ws_provider {
            Some(ws) => {
                info!("Using WebSocket heads for chain {}", self.tag);
                Ok(self.ws_heads(ws.clone()))
            }
            None => {
                info!("Using HTTP polling for chain {}", self.tag);
                Ok(self.polling_heads())
            }
        }
    }
}

#[async_trait]
impl DestinationChain for ChainProvider {
    async fn get_account_nonce(&self, address: Address) -> RelayerResult<u64> {
        self.get_transaction_count(address)
            .await
            .map_err(|e| self.state_read(e))
    }

    async fn call_view(&self, contract: Address, data: Bytes) -> RelayerResult<Bytes> {
        self.call(contract, data).await.map_err(|e| self.state_read(e))
    }
}

#[async_trait]
impl TxPool for ChainProvider {
    async fn submit(&self, tx: SignedTx) -> RelayerResult<H256> {
        let hash = self.send_raw(tx.raw).await?;
        debug!(kind = %tx.kind, tx_hash = ?hash, nonce = tx.nonce, "Broadcast transaction to {}", self.tag);
        Ok(hash)
    }
}
