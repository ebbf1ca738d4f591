//! Head tracker: relays source-chain heads through a single-slot buffer

use super::{HeadStream, SourceBlock, SourceChain};
use crate::config::DispatchMode;
use crate::error::RelayerResult;

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Slots in the hand-off buffer between subscription and drain
pub const HEAD_BUFFER_CAPACITY: usize = 1;

/// Consumer of delivered heads
#[async_trait]
pub trait BlockHandler: Send + Sync {
    /// `None` is a head notification that carried no block.
    async fn handle_block(&self, block: Option<SourceBlock>);
}

/// Create a connected hand-off buffer
pub fn head_buffer() -> (HeadSender, HeadReceiver) {
    let (tx, rx) = mpsc::channel(HEAD_BUFFER_CAPACITY);
    (HeadSender { tx }, HeadReceiver { rx })
}

/// Producer side of the hand-off buffer
#[derive(Clone)]
pub struct HeadSender {
    tx: mpsc::Sender<Option<SourceBlock>>,
}

impl HeadSender {
    /// Non-blocking insert. When the buffer already holds an undelivered
    /// block the new one is dropped and `false` is returned.
    pub fn offer(&self, block: Option<SourceBlock>) -> bool {
        match self.tx.try_send(block) {
            Ok(()) => {
                crate::metrics::record_head_received();
                true
            }
            Err(TrySendError::Full(dropped)) => {
                debug!(
                    block_number = ?dropped.and_then(|b| b.number),
                    "Head buffer full, dropping notification"
                );
                crate::metrics::record_head_dropped();
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Head buffer closed, dropping notification");
                false
            }
        }
    }
}

/// Drain side of the hand-off buffer
pub struct HeadReceiver {
    rx: mpsc::Receiver<Option<SourceBlock>>,
}

impl HeadReceiver {
    /// Next buffered head; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<Option<SourceBlock>> {
        self.rx.recv().await
    }
}

/// Subscribes to source heads and dispatches them to a block handler
pub struct HeadTracker {
    source: Arc<dyn SourceChain>,
    handler: Arc<dyn BlockHandler>,
    dispatch: DispatchMode,
    cancellation: CancellationToken,
    subscribe: bool,
    sender: HeadSender,
    receiver: HeadReceiver,
}

impl HeadTracker {
    pub fn new(
        source: Arc<dyn SourceChain>,
        handler: Arc<dyn BlockHandler>,
        dispatch: DispatchMode,
        cancellation: CancellationToken,
    ) -> Self {
        let (sender, receiver) = head_buffer();
        Self {
            source,
            handler,
            dispatch,
            cancellation,
            subscribe: true,
            sender,
            receiver,
        }
    }

    /// Disable the live subscription; blocks then only arrive through
    /// [`HeadTracker::sender`] handles.
    pub fn with_subscription(mut self, subscribe: bool) -> Self {
        self.subscribe = subscribe;
        self
    }

    /// Extra producer handle into the hand-off buffer
    pub fn sender(&self) -> HeadSender {
        self.sender.clone()
    }

    /// Run until every producer is gone or the tracker is cancelled.
    ///
    /// Heads still in the buffer when the subscription ends are drained.
    pub async fn run(self) -> RelayerResult<()> {
        let HeadTracker {
            source,
            handler,
            dispatch,
            cancellation,
            subscribe,
            sender,
            receiver,
        } = self;

        let forwarder = if subscribe {
            let stream = source.subscribe_new_heads().await?;
            info!("Subscribed to source chain heads");
            Some(tokio::spawn(forward_heads(
                stream,
                sender,
                cancellation.clone(),
            )))
        } else {
            drop(sender);
            None
        };

        drain(receiver, handler, dispatch, cancellation).await;

        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }

        info!("Head tracker stopped");
        Ok(())
    }
}

async fn forward_heads(mut stream: HeadStream, sender: HeadSender, cancellation: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => break,
            next = stream.next() => match next {
                Some(block) => {
                    sender.offer(block);
                }
                None => {
                    info!("Source head subscription ended");
                    break;
                }
            },
        }
    }
}

async fn drain(
    mut receiver: HeadReceiver,
    handler: Arc<dyn BlockHandler>,
    dispatch: DispatchMode,
    cancellation: CancellationToken,
) {
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!("Block classification task failed: {}", e);
                }
            }
            next = receiver.recv() => match next {
                Some(block) => match dispatch {
                    DispatchMode::Unordered => {
                        let handler = handler.clone();
                        tasks.spawn(async move { handler.handle_block(block).await });
                    }
                    DispatchMode::Ordered => handler.handle_block(block).await,
                },
                None => break,
            },
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Block classification task failed: {}", e);
        }
    }
}
