//! Bridge Relayer - cross-chain bridge relay
//!
//! Watches a source chain for transactions to the bridge contract, hands the
//! resulting cross-chain events to the destination chain's event pool, and
//! settles amounts pending release with a source-chain release plus a
//! destination-chain debit.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

mod api;
mod chain;
mod config;
mod contract;
mod coordination;
mod error;
mod events;
mod metrics;
mod state;
mod tx;

use chain::{ChainProvider, ChainTag, HeadTracker, InternalChainAdapter, TriggerSource};
use config::Settings;
use contract::{BridgeAbi, SourceBridgeContract, BRIDGE_MASTER_ABI, SOURCE_BRIDGE_ABI};
use coordination::SettlementEngine;
use events::{BlockClassifier, EventAssembler, EventExtractor, TxMetadata, TxSummary};
use metrics::MetricsServer;
use state::{MemoryState, RelayStore, StateManager};
use tx::{DebitBuilder, ReleaseBuilder, TxSigner};

/// How long background tasks get to finish after shutdown is requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting Bridge Relayer v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    let run_id = Uuid::new_v4();
    info!(
        %run_id,
        instance = %settings.relayer.instance_id,
        source = %settings.source.tag,
        destination = %settings.destination.tag,
        "Loaded configuration"
    );

    match settings.database.clone() {
        Some(database) => {
            let state_manager = Arc::new(StateManager::new(&database, run_id).await?);
            info!("Database connection established");
            state_manager.run_migrations().await?;
            run(settings, state_manager, run_id).await
        }
        None => {
            warn!("No database configured, relay state is kept in memory");
            run(settings, Arc::new(MemoryState::new()), run_id).await
        }
    }
}

/// Metadata source used when settlement is disabled
struct NoMetadata;

#[async_trait]
impl InternalChainAdapter for NoMetadata {
    async fn compute_tx_metadata(&self, _summary: &TxSummary) -> Option<TxMetadata> {
        None
    }
}

async fn run<S: RelayStore + 'static>(settings: Settings, store: Arc<S>, run_id: Uuid) -> Result<()> {
    let cancellation = CancellationToken::new();
    let source_tag = ChainTag::new(settings.source.tag.clone());

    // Chain connections
    let source = Arc::new(ChainProvider::for_source(&settings.source).await?);
    let destination = Arc::new(ChainProvider::for_destination(&settings.destination).await?);
    info!("Chain connections initialized");

    // Source bridge contract
    let source_abi = BridgeAbi::load(
        settings.contracts.source_abi_path.as_deref(),
        SOURCE_BRIDGE_ABI,
    )?;
    let release_signer = settings
        .source
        .signer_key_env
        .as_deref()
        .map(|var| TxSigner::from_env(var, settings.source.chain_id, &settings.source.gas))
        .transpose()?;
    let contract = Arc::new(SourceBridgeContract::new(
        source_abi,
        settings.settlement.release_method.clone(),
        release_signer,
    ));
    if let Some(signer) = contract.signer_address() {
        if signer != settings.source.sign_account {
            warn!(
                signer = ?signer,
                sign_account = ?settings.source.sign_account,
                "Release signing key does not control the configured signing account"
            );
        }
    }

    // Settlement engine
    let engine = if settings.settlement.enabled {
        let release = ReleaseBuilder::new(
            source.clone(),
            contract.clone(),
            settings.source.sign_account,
            settings.source.bridge_address,
            settings.source.release_recipient,
        );

        let master_abi = BridgeAbi::load(
            settings.contracts.master_abi_path.as_deref(),
            BRIDGE_MASTER_ABI,
        )?;
        let debit_key = settings
            .destination
            .signer_key_env
            .as_deref()
            .context("Settlement enabled without destination.signer_key_env")?;
        let debit_signer = TxSigner::from_env(
            debit_key,
            settings.destination.chain_id,
            &settings.destination.gas,
        )?;
        let debit = DebitBuilder::new(
            master_abi,
            settings.destination.master_contract,
            settings.settlement.debit_method.clone(),
            debit_signer,
        );

        info!("Settlement engine initialized");
        Some(Arc::new(SettlementEngine::new(
            settings.settlement.clone(),
            source_tag.clone(),
            release,
            debit,
            destination.clone(),
            source.clone(),
            destination.clone(),
            store.clone(),
        )))
    } else {
        info!("Settlement disabled");
        None
    };

    // Classification pipeline
    let adapter: Arc<dyn InternalChainAdapter> = match &engine {
        Some(engine) => engine.clone(),
        None => Arc::new(NoMetadata),
    };
    let extractor = EventExtractor::new(settings.source.bridge_address, contract.clone());
    let assembler = EventAssembler::new(
        source_tag.clone(),
        settings.destination.bridge_state_address,
        destination.clone(),
        adapter,
        store.clone(),
    );
    let mut classifier = BlockClassifier::new(extractor, assembler, store.clone());
    if settings.settlement.release_on_event {
        match &engine {
            Some(engine) => classifier = classifier.with_release_trigger(engine.clone()),
            None => warn!("release_on_event is set but settlement is disabled, ignoring"),
        }
    }

    // Head tracker and optional synthetic trigger
    let tracker = HeadTracker::new(
        source.clone(),
        Arc::new(classifier),
        settings.relayer.dispatch,
        cancellation.clone(),
    )
    .with_subscription(settings.source.subscribe);

    let trigger = settings.trigger.clone().map(|config| {
        TriggerSource::new(
            config,
            settings.source.bridge_address,
            contract.clone(),
            tracker.sender(),
            cancellation.clone(),
        )
    });

    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    workers.push(tokio::spawn(async move {
        if let Err(e) = tracker.run().await {
            error!("Head tracker error: {}", e);
        }
    }));

    if let Some(trigger) = trigger {
        workers.push(tokio::spawn(async move {
            if let Err(e) = trigger.run().await {
                error!("Trigger source error: {}", e);
            }
        }));
    }

    if let Some(engine) = engine.clone() {
        let token = cancellation.clone();
        workers.push(tokio::spawn(async move {
            if let Err(e) = engine.run(token).await {
                error!("Settlement engine error: {}", e);
            }
        }));
    }

    // Start API server
    let api_handle = tokio::spawn({
        let state = api::AppState {
            store: store.clone(),
            source: (*source).clone(),
            destination: (*destination).clone(),
            run_id,
            started_at: Instant::now(),
        };
        let config = settings.api.clone();
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let source = source.clone();
        let destination = destination.clone();
        let store = store.clone();
        let token = cancellation.clone();
        let interval = Duration::from_secs(settings.relayer.health_check_interval_secs);
        async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let mut healthy = source.health_check().await;
                healthy &= destination.health_check().await;

                if let Err(e) = store.health_check().await {
                    warn!("Store health check failed: {}", e);
                    healthy = false;
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("Bridge Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");
    cancellation.cancel();

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(workers)).await;
    if drained.is_err() {
        warn!("Workers did not stop within {:?}", SHUTDOWN_GRACE);
    }

    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Bridge Relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,bridge_relayer=debug,sqlx=warn,hyper=warn")
    });

    let json = std::env::var("RELAY_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
