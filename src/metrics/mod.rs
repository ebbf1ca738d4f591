//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Source head delivery and backpressure
//! - Extraction and event-pool handoff
//! - Settlement polls and leg submissions

use crate::chain::ChainTag;
use crate::coordination::Leg;
use crate::error::{RelayerError, RelayerResult};

use axum::{http::StatusCode, routing::get, Router};
use ethers::types::U256;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_int_counter, CounterVec, Encoder, Gauge,
    IntCounter, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Head tracker metrics
    pub static ref HEADS_RECEIVED: IntCounter = register_int_counter!(
        "bridge_relay_heads_received_total",
        "Head notifications accepted into the hand-off buffer"
    ).unwrap();

    pub static ref HEADS_DROPPED: IntCounter = register_int_counter!(
        "bridge_relay_heads_dropped_total",
        "Head notifications dropped because the buffer was full"
    ).unwrap();

    pub static ref NIL_BLOCKS: IntCounter = register_int_counter!(
        "bridge_relay_nil_blocks_total",
        "Head notifications that carried no block"
    ).unwrap();

    pub static ref SOURCE_HEAD: Gauge = register_gauge!(
        "bridge_relay_source_head",
        "Number of the last classified source block"
    ).unwrap();

    // Event metrics
    pub static ref EXTRACTION_FAILURES: IntCounter = register_int_counter!(
        "bridge_relay_extraction_failures_total",
        "Bridge transactions skipped because their input did not decode"
    ).unwrap();

    pub static ref EVENTS: CounterVec = register_counter_vec!(
        "bridge_relay_events_total",
        "Cross-chain events by handoff result",
        &["source_chain", "result"]
    ).unwrap();

    // Settlement metrics
    pub static ref SETTLEMENT_POLLS: CounterVec = register_counter_vec!(
        "bridge_relay_settlement_polls_total",
        "Settlement poll cycles by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref LEG_SUBMISSIONS: CounterVec = register_counter_vec!(
        "bridge_relay_leg_submissions_total",
        "Settlement transaction submissions by leg and result",
        &["leg", "result"]
    ).unwrap();

    pub static ref PENDING_AMOUNT: Gauge = register_gauge!(
        "bridge_relay_pending_amount",
        "Last amount read as pending release"
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: IntCounter = register_int_counter!(
        "bridge_relay_health_check_success_total",
        "Total successful health checks"
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: IntCounter = register_int_counter!(
        "bridge_relay_health_check_failure_total",
        "Total failed health checks"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Internal(format!("Metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("Metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

// Helper functions to record metrics

pub fn record_head_received() {
    HEADS_RECEIVED.inc();
}

pub fn record_head_dropped() {
    HEADS_DROPPED.inc();
}

pub fn record_nil_block() {
    NIL_BLOCKS.inc();
}

pub fn record_source_head(block_number: u64) {
    SOURCE_HEAD.set(block_number as f64);
}

pub fn record_extraction_failure() {
    EXTRACTION_FAILURES.inc();
}

pub fn record_event_queued(source_chain: &ChainTag) {
    EVENTS
        .with_label_values(&[source_chain.as_str(), "queued"])
        .inc();
}

pub fn record_event_rejected(source_chain: &ChainTag) {
    EVENTS
        .with_label_values(&[source_chain.as_str(), "rejected"])
        .inc();
}

pub fn record_duplicate_delivery(source_chain: &ChainTag) {
    EVENTS
        .with_label_values(&[source_chain.as_str(), "duplicate"])
        .inc();
}

pub fn record_settlement_poll(outcome: &str) {
    SETTLEMENT_POLLS.with_label_values(&[outcome]).inc();
}

pub fn record_leg_submission(leg: Leg, submitted: bool) {
    let result = if submitted { "submitted" } else { "failed" };
    LEG_SUBMISSIONS
        .with_label_values(&[leg.as_str(), result])
        .inc();
}

pub fn record_pending_amount(amount: U256) {
    PENDING_AMOUNT.set(gauge_value(amount));
}

/// Gauges are f64; amounts beyond u128 saturate.
fn gauge_value(amount: U256) -> f64 {
    if amount > U256::from(u128::MAX) {
        f64::MAX
    } else {
        amount.as_u128() as f64
    }
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.inc();
}
