//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection status
//! - Submissions per channel and transaction kind
//! - Sink rejections and cancellations
//! - Private relay backlog seen during nonce resolution

use crate::error::{SubmitterError, SubmitterResult};
use crate::types::{SubmissionChannel, TransactionKind};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "swap_submitter_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "swap_submitter_transactions_submitted_total",
        "Transactions accepted by the submission sink",
        &["chain_id", "kind", "channel"]
    ).unwrap();

    pub static ref TX_REJECTED: CounterVec = register_counter_vec!(
        "swap_submitter_transactions_rejected_total",
        "Transactions refused by the submission sink",
        &["chain_id", "kind"]
    ).unwrap();

    pub static ref TX_FINALIZED: CounterVec = register_counter_vec!(
        "swap_submitter_transactions_finalized_total",
        "Transactions confirmed on chain",
        &["chain_id", "kind"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "swap_submitter_transactions_failed_total",
        "Transactions reverted on chain",
        &["chain_id", "kind"]
    ).unwrap();

    pub static ref CANCELLATIONS: CounterVec = register_counter_vec!(
        "swap_submitter_cancellations_total",
        "Cancellation transactions sent",
        &["chain_id"]
    ).unwrap();

    // Nonce metrics
    pub static ref PRIVATE_IN_FLIGHT: GaugeVec = register_gauge_vec!(
        "swap_submitter_private_in_flight",
        "Private relay transactions counted during the last nonce resolution",
        &["chain_id"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "swap_submitter_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "swap_submitter_health_check_failure_total",
        "Total failed health checks",
        &[]
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

    pub async fn run(&self) -> SubmitterResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| SubmitterError::Internal(format!("metrics bind {addr}: {e}")))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| SubmitterError::Internal(format!("metrics server: {e}")))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_tx_submitted(chain_id: u64, kind: TransactionKind, channel: SubmissionChannel) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string(), kind.as_str(), channel.as_str()])
        .inc();
}

pub fn record_sink_rejection(chain_id: u64, kind: TransactionKind) {
    TX_REJECTED
        .with_label_values(&[&chain_id.to_string(), kind.as_str()])
        .inc();
}

pub fn record_tx_finalized(chain_id: u64, kind: TransactionKind) {
    TX_FINALIZED
        .with_label_values(&[&chain_id.to_string(), kind.as_str()])
        .inc();
}

pub fn record_tx_failed(chain_id: u64, kind: TransactionKind) {
    TX_FAILED
        .with_label_values(&[&chain_id.to_string(), kind.as_str()])
        .inc();
}

pub fn record_cancellation(chain_id: u64) {
    CANCELLATIONS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_private_in_flight(chain_id: u64, count: u64) {
    PRIVATE_IN_FLIGHT
        .with_label_values(&[&chain_id.to_string()])
        .set(count as f64);
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}
