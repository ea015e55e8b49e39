//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Node connection status and reconnects
//! - Nonce sequencing
//! - Transaction submission and receipt waits

use crate::error::{GatewayError, GatewayResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Node metrics
    pub static ref NODE_CONNECTED: Gauge = register_gauge!(
        "gateway_node_connected",
        "Node connection status (1=connected, 0=disconnected)"
    ).unwrap();

    pub static ref NODE_RECONNECTS: Counter = register_counter!(
        "gateway_node_reconnect_attempts_total",
        "Total reconnect attempts"
    ).unwrap();

    // Nonce metrics
    pub static ref NEXT_NONCE: Gauge = register_gauge!(
        "gateway_next_nonce",
        "Next nonce the sequencer will hand out"
    ).unwrap();

    pub static ref NONCE_CONFLICTS: Counter = register_counter!(
        "gateway_nonce_conflicts_total",
        "Total submissions rejected with a nonce conflict"
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: Counter = register_counter!(
        "gateway_transactions_submitted_total",
        "Total transactions accepted by the node"
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "gateway_transactions_failed_total",
        "Total transactions failed by error kind",
        &["kind"]
    ).unwrap();

    pub static ref RECEIPT_WAIT: HistogramVec = register_histogram_vec!(
        "gateway_receipt_wait_seconds",
        "Time spent polling for receipts",
        &["outcome"],
        vec![1.0, 4.0, 8.0, 16.0, 24.0, 32.0, 40.0, 60.0]
    ).unwrap();

    // Wallet metrics
    pub static ref WALLET_BALANCE: Gauge = register_gauge!(
        "gateway_wallet_balance_eth",
        "Gateway account balance in ETH"
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: Counter = register_counter!(
        "gateway_health_check_success_total",
        "Total successful health checks"
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: Counter = register_counter!(
        "gateway_health_check_failure_total",
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

    pub async fn run(&self) -> GatewayResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| GatewayError::Config(format!("cannot bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))
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

pub fn record_node_health(healthy: bool) {
    NODE_CONNECTED.set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_reconnect_attempt() {
    NODE_RECONNECTS.inc();
}

pub fn record_nonce(next: u64) {
    NEXT_NONCE.set(next as f64);
}

pub fn record_nonce_conflict() {
    NONCE_CONFLICTS.inc();
}

pub fn record_tx_submitted() {
    TX_SUBMITTED.inc();
}

pub fn record_tx_failed(kind: &str) {
    TX_FAILED.with_label_values(&[kind]).inc();
}

pub fn record_receipt_wait(secs: f64, found: bool) {
    RECEIPT_WAIT
        .with_label_values(&[if found { "mined" } else { "not_mined" }])
        .observe(secs);
}

pub fn record_wallet_balance(balance_eth: f64) {
    WALLET_BALANCE.set(balance_eth);
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.inc();
}
