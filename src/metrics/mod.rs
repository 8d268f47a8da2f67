//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Estimation requests and discarded results
//! - Step executions
//! - Destination credit latency
//! - Wallet health

use crate::error::{BridgeError, BridgeResult};
use crate::registry::ChainKind;
use crate::step::{ExecutionStatus, StepKind};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, Encoder,
    HistogramVec, IntGauge, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Estimation metrics
    pub static ref ESTIMATES_STARTED: CounterVec = register_counter_vec!(
        "bridge_estimates_started_total",
        "Total estimate requests started",
        &["step_kind"]
    ).unwrap();

    pub static ref ESTIMATES_DISCARDED: CounterVec = register_counter_vec!(
        "bridge_estimates_discarded_total",
        "Estimates discarded because the input changed",
        &["step_kind"]
    ).unwrap();

    pub static ref ESTIMATES_FAILED: CounterVec = register_counter_vec!(
        "bridge_estimates_failed_total",
        "Estimates that failed",
        &["step_kind"]
    ).unwrap();

    // Execution metrics
    pub static ref EXECUTIONS: CounterVec = register_counter_vec!(
        "bridge_executions_total",
        "Step executions by outcome",
        &["step_kind", "status"]
    ).unwrap();

    pub static ref CREDIT_WAIT: HistogramVec = register_histogram_vec!(
        "bridge_destination_credit_wait_seconds",
        "Time spent waiting for the destination balance to be credited",
        &["chain"],
        vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0]
    ).unwrap();

    pub static ref ACTIVE_STEP: IntGauge = register_int_gauge!(
        "bridge_active_step_index",
        "Index of the step currently activated (-1 when idle)"
    ).unwrap();

    // Wallet metrics
    pub static ref BALANCE_REFRESH_FAILURES: CounterVec = register_counter_vec!(
        "bridge_balance_refresh_failures_total",
        "Balance refreshes that failed and were ignored",
        &["chain"]
    ).unwrap();

    pub static ref NETWORK_MISMATCHES: CounterVec = register_counter_vec!(
        "bridge_network_mismatches_total",
        "Wallets connected to a different network than selected",
        &["chain"]
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

    pub async fn run(&self) -> BridgeResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| BridgeError::Config(format!("Cannot bind metrics port {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| BridgeError::Internal(format!("Metrics server failed: {}", e)))
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

pub fn record_estimate_started(kind: StepKind) {
    ESTIMATES_STARTED.with_label_values(&[kind.label()]).inc();
}

pub fn record_estimate_discarded(kind: StepKind) {
    ESTIMATES_DISCARDED.with_label_values(&[kind.label()]).inc();
}

pub fn record_estimate_failed(kind: StepKind) {
    ESTIMATES_FAILED.with_label_values(&[kind.label()]).inc();
}

pub fn record_execution(kind: StepKind, status: ExecutionStatus) {
    EXECUTIONS
        .with_label_values(&[kind.label(), status.as_str()])
        .inc();
}

pub fn observe_credit_wait(chain: ChainKind, seconds: f64) {
    CREDIT_WAIT
        .with_label_values(&[&chain.to_string()])
        .observe(seconds);
}

pub fn set_active_step(index: Option<usize>) {
    ACTIVE_STEP.set(index.map_or(-1, |i| i as i64));
}

pub fn record_refresh_failure(chain: ChainKind) {
    BALANCE_REFRESH_FAILURES
        .with_label_values(&[&chain.to_string()])
        .inc();
}

pub fn record_network_mismatch(chain: ChainKind) {
    NETWORK_MISMATCHES
        .with_label_values(&[&chain.to_string()])
        .inc();
}
