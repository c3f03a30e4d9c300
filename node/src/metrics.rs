//! # Prometheus Metrics
//!
//! Operational metrics for the ledger node, served at `/metrics` on the
//! metrics port. Everything lives in a dedicated [`prometheus::Registry`]
//! under the `blackbox` namespace.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Metric handles shared by the API handlers and the notification task.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Bank transfers accepted as pending.
    pub submissions_total: IntCounter,
    /// Submissions refused because the receipt was seen before.
    pub duplicate_receipts_total: IntCounter,
    pub approvals_total: IntCounter,
    pub rejections_total: IntCounter,
    /// Operations that failed to commit to storage.
    pub persistence_failures_total: IntCounter,
    /// Notifications handed to the dispatcher.
    pub notifications_total: IntCounter,
    /// Retained audit blocks.
    pub audit_chain_length: IntGauge,
    /// Reserve fund balance, smallest currency unit.
    pub reserve_balance: IntGauge,
    pub pending_transactions: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let metric = IntCounter::new(name, help)?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let metric = IntGauge::new(name, help)?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl NodeMetrics {
    /// Create and register every metric. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("blackbox".into()), None)?;

        Ok(Self {
            submissions_total: counter(
                &registry,
                "submissions_total",
                "Bank transfers accepted for verification",
            )?,
            duplicate_receipts_total: counter(
                &registry,
                "duplicate_receipts_total",
                "Submissions refused for reusing a receipt",
            )?,
            approvals_total: counter(&registry, "approvals_total", "Transactions settled")?,
            rejections_total: counter(&registry, "rejections_total", "Transactions rejected")?,
            persistence_failures_total: counter(
                &registry,
                "persistence_failures_total",
                "Ledger operations that failed to commit",
            )?,
            notifications_total: counter(
                &registry,
                "notifications_total",
                "Payer notifications dispatched",
            )?,
            audit_chain_length: gauge(
                &registry,
                "audit_chain_length",
                "Audit blocks currently retained",
            )?,
            reserve_balance: gauge(&registry, "reserve_balance", "Reserve fund balance")?,
            pending_transactions: gauge(
                &registry,
                "pending_transactions",
                "Transactions awaiting verification",
            )?,
            registry,
        })
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics handle for axum state.
pub type SharedMetrics = Arc<NodeMetrics>;

/// `GET /metrics`.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
