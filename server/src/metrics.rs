//! # Prometheus Metrics
//!
//! Exposes operational metrics for the marketplace server. Scraped by
//! Prometheus at the `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the server.
///
/// Clone-friendly (prometheus handles are `Arc`s internally) so it can be
/// shared across request handlers.
#[derive(Clone)]
pub struct MarketMetrics {
    registry: Registry,
    /// Transactions opened by buyers.
    pub transactions_initiated_total: IntCounter,
    /// Lifecycle transitions committed, by event name.
    pub transitions_applied_total: IntCounterVec,
    /// Requests the engine refused, by outcome code.
    pub transitions_rejected_total: IntCounterVec,
    /// Ratings recorded.
    pub ratings_recorded_total: IntCounter,
    /// Currently open WebSocket subscribers.
    pub ws_connections: IntGauge,
    /// Handler latency in seconds, by operation.
    pub request_latency_seconds: HistogramVec,
}

impl MarketMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("wardrobe".into()), None)
            .expect("failed to create prometheus registry");

        let transactions_initiated_total = IntCounter::new(
            "transactions_initiated_total",
            "Total number of transactions initiated",
        )
        .expect("metric creation");
        registry
            .register(Box::new(transactions_initiated_total.clone()))
            .expect("metric registration");

        let transitions_applied_total = IntCounterVec::new(
            Opts::new(
                "transitions_applied_total",
                "Total number of lifecycle transitions committed",
            ),
            &["event"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(transitions_applied_total.clone()))
            .expect("metric registration");

        let transitions_rejected_total = IntCounterVec::new(
            Opts::new(
                "transitions_rejected_total",
                "Total number of engine requests rejected, by outcome code",
            ),
            &["code"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(transitions_rejected_total.clone()))
            .expect("metric registration");

        let ratings_recorded_total =
            IntCounter::new("ratings_recorded_total", "Total number of ratings recorded")
                .expect("metric creation");
        registry
            .register(Box::new(ratings_recorded_total.clone()))
            .expect("metric registration");

        let ws_connections = IntGauge::new("ws_connections", "Open WebSocket event subscribers")
            .expect("metric creation");
        registry
            .register(Box::new(ws_connections.clone()))
            .expect("metric registration");

        let request_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "request_latency_seconds",
                "API handler latency in seconds, by operation",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["operation"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(request_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            transactions_initiated_total,
            transitions_applied_total,
            transitions_rejected_total,
            ratings_recorded_total,
            ws_connections,
            request_latency_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for MarketMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<MarketMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
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
