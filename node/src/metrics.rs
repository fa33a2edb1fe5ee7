//! # Prometheus Metrics
//!
//! Operational metrics for the ledger node, scraped at `/metrics` on the
//! metrics port. Everything is registered in a dedicated
//! [`prometheus::Registry`] under the `meridian` prefix.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Metric handles shared by the API handlers and the block timer.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Directory height currently being built.
    pub directory_height: IntGauge,
    /// Number of entry chains known to the ledger.
    pub entry_chains: IntGauge,
    pub entries_submitted_total: IntCounter,
    pub credit_entries_total: IntCounter,
    /// Blocks sealed across all chains.
    pub blocks_sealed_total: IntCounter,
    /// Time to close and persist one directory height.
    pub close_latency_seconds: Histogram,
}

fn register_gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("metric creation");
    registry
        .register(Box::new(gauge.clone()))
        .expect("metric registration");
    gauge
}

fn register_counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric creation");
    registry
        .register(Box::new(counter.clone()))
        .expect("metric registration");
    counter
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("meridian".into()), None)
            .expect("failed to create prometheus registry");

        let directory_height = register_gauge(
            &registry,
            "directory_height",
            "Directory height currently being built",
        );
        let entry_chains = register_gauge(&registry, "entry_chains", "Number of entry chains");
        let entries_submitted_total = register_counter(
            &registry,
            "entries_submitted_total",
            "Entries accepted into entry blocks",
        );
        let credit_entries_total = register_counter(
            &registry,
            "credit_entries_total",
            "Credit entries accepted into credit blocks",
        );
        let blocks_sealed_total = register_counter(
            &registry,
            "blocks_sealed_total",
            "Blocks sealed across directory, credit and entry chains",
        );

        let close_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "close_latency_seconds",
                "Time to seal and persist one directory height",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(close_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            directory_height,
            entry_chains,
            entries_submitted_total,
            credit_entries_total,
            blocks_sealed_total,
            close_latency_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Renders `/metrics` in Prometheus text format.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_output_carries_prefix() {
        let metrics = NodeMetrics::new();
        metrics.directory_height.set(42);
        metrics.blocks_sealed_total.inc_by(3);
        metrics.close_latency_seconds.observe(0.002);

        let text = metrics.encode().unwrap();
        assert!(text.contains("meridian_directory_height 42"));
        assert!(text.contains("meridian_blocks_sealed_total 3"));
        assert!(text.contains("meridian_close_latency_seconds_count 1"));
    }
}
