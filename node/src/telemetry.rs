// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() {
    // 1. Initialize Tracing (Logs)
    let logs = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tlytics_node=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
    if logs.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }

    // 2. Initialize Metrics (Prometheus)
    if PROM_HANDLE.get().is_some() {
        tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = PROM_HANDLE.set(handle);
        }
        Err(e) => {
            tracing::error!("Failed to install Prometheus recorder: {}", e);
            return;
        }
    }

    metrics::describe_counter!("tlytics_events_emitted_total", "Events accepted into an ingestion buffer");
    metrics::describe_counter!("tlytics_events_flushed_total", "Events committed to a sink");
    metrics::describe_counter!("tlytics_flush_failures_total", "Failed sink commit attempts");
    metrics::describe_counter!("tlytics_events_dropped_total", "Events lost after exhausting delivery");
    metrics::describe_counter!("tlytics_events_spilled_total", "Events written to the spill file");
    metrics::describe_histogram!("tlytics_flush_duration_seconds", "Time taken to commit a batch");
    metrics::describe_gauge!("tlytics_buffer_depth", "Events waiting in the ingestion buffer");

    // Ensure at least one metric exists on startup
    metrics::gauge!("tlytics_node_up", 1.0);
}

/// Get the Prometheus handle to render metrics
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}
