//! Prometheus registry for the sync binary.
//!
//! The collectors live in `ehdb_core::metrics`; this module registers them
//! once and renders the text exposition format.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use prometheus::{Encoder, Registry, TextEncoder};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

fn register_metrics(registry: &Registry) {
    for metric in ehdb_core::metrics::all_metrics() {
        registry
            .register(metric)
            .expect("crawler metrics are registered once");
    }
}

/// Encode all metrics as Prometheus text format.
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}
