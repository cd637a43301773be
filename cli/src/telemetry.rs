// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anyhow::{Context, Result};
use echo_core::domain::node_config::{LoggingConfig, MetricsConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Initialize tracing subscriber for logging
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&logging.level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}

/// Serve Prometheus metrics on the configured address
pub fn init_metrics(metrics: &MetricsConfig) -> Result<()> {
    let addr: SocketAddr = metrics
        .bind_address
        .parse()
        .with_context(|| format!("Invalid metrics bind address {}", metrics.bind_address))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(bind = %addr, "Metrics exporter listening");
    Ok(())
}
