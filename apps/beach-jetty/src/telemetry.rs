use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the tracing subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .context("failed to initialise tracing subscriber")
}

/// Install the Prometheus recorder behind the `metrics` macros. A scrape
/// listener is only started when an address is configured; otherwise the
/// recorder just aggregates in memory.
///
/// Must be called from within the tokio runtime.
pub fn init_metrics(listen: Option<SocketAddr>) -> Result<()> {
    match listen {
        Some(addr) => {
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .context("failed to install Prometheus exporter")?;
            info!(metrics_addr = %addr, "prometheus exporter listening");
        }
        None => {
            PrometheusBuilder::new()
                .install_recorder()
                .context("failed to install Prometheus metrics recorder")?;
        }
    }
    Ok(())
}
