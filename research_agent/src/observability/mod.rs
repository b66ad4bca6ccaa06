pub mod metrics;

use anyhow::Result;

/// Installs the Prometheus exporter on `metrics_addr` (§10, C12).
pub async fn init_observability(metrics_addr: &str) -> Result<()> {
  metrics::init_metrics(metrics_addr).await?;
  tracing::info!("observability initialized for research_agent");
  Ok(())
}

pub async fn shutdown_observability() {
  tracing::info!("shutting down observability");
}
