use anyhow::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;
use tracing::info;

/// Installs the Prometheus recorder and pre-registers every metric this
/// crate emits, so a scrape before the first event still sees the full
/// metric set at zero (§10).
pub async fn init_metrics(bind_addr: &str) -> Result<()> {
  let builder = PrometheusBuilder::new();
  register_metrics();

  builder.with_http_listener(bind_addr.parse::<std::net::SocketAddr>()?).install()?;

  info!("prometheus metrics server started on {}", bind_addr);
  Ok(())
}

fn register_metrics() {
  counter!("research_stage_completed_total", "stage" => "analyze").absolute(0);
  histogram!("research_stage_duration_seconds", "stage" => "analyze").record(0.0);

  counter!("research_fetch_attempts_total", "status" => "success").absolute(0);
  counter!("research_fetch_attempts_total", "status" => "failed").absolute(0);
  histogram!("research_fetch_duration_seconds").record(0.0);

  counter!("research_llm_requests_total", "operation" => "generate", "status" => "success").absolute(0);
  counter!("research_llm_retries_total", "operation" => "generate_structured").absolute(0);
  histogram!("research_llm_request_duration_seconds", "operation" => "generate").record(0.0);

  histogram!("research_rag_merge_size").record(0.0);
  counter!("research_chat_turns_total", "mode" => "unary").absolute(0);

  counter!("research_tasks_total", "status" => "completed").absolute(0);
  counter!("research_db_operations_total", "operation" => "insert", "table" => "research_results").absolute(0);
  gauge!("research_db_connections_active").set(0.0);

  counter!("research_health_checks_total", "status" => "healthy").absolute(0);
  histogram!("research_health_check_duration_seconds").record(0.0);

  info!("metrics registered");
}

/// Metrics emitted at each pipeline stage boundary (C5).
pub struct StageMetrics;

impl StageMetrics {
  pub fn completed(stage: &str, duration: Duration) {
    counter!("research_stage_completed_total", "stage" => stage.to_string()).increment(1);
    histogram!("research_stage_duration_seconds", "stage" => stage.to_string()).record(duration.as_secs_f64());
  }
}

/// Metrics emitted by the fetcher (C2).
pub struct FetchMetrics;

impl FetchMetrics {
  pub fn attempt(success: bool, duration: Duration) {
    let status = if success { "success" } else { "failed" };
    counter!("research_fetch_attempts_total", "status" => status).increment(1);
    histogram!("research_fetch_duration_seconds").record(duration.as_secs_f64());
  }
}

/// Metrics emitted by the RAG retriever (C8) and chat responder (C9).
pub struct RetrievalMetrics;

impl RetrievalMetrics {
  pub fn merge_size(count: usize) {
    histogram!("research_rag_merge_size").record(count as f64);
  }

  pub fn chat_turn(mode: &str) {
    counter!("research_chat_turns_total", "mode" => mode.to_string()).increment(1);
  }
}

/// Task lifecycle and database metrics.
pub struct PersistenceMetrics;

impl PersistenceMetrics {
  pub fn task_status(status: &str) {
    counter!("research_tasks_total", "status" => status.to_string()).increment(1);
  }

  pub fn operation_completed(operation: &str, table: &str, duration: Duration) {
    counter!("research_db_operations_total", "operation" => operation.to_string(), "table" => table.to_string())
      .increment(1);
    let _ = duration;
  }

  pub fn set_active_connections(count: usize) {
    gauge!("research_db_connections_active").set(count as f64);
  }
}

/// Health check metrics (C12).
pub struct HealthMetrics;

impl HealthMetrics {
  pub fn check_completed(duration: Duration, healthy: bool) {
    let status = if healthy { "healthy" } else { "unhealthy" };
    counter!("research_health_checks_total", "status" => status).increment(1);
    histogram!("research_health_check_duration_seconds").record(duration.as_secs_f64());
  }
}
