use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use crate::search::SearchClient;
use crate::AppConfig;
use research_ai::client::LlmClient;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
  pub status: String,
  pub service: String,
  pub version: String,
  pub checks: HealthChecks,
  pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
  pub database: ServiceStatus,
  pub llm: ServiceStatus,
  pub search: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
  pub status: String,
  pub message: String,
  pub latency_ms: Option<u64>,
  pub details: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct HealthState {
  pub pool: Arc<PgPool>,
  pub config: Arc<AppConfig>,
  pub llm: Arc<LlmClient>,
  pub search: Arc<SearchClient>,
}

impl HealthState {
  pub fn new(pool: Arc<PgPool>, config: Arc<AppConfig>, llm: Arc<LlmClient>, search: Arc<SearchClient>) -> Self {
    Self { pool, config, llm, search }
  }
}

/// Starts the sidecar HTTP server exposing `/health`, `/ready`, `/live`
/// (§6), separate from the main API's axum router so liveness checks never
/// contend with request-handling load.
pub async fn start_health_server(state: HealthState, port: u16) -> Result<()> {
  let app = Router::new()
    .route("/health", get(health_check_handler))
    .route("/ready", get(readiness_check_handler))
    .route("/live", get(liveness_check_handler))
    .with_state(state);

  let addr = format!("0.0.0.0:{}", port);
  let listener = TcpListener::bind(&addr).await?;

  info!("health check server listening on {}", addr);

  axum::serve(listener, app).await?;
  Ok(())
}

async fn health_check_handler(
  State(state): State<HealthState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<serde_json::Value>)> {
  let start_time = std::time::Instant::now();

  let database = check_database(&state).await;
  let llm = check_llm(&state).await;
  let search = check_search(&state).await;

  let all_healthy = [&database, &llm, &search].iter().all(|check| check.status == "healthy");
  let overall_status = if all_healthy { "healthy" } else { "unhealthy" };
  let status_code = if all_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

  let health_status = HealthStatus {
    status: overall_status.to_string(),
    service: "research_agent".to_string(),
    version: env!("CARGO_PKG_VERSION").to_string(),
    checks: HealthChecks { database, llm, search },
    timestamp: chrono::Utc::now().timestamp_millis(),
  };

  info!(elapsed = ?start_time.elapsed(), "health check completed");
  crate::observability::metrics::HealthMetrics::check_completed(start_time.elapsed(), all_healthy);

  if all_healthy {
    Ok(Json(health_status))
  } else {
    Err((status_code, Json(serde_json::to_value(health_status).unwrap())))
  }
}

/// Readiness: only the database must be reachable. The LLM and search
/// services degrade gracefully within the pipeline (stage timeouts,
/// snippet fallback), so they don't gate whether traffic is accepted.
async fn readiness_check_handler(
  State(state): State<HealthState>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
  let database = check_database(&state).await;
  let ready = database.status == "healthy";
  let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

  let response = serde_json::json!({
    "status": if ready { "ready" } else { "not_ready" },
    "checks": { "database": database }
  });

  if ready {
    Ok(Json(response))
  } else {
    Err((status_code, Json(response)))
  }
}

async fn liveness_check_handler() -> Json<serde_json::Value> {
  Json(serde_json::json!({
    "status": "alive",
    "service": "research_agent",
    "timestamp": chrono::Utc::now().timestamp_millis()
  }))
}

async fn check_database(state: &HealthState) -> ServiceStatus {
  let start = std::time::Instant::now();
  match sqlx::query("SELECT 1").fetch_one(state.pool.as_ref()).await {
    Ok(_) => ServiceStatus {
      status: "healthy".to_string(),
      message: "database connection successful".to_string(),
      latency_ms: Some(start.elapsed().as_millis() as u64),
      details: None,
    },
    Err(e) => ServiceStatus {
      status: "unhealthy".to_string(),
      message: format!("database connection failed: {e}"),
      latency_ms: Some(start.elapsed().as_millis() as u64),
      details: Some(serde_json::json!({ "error": e.to_string() })),
    },
  }
}

async fn check_llm(state: &HealthState) -> ServiceStatus {
  let start = std::time::Instant::now();
  let healthy = tokio::time::timeout(Duration::from_secs(5), state.llm.healthy()).await;
  match healthy {
    Ok(true) => ServiceStatus {
      status: "healthy".to_string(),
      message: "llm backend catalog contains the configured model".to_string(),
      latency_ms: Some(start.elapsed().as_millis() as u64),
      details: Some(serde_json::json!({ "model": state.config.llm.model })),
    },
    Ok(false) => ServiceStatus {
      status: "unhealthy".to_string(),
      message: "llm backend catalog check failed".to_string(),
      latency_ms: Some(start.elapsed().as_millis() as u64),
      details: Some(serde_json::json!({ "model": state.config.llm.model })),
    },
    Err(_) => ServiceStatus {
      status: "unhealthy".to_string(),
      message: "llm health check timed out".to_string(),
      latency_ms: Some(start.elapsed().as_millis() as u64),
      details: None,
    },
  }
}

async fn check_search(state: &HealthState) -> ServiceStatus {
  let start = std::time::Instant::now();
  match state.search.health_check().await {
    true => ServiceStatus {
      status: "healthy".to_string(),
      message: "search client reachable via mcp or http fallback".to_string(),
      latency_ms: Some(start.elapsed().as_millis() as u64),
      details: None,
    },
    false => ServiceStatus {
      status: "unhealthy".to_string(),
      message: "neither the mcp nor http search transport responded".to_string(),
      latency_ms: Some(start.elapsed().as_millis() as u64),
      details: None,
    },
  }
}
