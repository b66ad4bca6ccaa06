use std::sync::Arc;

use anyhow::Result;
use axum::{
  extract::{Json, Path, Query, State},
  http::{header, HeaderMap, StatusCode},
  response::{
    sse::{Event, Sse},
    IntoResponse, Json as ResponseJson,
  },
  routing::{get, post},
  Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, Layer as _};
use validator::Validate;

use research_ai::client::{LlmBackend, LlmClient};
use research_ai::{OllamaAdapter, OpenaiAdapter};
use research_core::contracts::repositories::{ResultRepository, SessionRepository, TaskRepository, UserRepository};
use research_core::ids::TaskId;
use research_core::models::{CreateResearchTask, ResearchDepth, ResearchTask, TaskStatus, User};
use research_pgvector::PgStore;

use research_agent::chat::ChatResponse;
use research_agent::config::{AppConfig, LlmBackendKind};
use research_agent::fetch::Fetcher;
use research_agent::health::{start_health_server, HealthState};
use research_agent::orchestrator::Orchestrator;
use research_agent::search::SearchClient;
use research_agent::{chat, rag};

#[derive(Clone)]
struct AppState {
  store: PgStore,
  llm: Arc<LlmClient>,
  search: Arc<SearchClient>,
  orchestrator: Orchestrator,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
  error: String,
  message: String,
}

fn error_response(status: StatusCode, kind: &str, message: impl std::fmt::Display) -> (StatusCode, ResponseJson<ErrorResponse>) {
  (status, ResponseJson(ErrorResponse { error: kind.to_string(), message: message.to_string() }))
}

fn validate_request<T: Validate>(req: &T) -> Result<(), (StatusCode, ResponseJson<ErrorResponse>)> {
  req
    .validate()
    .map_err(|e| error_response(StatusCode::BAD_REQUEST, "bad_request", e))
}

/// Resolves the `Authorization: Bearer <token>` header to a `User`. The
/// shape (extract header, resolve it, 401 on failure) mirrors the teacher's
/// bearer-auth middleware; the resolution itself is a plain session-table
/// lookup rather than JWT claim validation, since this system's sessions
/// are opaque tokens (see DESIGN.md).
async fn authenticate(store: &PgStore, headers: &HeaderMap) -> Result<User, (StatusCode, ResponseJson<ErrorResponse>)> {
  let header = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "unauthorized", "missing authorization header"))?;

  let token = header
    .strip_prefix("Bearer ")
    .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "unauthorized", "expected a bearer token"))?;

  let token_hash = hex::encode(Sha256::digest(token.as_bytes()));
  let session = store
    .sessions
    .get_by_token_hash(&token_hash)
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e))?
    .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "unauthorized", "invalid session token"))?;

  if session.is_expired(chrono::Utc::now()) {
    return Err(error_response(StatusCode::UNAUTHORIZED, "unauthorized", "session expired"));
  }

  store
    .users
    .get_by_id(session.user_id)
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e))?
    .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "unauthorized", "session user no longer exists"))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateResearchRequest {
  #[validate(length(min = 1, max = 2000, message = "query must be 1-2000 characters"))]
  query: String,
  #[serde(default)]
  depth: Option<ResearchDepth>,
  #[serde(default)]
  #[validate(range(min = 1, max = 50, message = "max_sources must be between 1 and 50"))]
  max_sources: Option<u32>,
}

#[derive(Debug, Serialize)]
struct CreateResearchResponse {
  task_id: String,
  status: TaskStatus,
}

/// POST /api/research: creates a task and spawns the pipeline in the
/// background; the caller polls `/api/research/:task_id` for status (§6).
async fn create_research(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(req): Json<CreateResearchRequest>,
) -> Result<ResponseJson<CreateResearchResponse>, (StatusCode, ResponseJson<ErrorResponse>)> {
  let user = authenticate(&state.store, &headers).await?;
  validate_request(&req)?;
  let depth = req.depth.unwrap_or(ResearchDepth::Standard);
  let max_sources = ResearchTask::clamp_max_sources(req.max_sources.unwrap_or(10), depth);

  let task = state
    .store
    .tasks
    .create(&CreateResearchTask { user_id: user.id, query: req.query, depth, max_sources, options: serde_json::Value::Null })
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e))?;

  let orchestrator = state.orchestrator.clone();
  let spawned_task = task.clone();
  tokio::spawn(async move { orchestrator.run(spawned_task).await });

  Ok(ResponseJson(CreateResearchResponse { task_id: task.task_id.to_string(), status: task.status }))
}

async fn load_task(
  store: &PgStore,
  user: &User,
  task_id: &str,
) -> Result<ResearchTask, (StatusCode, ResponseJson<ErrorResponse>)> {
  let task = store
    .tasks
    .get_by_task_id(&TaskId(task_id.to_string()))
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e))?
    .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "not_found", "research task not found"))?;
  if task.user_id != user.id {
    return Err(error_response(StatusCode::NOT_FOUND, "not_found", "research task not found"));
  }
  Ok(task)
}

/// GET /api/research/:task_id: current status/progress.
async fn get_research_status(
  State(state): State<AppState>,
  headers: HeaderMap,
  Path(task_id): Path<String>,
) -> Result<ResponseJson<ResearchTask>, (StatusCode, ResponseJson<ErrorResponse>)> {
  let user = authenticate(&state.store, &headers).await?;
  let task = load_task(&state.store, &user, &task_id).await?;
  Ok(ResponseJson(task))
}

/// GET /api/research/:task_id/result: the completed `ResearchResult`, or 404
/// if the task hasn't finished.
async fn get_research_result(
  State(state): State<AppState>,
  headers: HeaderMap,
  Path(task_id): Path<String>,
) -> Result<ResponseJson<research_core::models::ResearchResult>, (StatusCode, ResponseJson<ErrorResponse>)> {
  let user = authenticate(&state.store, &headers).await?;
  let task = load_task(&state.store, &user, &task_id).await?;
  let result = state
    .store
    .results
    .get_by_task_id(task.id)
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e))?
    .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "not_found", "result not yet available"))?;
  Ok(ResponseJson(result))
}

#[derive(Debug, Serialize)]
struct CancelResponse {
  cancelled: bool,
}

/// POST /api/research/:task_id/cancel: flips the task to `cancelled` iff
/// still active; the orchestrator observes this at its next cancellation
/// checkpoint (§4.4).
async fn cancel_research(
  State(state): State<AppState>,
  headers: HeaderMap,
  Path(task_id): Path<String>,
) -> Result<ResponseJson<CancelResponse>, (StatusCode, ResponseJson<ErrorResponse>)> {
  let user = authenticate(&state.store, &headers).await?;
  let task = load_task(&state.store, &user, &task_id).await?;
  let cancelled = state
    .store
    .tasks
    .cancel_if_active(task.id)
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e))?;
  Ok(ResponseJson(CancelResponse { cancelled }))
}

#[derive(Debug, Deserialize, Validate)]
struct ChatRequest {
  #[validate(length(min = 1, max = 4000, message = "message must be 1-4000 characters"))]
  message: String,
  #[serde(default)]
  session_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ChatQuery {
  #[serde(default)]
  stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatCompleteResponse {
  content: String,
  sources: Vec<research_core::models::SourceSummary>,
  session_id: i64,
}

/// POST /api/chat (and `?stream=true`): runs the RAG-backed chat responder
/// and returns either a complete turn or a server-sent-events stream (§4.8).
async fn chat_handler(
  State(state): State<AppState>,
  headers: HeaderMap,
  Query(query): Query<ChatQuery>,
  Json(req): Json<ChatRequest>,
) -> Result<axum::response::Response, (StatusCode, ResponseJson<ErrorResponse>)> {
  let user = authenticate(&state.store, &headers).await?;
  validate_request(&req)?;
  let session_id = req.session_id.map(research_core::ids::ChatSessionPk::new);

  let outcome = chat::process(&state.store, &state.llm, &req.message, user.id, session_id, query.stream)
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e))?;

  match outcome.response {
    ChatResponse::Complete { content, sources } => Ok(
      ResponseJson(ChatCompleteResponse { content, sources, session_id: outcome.session_id.inner() }).into_response(),
    ),
    ChatResponse::Stream { chunks, sources } => {
      let session_id = outcome.session_id.inner();
      let events = chunks.map(move |chunk| match chunk {
        Ok(text) => Ok(Event::default().event("chunk").data(text)),
        Err(e) => Ok(Event::default().event("error").data(e.to_string())),
      });
      let trailer = futures::stream::once(async move {
        Ok(Event::default().event("done").json_data(serde_json::json!({ "sources": sources, "session_id": session_id })).unwrap())
      });
      Ok(Sse::new(events.chain(trailer)).into_response())
    }
  }
}

#[derive(Debug, Deserialize, Validate)]
struct RagQuery {
  #[validate(length(min = 1, max = 2000, message = "q must be 1-2000 characters"))]
  q: String,
  #[serde(default)]
  #[validate(range(min = 1, max = 50, message = "top_k must be between 1 and 50"))]
  top_k: Option<u32>,
}

/// GET-equivalent (exposed as a POST to carry a JSON body) retrieval probe,
/// useful for debugging context assembly independent of the chat responder.
async fn rag_preview(
  State(state): State<AppState>,
  headers: HeaderMap,
  Json(query): Json<RagQuery>,
) -> Result<ResponseJson<rag::RagResult>, (StatusCode, ResponseJson<ErrorResponse>)> {
  let user = authenticate(&state.store, &headers).await?;
  validate_request(&query)?;
  let result = rag::retrieve(&state.store, &state.llm, &query.q, user.id, query.top_k.unwrap_or(8), true, true)
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e))?;
  Ok(ResponseJson(result))
}

#[derive(Debug, Deserialize, Validate)]
struct RegisterRequest {
  #[validate(email(message = "invalid email format"))]
  email: String,
  #[validate(length(min = 3, max = 32, message = "username must be 3-32 characters"))]
  username: String,
  #[validate(length(min = 8, message = "password must be at least 8 characters"))]
  password: String,
  #[validate(length(min = 1, max = 100, message = "full_name must be 1-100 characters"))]
  full_name: String,
}

#[derive(Debug, Deserialize, Validate)]
struct LoginRequest {
  #[validate(email(message = "invalid email format"))]
  email: String,
  #[validate(length(min = 1, message = "password must not be empty"))]
  password: String,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
  token: String,
  user_id: i64,
}

const SESSION_TTL: chrono::Duration = chrono::Duration::days(30);

fn issue_token() -> (String, String) {
  use rand::RngCore;
  let mut bytes = [0u8; 32];
  rand::thread_rng().fill_bytes(&mut bytes);
  let token = hex::encode(bytes);
  let token_hash = hex::encode(Sha256::digest(token.as_bytes()));
  (token, token_hash)
}

/// POST /api/auth/register: creates a `User` and an immediately-usable
/// session, mirroring the teacher's register-then-signin convenience (one
/// round trip instead of register followed by a separate login call).
async fn register(
  State(state): State<AppState>,
  Json(req): Json<RegisterRequest>,
) -> Result<ResponseJson<AuthResponse>, (StatusCode, ResponseJson<ErrorResponse>)> {
  validate_request(&req)?;
  if state
    .store
    .users
    .get_by_email(&req.email)
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e))?
    .is_some()
  {
    return Err(error_response(StatusCode::CONFLICT, "conflict", "email already registered"));
  }

  let password_hash = research_core::models::hash_password(&req.password)
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e))?;

  let user = state
    .store
    .users
    .create(&research_core::models::CreateUser {
      email: req.email,
      username: req.username,
      password_hash,
      full_name: req.full_name,
    })
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e))?;

  let (token, token_hash) = issue_token();
  state
    .store
    .sessions
    .create(user.id, &token_hash, SESSION_TTL)
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e))?;

  Ok(ResponseJson(AuthResponse { token, user_id: user.id.inner() }))
}

/// POST /api/auth/login: verifies the password and issues a fresh opaque
/// bearer token (§9 decision 4: this system resolves sessions as a
/// table lookup rather than JWT claims).
async fn login(
  State(state): State<AppState>,
  Json(req): Json<LoginRequest>,
) -> Result<ResponseJson<AuthResponse>, (StatusCode, ResponseJson<ErrorResponse>)> {
  validate_request(&req)?;
  let user = state
    .store
    .users
    .get_by_email(&req.email)
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e))?
    .ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "unauthorized", "invalid email or password"))?;

  let valid = research_core::models::verify_password(&req.password, &user.password_hash)
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e))?;
  if !valid || !user.is_active {
    return Err(error_response(StatusCode::UNAUTHORIZED, "unauthorized", "invalid email or password"));
  }

  let (token, token_hash) = issue_token();
  state
    .store
    .sessions
    .create(user.id, &token_hash, SESSION_TTL)
    .await
    .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", e))?;

  Ok(ResponseJson(AuthResponse { token, user_id: user.id.inner() }))
}

fn build_llm_client(config: &AppConfig) -> LlmClient {
  let backend: Arc<dyn LlmBackend> = match config.llm.backend {
    LlmBackendKind::Ollama => Arc::new(OllamaAdapter::new(&config.llm.host, &config.llm.model, &config.llm.embed_model)),
    LlmBackendKind::Openai => Arc::new(OpenaiAdapter::new(
      config.llm.api_key.clone().unwrap_or_default(),
      &config.llm.model,
      &config.llm.embed_model,
    )),
  };
  LlmClient::new(backend)
}

fn router(state: AppState) -> Router {
  Router::new()
    .route("/api/auth/register", post(register))
    .route("/api/auth/login", post(login))
    .route("/api/research", post(create_research))
    .route("/api/research/{task_id}", get(get_research_status))
    .route("/api/research/{task_id}/result", get(get_research_result))
    .route("/api/research/{task_id}/cancel", post(cancel_research))
    .route("/api/chat", post(chat_handler))
    .route("/api/rag/preview", post(rag_preview))
    .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
  let layer = Layer::new().with_filter(LevelFilter::INFO);
  tracing_subscriber::registry().with(layer).init();

  let config = match AppConfig::load() {
    Ok(config) => {
      info!(config = %config.summary(), "configuration loaded");
      config
    }
    Err(e) => {
      error!("failed to load research_agent configuration: {e}");
      eprintln!("quick fixes:");
      eprintln!("  1. copy research_agent.yml.example to research_agent.yml");
      eprintln!("  2. set RESEARCH_CONFIG=/path/to/your/config.yml");
      eprintln!("  3. set RESEARCH_LLM__API_KEY if llm.backend = openai");
      std::process::exit(1);
    }
  };

  if let Err(e) = research_agent::observability::init_observability(&config.server.metrics_addr).await {
    eprintln!("failed to initialize observability: {e}");
    eprintln!("continuing without prometheus metrics");
  } else {
    info!("prometheus metrics available at http://{}/metrics", config.server.metrics_addr);
  }

  let pool = research_pgvector::connect(&config.database.url, config.database.max_connections).await?;
  let store = PgStore::new(pool.clone());

  let llm = Arc::new(build_llm_client(&config));
  let search = Arc::new(SearchClient::new(&config.search));
  let fetcher = Fetcher::new(&config.fetch);
  let orchestrator = Orchestrator::new(store.clone(), (*llm).clone(), (*search).clone(), fetcher);

  let health_state = HealthState::new(Arc::new(pool), Arc::new(config.clone()), llm.clone(), search.clone());
  tokio::spawn(async move {
    if let Err(e) = start_health_server(health_state, 8080).await {
      error!("health server failed: {e}");
    }
  });

  let app_state = AppState { store, llm, search, orchestrator };
  let app = router(app_state);

  let listener = TcpListener::bind(&config.server.bind_addr).await?;
  info!("research agent listening on {}", config.server.bind_addr);
  info!("endpoints: POST /api/research, GET /api/research/:task_id, GET /api/research/:task_id/result, POST /api/research/:task_id/cancel, POST /api/chat");

  axum::serve(listener, app).await?;
  Ok(())
}
