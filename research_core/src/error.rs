use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use thiserror::Error;

/// Errors raised while calling out to the federated search service (C1).
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum SearchError {
  #[error("search transport error: {0}")]
  Transport(String),

  #[error("search response could not be parsed: {0}")]
  Malformed(String),

  #[error("search request timed out after {0}s")]
  Timeout(u64),
}

/// Errors raised by the fetch/extract engine (C2, C3).
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum FetchError {
  #[error("unsupported content type: {0}")]
  UnsupportedContentType(String),

  #[error("content exceeds max size: {0} bytes")]
  TooLarge(usize),

  #[error("network error: {0}")]
  Network(String),

  #[error("request timed out after {0}s")]
  Timeout(u64),
}

/// Errors raised by the LLM interaction layer (C4).
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum LlmError {
  #[error("llm transport error: {0}")]
  Transport(String),

  #[error("llm response could not be parsed as JSON after sanitization: {0}")]
  Unparseable(String),

  #[error("llm call timed out after {0}s")]
  Timeout(u64),

  #[error("llm returned an empty response")]
  Empty,
}

/// Core domain error type shared across the research crates.
///
/// These represent business-domain issues, not technical implementation details.
/// Stage-level failures inside the orchestrator are almost never translated into
/// this type directly — they degrade or fall back per §7 of the spec. This type
/// is reserved for persistence, validation, and boundary errors.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum CoreError {
  /// Database errors from sqlx that don't map to a more specific variant.
  #[error("database error: {0}")]
  Database(String),

  /// Validation errors for business rules (e.g. synthesis schema, progress bounds).
  #[error("validation error: {0}")]
  Validation(String),

  /// Research task not found by id or external task_id.
  #[error("research task not found: {0}")]
  TaskNotFound(String),

  /// Chat session not found.
  #[error("chat session not found: {0}")]
  SessionNotFound(String),

  /// User not found.
  #[error("user not found: {0}")]
  UserNotFound(String),

  /// Foreign key constraint violation.
  #[error("referenced resource not found: {0}")]
  ForeignKeyViolation(String),

  /// Unique constraint violation.
  #[error("resource already exists: {0}")]
  UniqueViolation(String),

  /// Generic not-found for entities without a dedicated variant.
  #[error("not found: {0}")]
  NotFound(String),

  /// Conflict errors (e.g. task already has a result).
  #[error("conflict: {0}")]
  Conflict(String),

  /// Authentication errors resolving a bearer token to a user.
  #[error("authentication error: {0}")]
  Authentication(String),

  /// Authorization errors (valid session, insufficient permission).
  #[error("unauthorized: {0}")]
  Unauthorized(String),

  /// Search client errors that escaped the "never raises" contract (should not
  /// normally happen; retained so callers outside the orchestrator can match it).
  #[error("search error: {0}")]
  Search(#[from] SearchError),

  /// Fetch/extract errors.
  #[error("fetch error: {0}")]
  Fetch(#[from] FetchError),

  /// LLM client errors that escaped retry/fallback.
  #[error("llm error: {0}")]
  Llm(#[from] LlmError),

  /// Internal/unexpected errors, reserved for the binary boundary.
  #[error("internal error: {0}")]
  Internal(String),
}

impl CoreError {
  /// Map sqlx database errors to specific CoreError variants by inspecting
  /// constraint names. Falls back to a generic Database error.
  pub fn from_database_error(error: sqlx::Error) -> Self {
    if let Some(db_err) = error.as_database_error() {
      if db_err.is_foreign_key_violation() {
        return Self::map_foreign_key_error(&error.to_string());
      }

      if db_err.is_unique_violation() {
        return Self::map_unique_constraint_error(&error.to_string());
      }

      if db_err.is_check_violation() {
        return CoreError::Validation(format!("data validation failed: {}", db_err.message()));
      }
    }

    CoreError::Database(error.to_string())
  }

  fn map_foreign_key_error(error_msg: &str) -> Self {
    if error_msg.contains("research_results_task_id_fkey") {
      CoreError::TaskNotFound("cannot attach result: task does not exist".to_string())
    } else if error_msg.contains("graph_nodes_task_id_fkey") {
      CoreError::TaskNotFound("cannot create graph node: task does not exist".to_string())
    } else if error_msg.contains("graph_edges_source_node_id_fkey")
      || error_msg.contains("graph_edges_target_node_id_fkey")
    {
      CoreError::NotFound("cannot create graph edge: endpoint node does not exist".to_string())
    } else if error_msg.contains("chat_messages_session_id_fkey") {
      CoreError::SessionNotFound("cannot create message: session does not exist".to_string())
    } else if error_msg.contains("research_tasks_user_id_fkey")
      || error_msg.contains("chat_sessions_user_id_fkey")
    {
      CoreError::UserNotFound("referenced user does not exist".to_string())
    } else {
      CoreError::ForeignKeyViolation(format!("referenced resource not found: {}", error_msg))
    }
  }

  fn map_unique_constraint_error(error_msg: &str) -> Self {
    if error_msg.contains("research_tasks_task_id_key") {
      CoreError::Conflict("task_id already in use".to_string())
    } else if error_msg.contains("research_results_task_id_key") {
      CoreError::Conflict("task already has a research result".to_string())
    } else if error_msg.contains("graph_edges_source_node_id_target_node_id_edge_type_key") {
      CoreError::Conflict("graph edge already exists".to_string())
    } else if error_msg.contains("users_email_key") {
      CoreError::Conflict("a user with this email already exists".to_string())
    } else if error_msg.contains("research_shares_share_token_key") {
      CoreError::Conflict("share token already exists".to_string())
    } else {
      CoreError::UniqueViolation(format!("resource already exists: {}", error_msg))
    }
  }
}

impl From<sqlx::Error> for CoreError {
  fn from(err: sqlx::Error) -> Self {
    CoreError::from_database_error(err)
  }
}

impl From<anyhow::Error> for CoreError {
  fn from(err: anyhow::Error) -> Self {
    CoreError::Internal(err.to_string())
  }
}

pub trait TryFromRow<T>: Sized {
  fn try_from_row(row: PgRow) -> Result<Self, CoreError>;
}

impl<T, E> TryFromRow<PgRow> for T
where
  T: TryFrom<PgRow, Error = E>,
  E: Into<CoreError>,
{
  fn try_from_row(row: PgRow) -> Result<Self, CoreError> {
    T::try_from(row).map_err(Into::into)
  }
}
