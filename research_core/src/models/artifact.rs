use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{TaskPk, UserPk};

/// An attachment-like record owned by a task; not produced by the pipeline
/// stages themselves — callers outside the core (the HTTP facade) use this
/// repository to persist exports or debugging artifacts without a schema
/// change. See SPEC_FULL.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchArtifact {
  pub id: i64,
  pub task_id: TaskPk,
  pub artifact_type: String,
  pub name: String,
  pub content: String,
  pub metadata: Value,
  pub size_bytes: i64,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResearchArtifact {
  pub task_id: TaskPk,
  pub artifact_type: String,
  pub name: String,
  pub content: String,
  pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SharePermission {
  View,
  Comment,
  Edit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchShare {
  pub id: i64,
  pub task_id: TaskPk,
  pub shared_by_id: UserPk,
  pub shared_with_id: Option<UserPk>,
  pub share_token: String,
  pub permission_level: SharePermission,
  pub expires_at: Option<DateTime<Utc>>,
  pub is_public: bool,
  pub created_at: DateTime<Utc>,
}
