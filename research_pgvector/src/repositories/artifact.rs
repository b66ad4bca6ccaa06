use async_trait::async_trait;
use sqlx::Row;

use research_core::contracts::repositories::{ArtifactRepository, ShareRepository};
use research_core::error::CoreError;
use research_core::ids::TaskPk;
use research_core::models::{CreateResearchArtifact, ResearchArtifact, ResearchShare, SharePermission};

use crate::exec::PgExec;

pub struct PgArtifactRepository {
  exec: PgExec,
}

impl PgArtifactRepository {
  pub fn new(exec: PgExec) -> Self {
    Self { exec }
  }
}

fn row_to_artifact(row: sqlx::postgres::PgRow) -> Result<ResearchArtifact, CoreError> {
  Ok(ResearchArtifact {
    id: row.try_get("id").map_err(CoreError::from_database_error)?,
    task_id: TaskPk::new(row.try_get("task_id").map_err(CoreError::from_database_error)?),
    artifact_type: row.try_get("artifact_type").map_err(CoreError::from_database_error)?,
    name: row.try_get("name").map_err(CoreError::from_database_error)?,
    content: row.try_get("content").map_err(CoreError::from_database_error)?,
    metadata: row.try_get("metadata").map_err(CoreError::from_database_error)?,
    size_bytes: row.try_get("size_bytes").map_err(CoreError::from_database_error)?,
    created_at: row.try_get("created_at").map_err(CoreError::from_database_error)?,
  })
}

#[async_trait]
impl ArtifactRepository for PgArtifactRepository {
  async fn create(&self, data: &CreateResearchArtifact) -> Result<ResearchArtifact, CoreError> {
    let task_id = data.task_id.inner();
    let artifact_type = data.artifact_type.clone();
    let name = data.name.clone();
    let content = data.content.clone();
    let metadata = data.metadata.clone();
    let size_bytes = content.len() as i64;

    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"INSERT INTO research_artifacts (task_id, artifact_type, name, content, metadata, size_bytes)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id, task_id, artifact_type, name, content, metadata, size_bytes, created_at"#,
          )
          .bind(task_id)
          .bind(&artifact_type)
          .bind(&name)
          .bind(&content)
          .bind(&metadata)
          .bind(size_bytes)
          .fetch_one(conn)
          .await
        })
      })
      .await?;
    row_to_artifact(row)
  }

  async fn list_by_task(&self, task_id: TaskPk) -> Result<Vec<ResearchArtifact>, CoreError> {
    let tid = task_id.inner();
    let rows = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"SELECT id, task_id, artifact_type, name, content, metadata, size_bytes, created_at
               FROM research_artifacts WHERE task_id = $1 ORDER BY created_at"#,
          )
          .bind(tid)
          .fetch_all(conn)
          .await
        })
      })
      .await?;
    rows.into_iter().map(row_to_artifact).collect()
  }

  async fn delete(&self, id: i64) -> Result<bool, CoreError> {
    let result = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query("DELETE FROM research_artifacts WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await
        })
      })
      .await?;
    Ok(result.rows_affected() > 0)
  }
}

pub struct PgShareRepository {
  exec: PgExec,
}

impl PgShareRepository {
  pub fn new(exec: PgExec) -> Self {
    Self { exec }
  }
}

fn permission_str(p: SharePermission) -> &'static str {
  match p {
    SharePermission::View => "view",
    SharePermission::Comment => "comment",
    SharePermission::Edit => "edit",
  }
}

fn parse_permission(s: &str) -> SharePermission {
  match s {
    "comment" => SharePermission::Comment,
    "edit" => SharePermission::Edit,
    _ => SharePermission::View,
  }
}

fn row_to_share(row: sqlx::postgres::PgRow) -> Result<ResearchShare, CoreError> {
  let permission: String = row
    .try_get("permission_level")
    .map_err(CoreError::from_database_error)?;
  Ok(ResearchShare {
    id: row.try_get("id").map_err(CoreError::from_database_error)?,
    task_id: TaskPk::new(row.try_get("task_id").map_err(CoreError::from_database_error)?),
    shared_by_id: research_core::ids::UserPk::new(
      row.try_get("shared_by_id").map_err(CoreError::from_database_error)?,
    ),
    shared_with_id: row
      .try_get::<Option<i64>, _>("shared_with_id")
      .map_err(CoreError::from_database_error)?
      .map(research_core::ids::UserPk::new),
    share_token: row.try_get("share_token").map_err(CoreError::from_database_error)?,
    permission_level: parse_permission(&permission),
    expires_at: row.try_get("expires_at").map_err(CoreError::from_database_error)?,
    is_public: row.try_get("is_public").map_err(CoreError::from_database_error)?,
    created_at: row.try_get("created_at").map_err(CoreError::from_database_error)?,
  })
}

#[async_trait]
impl ShareRepository for PgShareRepository {
  async fn create(&self, share: &ResearchShare) -> Result<ResearchShare, CoreError> {
    let task_id = share.task_id.inner();
    let shared_by_id = share.shared_by_id.inner();
    let shared_with_id = share.shared_with_id.map(|u| u.inner());
    let share_token = share.share_token.clone();
    let permission_level = permission_str(share.permission_level).to_string();
    let expires_at = share.expires_at;
    let is_public = share.is_public;

    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"INSERT INTO research_shares
                 (task_id, shared_by_id, shared_with_id, share_token, permission_level, expires_at, is_public)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING id, task_id, shared_by_id, shared_with_id, share_token,
                         permission_level, expires_at, is_public, created_at"#,
          )
          .bind(task_id)
          .bind(shared_by_id)
          .bind(shared_with_id)
          .bind(&share_token)
          .bind(&permission_level)
          .bind(expires_at)
          .bind(is_public)
          .fetch_one(conn)
          .await
        })
      })
      .await?;
    row_to_share(row)
  }

  async fn get_by_token(&self, token: &str) -> Result<Option<ResearchShare>, CoreError> {
    let token = token.to_string();
    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"SELECT id, task_id, shared_by_id, shared_with_id, share_token,
                      permission_level, expires_at, is_public, created_at
               FROM research_shares WHERE share_token = $1"#,
          )
          .bind(&token)
          .fetch_optional(conn)
          .await
        })
      })
      .await?;
    row.map(row_to_share).transpose()
  }

  async fn revoke(&self, id: i64) -> Result<bool, CoreError> {
    let result = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query("DELETE FROM research_shares WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await
        })
      })
      .await?;
    Ok(result.rows_affected() > 0)
  }
}
