use async_trait::async_trait;
use sqlx::Row;

use research_core::contracts::repositories::TaskRepository;
use research_core::error::CoreError;
use research_core::ids::{TaskId, TaskPk, UserPk};
use research_core::models::{CreateResearchTask, ResearchDepth, ResearchTask, TaskStatus};

use crate::exec::PgExec;

pub struct PgTaskRepository {
  exec: PgExec,
}

impl PgTaskRepository {
  pub fn new(exec: PgExec) -> Self {
    Self { exec }
  }
}

fn row_to_task(row: sqlx::postgres::PgRow) -> Result<ResearchTask, CoreError> {
  let depth: String = row.try_get("depth").map_err(CoreError::from_database_error)?;
  let status: String = row.try_get("status").map_err(CoreError::from_database_error)?;
  Ok(ResearchTask {
    id: TaskPk::new(row.try_get("id").map_err(CoreError::from_database_error)?),
    task_id: TaskId(row.try_get("task_id").map_err(CoreError::from_database_error)?),
    user_id: UserPk::new(row.try_get("user_id").map_err(CoreError::from_database_error)?),
    query: row.try_get("query").map_err(CoreError::from_database_error)?,
    depth: parse_depth(&depth),
    max_sources: row
      .try_get::<i32, _>("max_sources")
      .map_err(CoreError::from_database_error)? as u32,
    options: row.try_get("options").map_err(CoreError::from_database_error)?,
    status: parse_status(&status),
    progress: row
      .try_get::<i16, _>("progress")
      .map_err(CoreError::from_database_error)? as u8,
    warnings: row.try_get("warnings").map_err(CoreError::from_database_error)?,
    error_message: row
      .try_get("error_message")
      .map_err(CoreError::from_database_error)?,
    created_at: row.try_get("created_at").map_err(CoreError::from_database_error)?,
    started_at: row.try_get("started_at").map_err(CoreError::from_database_error)?,
    completed_at: row
      .try_get("completed_at")
      .map_err(CoreError::from_database_error)?,
  })
}

fn parse_depth(s: &str) -> ResearchDepth {
  match s {
    "comprehensive" => ResearchDepth::Comprehensive,
    "standard" => ResearchDepth::Standard,
    _ => ResearchDepth::Quick,
  }
}

fn depth_str(d: ResearchDepth) -> &'static str {
  match d {
    ResearchDepth::Quick => "quick",
    ResearchDepth::Standard => "standard",
    ResearchDepth::Comprehensive => "comprehensive",
  }
}

fn parse_status(s: &str) -> TaskStatus {
  match s {
    "analyzing" => TaskStatus::Analyzing,
    "searching" => TaskStatus::Searching,
    "fetching" => TaskStatus::Fetching,
    "synthesizing" => TaskStatus::Synthesizing,
    "generating" => TaskStatus::Generating,
    "completed" => TaskStatus::Completed,
    "failed" => TaskStatus::Failed,
    "cancelled" => TaskStatus::Cancelled,
    _ => TaskStatus::Pending,
  }
}

fn status_str(s: TaskStatus) -> &'static str {
  match s {
    TaskStatus::Pending => "pending",
    TaskStatus::Analyzing => "analyzing",
    TaskStatus::Searching => "searching",
    TaskStatus::Fetching => "fetching",
    TaskStatus::Synthesizing => "synthesizing",
    TaskStatus::Generating => "generating",
    TaskStatus::Completed => "completed",
    TaskStatus::Failed => "failed",
    TaskStatus::Cancelled => "cancelled",
  }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
  async fn create(&self, data: &CreateResearchTask) -> Result<ResearchTask, CoreError> {
    let task_id = TaskId::generate();
    let depth = depth_str(data.depth);
    let options = data.options.clone();
    let user_id = data.user_id.inner();
    let max_sources = data.max_sources as i32;
    let query = data.query.clone();
    let task_id_str = task_id.as_str().to_string();

    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"INSERT INTO research_tasks (task_id, user_id, query, depth, max_sources, options)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id, task_id, user_id, query, depth, max_sources, options, status,
                         progress, warnings, error_message, created_at, started_at, completed_at"#,
          )
          .bind(&task_id_str)
          .bind(user_id)
          .bind(&query)
          .bind(depth)
          .bind(max_sources)
          .bind(&options)
          .fetch_one(conn)
          .await
        })
      })
      .await?;

    row_to_task(row)
  }

  async fn get_by_id(&self, id: TaskPk) -> Result<Option<ResearchTask>, CoreError> {
    let id = id.inner();
    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"SELECT id, task_id, user_id, query, depth, max_sources, options, status,
                      progress, warnings, error_message, created_at, started_at, completed_at
               FROM research_tasks WHERE id = $1"#,
          )
          .bind(id)
          .fetch_optional(conn)
          .await
        })
      })
      .await?;
    row.map(row_to_task).transpose()
  }

  async fn get_by_task_id(&self, task_id: &TaskId) -> Result<Option<ResearchTask>, CoreError> {
    let task_id = task_id.as_str().to_string();
    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"SELECT id, task_id, user_id, query, depth, max_sources, options, status,
                      progress, warnings, error_message, created_at, started_at, completed_at
               FROM research_tasks WHERE task_id = $1"#,
          )
          .bind(&task_id)
          .fetch_optional(conn)
          .await
        })
      })
      .await?;
    row.map(row_to_task).transpose()
  }

  async fn list_by_user(&self, user_id: UserPk, limit: u32) -> Result<Vec<ResearchTask>, CoreError> {
    let uid = user_id.inner();
    let limit = limit as i64;
    let rows = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"SELECT id, task_id, user_id, query, depth, max_sources, options, status,
                      progress, warnings, error_message, created_at, started_at, completed_at
               FROM research_tasks WHERE user_id = $1
               ORDER BY created_at DESC LIMIT $2"#,
          )
          .bind(uid)
          .bind(limit)
          .fetch_all(conn)
          .await
        })
      })
      .await?;
    rows.into_iter().map(row_to_task).collect()
  }

  async fn update_status(
    &self,
    id: TaskPk,
    status: TaskStatus,
    progress: u8,
    warning: Option<&str>,
    error_message: Option<&str>,
  ) -> Result<(), CoreError> {
    let id = id.inner();
    let status_s = status_str(status).to_string();
    let progress = progress as i16;
    let warning = warning.map(|s| s.to_string());
    let error_message = error_message.map(|s| s.to_string());
    let set_started = matches!(status, TaskStatus::Analyzing);
    let set_completed = status.is_terminal();

    self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"UPDATE research_tasks SET
                 status = $2,
                 progress = $3,
                 warnings = CASE WHEN $4::text IS NOT NULL THEN array_append(warnings, $4) ELSE warnings END,
                 error_message = COALESCE($5, error_message),
                 started_at = CASE WHEN $6 AND started_at IS NULL THEN now() ELSE started_at END,
                 completed_at = CASE WHEN $7 THEN now() ELSE completed_at END
               WHERE id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')"#,
          )
          .bind(id)
          .bind(&status_s)
          .bind(progress)
          .bind(&warning)
          .bind(&error_message)
          .bind(set_started)
          .bind(set_completed)
          .execute(conn)
          .await
          .map(|_| ())
        })
      })
      .await
  }

  async fn cancel_if_active(&self, id: TaskPk) -> Result<bool, CoreError> {
    let id = id.inner();
    let result = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"UPDATE research_tasks SET status = 'cancelled', completed_at = now()
               WHERE id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')"#,
          )
          .bind(id)
          .execute(conn)
          .await
        })
      })
      .await?;
    Ok(result.rows_affected() > 0)
  }
}
