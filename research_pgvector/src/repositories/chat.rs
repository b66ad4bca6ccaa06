use async_trait::async_trait;
use sqlx::Row;

use research_core::contracts::repositories::{ChatMessageRepository, ChatSessionRepository};
use research_core::error::CoreError;
use research_core::ids::{ChatSessionPk, UserPk};
use research_core::models::{ChatMessage, ChatRole, ChatSession, SourceSummary};

use crate::exec::PgExec;

pub struct PgChatSessionRepository {
  exec: PgExec,
}

impl PgChatSessionRepository {
  pub fn new(exec: PgExec) -> Self {
    Self { exec }
  }
}

fn row_to_session(row: sqlx::postgres::PgRow) -> Result<ChatSession, CoreError> {
  Ok(ChatSession {
    id: ChatSessionPk::new(row.try_get("id").map_err(CoreError::from_database_error)?),
    user_id: UserPk::new(row.try_get("user_id").map_err(CoreError::from_database_error)?),
    title: row.try_get("title").map_err(CoreError::from_database_error)?,
    context: row.try_get("context").map_err(CoreError::from_database_error)?,
    last_activity: row.try_get("last_activity").map_err(CoreError::from_database_error)?,
    created_at: row.try_get("created_at").map_err(CoreError::from_database_error)?,
  })
}

#[async_trait]
impl ChatSessionRepository for PgChatSessionRepository {
  async fn create(&self, user_id: UserPk, title: &str) -> Result<ChatSession, CoreError> {
    let uid = user_id.inner();
    let title = title.to_string();
    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"INSERT INTO chat_sessions (user_id, title) VALUES ($1, $2)
               RETURNING id, user_id, title, context, last_activity, created_at"#,
          )
          .bind(uid)
          .bind(&title)
          .fetch_one(conn)
          .await
        })
      })
      .await?;
    row_to_session(row)
  }

  async fn get_by_id(&self, id: ChatSessionPk) -> Result<Option<ChatSession>, CoreError> {
    let id = id.inner();
    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"SELECT id, user_id, title, context, last_activity, created_at
               FROM chat_sessions WHERE id = $1"#,
          )
          .bind(id)
          .fetch_optional(conn)
          .await
        })
      })
      .await?;
    row.map(row_to_session).transpose()
  }

  async fn touch(&self, id: ChatSessionPk) -> Result<(), CoreError> {
    let id = id.inner();
    self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query("UPDATE chat_sessions SET last_activity = now() WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await
            .map(|_| ())
        })
      })
      .await
  }
}

pub struct PgChatMessageRepository {
  exec: PgExec,
}

impl PgChatMessageRepository {
  pub fn new(exec: PgExec) -> Self {
    Self { exec }
  }
}

fn role_str(r: ChatRole) -> &'static str {
  match r {
    ChatRole::User => "user",
    ChatRole::Assistant => "assistant",
    ChatRole::System => "system",
  }
}

fn parse_role(s: &str) -> ChatRole {
  match s {
    "assistant" => ChatRole::Assistant,
    "system" => ChatRole::System,
    _ => ChatRole::User,
  }
}

fn row_to_message(row: sqlx::postgres::PgRow) -> Result<ChatMessage, CoreError> {
  let role: String = row.try_get("role").map_err(CoreError::from_database_error)?;
  let sources_json: serde_json::Value = row.try_get("sources").map_err(CoreError::from_database_error)?;
  let sources: Vec<SourceSummary> =
    serde_json::from_value(sources_json).map_err(|e| CoreError::Internal(e.to_string()))?;
  Ok(ChatMessage {
    id: row.try_get("id").map_err(CoreError::from_database_error)?,
    session_id: ChatSessionPk::new(row.try_get("session_id").map_err(CoreError::from_database_error)?),
    role: parse_role(&role),
    content: row.try_get("content").map_err(CoreError::from_database_error)?,
    sources,
    created_at: row.try_get("created_at").map_err(CoreError::from_database_error)?,
  })
}

#[async_trait]
impl ChatMessageRepository for PgChatMessageRepository {
  async fn create(&self, message: &ChatMessage) -> Result<ChatMessage, CoreError> {
    let session_id = message.session_id.inner();
    let role = role_str(message.role).to_string();
    let content = message.content.clone();
    let sources =
      serde_json::to_value(&message.sources).map_err(|e| CoreError::Internal(e.to_string()))?;

    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"INSERT INTO chat_messages (session_id, role, content, sources)
               VALUES ($1, $2, $3, $4)
               RETURNING id, session_id, role, content, sources, created_at"#,
          )
          .bind(session_id)
          .bind(&role)
          .bind(&content)
          .bind(&sources)
          .fetch_one(conn)
          .await
        })
      })
      .await?;
    row_to_message(row)
  }

  async fn recent_for_session(
    &self,
    session_id: ChatSessionPk,
    limit: u32,
  ) -> Result<Vec<ChatMessage>, CoreError> {
    let sid = session_id.inner();
    let limit = limit as i64;
    let mut rows = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"SELECT id, session_id, role, content, sources, created_at
               FROM chat_messages WHERE session_id = $1
               ORDER BY created_at DESC LIMIT $2"#,
          )
          .bind(sid)
          .bind(limit)
          .fetch_all(conn)
          .await
        })
      })
      .await?;
    rows.reverse();
    rows.into_iter().map(row_to_message).collect()
  }
}
