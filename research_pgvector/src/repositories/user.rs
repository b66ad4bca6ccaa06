use async_trait::async_trait;
use chrono::Duration;
use sqlx::Row;

use research_core::contracts::repositories::{SessionRepository, UserRepository};
use research_core::error::CoreError;
use research_core::ids::UserPk;
use research_core::models::{CreateUser, User, UserSession};

use crate::exec::PgExec;

pub struct PgUserRepository {
  exec: PgExec,
}

impl PgUserRepository {
  pub fn new(exec: PgExec) -> Self {
    Self { exec }
  }
}

fn row_to_user(row: sqlx::postgres::PgRow) -> Result<User, CoreError> {
  Ok(User {
    id: UserPk::new(row.try_get("id").map_err(CoreError::from_database_error)?),
    email: row.try_get("email").map_err(CoreError::from_database_error)?,
    username: row.try_get("username").map_err(CoreError::from_database_error)?,
    password_hash: row.try_get("password_hash").map_err(CoreError::from_database_error)?,
    full_name: row.try_get("full_name").map_err(CoreError::from_database_error)?,
    is_active: row.try_get("is_active").map_err(CoreError::from_database_error)?,
    is_verified: row.try_get("is_verified").map_err(CoreError::from_database_error)?,
    preferences: row.try_get("preferences").map_err(CoreError::from_database_error)?,
    created_at: row.try_get("created_at").map_err(CoreError::from_database_error)?,
  })
}

#[async_trait]
impl UserRepository for PgUserRepository {
  async fn create(&self, data: &CreateUser) -> Result<User, CoreError> {
    let email = data.email.clone();
    let username = data.username.clone();
    let password_hash = data.password_hash.clone();
    let full_name = data.full_name.clone();

    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"INSERT INTO users (email, username, password_hash, full_name)
               VALUES ($1, $2, $3, $4)
               RETURNING id, email, username, password_hash, full_name,
                         is_active, is_verified, preferences, created_at"#,
          )
          .bind(&email)
          .bind(&username)
          .bind(&password_hash)
          .bind(&full_name)
          .fetch_one(conn)
          .await
        })
      })
      .await?;
    row_to_user(row)
  }

  async fn get_by_id(&self, id: UserPk) -> Result<Option<User>, CoreError> {
    let id = id.inner();
    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"SELECT id, email, username, password_hash, full_name,
                      is_active, is_verified, preferences, created_at
               FROM users WHERE id = $1"#,
          )
          .bind(id)
          .fetch_optional(conn)
          .await
        })
      })
      .await?;
    row.map(row_to_user).transpose()
  }

  async fn get_by_email(&self, email: &str) -> Result<Option<User>, CoreError> {
    let email = email.to_string();
    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"SELECT id, email, username, password_hash, full_name,
                      is_active, is_verified, preferences, created_at
               FROM users WHERE email = $1"#,
          )
          .bind(&email)
          .fetch_optional(conn)
          .await
        })
      })
      .await?;
    row.map(row_to_user).transpose()
  }
}

pub struct PgSessionRepository {
  exec: PgExec,
}

impl PgSessionRepository {
  pub fn new(exec: PgExec) -> Self {
    Self { exec }
  }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
  async fn create(
    &self,
    user_id: UserPk,
    token_hash: &str,
    ttl: Duration,
  ) -> Result<UserSession, CoreError> {
    let uid = user_id.inner();
    let token_hash = token_hash.to_string();
    let expires_at = chrono::Utc::now() + ttl;

    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"INSERT INTO user_sessions (user_id, token_hash, expires_at)
               VALUES ($1, $2, $3)
               RETURNING id, user_id, token_hash, expires_at, ip_address, user_agent, created_at"#,
          )
          .bind(uid)
          .bind(&token_hash)
          .bind(expires_at)
          .fetch_one(conn)
          .await
        })
      })
      .await?;

    Ok(UserSession {
      id: row.try_get("id").map_err(CoreError::from_database_error)?,
      user_id: UserPk::new(row.try_get("user_id").map_err(CoreError::from_database_error)?),
      token_hash: row.try_get("token_hash").map_err(CoreError::from_database_error)?,
      expires_at: row.try_get("expires_at").map_err(CoreError::from_database_error)?,
      ip_address: row.try_get("ip_address").map_err(CoreError::from_database_error)?,
      user_agent: row.try_get("user_agent").map_err(CoreError::from_database_error)?,
      created_at: row.try_get("created_at").map_err(CoreError::from_database_error)?,
    })
  }

  async fn get_by_token_hash(&self, token_hash: &str) -> Result<Option<UserSession>, CoreError> {
    let token_hash = token_hash.to_string();
    let row = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query(
            r#"SELECT id, user_id, token_hash, expires_at, ip_address, user_agent, created_at
               FROM user_sessions WHERE token_hash = $1"#,
          )
          .bind(&token_hash)
          .fetch_optional(conn)
          .await
        })
      })
      .await?;

    row
      .map(|row| {
        Ok(UserSession {
          id: row.try_get("id").map_err(CoreError::from_database_error)?,
          user_id: UserPk::new(row.try_get("user_id").map_err(CoreError::from_database_error)?),
          token_hash: row.try_get("token_hash").map_err(CoreError::from_database_error)?,
          expires_at: row.try_get("expires_at").map_err(CoreError::from_database_error)?,
          ip_address: row.try_get("ip_address").map_err(CoreError::from_database_error)?,
          user_agent: row.try_get("user_agent").map_err(CoreError::from_database_error)?,
          created_at: row.try_get("created_at").map_err(CoreError::from_database_error)?,
        })
      })
      .transpose()
  }

  async fn delete(&self, id: i64) -> Result<bool, CoreError> {
    let result = self
      .exec
      .with(move |conn| {
        Box::pin(async move {
          sqlx::query("DELETE FROM user_sessions WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await
        })
      })
      .await?;
    Ok(result.rows_affected() > 0)
  }
}
